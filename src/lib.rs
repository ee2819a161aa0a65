#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! Exchange AWS SSO portal sign ins for temporary AWS credentials.
//!
//! A [`SessionManager`] signs in to the SSO user portal with a browser (driven through the
//! [`BrowserLauncher`] capability), keeps the portal's bearer token in a [`SecretStore`], and
//! exchanges SAML assertions from the portal for role credentials with STS. Tokens and credentials
//! are cached until they expire.
//!
//! ```no_run
//! # fn launcher() -> std::sync::Arc<dyn awssso::BrowserLauncher> { unimplemented!() }
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::convert::Infallible;
//!
//! use awssso::{CredentialView, ProfileSource, SessionManager};
//!
//! let profile = ProfileSource::default().load().await?;
//! let selection = profile.selection().ok_or("no role selected")?;
//!
//! let session = SessionManager::builder()
//!     .browser(launcher())
//!     .interrupt(|| async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .mfa_prompt(|| async move {
//!         let mut code = String::new();
//!         std::io::stdin().read_line(&mut code).expect("stdin");
//!         Ok::<_, Infallible>(code)
//!     })
//!     .build(profile.identity())?;
//!
//! let credentials = session.ensure_credentials(&selection, false, None).await?;
//! for export in CredentialView(&credentials).exports() {
//!     println!("{export}");
//! }
//! # Ok(()) }
//! ```

#[cfg_attr(docsrs, doc(cfg(feature = "aws-sdk")))]
#[cfg(feature = "aws-sdk")]
mod aws_sdk;
mod browser;
mod builder;
mod credentials;
mod identity;
mod login;
mod portal;
mod profile;
mod region;
mod saml;
mod session;
mod store;
mod sts;
mod view;

pub use crate::{
    browser::{BrowserDriver, BrowserError, BrowserLauncher, Cookie, PageState},
    builder::{BuildError, SessionManagerBuilder},
    credentials::{AssumedCredentials, BearerToken},
    identity::{Identity, SessionSelection},
    login::{
        IdentityBrowserSession, InterruptSource, LoginError, LoginOptions, LoginTimeouts, MfaPrompt,
    },
    portal::{AccountListing, PortalClient, PortalError, ProfileListing},
    profile::{validate_url, ProfileConfig, ProfileError, ProfileSource},
    region::{InvalidRegion, Region},
    saml::{SamlAssertion, SamlError},
    session::{SessionError, SessionManager},
    store::{Expiry, FileStore, KeyringStore, MemoryStore, SecretStore, StoreError},
    sts::{
        AssumeRoleError, AssumeRoleWithSamlRequest, Client as StsClient, InvalidSessionDuration,
        RoleAssumer, SessionDuration, StsApi, MAX_SESSION_DURATION, MIN_SESSION_DURATION,
    },
    view::{ConsoleError, ConsoleSignIn, CredentialView, CredentialsDocument},
};

#[cfg(feature = "aws-sdk")]
pub use crate::aws_sdk::SessionCredentialsProvider;

/// The prefix of secret store service names.
const APP_NAME: &str = "awssso";

const _: () = assert!(
    const_str::equal!(env!("CARGO_PKG_VERSION_MAJOR"), "0"),
    "client naming scheme needs updated for 1.0"
);
const CLIENT_NAME: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "@",
    "0.",
    env!("CARGO_PKG_VERSION_MINOR")
);
