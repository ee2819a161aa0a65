use std::{convert::Infallible, future::Future, path::PathBuf, sync::Arc};

use futures::FutureExt;
use url::Url;

use crate::{
    browser::BrowserLauncher,
    login::{IdentityBrowserSession, InterruptSource, LoginOptions, LoginTimeouts, MfaPrompt},
    portal::{PortalClient, PortalError},
    store::{KeyringStore, SecretStore},
    sts::{self, RoleAssumer, StsApi},
    Identity, SessionManager, CLIENT_NAME,
};

/// Builder for [`SessionManager`].
///
/// A browser launcher and an MFA prompt must be supplied; everything else has a default.
///
/// # Example
///
/// ```no_run
/// # fn launcher() -> std::sync::Arc<dyn awssso::BrowserLauncher> { unimplemented!() }
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::{convert::Infallible, fmt, sync::Arc};
///
/// use awssso::{Identity, MemoryStore, Region, SessionManager};
///
/// let identity = Identity::new(
///     "alice",
///     "https://myorg.awsapps.com/start/".parse()?,
///     Region::new("eu-west-1"),
/// );
///
/// let session = SessionManager::builder()
///     // keep secrets in memory instead of on disk
///     .secret_store(Arc::new(MemoryStore::new()))
///     .browser(launcher())
///     // show the browser window
///     .headless(false)
///     // always error if asked for an MFA code (sign in still possible for trusted devices)
///     .mfa_prompt(|| async move { Err::<String, _>(NonInteractive) })
///     .build(identity)?;
///
/// #[derive(Debug)]
/// struct NonInteractive;
///
/// impl fmt::Display for NonInteractive {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "interactive sign in required")
///     }
/// }
///
/// impl std::error::Error for NonInteractive {}
/// # Ok(())
/// # }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct SessionManagerBuilder<V = Infallible> {
    secret_store: Option<Arc<dyn SecretStore>>,
    browser: Option<Arc<dyn BrowserLauncher>>,
    cookie_dir: Option<PathBuf>,
    options: LoginOptions,
    portal_url: Option<Url>,
    sts: Option<Arc<dyn StsApi>>,
    sts_endpoint: Option<String>,
    interrupt: Option<InterruptSource>,
    mfa_prompt: Option<V>,
}

impl SessionManagerBuilder<Infallible> {
    /// Construct a [`SessionManager`] builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SessionManagerBuilder<Infallible> {
    fn default() -> Self {
        Self {
            secret_store: None,
            browser: None,
            cookie_dir: None,
            options: LoginOptions::default(),
            portal_url: None,
            sts: None,
            sts_endpoint: None,
            interrupt: None,
            mfa_prompt: None,
        }
    }
}

impl<V> SessionManagerBuilder<V> {
    /// Set the secret store.
    ///
    /// By default, secrets are kept in the platform credential vault (see [`KeyringStore`]).
    /// [`FileStore`](crate::FileStore) and [`MemoryStore`](crate::MemoryStore) are alternatives
    /// for hosts without one.
    #[must_use]
    pub fn secret_store(self, store: Arc<dyn SecretStore>) -> Self {
        Self {
            secret_store: Some(store),
            ..self
        }
    }

    /// Set the browser used to sign in. This is required.
    #[must_use]
    pub fn browser(self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            browser: Some(launcher),
            ..self
        }
    }

    /// Set the directory where browser cookies are kept between sign ins.
    ///
    /// Cookies are stored in a directory called `awssso@0.1` under the user's cache directory by
    /// default (see [`dirs_next::cache_dir`]).
    #[must_use]
    pub fn cookie_dir(self, path: impl Into<PathBuf>) -> Self {
        Self {
            cookie_dir: Some(path.into()),
            ..self
        }
    }

    /// Whether to run the browser without a window. Defaults to `true`.
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.options.headless = headless;
        self
    }

    /// Whether to navigate back to the pre sign in page once signed in. Defaults to `false`.
    #[must_use]
    pub fn restore(mut self, restore: bool) -> Self {
        self.options.restore = restore;
        self
    }

    /// Whether to ask the identity provider to trust this device after MFA. Defaults to `true`.
    #[must_use]
    pub fn trust_device(mut self, trust_device: bool) -> Self {
        self.options.trust_device = trust_device;
        self
    }

    /// Set bounds on waiting for the identity provider.
    #[must_use]
    pub fn login_timeouts(mut self, timeouts: LoginTimeouts) -> Self {
        self.options.timeouts = timeouts;
        self
    }

    /// Call the portal API at a custom URL instead of `https://portal.sso.<region>.amazonaws.com/`.
    #[must_use]
    pub fn portal_url(self, url: Url) -> Self {
        Self {
            portal_url: Some(url),
            ..self
        }
    }

    /// Use a custom STS implementation.
    #[must_use]
    pub fn sts(self, sts: Arc<dyn StsApi>) -> Self {
        Self {
            sts: Some(sts),
            ..self
        }
    }

    /// Call STS at a custom endpoint. Ignored if a custom implementation is set with
    /// [`sts`](Self::sts).
    #[must_use]
    pub fn sts_endpoint(self, url: impl Into<String>) -> Self {
        Self {
            sts_endpoint: Some(url.into()),
            ..self
        }
    }

    /// Abandon a browser sign in when a future from `interrupt` completes.
    ///
    /// `interrupt` is called at the start of each sign in. Without one, sign in only ends on
    /// success, failure or timeout. Listening for Ctrl-C is left to the caller:
    ///
    /// ```no_run
    /// # fn launcher() -> std::sync::Arc<dyn awssso::BrowserLauncher> { unimplemented!() }
    /// # fn identity() -> awssso::Identity { unimplemented!() }
    /// # fn main() -> Result<(), awssso::BuildError> {
    /// use std::convert::Infallible;
    ///
    /// let session = awssso::SessionManager::builder()
    ///     .browser(launcher())
    ///     .interrupt(|| async {
    ///         let _ = tokio::signal::ctrl_c().await;
    ///     })
    ///     .mfa_prompt(|| async { Ok::<_, Infallible>("123456".to_string()) })
    ///     .build(identity())?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn interrupt<F, Fut>(self, interrupt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            interrupt: Some(Arc::new(move || interrupt().boxed())),
            ..self
        }
    }

    /// Set the MFA prompt.
    ///
    /// The prompt is only invoked when the identity provider asks for a code. Trusted devices
    /// usually aren't asked.
    #[must_use]
    pub fn mfa_prompt<NewV>(self, mfa_prompt: NewV) -> SessionManagerBuilder<NewV>
    where
        NewV: MfaPrompt,
    {
        SessionManagerBuilder {
            secret_store: self.secret_store,
            browser: self.browser,
            cookie_dir: self.cookie_dir,
            options: self.options,
            portal_url: self.portal_url,
            sts: self.sts,
            sts_endpoint: self.sts_endpoint,
            interrupt: self.interrupt,
            mfa_prompt: Some(mfa_prompt),
        }
    }
}

impl<V> SessionManagerBuilder<V>
where
    V: MfaPrompt,
{
    /// Build a [`SessionManager`] for `identity`.
    ///
    /// # Errors
    ///
    /// See [`BuildError`].
    pub fn build(self, identity: Identity) -> Result<SessionManager<V>, BuildError> {
        // `Infallible` isn't an `MfaPrompt`, so this impl is only reachable after `mfa_prompt`
        // swapped the type parameter, and that also filled the field.
        let mfa_prompt = self.mfa_prompt.expect("mfa_prompt must be set");

        let launcher = self.browser.ok_or(BuildError::MissingBrowser)?;
        let store = self
            .secret_store
            .unwrap_or_else(|| Arc::new(KeyringStore::new()));

        let region = identity.sso_region.clone();
        let portal = match self.portal_url {
            Some(url) => PortalClient::with_base_url(region.clone(), url)?,
            None => PortalClient::new(region.clone())?,
        };
        let sts: Arc<dyn StsApi> = match self.sts {
            Some(sts) => sts,
            None => Arc::new(sts::Client::new(&region, self.sts_endpoint.as_deref())),
        };

        let mut browser = IdentityBrowserSession::new(
            launcher,
            self.cookie_dir.or_else(default_cookie_dir),
            mfa_prompt,
            self.options,
        );
        if let Some(interrupt) = self.interrupt {
            browser = browser.with_interrupt(interrupt);
        }

        Ok(SessionManager::from_parts(
            identity,
            store,
            browser,
            portal,
            RoleAssumer::new(sts),
        ))
    }
}

fn default_cookie_dir() -> Option<PathBuf> {
    dirs_next::cache_dir().map(|mut path| {
        path.push(CLIENT_NAME);
        path
    })
}

/// An error building a [`SessionManager`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No browser launcher was supplied.
    #[error("a browser launcher must be set to sign in")]
    MissingBrowser,

    /// The portal client couldn't be initialised.
    #[error(transparent)]
    Portal(#[from] PortalError),
}
