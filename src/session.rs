use std::{convert::Infallible, fmt, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    login::{IdentityBrowserSession, LoginError, MfaPrompt},
    portal::{AccountListing, PortalClient, PortalError, ProfileListing},
    saml::{SamlAssertion, SamlError},
    store::{Expiry, SecretStore, StoreError},
    sts::{AssumeRoleError, RoleAssumer, SessionDuration},
    AssumedCredentials, BearerToken, Identity, SessionManagerBuilder, SessionSelection,
};

const PASSWORD: &str = "credentials";
const TOKEN: &str = "authn-token";

/// A configured SSO session for one identity.
///
/// The manager keeps two independent caches in its [`SecretStore`]: the portal bearer token, and
/// the role credentials of each [`SessionSelection`]. Each is refreshed only when missing, expired,
/// or explicitly forced.
///
/// Construct one with [`SessionManager::builder`].
#[allow(clippy::module_name_repetitions)]
pub struct SessionManager<V> {
    identity: Identity,
    store: Arc<dyn SecretStore>,
    browser: IdentityBrowserSession<V>,
    portal: PortalClient,
    assumer: RoleAssumer,
    token_refresh: Mutex<()>,
    credentials_refresh: Mutex<()>,
}

impl SessionManager<Infallible> {
    /// Construct a builder for a session manager.
    #[must_use]
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }
}

impl<V> SessionManager<V>
where
    V: MfaPrompt,
{
    pub(crate) fn from_parts(
        identity: Identity,
        store: Arc<dyn SecretStore>,
        browser: IdentityBrowserSession<V>,
        portal: PortalClient,
        assumer: RoleAssumer,
    ) -> Self {
        Self {
            identity,
            store,
            browser,
            portal,
            assumer,
            token_refresh: Mutex::new(()),
            credentials_refresh: Mutex::new(()),
        }
    }

    /// The identity this session signs in as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The stored identity provider password, if any.
    ///
    /// # Errors
    ///
    /// Fails if the secret store can't be read.
    pub async fn password(&self) -> Result<Option<String>, StoreError> {
        self.store.get(&self.identity, PASSWORD).await
    }

    /// Store the identity provider password, returning whether it changed.
    ///
    /// The store is only written if the password differs from the stored one.
    ///
    /// # Errors
    ///
    /// Fails if the secret store can't be read or written.
    pub async fn set_password(&self, password: &str) -> Result<bool, StoreError> {
        if self.password().await?.as_deref() == Some(password) {
            return Ok(false);
        }
        self.store.set(&self.identity, PASSWORD, password).await?;
        debug!(username = %self.identity.username, "stored password");
        Ok(true)
    }

    /// The cached bearer token, whether or not it has expired.
    ///
    /// # Errors
    ///
    /// Fails if the secret store can't be read or holds an unreadable token.
    pub async fn cached_token(&self) -> Result<Option<BearerToken>, StoreError> {
        self.store
            .get(&self.identity, TOKEN)
            .await?
            .map(|json| {
                serde_json::from_str(&json).map_err(|error| StoreError::Invalid {
                    kind: TOKEN.to_string(),
                    message: error.to_string(),
                })
            })
            .transpose()
    }

    /// The cached credentials for `selection`, whether or not they have expired.
    ///
    /// # Errors
    ///
    /// Fails if the secret store can't be read or holds unreadable credentials.
    pub async fn cached_credentials(
        &self,
        selection: &SessionSelection,
    ) -> Result<Option<AssumedCredentials>, StoreError> {
        let kind = selection.secret_kind();
        self.store
            .get(&self.identity, &kind)
            .await?
            .map(|json| {
                serde_json::from_str(&json).map_err(|error| StoreError::Invalid {
                    kind: kind.clone(),
                    message: error.to_string(),
                })
            })
            .transpose()
    }

    /// Return a valid bearer token, signing in with the browser if necessary.
    ///
    /// With `force`, a sign in happens even if the cached token is still valid. Cached credentials
    /// are left alone either way.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn ensure_token(&self, force: bool) -> Result<BearerToken, SessionError<V::Error>> {
        let _refresh = self.token_refresh.lock().await;

        if !force {
            match self.cached_token().await? {
                Some(token) if !token.is_expired() => {
                    debug!(expiry = %token.expiry, "using cached bearer token");
                    return Ok(token);
                }
                Some(token) => debug!(expiry = %token.expiry, "cached bearer token expired"),
                None => debug!("no cached bearer token"),
            }
        }

        let password = self
            .password()
            .await?
            .ok_or_else(|| SessionError::MissingPassword {
                username: self.identity.username.clone(),
            })?;
        let token = self.browser.login(&self.identity, &password).await?;

        // One write, so the value and its expiry are always replaced together.
        let json = serde_json::to_string(&token).map_err(|error| StoreError::Invalid {
            kind: TOKEN.to_string(),
            message: error.to_string(),
        })?;
        self.store.set(&self.identity, TOKEN, &json).await?;
        Ok(token)
    }

    /// Return valid credentials for `selection`, assuming the role if necessary.
    ///
    /// With `force`, the role is assumed even if the cached credentials are still valid; the
    /// bearer token is only refreshed if it has expired. `duration` overrides the session duration
    /// requested by the identity provider.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn ensure_credentials(
        &self,
        selection: &SessionSelection,
        force: bool,
        duration: Option<SessionDuration>,
    ) -> Result<AssumedCredentials, SessionError<V::Error>> {
        let _refresh = self.credentials_refresh.lock().await;

        if !force {
            match self.cached_credentials(selection).await? {
                Some(credentials) if !credentials.is_expired() => {
                    debug!(
                        instance_id = %selection.instance_id,
                        profile_id = %selection.profile_id,
                        expiration = %credentials.expiration,
                        "using cached credentials"
                    );
                    return Ok(credentials);
                }
                Some(credentials) => {
                    debug!(expiration = %credentials.expiration, "cached credentials expired");
                }
                None => debug!("no cached credentials"),
            }
        }

        let token = self.ensure_token(false).await?;
        let assertion = self
            .portal
            .with_token(&token)
            .fetch_assertion(&selection.instance_id, &selection.profile_id)
            .await?;
        let assertion = SamlAssertion::parse(&assertion)?;
        let credentials = self.assumer.assume_role(&assertion, duration).await?;

        let json = serde_json::to_string(&credentials).map_err(|error| StoreError::Invalid {
            kind: selection.secret_kind(),
            message: error.to_string(),
        })?;
        self.store
            .set(&self.identity, &selection.secret_kind(), &json)
            .await?;
        info!(
            instance_id = %selection.instance_id,
            profile_id = %selection.profile_id,
            expiration = %credentials.expiration,
            "refreshed credentials"
        );
        Ok(credentials)
    }

    /// List the accounts available to the user.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn list_accounts(&self) -> Result<Vec<AccountListing>, SessionError<V::Error>> {
        let token = self.ensure_token(false).await?;
        Ok(self.portal.with_token(&token).list_accounts().await?)
    }

    /// List the role profiles available in an account instance.
    ///
    /// # Errors
    ///
    /// See [`SessionError`].
    pub async fn list_profiles(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ProfileListing>, SessionError<V::Error>> {
        let token = self.ensure_token(false).await?;
        Ok(self
            .portal
            .with_token(&token)
            .list_profiles(instance_id)
            .await?)
    }
}

impl<V> fmt::Debug for SessionManager<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("identity", &self.identity)
            .field("browser", &self.browser)
            .field("portal", &self.portal)
            .field("assumer", &self.assumer)
            .finish_non_exhaustive()
    }
}

/// An error that occurred while obtaining a token or credentials.
///
/// The type parameter is the error type of the [`MfaPrompt`], so that prompt failures can be
/// inspected without downcasting.
#[derive(Debug, thiserror::Error)]
pub enum SessionError<P: std::error::Error + Send + Sync + 'static> {
    /// Signing in through the browser failed.
    #[error(transparent)]
    Login(#[from] LoginError<P>),

    /// The secret store failed, or holds unreadable values.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A portal API call failed.
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// The portal returned an unusable SAML assertion.
    #[error(transparent)]
    Saml(#[from] SamlError),

    /// STS refused to issue credentials.
    #[error(transparent)]
    AssumeRole(#[from] AssumeRoleError),

    /// A sign in was needed but no password is stored.
    #[error("sign in failed: no password stored for {username}, configure one first")]
    MissingPassword {
        /// The user without a password.
        username: String,
    },
}
