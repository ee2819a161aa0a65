use std::{fmt, sync::Arc};

use aws_types_integration::{
    provider::{
        error::CredentialsError, future::ProvideCredentials as ProvideCredentialsFut,
        ProvideCredentials,
    },
    Credentials,
};

use crate::{AssumedCredentials, MfaPrompt, SessionDuration, SessionManager, SessionSelection};

const PROVIDER_NAME: &str = "awssso";

/// Provide credentials for a [`SessionSelection`] via a [`SessionManager`].
///
/// Cached credentials are used while valid. Otherwise the role is assumed again, signing in with
/// the browser first if the bearer token has expired. Any failure is converted to
/// [`CredentialsError::ProviderError`], which stops resolution if the provider is part of a chain.
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # use aws_types_integration as aws_credential_types;
/// # fn session() -> awssso::SessionManager<fn() -> std::future::Ready<Result<String, std::convert::Infallible>>> { unimplemented!() }
/// use std::sync::Arc;
///
/// use aws_credential_types::provider::ProvideCredentials;
/// use awssso::{SessionCredentialsProvider, SessionSelection};
///
/// let provider = SessionCredentialsProvider::new(
///     Arc::new(session()),
///     SessionSelection::new("ins-123", "p-456"),
/// );
///
/// // e.g. pass to `aws_config::ConfigLoader::credentials_provider`
/// let creds = provider.provide_credentials().await?;
/// # Ok(()) }
/// ```
pub struct SessionCredentialsProvider<V> {
    session: Arc<SessionManager<V>>,
    selection: SessionSelection,
    duration: Option<SessionDuration>,
}

impl<V> SessionCredentialsProvider<V> {
    /// Construct a provider for `selection`.
    pub fn new(session: Arc<SessionManager<V>>, selection: SessionSelection) -> Self {
        Self {
            session,
            selection,
            duration: None,
        }
    }

    /// Request a session duration other than the identity provider's default.
    #[must_use]
    pub fn with_duration(self, duration: SessionDuration) -> Self {
        Self {
            duration: Some(duration),
            ..self
        }
    }
}

impl<V> fmt::Debug for SessionCredentialsProvider<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionCredentialsProvider")
            .field("session", &self.session)
            .field("selection", &self.selection)
            .field("duration", &self.duration)
            .finish()
    }
}

impl<V> ProvideCredentials for SessionCredentialsProvider<V>
where
    V: MfaPrompt + 'static,
{
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFut<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFut::new(async {
            let creds = self
                .session
                .ensure_credentials(&self.selection, false, self.duration)
                .await
                .map(Into::into)
                .map_err(CredentialsError::provider_error)?;

            Ok(creds)
        })
    }
}

impl From<AssumedCredentials> for Credentials {
    fn from(creds: AssumedCredentials) -> Self {
        Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            Some(creds.session_token),
            Some(creds.expiration.into()),
            PROVIDER_NAME,
        )
    }
}
