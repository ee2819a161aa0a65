//! Cleaned up AWS STS API, and role assumption with SAML assertions.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sts::{error::ProvideErrorMetadata, operation::RequestId};
use chrono::DateTime;
use tracing::{debug, info};

use crate::{AssumedCredentials, Region, SamlAssertion};

/// The shortest role session STS allows, in seconds.
pub const MIN_SESSION_DURATION: i32 = 900;

/// The longest role session STS allows, in seconds.
pub const MAX_SESSION_DURATION: i32 = 43200;

/// Error codes meaning STS rejected the assertion itself, rather than the request failing.
const VALIDATION_CODES: &[&str] = &[
    "ValidationError",
    "InvalidIdentityToken",
    "IDPRejectedClaim",
    "ExpiredTokenException",
];

/// A role or console session duration, within the range STS allows.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionDuration(i32);

impl SessionDuration {
    /// Construct a duration from a number of seconds.
    ///
    /// # Errors
    ///
    /// Fails if `seconds` is outside 900–43200.
    pub fn new(seconds: i32) -> Result<Self, InvalidSessionDuration> {
        if (MIN_SESSION_DURATION..=MAX_SESSION_DURATION).contains(&seconds) {
            Ok(Self(seconds))
        } else {
            Err(InvalidSessionDuration(seconds))
        }
    }

    /// Construct a duration, clamping `seconds` into the allowed range.
    #[must_use]
    pub fn clamped(seconds: i32) -> Self {
        Self(seconds.clamp(MIN_SESSION_DURATION, MAX_SESSION_DURATION))
    }

    /// The duration in seconds.
    #[must_use]
    pub fn seconds(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionDuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A session duration outside the range STS allows.
#[derive(Debug, thiserror::Error)]
#[error("session duration must be between {MIN_SESSION_DURATION} and {MAX_SESSION_DURATION} seconds, got {0}")]
pub struct InvalidSessionDuration(i32);

/// A request to exchange a SAML assertion for credentials.
#[derive(Clone, Debug)]
pub struct AssumeRoleWithSamlRequest {
    /// The role to assume.
    pub role_arn: String,

    /// The SAML provider in IAM.
    pub principal_arn: String,

    /// The base64-encoded assertion.
    pub saml_assertion: String,

    /// The session duration.
    pub duration: SessionDuration,
}

/// The STS operation used to assume roles.
///
/// [`Client`] is the real implementation. Other implementations are useful for testing.
#[async_trait]
pub trait StsApi: Send + Sync {
    /// Call `AssumeRoleWithSAML`.
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<AssumedCredentials, AssumeRoleError>;
}

/// An AWS STS client.
///
/// `AssumeRoleWithSAML` doesn't need AWS credentials: the caller's identity is established by the
/// SAML provider's trust, so the client is built without a credentials provider.
pub struct Client {
    inner: aws_sdk_sts::Client,
}

impl Client {
    /// Construct a client for STS in `region`, optionally at a custom endpoint.
    #[must_use]
    pub fn new(region: &Region, endpoint_url: Option<&str>) -> Self {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region.0.clone())
            .build();
        let mut config = aws_sdk_sts::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = endpoint_url {
            config = config.endpoint_url(endpoint_url);
        }

        Self {
            inner: aws_sdk_sts::Client::from_conf(config.build()),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[async_trait]
impl StsApi for Client {
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<AssumedCredentials, AssumeRoleError> {
        let output = self
            .inner
            .assume_role_with_saml()
            .role_arn(request.role_arn)
            .principal_arn(request.principal_arn)
            .saml_assertion(request.saml_assertion)
            .duration_seconds(request.duration.seconds())
            .send()
            .await
            .map_err(|error| {
                let detail = error.to_string();
                let error = error.into_service_error();
                AssumeRoleError::classify(
                    error.code(),
                    error.message().unwrap_or(detail.as_str()),
                    error.request_id(),
                )
            })?;

        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid AssumeRoleWithSAML response: ", $msg)
            };
        }

        let request_id = output.request_id().map(str::to_string);
        let credentials = output.credentials().ok_or_else(|| {
            AssumeRoleError::classify(None, invalid_res!("missing credentials"), request_id.as_deref())
        })?;
        let expiration = credentials.expiration();
        let expiration = DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                AssumeRoleError::classify(
                    None,
                    invalid_res!("expiration out of range"),
                    request_id.as_deref(),
                )
            })?;

        Ok(AssumedCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

/// Exchanges SAML assertions for credentials.
#[derive(Clone)]
pub struct RoleAssumer {
    sts: Arc<dyn StsApi>,
}

impl RoleAssumer {
    /// Construct a role assumer calling the given STS implementation.
    pub fn new(sts: Arc<dyn StsApi>) -> Self {
        Self { sts }
    }

    /// Assume the role granted by `assertion`.
    ///
    /// The session lasts for `duration` if given, or else for the assertion's default duration.
    /// Either way, the duration is clamped to the range STS allows.
    ///
    /// # Errors
    ///
    /// See [`AssumeRoleError`]. Errors are never retried.
    pub async fn assume_role(
        &self,
        assertion: &SamlAssertion,
        duration: Option<SessionDuration>,
    ) -> Result<AssumedCredentials, AssumeRoleError> {
        let duration = duration.unwrap_or_else(|| {
            SessionDuration::clamped(assertion.default_duration_seconds())
        });
        info!(
            role_arn = assertion.role_arn(),
            duration = duration.seconds(),
            "assuming role with SAML"
        );
        debug!(principal_arn = assertion.principal_arn(), "SAML provider");

        let credentials = self
            .sts
            .assume_role_with_saml(AssumeRoleWithSamlRequest {
                role_arn: assertion.role_arn().to_string(),
                principal_arn: assertion.principal_arn().to_string(),
                saml_assertion: assertion.encoded_payload().to_string(),
                duration,
            })
            .await?;

        info!(
            access_key_id = %credentials.access_key_id,
            expiration = %credentials.expiration,
            "assumed role"
        );
        Ok(credentials)
    }
}

impl fmt::Debug for RoleAssumer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RoleAssumer").finish_non_exhaustive()
    }
}

/// An error assuming a role.
///
/// Both kinds carry the STS request ID, for support traceability.
#[derive(Debug, thiserror::Error)]
pub enum AssumeRoleError {
    /// STS rejected the SAML assertion, e.g. due to its signature, claims, or requested duration.
    #[error("SAML assertion rejected by STS: {message} (request id: {request_id})")]
    Validation {
        /// The error message from STS.
        message: String,
        /// The STS request ID.
        request_id: String,
    },

    /// Any other STS client error.
    #[error("STS error{}: {message} (request id: {request_id})", .code.as_deref().map(|code| format!(" {code}")).unwrap_or_default())]
    Api {
        /// The error code from STS, if any.
        code: Option<String>,
        /// The error message.
        message: String,
        /// The STS request ID.
        request_id: String,
    },
}

impl AssumeRoleError {
    /// Sort an STS error into a validation failure or a generic API error.
    ///
    /// The request ID is `"unknown"` if STS didn't supply one.
    pub(crate) fn classify(code: Option<&str>, message: &str, request_id: Option<&str>) -> Self {
        let request_id = request_id
            .filter(|request_id| !request_id.is_empty())
            .unwrap_or("unknown")
            .to_string();
        let message = message.to_string();
        match code {
            Some(code) if VALIDATION_CODES.contains(&code) => Self::Validation {
                message,
                request_id,
            },
            code => Self::Api {
                code: code.map(str::to_string),
                message,
                request_id,
            },
        }
    }

    /// The STS request ID.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Validation { request_id, .. } | Self::Api { request_id, .. } => request_id,
        }
    }
}
