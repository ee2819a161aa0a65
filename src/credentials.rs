use std::fmt;

use chrono::{DateTime, Utc};

use crate::store::Expiry;

/// Temporary AWS credentials obtained by assuming a role.
///
/// The fields of this struct are obviously pretty sensitive, and should be handled with care.
/// The secret and session token are not printed in `Debug` output.
///
/// The serialized form uses the field names of the STS API (`AccessKeyId`, `Expiration`, etc.),
/// with `Expiration` as an RFC 3339 timestamp.
#[derive(Clone, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumedCredentials {
    /// The access key ID.
    pub access_key_id: String,

    /// The secret access key.
    pub secret_access_key: String,

    /// The session token.
    pub session_token: String,

    /// When the credentials expire.
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for AssumedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AssumedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl Expiry for AssumedCredentials {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expiration
    }
}

/// A bearer token for the SSO portal, as issued by a browser sign in.
///
/// Serializes as `{"value": ..., "expiry": <unix seconds>}`.
#[derive(Clone, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BearerToken {
    /// The opaque token value.
    pub value: String,

    /// When the token expires.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expiry: DateTime<Utc>,
}

impl BearerToken {
    /// Construct a new token.
    pub fn new(value: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expiry,
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl Expiry for BearerToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expiry
    }
}
