use std::hash::{Hash, Hasher};

use url::Url;

use crate::{store::Md5Hasher, Region};

/// A user of an AWS SSO portal.
///
/// Secrets and browser cookies are scoped to an identity, so that several users or portals can be
/// used side by side without sharing state.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Identity {
    /// The user name used to sign in to the identity provider.
    pub username: String,

    /// The URL of the identity provider's sign in page, e.g. `https://myorg.awsapps.com/start/`.
    pub idp_url: Url,

    /// The AWS region in which SSO was set up.
    pub sso_region: Region,
}

impl Identity {
    /// Construct a new identity.
    pub fn new(username: impl Into<String>, idp_url: Url, sso_region: Region) -> Self {
        Self {
            username: username.into(),
            idp_url,
            sso_region,
        }
    }

    /// The `host[:port]` of the identity provider.
    pub(crate) fn netloc(&self) -> String {
        let host = self.idp_url.host_str().unwrap_or_default();
        match self.idp_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// The secret store service name for a kind of secret.
    pub(crate) fn service_name(&self, kind: &str) -> String {
        format!("{}.{}.{kind}", crate::APP_NAME, self.netloc())
    }

    /// A stable key for this user at this identity provider, used to name the cookie jar.
    pub(crate) fn cookie_jar_key(&self) -> String {
        let mut hasher = Md5Hasher::new();
        format!("{}@{}", self.username, self.idp_url).hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

/// Identifies an account ("instance") and role ("profile") in the SSO portal.
///
/// Each selection has its own cached credentials.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionSelection {
    /// The portal's ID for the account-granting application instance.
    pub instance_id: String,

    /// The portal's ID for the role profile within the instance.
    pub profile_id: String,
}

impl SessionSelection {
    /// Construct a new selection.
    pub fn new(instance_id: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            profile_id: profile_id.into(),
        }
    }

    pub(crate) fn secret_kind(&self) -> String {
        format!("{}.{}.credentials", self.instance_id, self.profile_id)
    }
}
