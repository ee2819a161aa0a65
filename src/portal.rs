//! Cleaned up AWS SSO portal API.
//!
//! This is the API behind the SSO user portal's web UI. It is authenticated with the bearer token
//! issued when signing in through the browser.

use std::{fmt, time::Duration};

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{BearerToken, Region};

/// The header carrying the portal bearer token.
const BEARER_HEADER: &str = "x-amz-sso_bearer_token";

/// The application name of account-granting portal applications.
const ACCOUNT_APPLICATION: &str = "AWS Account";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for the SSO portal API.
///
/// Clients are cheap to clone. A client is only usable once it has a token, see
/// [`with_token`](Self::with_token).
#[derive(Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: Url,
    region: Region,
    token: Option<String>,
}

/// An account-granting application instance in the portal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountListing {
    /// The portal's instance ID.
    pub id: String,

    /// The display name.
    pub name: String,

    /// The AWS account ID, if the portal reported one.
    pub account_id: Option<String>,
}

/// A role profile within an account instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileListing {
    /// The portal's profile ID.
    pub id: String,

    /// The display name, usually the role name.
    pub name: String,

    /// Where to fetch a SAML assertion for the profile.
    pub url: String,
}

/// The portal's `{"result": [...]}` listing envelope.
#[derive(Deserialize)]
struct Listing<T> {
    result: Option<Vec<T>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppInstance {
    id: String,
    #[serde(default)]
    name: String,
    application_name: Option<String>,
    search_metadata: Option<SearchMetadata>,
}

#[derive(Deserialize)]
struct SearchMetadata {
    #[serde(rename = "AccountId")]
    account_id: Option<String>,
}

#[derive(Deserialize)]
struct AppProfile {
    id: String,
    #[serde(default)]
    name: String,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssertionDocument {
    encoded_response: Option<String>,
}

impl PortalClient {
    /// Construct a client for the portal in the given region.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client can't be initialised.
    pub fn new(region: Region) -> Result<Self, PortalError> {
        let base_url = format!("https://portal.sso.{region}.amazonaws.com/")
            .parse()
            .map_err(|error| PortalError::Shape {
                message: format!("invalid portal URL for region {region}: {error}"),
            })?;
        Self::with_base_url(region, base_url)
    }

    /// Construct a client for a portal at a custom URL.
    ///
    /// The region is only used in error messages.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client can't be initialised.
    pub fn with_base_url(region: Region, mut base_url: Url) -> Result<Self, PortalError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(PortalError::Request)?;
        Ok(Self {
            http,
            base_url,
            region,
            token: None,
        })
    }

    /// A copy of this client that authenticates with the given token.
    #[must_use]
    pub fn with_token(&self, token: &BearerToken) -> Self {
        Self {
            token: Some(token.value.clone()),
            ..self.clone()
        }
    }

    /// Describe the signed in user.
    ///
    /// # Errors
    ///
    /// See [`PortalError`].
    pub async fn whoami(&self) -> Result<Value, PortalError> {
        self.get(self.endpoint("token/whoAmI")?).await
    }

    /// List the account instances the user can access.
    ///
    /// Other kinds of portal application are filtered out.
    ///
    /// # Errors
    ///
    /// See [`PortalError`].
    pub async fn list_accounts(&self) -> Result<Vec<AccountListing>, PortalError> {
        let response: Listing<AppInstance> =
            self.get(self.endpoint("instance/appinstances")?).await?;
        let results = response.result.ok_or_else(|| PortalError::Shape {
            message: format!(
                "no application instances found in region {}: check region setting",
                self.region
            ),
        })?;

        Ok(results
            .into_iter()
            .filter(|instance| instance.application_name.as_deref() == Some(ACCOUNT_APPLICATION))
            .map(|instance| AccountListing {
                id: instance.id,
                name: instance.name,
                account_id: instance
                    .search_metadata
                    .and_then(|metadata| metadata.account_id),
            })
            .collect())
    }

    /// List the role profiles available in an account instance.
    ///
    /// # Errors
    ///
    /// See [`PortalError`].
    pub async fn list_profiles(&self, instance_id: &str) -> Result<Vec<ProfileListing>, PortalError> {
        let url = self.endpoint(&format!("instance/appinstance/{instance_id}/profiles"))?;
        let response: Listing<AppProfile> = self.get(url).await?;
        let results = response.result.ok_or_else(|| PortalError::Shape {
            message: format!(
                "no profiles found for instance id {instance_id} in region {}: check region setting",
                self.region
            ),
        })?;

        Ok(results
            .into_iter()
            .map(|profile| ProfileListing {
                id: profile.id,
                name: profile.name,
                url: profile.url,
            })
            .collect())
    }

    /// Fetch a base64-encoded SAML assertion for a profile.
    ///
    /// # Errors
    ///
    /// See [`PortalError`].
    pub async fn fetch_assertion(
        &self,
        instance_id: &str,
        profile_id: &str,
    ) -> Result<String, PortalError> {
        let profile = self
            .list_profiles(instance_id)
            .await?
            .into_iter()
            .find(|profile| profile.id == profile_id)
            .ok_or_else(|| PortalError::ProfileNotFound {
                instance_id: instance_id.to_string(),
                profile_id: profile_id.to_string(),
            })?;

        let url = self
            .base_url
            .join(&profile.url)
            .map_err(|error| PortalError::Shape {
                message: format!("invalid assertion URL {:?} for profile {profile_id}: {error}", profile.url),
            })?;
        let response: AssertionDocument = self.get(url).await?;

        response
            .encoded_response
            .ok_or_else(|| PortalError::Shape {
                message: format!(
                    "no SAML assertion returned for profile {profile_id} of instance id {instance_id}"
                ),
            })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PortalError> {
        self.base_url.join(path).map_err(|error| PortalError::Shape {
            message: format!("invalid portal path {path:?}: {error}"),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, PortalError> {
        let token = self.token.as_deref().ok_or(PortalError::MissingToken)?;

        debug!(%url, "portal request");
        let response = self
            .http
            .get(url.clone())
            .header(BEARER_HEADER, token)
            .send()
            .await
            .map_err(PortalError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::Status { status, url });
        }

        response.json().await.map_err(|error| PortalError::Shape {
            message: format!("invalid JSON response from {url}: {error}"),
        })
    }
}

impl fmt::Debug for PortalClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortalClient")
            .field("base_url", &self.base_url)
            .field("region", &self.region)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

/// An error calling the portal API.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// The request could not be sent, or timed out.
    #[error("portal request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The portal responded with an error status.
    #[error("portal returned {status} for {url}{}", status_hint(.status))]
    Status {
        /// The response status.
        status: StatusCode,
        /// The requested URL.
        url: Url,
    },

    /// The portal responded, but not with what was expected.
    #[error("unexpected portal response: {message}")]
    Shape {
        /// A description naming the likely cause.
        message: String,
    },

    /// The requested profile isn't available in the instance.
    #[error("profile {profile_id} not found in instance id {instance_id}")]
    ProfileNotFound {
        /// The instance that was searched.
        instance_id: String,
        /// The profile that was requested.
        profile_id: String,
    },

    /// The client was used before a token was set.
    #[error("portal client has no bearer token")]
    MissingToken,
}

fn status_hint(status: &StatusCode) -> &'static str {
    match *status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            " (the bearer token may be expired or for another region)"
        }
        StatusCode::NOT_FOUND => " (check the instance id and region)",
        _ => "",
    }
}
