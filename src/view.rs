//! Output representations of assumed credentials.

use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{AssumedCredentials, SessionDuration};

const FEDERATION_ENDPOINT: &str = "https://signin.aws.amazon.com/federation";
const CONSOLE_DESTINATION: &str = "https://console.aws.amazon.com/";
const JSON_VERSION: u8 = 1;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Renders [`AssumedCredentials`] for the various ways tools consume them.
#[derive(Clone, Copy, Debug)]
pub struct CredentialView<'a>(pub &'a AssumedCredentials);

impl<'a> CredentialView<'a> {
    /// Key/value pairs for an AWS CLI profile.
    #[must_use]
    pub fn cli_pairs(&self) -> [(&'static str, &'a str); 3] {
        [
            ("aws_access_key_id", &self.0.access_key_id),
            ("aws_secret_access_key", &self.0.secret_access_key),
            ("aws_session_token", &self.0.session_token),
        ]
    }

    /// `aws configure` invocations that write the credentials to the given CLI profile.
    #[must_use]
    pub fn cli_commands(&self, aws_profile: &str) -> Vec<Vec<String>> {
        self.cli_pairs()
            .into_iter()
            .map(|(key, value)| {
                ["aws", "configure", "--profile", aws_profile, "set", key, value]
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    /// Environment variables, as understood by AWS SDKs.
    #[must_use]
    pub fn env_pairs(&self) -> [(&'static str, &'a str); 3] {
        [
            ("AWS_ACCESS_KEY_ID", &self.0.access_key_id),
            ("AWS_SECRET_ACCESS_KEY", &self.0.secret_access_key),
            ("AWS_SESSION_TOKEN", &self.0.session_token),
        ]
    }

    /// Shell `export` statements for the environment variables.
    #[must_use]
    pub fn exports(&self) -> Vec<String> {
        self.env_pairs()
            .iter()
            .map(|(key, value)| format!("export {key}={value}"))
            .collect()
    }

    /// A JSON document in the format of the AWS CLI's `credential_process`.
    ///
    /// # Errors
    ///
    /// Serialization does not fail in practice, but the error is passed on rather than hidden.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&CredentialsDocument {
            version: JSON_VERSION,
            credentials: self.0.clone(),
        })
    }
}

/// The JSON document produced by [`CredentialView::to_json`].
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct CredentialsDocument {
    /// The document format version, always 1.
    #[serde(rename = "Version")]
    pub version: u8,

    /// The credentials.
    #[serde(flatten)]
    pub credentials: AssumedCredentials,
}

impl CredentialsDocument {
    /// Parse a document produced by [`CredentialView::to_json`].
    ///
    /// # Errors
    ///
    /// Fails if the JSON is malformed or is missing fields.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// When the credentials expire.
    #[must_use]
    pub fn expiration(&self) -> DateTime<Utc> {
        self.credentials.expiration
    }
}

/// Builds AWS console sign in URLs via the federation endpoint.
#[derive(Clone, Debug)]
pub struct ConsoleSignIn {
    http: reqwest::Client,
    endpoint: Url,
    destination: Url,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleSession<'a> {
    session_id: &'a str,
    session_key: &'a str,
    session_token: &'a str,
}

#[derive(serde::Deserialize)]
struct SigninTokenResponse {
    #[serde(rename = "SigninToken")]
    signin_token: String,
}

impl ConsoleSignIn {
    /// Construct a builder for the public federation endpoint and console.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client can't be initialised.
    pub fn new() -> Result<Self, ConsoleError> {
        let endpoint = FEDERATION_ENDPOINT.parse().map_err(ConsoleError::Url)?;
        let destination = CONSOLE_DESTINATION.parse().map_err(ConsoleError::Url)?;
        Self::with_endpoints(endpoint, destination)
    }

    /// Construct a builder for a custom federation endpoint and console destination.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client can't be initialised.
    pub fn with_endpoints(endpoint: Url, destination: Url) -> Result<Self, ConsoleError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ConsoleError::Request)?;
        Ok(Self {
            http,
            endpoint,
            destination,
        })
    }

    /// Obtain a one-time sign in token for `credentials` and return the console sign in URL.
    ///
    /// # Errors
    ///
    /// See [`ConsoleError`].
    pub async fn url(
        &self,
        credentials: &AssumedCredentials,
        session_duration: Option<SessionDuration>,
    ) -> Result<Url, ConsoleError> {
        let session = serde_json::to_string(&ConsoleSession {
            session_id: &credentials.access_key_id,
            session_key: &credentials.secret_access_key,
            session_token: &credentials.session_token,
        })
        .map_err(ConsoleError::Json)?;

        let mut query = vec![
            ("Action", "getSigninToken".to_string()),
            ("Session", session),
        ];
        if let Some(duration) = session_duration {
            query.push(("SessionDuration", duration.to_string()));
        }

        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&query)
            .send()
            .await
            .map_err(ConsoleError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConsoleError::Status(status));
        }
        let response: SigninTokenResponse = response.json().await.map_err(ConsoleError::Request)?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("Action", "login")
            .append_pair("Destination", self.destination.as_str())
            .append_pair("SigninToken", &response.signin_token);
        Ok(url)
    }
}

/// An error building a console sign in URL.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// A configured URL is invalid.
    #[error("invalid federation URL: {0}")]
    Url(#[source] url::ParseError),

    /// The session document couldn't be encoded.
    #[error("failed to encode console session: {0}")]
    Json(#[source] serde_json::Error),

    /// The request failed or returned an unexpected body.
    #[error("federation request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The federation endpoint returned an error status.
    #[error("federation endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn credentials() -> AssumedCredentials {
        AssumedCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret/key+value".to_string(),
            session_token: "session-token".to_string(),
            expiration: Utc.with_ymd_and_hms(2030, 6, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn cli_pairs_are_exactly_three() {
        let credentials = credentials();
        let pairs = CredentialView(&credentials).cli_pairs();
        assert_eq!(
            pairs,
            [
                ("aws_access_key_id", "ASIAEXAMPLE"),
                ("aws_secret_access_key", "secret/key+value"),
                ("aws_session_token", "session-token"),
            ]
        );
    }

    #[test]
    fn cli_commands() {
        let credentials = credentials();
        let commands = CredentialView(&credentials).cli_commands("dev");
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            ["aws", "configure", "--profile", "dev", "set", "aws_access_key_id", "ASIAEXAMPLE"]
        );
    }

    #[test]
    fn exports() {
        let credentials = credentials();
        assert_eq!(
            CredentialView(&credentials).exports(),
            [
                "export AWS_ACCESS_KEY_ID=ASIAEXAMPLE",
                "export AWS_SECRET_ACCESS_KEY=secret/key+value",
                "export AWS_SESSION_TOKEN=session-token",
            ]
        );
    }

    #[test]
    fn json_round_trip() {
        let credentials = credentials();
        let json = CredentialView(&credentials).to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["Version"], 1);
        assert_eq!(value["Expiration"], "2030-06-01T08:00:00Z");

        let document = CredentialsDocument::parse(&json).unwrap();
        assert_eq!(document.version, 1);
        assert_eq!(document.credentials, credentials);
        assert_eq!(document.expiration(), credentials.expiration);
    }
}
