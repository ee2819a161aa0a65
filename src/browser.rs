//! Capability interface for the browser that signs in to the identity provider.
//!
//! The engine drives sign in through these traits only, so it has no knowledge of a particular
//! browser engine or of the identity provider's page structure. Implementations map the high level
//! operations (submit the login form, look for an MFA form, etc.) onto a concrete browser.

use async_trait::async_trait;
use url::Url;

/// Starts browser instances.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a new browser, with or without a visible window.
    ///
    /// Every launched browser is closed with [`BrowserDriver::close`] exactly once.
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserDriver>, BrowserError>;
}

/// A running browser.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Load the given URL.
    async fn navigate(&mut self, url: &Url) -> Result<(), BrowserError>;

    /// The URL of the current page.
    async fn current_url(&mut self) -> Result<Url, BrowserError>;

    /// Add cookies to the browser's cookie store.
    async fn add_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError>;

    /// All cookies visible to the browser.
    async fn cookies(&mut self) -> Result<Vec<Cookie>, BrowserError>;

    /// Fill in and submit the username/password form.
    async fn submit_login(&mut self, username: &str, password: &str) -> Result<(), BrowserError>;

    /// Fill in and submit the MFA form, optionally marking the device as trusted.
    async fn submit_mfa(&mut self, code: &str, trust_device: bool) -> Result<(), BrowserError>;

    /// Inspect the current page.
    async fn page_state(&mut self) -> Result<PageState, BrowserError>;

    /// Shut the browser down and release its resources.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// What the current page is showing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PageState {
    /// Nothing recognisable yet; the page may still be loading.
    Pending,

    /// An MFA code is being requested.
    MfaRequired,

    /// The identity provider is displaying an error banner with the given text.
    Alert(String),

    /// Sign in completed and the portal is loaded.
    SignedIn,
}

/// A browser cookie.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Cookie {
    /// The cookie name.
    pub name: String,

    /// The cookie value.
    pub value: String,

    /// The domain the cookie applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// The path the cookie applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Expiry as seconds since the unix epoch, or `None` for a session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,

    /// Whether the cookie is only sent over HTTPS.
    #[serde(default)]
    pub secure: bool,

    /// Whether the cookie is hidden from scripts.
    #[serde(default)]
    pub http_only: bool,
}

impl Cookie {
    /// Construct a session cookie with no domain or path restrictions.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expiry: None,
            secure: false,
            http_only: false,
        }
    }

    /// Set the expiry, in seconds since the unix epoch.
    #[must_use]
    pub fn with_expiry(self, expiry: i64) -> Self {
        Self {
            expiry: Some(expiry),
            ..self
        }
    }
}

/// A failure in the browser itself.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The browser could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// An expected page element could not be found.
    #[error("could not find {0} on the page")]
    ElementNotFound(String),

    /// Any other driver failure.
    #[error("browser driver failed: {0}")]
    Driver(String),
}
