//! The browser sign in state machine.
//!
//! ```text
//! Start ──submit login──▶ detect ──▶ SignedIn ──▶ TokenExtracted
//!                           │  ▲
//!                 MfaRequired  └──submit MFA code──┐
//!                           └──────▶ NeedsMfa ─────┘
//!                           │
//!                           └──────▶ AlertRaised (terminal)
//! ```

use std::{io, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::{fs, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    browser::{BrowserDriver, BrowserError, BrowserLauncher, Cookie, PageState},
    store::write_private,
    BearerToken, Identity,
};

/// The cookie holding the portal's bearer token.
pub(crate) const BEARER_COOKIE: &str = "x-amz-sso_authn";

const STEP_SIGN_IN: &str = "sign-in";
const STEP_MFA: &str = "MFA verification";
const STEP_TOKEN: &str = "token extraction";

/// An MFA code prompt.
///
/// When the identity provider asks for an MFA code, the prompt is invoked to obtain one from the
/// user (or from some other source, such as a TOTP generator).
///
/// The trait is implemented for async functions with no arguments returning
/// `Result<String, E>`, so a trivial prompt could look like:
///
/// ```
/// use std::convert::Infallible;
///
/// use awssso::MfaPrompt;
///
/// fn prompt() -> impl MfaPrompt {
///     || async move {
///         let mut code = String::new();
///         std::io::stdin().read_line(&mut code).expect("stdin");
///         Ok::<_, Infallible>(code)
///     }
/// }
/// ```
///
/// The `Error` associated type can be used if the prompt is fallible. Type information is preserved
/// in the event of any subsequent [`LoginError`].
pub trait MfaPrompt: Clone + Send + Sync {
    /// The future returned by the prompt.
    type Future: std::future::Future<Output = Result<String, Self::Error>> + Send;

    /// An error that could occur when attempting to prompt.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Obtain an MFA code.
    fn prompt(self) -> Self::Future;
}

impl<F, Fut, E> MfaPrompt for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync,
    Fut: std::future::Future<Output = Result<String, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    type Future = Fut;
    type Error = E;

    fn prompt(self) -> Fut {
        self()
    }
}

/// A source of interrupts for sign in.
///
/// It is called once per sign in, and the sign in is abandoned if the returned future completes
/// first. The library never listens for signals itself, so a handler such as
/// `tokio::signal::ctrl_c` only stays installed if the caller chooses it.
pub type InterruptSource = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Knobs for the sign in flow.
#[derive(Clone, Debug)]
pub struct LoginOptions {
    /// Run the browser without a window.
    pub headless: bool,

    /// Navigate back to the page that was showing before sign in, once the token is extracted.
    pub restore: bool,

    /// Ask the identity provider to trust this device when submitting an MFA code.
    pub trust_device: bool,

    /// Bounds on waiting for the identity provider.
    pub timeouts: LoginTimeouts,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            headless: true,
            restore: false,
            trust_device: true,
            timeouts: LoginTimeouts::default(),
        }
    }
}

/// Bounds on waiting for the identity provider during sign in.
#[derive(Clone, Debug)]
pub struct LoginTimeouts {
    /// How long to wait for the page to settle after submitting a form.
    pub state_timeout: Duration,

    /// How often to inspect the page while waiting.
    pub poll_interval: Duration,

    /// How many MFA codes to try before giving up.
    pub max_mfa_attempts: u32,
}

impl Default for LoginTimeouts {
    fn default() -> Self {
        Self {
            state_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            max_mfa_attempts: 3,
        }
    }
}

/// Where the identity provider ended up after a form submission.
#[derive(Debug, Eq, PartialEq)]
enum LoginOutcome {
    SignedIn,
    NeedsMfa,
    Rejected(String),
}

/// Signs in to an identity provider with a browser and extracts the portal bearer token.
pub struct IdentityBrowserSession<V> {
    launcher: Arc<dyn BrowserLauncher>,
    cookie_jar: Option<CookieJar>,
    mfa_prompt: V,
    options: LoginOptions,
    interrupt: Option<InterruptSource>,
}

impl<V> IdentityBrowserSession<V>
where
    V: MfaPrompt,
{
    /// Construct a session that launches browsers with `launcher`.
    ///
    /// If `cookie_dir` is given, browser cookies are persisted there between sign ins.
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        cookie_dir: Option<PathBuf>,
        mfa_prompt: V,
        options: LoginOptions,
    ) -> Self {
        Self {
            launcher,
            cookie_jar: cookie_dir.map(CookieJar::new),
            mfa_prompt,
            options,
            interrupt: None,
        }
    }

    /// Abandon each sign in when a future from `interrupt` completes.
    #[must_use]
    pub fn with_interrupt(self, interrupt: InterruptSource) -> Self {
        Self {
            interrupt: Some(interrupt),
            ..self
        }
    }

    /// Run a full sign in cycle, returning a fresh bearer token.
    ///
    /// The browser is closed before returning, whatever the outcome. If an interrupt source is
    /// set and fires, the cycle ends with [`LoginError::Interrupted`], again after closing the
    /// browser.
    ///
    /// # Errors
    ///
    /// See [`LoginError`].
    pub async fn login(
        &self,
        identity: &Identity,
        password: &str,
    ) -> Result<BearerToken, LoginError<V::Error>> {
        let interrupt: BoxFuture<'static, ()> = match &self.interrupt {
            Some(interrupt) => interrupt(),
            None => Box::pin(futures::future::pending::<()>()),
        };
        self.login_until(identity, password, interrupt).await
    }

    /// Like [`login`](Self::login), but aborting when `interrupt` completes instead.
    ///
    /// # Errors
    ///
    /// See [`LoginError`].
    pub async fn login_until<I>(
        &self,
        identity: &Identity,
        password: &str,
        interrupt: I,
    ) -> Result<BearerToken, LoginError<V::Error>>
    where
        I: std::future::Future<Output = ()> + Send,
    {
        info!(username = %identity.username, idp_url = %identity.idp_url, "signing in");
        let mut driver = self.launcher.launch(self.options.headless).await?;

        let result = tokio::select! {
            result = self.drive(driver.as_mut(), identity, password) => result,
            () = interrupt => Err(LoginError::Interrupted),
        };

        if let Some(jar) = &self.cookie_jar {
            match driver.cookies().await {
                Ok(cookies) => {
                    if let Err(error) = jar.save(identity, cookies).await {
                        warn!(%error, "failed to persist browser cookies");
                    }
                }
                Err(error) => warn!(%error, "failed to read browser cookies"),
            }
        }
        if let Err(error) = driver.close().await {
            warn!(%error, "failed to close browser");
        }

        match &result {
            Ok(token) => info!(expiry = %token.expiry, "signed in"),
            Err(error) => debug!(%error, "sign in failed"),
        }
        result
    }

    async fn drive(
        &self,
        driver: &mut dyn BrowserDriver,
        identity: &Identity,
        password: &str,
    ) -> Result<BearerToken, LoginError<V::Error>> {
        driver.navigate(&identity.idp_url).await?;
        if let Some(jar) = &self.cookie_jar {
            let cookies = jar.load(identity).await;
            if !cookies.is_empty() {
                debug!(count = cookies.len(), "restoring browser cookies");
                driver.add_cookies(&cookies).await?;
                driver.navigate(&identity.idp_url).await?;
            }
        }
        let start_url = driver.current_url().await?;

        driver.submit_login(&identity.username, password).await?;

        let mut step = STEP_SIGN_IN;
        let mut mfa_attempts = 0;
        loop {
            match self.detect(driver, step).await? {
                LoginOutcome::SignedIn => break,
                LoginOutcome::Rejected(message) => return Err(LoginError::Rejected(message)),
                LoginOutcome::NeedsMfa => {
                    if mfa_attempts >= self.options.timeouts.max_mfa_attempts {
                        return Err(LoginError::UnexpectedState { step: STEP_MFA });
                    }
                    mfa_attempts += 1;
                    debug!(attempt = mfa_attempts, "MFA code required");

                    let code = self
                        .mfa_prompt
                        .clone()
                        .prompt()
                        .await
                        .map_err(LoginError::MfaPrompt)?;
                    driver
                        .submit_mfa(code.trim(), self.options.trust_device)
                        .await?;
                    step = STEP_MFA;
                }
            }
        }

        let token = extract_token::<V::Error>(driver).await?;
        if self.options.restore {
            driver.navigate(&start_url).await?;
        }
        Ok(token)
    }

    /// Poll the page until it shows something recognisable, or the state timeout elapses.
    async fn detect(
        &self,
        driver: &mut dyn BrowserDriver,
        step: &'static str,
    ) -> Result<LoginOutcome, LoginError<V::Error>> {
        let timeouts = &self.options.timeouts;
        let deadline = Instant::now() + timeouts.state_timeout;
        loop {
            match driver.page_state().await? {
                PageState::SignedIn => return Ok(LoginOutcome::SignedIn),
                PageState::MfaRequired => return Ok(LoginOutcome::NeedsMfa),
                PageState::Alert(message) => return Ok(LoginOutcome::Rejected(message)),
                PageState::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(LoginError::UnexpectedState { step });
            }
            tokio::time::sleep(timeouts.poll_interval).await;
        }
    }
}

impl<V> std::fmt::Debug for IdentityBrowserSession<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("IdentityBrowserSession")
            .field("cookie_jar", &self.cookie_jar)
            .field("mfa_prompt", &"_")
            .field("options", &self.options)
            .field("interrupt", &self.interrupt.is_some())
            .finish_non_exhaustive()
    }
}

async fn extract_token<P>(driver: &mut dyn BrowserDriver) -> Result<BearerToken, LoginError<P>>
where
    P: std::error::Error + Send + Sync + 'static,
{
    let cookie = driver
        .cookies()
        .await?
        .into_iter()
        .find(|cookie| cookie.name == BEARER_COOKIE)
        .ok_or(LoginError::UnexpectedState { step: STEP_TOKEN })?;
    let expiry = cookie
        .expiry
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or(LoginError::UnexpectedState { step: STEP_TOKEN })?;

    Ok(BearerToken::new(cookie.value, expiry))
}

/// Browser cookies persisted between sign ins.
///
/// The bearer token cookie is never written, so a stolen jar can't be replayed against the
/// portal and every sign in derives a fresh token.
#[derive(Debug)]
pub(crate) struct CookieJar {
    dir: PathBuf,
}

impl CookieJar {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn path(&self, identity: &Identity) -> PathBuf {
        self.dir
            .join(format!("cookies-{}.json", identity.cookie_jar_key()))
    }

    /// Load unexpired cookies. Problems reading the jar are logged and treated as an empty jar.
    pub(crate) async fn load(&self, identity: &Identity) -> Vec<Cookie> {
        let path = self.path(identity);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                warn!(%error, path = %path.display(), "failed to read cookie jar");
                return Vec::new();
            }
        };
        let cookies: Vec<Cookie> = match serde_json::from_str(&content) {
            Ok(cookies) => cookies,
            Err(error) => {
                warn!(%error, path = %path.display(), "ignoring corrupt cookie jar");
                return Vec::new();
            }
        };

        let now = Utc::now().timestamp();
        cookies
            .into_iter()
            .filter(|cookie| cookie.name != BEARER_COOKIE)
            .filter(|cookie| cookie.expiry.map_or(true, |expiry| expiry > now))
            .collect()
    }

    pub(crate) async fn save(&self, identity: &Identity, cookies: Vec<Cookie>) -> io::Result<()> {
        let cookies: Vec<_> = cookies
            .into_iter()
            .filter(|cookie| cookie.name != BEARER_COOKIE)
            .collect();
        let content = serde_json::to_vec_pretty(&cookies)?;

        fs::create_dir_all(&self.dir).await?;
        write_private(&self.path(identity), &content).await
    }
}

/// An error that occurred while signing in.
#[derive(Debug, thiserror::Error)]
pub enum LoginError<P: std::error::Error + Send + Sync + 'static> {
    /// The browser failed.
    #[error("sign in failed due to: {0}")]
    Browser(#[from] BrowserError),

    /// The identity provider didn't reach a recognisable state in time.
    #[error("sign in failed: timed out waiting for {step}")]
    UnexpectedState {
        /// The step that didn't complete.
        step: &'static str,
    },

    /// The identity provider displayed an error, e.g. for a wrong password.
    ///
    /// The message is the identity provider's text, verbatim.
    #[error("sign in rejected: {0}")]
    Rejected(String),

    /// An error occurred in the MFA prompt.
    #[error("sign in failed during MFA prompt: {0}")]
    MfaPrompt(#[source] P),

    /// Sign in was interrupted by the user.
    #[error("sign in interrupted")]
    Interrupted,
}
