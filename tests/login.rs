mod common;

use std::{convert::Infallible, sync::Arc, time::Duration};

use awssso::{
    BrowserError, Cookie, IdentityBrowserSession, LoginError, LoginOptions, LoginTimeouts,
    MfaPrompt, PageState,
};
use chrono::Utc;
use common::{identity, FakeBrowser, BEARER_COOKIE, IDP_URL};
use futures::FutureExt;

#[derive(Debug, thiserror::Error)]
#[error("no terminal attached")]
struct NoTerminal;

fn code(code: &'static str) -> impl MfaPrompt<Error = Infallible> {
    move || async move { Ok::<_, Infallible>(code.to_string()) }
}

fn session<V: MfaPrompt>(browser: &FakeBrowser, prompt: V) -> IdentityBrowserSession<V> {
    IdentityBrowserSession::new(browser.launcher(), None, prompt, LoginOptions::default())
}

#[tokio::test(start_paused = true)]
async fn signs_in_without_mfa() {
    let browser = FakeBrowser::signing_in([PageState::Pending, PageState::SignedIn]);

    let token = session(&browser, code("unused"))
        .login(&identity(), "hunter2")
        .await
        .unwrap();

    assert_eq!(token.value, "portal-token");
    assert!(token.expiry > Utc::now());

    let state = browser.state();
    assert_eq!(state.launches, 1);
    assert_eq!(state.headless, [true]);
    assert_eq!(state.closes, 1);
    assert_eq!(state.logins, [("alice".to_string(), "hunter2".to_string())]);
    assert!(state.mfa_codes.is_empty());
    assert_eq!(state.navigations.len(), 1);
    assert_eq!(state.navigations[0].as_str(), IDP_URL);
}

#[tokio::test(start_paused = true)]
async fn submits_mfa_code() {
    let browser = FakeBrowser::signing_in([PageState::MfaRequired, PageState::SignedIn]);

    let token = session(&browser, code(" 123456\n"))
        .login(&identity(), "hunter2")
        .await
        .unwrap();

    assert_eq!(token.value, "portal-token");
    let state = browser.state();
    assert_eq!(state.mfa_codes, [("123456".to_string(), true)]);
    assert_eq!(state.closes, 1);
}

#[tokio::test(start_paused = true)]
async fn submits_untrusted_mfa_code() {
    let browser = FakeBrowser::signing_in([PageState::MfaRequired, PageState::SignedIn]);
    let options = LoginOptions {
        trust_device: false,
        ..LoginOptions::default()
    };

    IdentityBrowserSession::new(browser.launcher(), None, code("654321"), options)
        .login(&identity(), "hunter2")
        .await
        .unwrap();

    assert_eq!(browser.state().mfa_codes, [("654321".to_string(), false)]);
}

#[tokio::test(start_paused = true)]
async fn alert_is_terminal() {
    let message = "Your authentication information is incorrect. Please try again.";
    let browser = FakeBrowser::signing_in([PageState::Alert(message.to_string())]);

    let error = session(&browser, code("unused"))
        .login(&identity(), "wrong")
        .await
        .unwrap_err();

    match error {
        LoginError::Rejected(text) => assert_eq!(text, message),
        error => panic!("unexpected error: {error}"),
    }
    let state = browser.state();
    assert_eq!(state.logins.len(), 1);
    assert_eq!(state.closes, 1);
}

#[tokio::test(start_paused = true)]
async fn times_out_waiting_for_sign_in() {
    let browser = FakeBrowser::signing_in([PageState::Pending]);

    let error = session(&browser, code("unused"))
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(
        matches!(error, LoginError::UnexpectedState { step: "sign-in" }),
        "{error}"
    );
    assert_eq!(error.to_string(), "sign in failed: timed out waiting for sign-in");
    assert_eq!(browser.state().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn times_out_waiting_for_mfa() {
    let browser = FakeBrowser::signing_in([PageState::MfaRequired]);
    let options = LoginOptions {
        timeouts: LoginTimeouts {
            state_timeout: Duration::from_secs(2),
            ..LoginTimeouts::default()
        },
        ..LoginOptions::default()
    };

    let error = IdentityBrowserSession::new(browser.launcher(), None, code("000000"), options)
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(
        matches!(error, LoginError::UnexpectedState { step: "MFA verification" }),
        "{error}"
    );
    assert_eq!(browser.state().mfa_codes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn mfa_attempts_are_bounded() {
    let browser = FakeBrowser::signing_in([PageState::MfaRequired]);
    browser.state().idle_state = Some(PageState::MfaRequired);

    let error = session(&browser, code("000000"))
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(
        matches!(error, LoginError::UnexpectedState { step: "MFA verification" }),
        "{error}"
    );
    let state = browser.state();
    assert_eq!(state.mfa_codes.len(), 3);
    assert_eq!(state.closes, 1);
}

#[tokio::test(start_paused = true)]
async fn mfa_prompt_errors_are_preserved() {
    let browser = FakeBrowser::signing_in([PageState::MfaRequired]);

    let error = session(&browser, || async { Err::<String, _>(NoTerminal) })
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(matches!(error, LoginError::MfaPrompt(NoTerminal)), "{error}");
    assert_eq!(browser.state().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_bearer_cookie() {
    let browser = FakeBrowser::signing_in([PageState::SignedIn]);
    browser.state().cookies.clear();

    let error = session(&browser, code("unused"))
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(
        matches!(error, LoginError::UnexpectedState { step: "token extraction" }),
        "{error}"
    );
    assert_eq!(browser.state().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_closes_browser() {
    let browser = FakeBrowser::signing_in([PageState::Pending]);

    let error = session(&browser, code("unused"))
        .login_until(&identity(), "hunter2", std::future::ready(()))
        .await
        .unwrap_err();

    assert!(matches!(error, LoginError::Interrupted), "{error}");
    let state = browser.state();
    assert_eq!(state.launches, 1);
    assert_eq!(state.closes, 1);
}

#[tokio::test(start_paused = true)]
async fn interrupt_source_is_polled_per_sign_in() {
    let browser = FakeBrowser::signing_in([PageState::Pending]);
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();

    let error = session(&browser, code("unused"))
        .with_interrupt(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            futures::future::ready(()).boxed()
        }))
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(matches!(error, LoginError::Interrupted), "{error}");
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(browser.state().closes, 1);
}

#[tokio::test]
async fn launch_failure_is_a_browser_error() {
    let browser = FakeBrowser::signing_in([PageState::SignedIn]);
    browser.state().fail_launch = true;

    let error = session(&browser, code("unused"))
        .login(&identity(), "hunter2")
        .await
        .unwrap_err();

    assert!(
        matches!(error, LoginError::Browser(BrowserError::Launch(_))),
        "{error}"
    );
    assert_eq!(browser.state().closes, 0);
}

#[tokio::test(start_paused = true)]
async fn restore_returns_to_start_page() {
    let browser = FakeBrowser::signing_in([PageState::SignedIn]);
    let options = LoginOptions {
        restore: true,
        ..LoginOptions::default()
    };

    IdentityBrowserSession::new(browser.launcher(), None, code("unused"), options)
        .login(&identity(), "hunter2")
        .await
        .unwrap();

    let state = browser.state();
    let navigations: Vec<_> = state.navigations.iter().map(url::Url::as_str).collect();
    assert_eq!(navigations, [IDP_URL, IDP_URL]);
}

#[tokio::test(start_paused = true)]
async fn cookies_persist_between_sign_ins_without_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let device = Cookie::new("device-trust", "trusted").with_expiry(Utc::now().timestamp() + 86400);

    let browser = FakeBrowser::signing_in([PageState::SignedIn]);
    browser.state().cookies.push(device.clone());
    IdentityBrowserSession::new(
        browser.launcher(),
        Some(dir.path().to_path_buf()),
        code("unused"),
        LoginOptions::default(),
    )
    .login(&identity(), "hunter2")
    .await
    .unwrap();

    let jars: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    assert_eq!(jars.len(), 1);
    assert!(jars[0].contains("device-trust"));
    assert!(!jars[0].contains(BEARER_COOKIE));

    let browser = FakeBrowser::signing_in([PageState::SignedIn]);
    IdentityBrowserSession::new(
        browser.launcher(),
        Some(dir.path().to_path_buf()),
        code("unused"),
        LoginOptions::default(),
    )
    .login(&identity(), "hunter2")
    .await
    .unwrap();

    let state = browser.state();
    assert_eq!(state.added_cookies, [device]);
    assert_eq!(state.navigations.len(), 2);
}
