//! Shared fakes for the integration tests.
//!
//! - a scripted browser standing in for the identity provider's sign in pages
//! - a recording STS
//! - helpers for SAML payloads and portal fixtures

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use awssso::{
    AssumeRoleError, AssumeRoleWithSamlRequest, AssumedCredentials, BrowserDriver, BrowserError,
    BrowserLauncher, Cookie, Identity, PageState, Region, StsApi,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use url::Url;

/// The portal's bearer token cookie.
pub const BEARER_COOKIE: &str = "x-amz-sso_authn";

/// The identity provider URL used throughout.
pub const IDP_URL: &str = "https://myorg.awsapps.com/start/";

pub const ROLE: &str = "arn:aws:iam::111122223333:role/Developer,arn:aws:iam::111122223333:saml-provider/AWSSSO";

pub fn identity() -> Identity {
    Identity::new("alice", IDP_URL.parse().unwrap(), Region::new("eu-west-1"))
}

/// What the fake browser has been asked to do, and how it should respond.
#[derive(Default)]
pub struct BrowserState {
    /// Page states reported in order, one per `page_state` call.
    pub page_states: VecDeque<PageState>,
    /// The state reported once `page_states` is exhausted (`Pending` if unset).
    pub idle_state: Option<PageState>,
    /// Cookies set by the identity provider.
    pub cookies: Vec<Cookie>,
    pub fail_launch: bool,

    pub launches: usize,
    pub headless: Vec<bool>,
    pub closes: usize,
    pub navigations: Vec<Url>,
    pub logins: Vec<(String, String)>,
    pub mfa_codes: Vec<(String, bool)>,
    pub added_cookies: Vec<Cookie>,
}

/// A scripted browser. Clones share state, so a test can inspect what the session did.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeBrowser {
    /// A browser that reports `states` and then sets a bearer cookie valid for an hour.
    pub fn signing_in(states: impl IntoIterator<Item = PageState>) -> Self {
        let browser = Self::default();
        {
            let mut state = browser.state();
            state.page_states = states.into_iter().collect();
            state.cookies.push(bearer_cookie("portal-token", 3600));
        }
        browser
    }

    pub fn state(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap()
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(self.clone())
    }
}

pub fn bearer_cookie(value: &str, expires_in_secs: i64) -> Cookie {
    Cookie::new(BEARER_COOKIE, value).with_expiry(Utc::now().timestamp() + expires_in_secs)
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserDriver>, BrowserError> {
        let mut state = self.state();
        if state.fail_launch {
            return Err(BrowserError::Launch("no browser installed".to_string()));
        }
        state.launches += 1;
        state.headless.push(headless);
        Ok(Box::new(FakeDriver {
            state: self.state.clone(),
        }))
    }
}

struct FakeDriver {
    state: Arc<Mutex<BrowserState>>,
}

impl FakeDriver {
    fn state(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&mut self, url: &Url) -> Result<(), BrowserError> {
        self.state().navigations.push(url.clone());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<Url, BrowserError> {
        let state = self.state();
        Ok(state
            .navigations
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".parse().unwrap()))
    }

    async fn add_cookies(&mut self, cookies: &[Cookie]) -> Result<(), BrowserError> {
        self.state().added_cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>, BrowserError> {
        let state = self.state();
        Ok(state
            .added_cookies
            .iter()
            .chain(&state.cookies)
            .cloned()
            .collect())
    }

    async fn submit_login(&mut self, username: &str, password: &str) -> Result<(), BrowserError> {
        self.state()
            .logins
            .push((username.to_string(), password.to_string()));
        Ok(())
    }

    async fn submit_mfa(&mut self, code: &str, trust_device: bool) -> Result<(), BrowserError> {
        self.state()
            .mfa_codes
            .push((code.to_string(), trust_device));
        Ok(())
    }

    async fn page_state(&mut self) -> Result<PageState, BrowserError> {
        let mut state = self.state();
        Ok(match state.page_states.pop_front() {
            Some(page_state) => page_state,
            None => state.idle_state.clone().unwrap_or(PageState::Pending),
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.state().closes += 1;
        Ok(())
    }
}

/// An STS that records requests and issues credentials valid for the requested duration.
#[derive(Default)]
pub struct FakeSts {
    pub requests: Mutex<Vec<AssumeRoleWithSamlRequest>>,
    pub error: Mutex<Option<(&'static str, &'static str)>>,
}

impl FakeSts {
    /// Fail subsequent calls with the given error code and message.
    pub fn fail_with(&self, code: &'static str, message: &'static str) {
        *self.error.lock().unwrap() = Some((code, message));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl StsApi for FakeSts {
    async fn assume_role_with_saml(
        &self,
        request: AssumeRoleWithSamlRequest,
    ) -> Result<AssumedCredentials, AssumeRoleError> {
        let duration = i64::from(request.duration.seconds());
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if let Some((code, message)) = *self.error.lock().unwrap() {
            return Err(match code {
                "ValidationError" | "InvalidIdentityToken" | "IDPRejectedClaim"
                | "ExpiredTokenException" => AssumeRoleError::Validation {
                    message: message.to_string(),
                    request_id: "req-fake".to_string(),
                },
                code => AssumeRoleError::Api {
                    code: Some(code.to_string()),
                    message: message.to_string(),
                    request_id: "req-fake".to_string(),
                },
            });
        }
        Ok(AssumedCredentials {
            access_key_id: format!("ASIAFAKE{call}"),
            secret_access_key: format!("secret-{call}"),
            session_token: format!("session-{call}"),
            expiration: Utc::now() + Duration::seconds(duration),
        })
    }
}

/// A base64-encoded SAML response granting `role` for `duration` seconds.
pub fn saml_response(role: &str, duration: u32) -> String {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<saml2p:Response xmlns:saml2p="urn:oasis:names:tc:SAML:2.0:protocol">
  <saml2:Assertion xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion">
    <saml2:AttributeStatement>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
        <saml2:AttributeValue>{role}</saml2:AttributeValue>
      </saml2:Attribute>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/SessionDuration">
        <saml2:AttributeValue>{duration}</saml2:AttributeValue>
      </saml2:Attribute>
    </saml2:AttributeStatement>
  </saml2:Assertion>
</saml2p:Response>"#
    );
    STANDARD.encode(xml)
}
