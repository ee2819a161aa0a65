// A wrapper around `aws_types::region::Region` to avoid exposing it in the API.

use std::{borrow::Cow, fmt, str::FromStr};

// Use `Region` from `aws_sdk_sts` to avoid depending directly on `aws_types`.
use aws_sdk_sts::config::Region as SdkRegion;

/// The region used when nothing else is configured.
pub(crate) const DEFAULT_REGION: &str = "eu-west-1";

/// An AWS region.
///
/// The SSO portal API and STS are both called in the region in which SSO was set up.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Region(pub(crate) SdkRegion);

impl Region {
    /// Construct a new `Region` for the given string.
    pub fn new(region: impl Into<Cow<'static, str>>) -> Self {
        Self(SdkRegion::new(region))
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl FromStr for Region {
    type Err = InvalidRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(InvalidRegion(s.to_string()));
        }
        Ok(Self::new(s.to_string()))
    }
}

impl AsRef<str> for Region {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A region name that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid region name {0:?}")]
pub struct InvalidRegion(String);
