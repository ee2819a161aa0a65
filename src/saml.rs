//! Extracting role information from SAML assertions.
//!
//! Signatures are not checked here. STS validates the assertion against the SAML provider's
//! metadata when it is exchanged for credentials.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use roxmltree::{Document, Node};

const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";
const SESSION_DURATION_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/SessionDuration";

/// A parsed SAML assertion granting access to an AWS role.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SamlAssertion {
    encoded_payload: String,
    role_arn: String,
    principal_arn: String,
    default_duration_seconds: i32,
}

impl SamlAssertion {
    /// Parse a base64-encoded SAML response.
    ///
    /// The response must contain an assertion with an AWS `Role` attribute of the form
    /// `<role_arn>,<principal_arn>` and a `SessionDuration` attribute.
    ///
    /// # Errors
    ///
    /// Fails if the payload isn't valid base64-encoded XML, or if either attribute is missing or
    /// malformed.
    pub fn parse(encoded_payload: &str) -> Result<Self, SamlError> {
        let encoded_payload = encoded_payload.trim();
        let decoded = STANDARD
            .decode(encoded_payload)
            .map_err(|error| SamlError::Decode(error.to_string()))?;
        let xml = String::from_utf8(decoded).map_err(|error| SamlError::Decode(error.to_string()))?;
        let document = Document::parse(&xml).map_err(|error| SamlError::Xml(error.to_string()))?;

        let role = attribute_value(&document, ROLE_ATTRIBUTE)
            .ok_or(SamlError::MissingAttribute("Role"))?;
        let (role_arn, principal_arn) = split_role(&role)?;

        let duration = attribute_value(&document, SESSION_DURATION_ATTRIBUTE)
            .ok_or(SamlError::MissingAttribute("SessionDuration"))?;
        let default_duration_seconds = duration
            .parse()
            .map_err(|_| SamlError::InvalidDuration(duration.clone()))?;

        Ok(Self {
            encoded_payload: encoded_payload.to_string(),
            role_arn,
            principal_arn,
            default_duration_seconds,
        })
    }

    /// The base64-encoded assertion, as passed to STS.
    #[must_use]
    pub fn encoded_payload(&self) -> &str {
        &self.encoded_payload
    }

    /// The ARN of the role to assume.
    #[must_use]
    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    /// The ARN of the SAML provider in IAM.
    #[must_use]
    pub fn principal_arn(&self) -> &str {
        &self.principal_arn
    }

    /// The session duration requested by the identity provider, in seconds.
    #[must_use]
    pub fn default_duration_seconds(&self) -> i32 {
        self.default_duration_seconds
    }
}

fn is_saml(node: &Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(ASSERTION_NS)
}

/// The first `Assertion/AttributeStatement/Attribute[@Name=name]/AttributeValue` text.
fn attribute_value(document: &Document, name: &str) -> Option<String> {
    document
        .descendants()
        .filter(|node| is_saml(node, "Assertion"))
        .flat_map(|assertion| assertion.children())
        .filter(|node| is_saml(node, "AttributeStatement"))
        .flat_map(|statement| statement.children())
        .filter(|node| is_saml(node, "Attribute") && node.attribute("Name") == Some(name))
        .flat_map(|attribute| attribute.children())
        .find(|node| is_saml(node, "AttributeValue"))
        .and_then(|value| value.text())
        .map(|text| text.trim().to_string())
}

fn split_role(value: &str) -> Result<(String, String), SamlError> {
    let mut parts = value.split(',').map(str::trim);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(first), Some(second), None) if !first.is_empty() && !second.is_empty() => {
            // Some identity providers put the provider first.
            if first.contains(":saml-provider/") && !second.contains(":saml-provider/") {
                Ok((second.to_string(), first.to_string()))
            } else {
                Ok((first.to_string(), second.to_string()))
            }
        }
        _ => Err(SamlError::InvalidRole(value.to_string())),
    }
}

/// A malformed SAML assertion.
#[derive(Debug, thiserror::Error)]
pub enum SamlError {
    /// The payload isn't base64-encoded UTF-8.
    #[error("SAML assertion could not be decoded: {0}")]
    Decode(String),

    /// The payload isn't well-formed XML.
    #[error("SAML assertion is not valid XML: {0}")]
    Xml(String),

    /// A required attribute is absent.
    #[error("SAML assertion has no {0} attribute")]
    MissingAttribute(&'static str),

    /// The role attribute isn't a `<role_arn>,<principal_arn>` pair.
    #[error("SAML assertion has a malformed Role attribute: {0:?}")]
    InvalidRole(String),

    /// The session duration isn't a number of seconds.
    #[error("SAML assertion has a malformed SessionDuration attribute: {0:?}")]
    InvalidDuration(String),
}
