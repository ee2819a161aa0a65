use std::{
    env, io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::debug;
use url::Url;

use crate::{Identity, Region, SessionSelection};

const CONFIG_DIR: &str = "AWSSSO_CONFIG_DIR";
const CONFIG_DIR_DEFAULT: &str = ".awssso";
const CONFIG_FILE: &str = "config";

const DEFAULT_PROFILE: &str = "default";

const REGION_ENV: &[&str] = &["AWSSSO_REGION", "AWS_DEFAULT_REGION"];
const AWS_PROFILE_ENV: &[&str] = &["AWS_PROFILE", "AWS_DEFAULT_PROFILE"];

/// The keys written to a profile section, in order.
const KEYS: [&str; 6] = [
    "url",
    "username",
    "region",
    "instance_id",
    "profile_id",
    "aws_profile",
];

/// A reference to a named profile in the configuration file.
///
/// Profiles are sections of an INI file called `config` in the directory named by
/// `AWSSSO_CONFIG_DIR`, or `~/.awssso` if unset. Both can be overridden with
/// [`with_config_dir`](Self::with_config_dir) and [`with_profile`](Self::with_profile).
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use awssso::ProfileSource;
///
/// let profile = ProfileSource::default()
///     .with_config_dir(".awssso")
///     .with_profile("work")
///     .load()
///     .await?;
///
/// let identity = profile.identity();
/// # Ok(()) }
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default)]
pub struct ProfileSource {
    config_dir: Option<PathBuf>,
    profile: Option<String>,
}

/// A named profile: who to sign in as, and which role to assume.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileConfig {
    /// The profile's section name.
    pub name: String,

    /// The identity provider's sign in page.
    pub url: Url,

    /// The user name to sign in with.
    pub username: String,

    /// The AWS region in which SSO was set up.
    pub region: Region,

    /// The portal instance (account) to assume a role in, if chosen.
    pub instance_id: Option<String>,

    /// The portal profile (role) to assume, if chosen.
    pub profile_id: Option<String>,

    /// The AWS CLI profile to write credentials to.
    pub aws_profile: String,
}

impl ProfileConfig {
    /// The identity to sign in as.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(self.username.clone(), self.url.clone(), self.region.clone())
    }

    /// The role to assume, if both the instance and profile are set.
    #[must_use]
    pub fn selection(&self) -> Option<SessionSelection> {
        match (&self.instance_id, &self.profile_id) {
            (Some(instance_id), Some(profile_id)) => {
                Some(SessionSelection::new(instance_id.clone(), profile_id.clone()))
            }
            _ => None,
        }
    }
}

impl ProfileSource {
    /// Set the configuration directory.
    #[must_use]
    pub fn with_config_dir(self, path: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: Some(path.into()),
            ..self
        }
    }

    /// Set the profile. Defaults to `default`.
    #[must_use]
    pub fn with_profile(self, name: impl Into<String>) -> Self {
        Self {
            profile: Some(name.into()),
            ..self
        }
    }

    /// The selected profile name.
    #[must_use]
    pub fn profile(&self) -> &str {
        self.profile.as_deref().unwrap_or(DEFAULT_PROFILE)
    }

    /// The path of the configuration file.
    ///
    /// # Errors
    ///
    /// Fails if `AWSSSO_CONFIG_DIR` is invalid, or if it's unset and there's no home directory.
    pub fn config_file(&self) -> Result<PathBuf, ProfileError> {
        let dir = self
            .config_dir
            .clone()
            .map_or_else(get_config_dir_from_env, Ok)?;
        Ok(dir.join(CONFIG_FILE))
    }

    /// Load the profile.
    ///
    /// The region falls back to `AWSSSO_REGION`, `AWS_DEFAULT_REGION`, then `eu-west-1`. The AWS
    /// CLI profile falls back to `AWS_PROFILE`, `AWS_DEFAULT_PROFILE`, then the profile name.
    ///
    /// # Errors
    ///
    /// See [`ProfileError`].
    pub async fn load(&self) -> Result<ProfileConfig, ProfileError> {
        let path = self.config_file()?;
        let content = read_file(&path).await?.unwrap_or_default();
        parse_profile(&content, &path, self.profile(), read_env)
    }

    /// Write `config` to its section of the configuration file.
    ///
    /// Other sections are left as they are. The file and its directory are created if needed.
    ///
    /// # Errors
    ///
    /// See [`ProfileError`].
    pub async fn save(&self, config: &ProfileConfig) -> Result<(), ProfileError> {
        let path = self.config_file()?;
        let content = read_file(&path).await?.unwrap_or_default();
        let content = replace_section(&content, &config.name, &section_entries(config));

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| ProfileError::io(&path, source))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|source| ProfileError::io(&path, source))?;
        debug!(profile = %config.name, path = %path.display(), "saved profile");
        Ok(())
    }
}

/// Check that `url` looks like an AWS SSO start page, `https://<name>.awsapps.com/start/`.
///
/// # Errors
///
/// Fails if the URL is malformed or has a different shape.
pub fn validate_url(url: &str) -> Result<Url, ProfileError> {
    let invalid = || ProfileError::InvalidUrl(url.to_string());
    let parsed: Url = url.parse().map_err(|_| invalid())?;

    let subdomain = parsed
        .host_str()
        .and_then(|host| host.strip_suffix(".awsapps.com"))
        .ok_or_else(invalid)?;
    let shaped = parsed.scheme() == "https"
        && !subdomain.is_empty()
        && parsed.port().is_none()
        && parsed.username().is_empty()
        && parsed.path() == "/start/"
        && parsed.query().is_none()
        && parsed.fragment().is_none()
        && url.ends_with("/start/");
    if shaped {
        Ok(parsed)
    } else {
        Err(invalid())
    }
}

/// An error indicating missing or invalid configuration.
///
/// The error message should be sufficient to aid end-user debugging.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// An environment variable couldn't be read.
    #[error("invalid value in environment variable {name}: {message}")]
    Env {
        /// The variable.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The configuration directory couldn't be located.
    #[error("could not determine home directory")]
    NoHomeDir,

    /// The configuration file couldn't be read or written.
    #[error("unable to access config file {}: {source}", .path.display())]
    Io {
        /// The configuration file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The profile isn't in the configuration file.
    #[error("profile {profile} does not exist in {}, configure it first", .path.display())]
    MissingProfile {
        /// The profile name.
        profile: String,
        /// The configuration file.
        path: PathBuf,
    },

    /// Required keys are absent from the profile.
    #[error("incomplete configuration in profile {profile}; missing: {}", .missing.join(", "))]
    Incomplete {
        /// The profile name.
        profile: String,
        /// The absent keys.
        missing: Vec<&'static str>,
    },

    /// A key has an unusable value.
    #[error("error in profile {profile}: invalid {key}: {message}")]
    Invalid {
        /// The profile name.
        profile: String,
        /// The key.
        key: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A URL isn't an AWS SSO start page.
    #[error("URL {0:?} must look like https://<name>.awsapps.com/start/")]
    InvalidUrl(String),
}

impl ProfileError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn get_config_dir_from_env() -> Result<PathBuf, ProfileError> {
    let configured = read_env(CONFIG_DIR).map_err(|message| ProfileError::Env {
        name: CONFIG_DIR,
        message,
    })?;
    let home = dirs_next::home_dir();
    match configured {
        Some(dir) => match dir.strip_prefix("~/") {
            Some(rest) => Ok(home.ok_or(ProfileError::NoHomeDir)?.join(rest)),
            None => Ok(PathBuf::from(dir)),
        },
        None => Ok(home.ok_or(ProfileError::NoHomeDir)?.join(CONFIG_DIR_DEFAULT)),
    }
}

fn read_env(name: &str) -> Result<Option<String>, String> {
    env::var(name).map(Some).or_else(|error| match error {
        env::VarError::NotPresent => Ok(None),
        env::VarError::NotUnicode(data) => Err(format!("{data:?} contains invalid UTF-8")),
    })
}

/// The first of `names` that is set and non-empty.
fn first_env<E>(names: &'static [&'static str], env: &E) -> Result<Option<String>, ProfileError>
where
    E: Fn(&str) -> Result<Option<String>, String>,
{
    for &name in names {
        match env(name) {
            Ok(Some(value)) if !value.is_empty() => return Ok(Some(value)),
            Ok(_) => {}
            Err(message) => return Err(ProfileError::Env { name, message }),
        }
    }
    Ok(None)
}

async fn read_file(path: &Path) -> Result<Option<String>, ProfileError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ProfileError::io(path, error)),
    }
}

fn parse_section_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')
        .and_then(|line| line.strip_suffix(']'))
        .map(str::trim)
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with(';')
}

fn parse_profile<E>(
    content: &str,
    path: &Path,
    profile: &str,
    env: E,
) -> Result<ProfileConfig, ProfileError>
where
    E: Fn(&str) -> Result<Option<String>, String>,
{
    let mut found = false;
    let mut in_profile = false;
    let mut values: [Option<String>; 6] = Default::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }

        if let Some(section) = parse_section_name(line) {
            in_profile = section == profile;
            found |= in_profile;
        } else if in_profile {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if let Some(index) = KEYS.iter().position(|known| *known == key) {
                if !value.is_empty() {
                    values[index] = Some(value.to_string());
                }
            }
        }
    }

    if !found {
        return Err(ProfileError::MissingProfile {
            profile: profile.to_string(),
            path: path.to_path_buf(),
        });
    }

    let [url, username, region, instance_id, profile_id, aws_profile] = values;
    let (url, username) = match (url, username) {
        (Some(url), Some(username)) => (url, username),
        (url, username) => {
            let missing = url
                .map_or_else(|| Some("url"), |_| None)
                .into_iter()
                .chain(username.map_or_else(|| Some("username"), |_| None))
                .collect();
            return Err(ProfileError::Incomplete {
                profile: profile.to_string(),
                missing,
            });
        }
    };

    let invalid = |key, message: String| ProfileError::Invalid {
        profile: profile.to_string(),
        key,
        message,
    };
    let url: Url = url
        .parse()
        .map_err(|error: url::ParseError| invalid("url", error.to_string()))?;
    let region = match region {
        Some(region) => Some(region),
        None => first_env(REGION_ENV, &env)?,
    }
    .map_or_else(|| Ok(Region::default()), |region| region.parse())
    .map_err(|error| invalid("region", error.to_string()))?;
    let aws_profile = match aws_profile {
        Some(aws_profile) => aws_profile,
        None => first_env(AWS_PROFILE_ENV, &env)?.unwrap_or_else(|| profile.to_string()),
    };

    Ok(ProfileConfig {
        name: profile.to_string(),
        url,
        username,
        region,
        instance_id,
        profile_id,
        aws_profile,
    })
}

fn section_entries(config: &ProfileConfig) -> Vec<(&'static str, String)> {
    let mut entries = vec![
        ("url", config.url.to_string()),
        ("username", config.username.clone()),
        ("region", config.region.to_string()),
    ];
    if let Some(instance_id) = &config.instance_id {
        entries.push(("instance_id", instance_id.clone()));
    }
    if let Some(profile_id) = &config.profile_id {
        entries.push(("profile_id", profile_id.clone()));
    }
    entries.push(("aws_profile", config.aws_profile.clone()));
    entries
}

/// Rewrite the section called `name` with `entries`, appending it if absent.
fn replace_section(content: &str, name: &str, entries: &[(&'static str, String)]) -> String {
    let mut section = format!("[{name}]\n");
    for (key, value) in entries {
        section.push_str(&format!("{key} = {value}\n"));
    }

    let mut output = String::new();
    let mut replaced = false;
    let mut skipping = false;
    for line in content.lines() {
        if let Some(current) = parse_section_name(line) {
            skipping = current == name;
            if skipping {
                if !replaced {
                    output.push_str(&section);
                    output.push('\n');
                    replaced = true;
                }
                continue;
            }
        }
        if !skipping {
            output.push_str(line);
            output.push('\n');
        }
    }

    if !replaced {
        if !output.is_empty() && !output.ends_with("\n\n") {
            output.push('\n');
        }
        output.push_str(&section);
    }
    output
}
