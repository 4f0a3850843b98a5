//! Configuration loading and validation.
//!
//! The raw YAML file is deserialized leniently (everything optional),
//! then resolved into a validated [`Config`] in one pass: credentials are
//! merged with command-line overrides, pick policies are normalized into
//! their final form, and every path and template is compiled. All of this
//! fails fast, before any network activity.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::path::InvalidPathError;
use crate::projection::{Field, PickPolicy};
use crate::template::Template;

/// Minimum delay between outbound requests when none is configured.
const DEFAULT_REQUEST_DELAY_MS: u64 = 5000;

/// Where summary records land when no path is configured.
const DEFAULT_SEARCH_PATH: &str = "activities.json";

/// Summary projections must always carry the record identifier; the
/// incremental sync is keyed on it.
const SUMMARY_REQUIRED_PATHS: &[&str] = &["activityId"];

/// Sign-in credentials, from the config file or the command line.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Fallback projection policy for sites without an explicit `pick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultPickPolicy {
    #[default]
    All,
    NotNull,
}

impl From<DefaultPickPolicy> for PickPolicy {
    fn from(policy: DefaultPickPolicy) -> Self {
        match policy {
            DefaultPickPolicy::All => PickPolicy::All,
            DefaultPickPolicy::NotNull => PickPolicy::NotNull,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub request_delay: Duration,
    pub base_dir: Option<Template>,
}

/// The activity-search site: pagination parameters plus where and how
/// summary records are persisted.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub parameters: Map<String, Value>,
    pub finish: Option<i64>,
    pub path: Template,
    pub pick: PickPolicy,
}

/// One detail-fetch descriptor: URL and destination templates plus the
/// projection applied to the fetched document.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub url: Template,
    pub title: Option<String>,
    pub path: Template,
    pub pick: PickPolicy,
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub credentials: Credentials,
    pub search: SearchConfig,
    pub fetches: Vec<FetchConfig>,
}

/// Raw `pick` value as written in the config file: a policy name or a
/// list of path entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PickValue {
    Policy(String),
    Paths(Vec<PickEntry>),
}

/// One entry of an explicit pick list: `"path"`, `"path as alias"`, or
/// `[path, alias]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum PickEntry {
    Path(String),
    Renamed(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigFile {
    general: GeneralFile,
    credentials: CredentialsFile,
    activities: ActivitiesFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GeneralFile {
    request_delay: Option<u64>,
    base_dir: Option<String>,
    default_pick_policy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialsFile {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActivitiesFile {
    search: SearchFile,
    fetch: Vec<FetchFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchFile {
    parameters: Map<String, Value>,
    finish: Option<i64>,
    path: Option<String>,
    pick: Option<PickValue>,
}

#[derive(Debug, Deserialize)]
struct FetchFile {
    url: String,
    title: Option<String>,
    path: String,
    pick: Option<PickValue>,
}

impl Config {
    /// Loads and validates the configuration. A missing file yields the
    /// defaults (credentials must then come from the command line).
    pub fn load(
        config_path: Option<PathBuf>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_config_path);
        let file: ConfigFile = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Read(path.clone(), e))?;
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path.clone(), e))?
        } else {
            ConfigFile::default()
        };
        Self::resolve(file, username, password)
    }

    /// Default config file path (platform-specific config dir).
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitsync")
            .join("config.yaml")
    }

    fn resolve(
        file: ConfigFile,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let default_pick_policy = match file.general.default_pick_policy.as_deref() {
            None => DefaultPickPolicy::All,
            Some("all") => DefaultPickPolicy::All,
            Some("notNull") => DefaultPickPolicy::NotNull,
            Some(other) => return Err(ConfigError::InvalidPickPolicy(other.to_owned())),
        };

        let base_dir = file
            .general
            .base_dir
            .as_deref()
            .map(Template::compile)
            .transpose()?;

        let general = GeneralConfig {
            request_delay: Duration::from_millis(
                file.general
                    .request_delay
                    .unwrap_or(DEFAULT_REQUEST_DELAY_MS),
            ),
            base_dir,
        };

        let username = username
            .or(file.credentials.username)
            .ok_or(ConfigError::MissingCredential("username"))?;
        if !username.contains('@') {
            return Err(ConfigError::InvalidUsername(username));
        }
        let password = password
            .or(file.credentials.password)
            .ok_or(ConfigError::MissingCredential("password"))?;
        let credentials = Credentials { username, password };

        let search_file = file.activities.search;
        validate_parameters(&search_file.parameters)?;
        let search = SearchConfig {
            pick: build_policy(
                search_file.pick.as_ref(),
                default_pick_policy,
                SUMMARY_REQUIRED_PATHS,
            )?,
            parameters: search_file.parameters,
            finish: search_file.finish,
            path: Template::compile(search_file.path.as_deref().unwrap_or(DEFAULT_SEARCH_PATH))?,
        };

        let fetches = file
            .activities
            .fetch
            .into_iter()
            .map(|fetch| {
                Ok(FetchConfig {
                    url: Template::compile(&fetch.url)?,
                    title: fetch.title,
                    path: Template::compile(&fetch.path)?,
                    pick: build_policy(fetch.pick.as_ref(), default_pick_policy, &[])?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            general,
            credentials,
            search,
            fetches,
        })
    }
}

/// Pagination parameters must be usable as integers; a zero or negative
/// limit would never advance.
fn validate_parameters(parameters: &Map<String, Value>) -> Result<(), ConfigError> {
    if let Some(start) = parameters.get("start") {
        if start.as_i64().is_none() {
            return Err(ConfigError::InvalidParameter("start"));
        }
    }
    if let Some(limit) = parameters.get("limit") {
        if limit.as_i64().map_or(true, |limit| limit < 1) {
            return Err(ConfigError::InvalidParameter("limit"));
        }
    }
    Ok(())
}

/// Builds the projection policy for one site's `pick` value, falling
/// back to the general default policy when none is given. `required`
/// paths are merged to the front of explicit lists unless already
/// requested.
fn build_policy(
    pick: Option<&PickValue>,
    default_policy: DefaultPickPolicy,
    required: &[&str],
) -> Result<PickPolicy, ConfigError> {
    let entries = match pick {
        None => return Ok(default_policy.into()),
        Some(PickValue::Policy(name)) => {
            return match name.as_str() {
                "all" => Ok(PickPolicy::All),
                "notNull" => Ok(PickPolicy::NotNull),
                other => Err(ConfigError::InvalidPickPolicy(other.to_owned())),
            };
        }
        Some(PickValue::Paths(entries)) => entries,
    };

    let fields = normalize_entries(entries, required)
        .iter()
        .map(field_from_entry)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PickPolicy::Explicit(fields))
}

/// Merges required default paths into a caller-provided pick list.
/// Defaults already requested keep their position; missing ones land at
/// the front.
fn normalize_entries(entries: &[PickEntry], required: &[&str]) -> Vec<PickEntry> {
    let mut ret = entries.to_vec();
    for path in required {
        let present = ret
            .iter()
            .any(|entry| matches!(entry, PickEntry::Path(p) if p == path));
        if !present {
            ret.insert(0, PickEntry::Path((*path).to_owned()));
        }
    }
    ret
}

fn field_from_entry(entry: &PickEntry) -> Result<Field, ConfigError> {
    match entry {
        PickEntry::Path(text) => Ok(Field::parse(text)?),
        PickEntry::Renamed(parts) => match parts.as_slice() {
            [path, alias] => Ok(Field::aliased(path, alias)?),
            _ => Err(ConfigError::InvalidPickEntry(parts.len())),
        },
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, std::io::Error),
    Parse(PathBuf, serde_yaml::Error),
    MissingCredential(&'static str),
    InvalidUsername(String),
    InvalidPickPolicy(String),
    InvalidPickEntry(usize),
    InvalidPath(InvalidPathError),
    InvalidParameter(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingCredential(name) => {
                write!(
                    f,
                    "Missing credential '{name}' (config file or command line)"
                )
            }
            ConfigError::InvalidUsername(name) => {
                write!(f, "Username '{name}' is not an email address")
            }
            ConfigError::InvalidPickPolicy(name) => {
                write!(
                    f,
                    "Unknown pick policy '{name}' (expected 'all' or 'notNull')"
                )
            }
            ConfigError::InvalidPickEntry(len) => {
                write!(
                    f,
                    "Pick entry arrays must have exactly 2 elements, got {len}"
                )
            }
            ConfigError::InvalidPath(e) => write!(f, "{e}"),
            ConfigError::InvalidParameter(name) => {
                write!(f, "Search parameter '{name}' must be a usable integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(_, e) => Some(e),
            ConfigError::Parse(_, e) => Some(e),
            ConfigError::InvalidPath(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InvalidPathError> for ConfigError {
    fn from(e: InvalidPathError) -> Self {
        ConfigError::InvalidPath(e)
    }
}
