//! Publish configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.datapub/
//!   config.yaml     (mode 0600, holds provider credentials)
//!   datasets/       default store root
//!   buckets/        default object-storage root (buckets are subdirectories)
//!   git/            default root for the local git host
//! ```
//!
//! # API pattern
//!
//! Same as the rest of the workspace:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The loaded [`PublishConfig`] is passed explicitly to the resolver and the
//! daemon; nothing reads credentials from process-wide state at call time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PublishError};
use crate::types::{AccessProtocol, Realm, TargetId};

pub const ENV_GITHUB_LOGIN: &str = "DATAPUB_GITHUB_LOGIN";
pub const ENV_GITHUB_TOKEN: &str = "DATAPUB_GITHUB_TOKEN";
pub const ENV_GITHUB_ORG: &str = "DATAPUB_GITHUB_ORG";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which hosted-git implementation creates repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostedGitProviderKind {
    #[default]
    Github,
    /// Bare directories under `local_root`, reached over `file://`.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostedGitConfig {
    pub provider: HostedGitProviderKind,
    pub login: Option<String>,
    pub token: Option<String>,
    pub organization: Option<String>,
    pub api_url: String,
    pub ssh_host: String,
    pub access_protocol: AccessProtocol,
    pub local_root: PathBuf,
}

impl Default for HostedGitConfig {
    fn default() -> Self {
        Self {
            provider: HostedGitProviderKind::default(),
            login: None,
            token: None,
            organization: None,
            api_url: "https://api.github.com".to_string(),
            ssh_host: "github.com".to_string(),
            access_protocol: AccessProtocol::Ssh,
            local_root: PathBuf::new(),
        }
    }
}

/// Credentials required to create a hosted-git repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCredentials {
    pub login: String,
    pub token: String,
    pub organization: String,
}

impl HostedGitConfig {
    /// Login, token and organization, or a fatal configuration error naming
    /// every missing field.
    pub fn credentials(&self) -> Result<GitCredentials, PublishError> {
        fn present(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        }

        let login = present(&self.login);
        let token = present(&self.token);
        let organization = present(&self.organization);
        match (login, token, organization) {
            (Some(login), Some(token), Some(organization)) => Ok(GitCredentials {
                login,
                token,
                organization,
            }),
            (login, token, organization) => {
                let mut missing = Vec::new();
                if login.is_none() {
                    missing.push(ENV_GITHUB_LOGIN);
                }
                if token.is_none() {
                    missing.push(ENV_GITHUB_TOKEN);
                }
                if organization.is_none() {
                    missing.push(ENV_GITHUB_ORG);
                }
                Err(PublishError::Configuration {
                    target: TargetId::HostedGit,
                    message: format!(
                        "{} must be defined to create remote repositories",
                        missing.join(", ")
                    ),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStorageConfig {
    /// Directory under which buckets live.
    pub root: PathBuf,
    pub private_bucket: String,
    pub public_bucket: String,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            private_bucket: "datapub-private".to_string(),
            public_bucket: "datapub-public".to_string(),
        }
    }
}

impl ObjectStorageConfig {
    pub fn bucket_for(&self, realm: Realm) -> &str {
        match realm {
            Realm::Private => &self.private_bucket,
            Realm::Public => &self.public_bucket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            retry_backoff_ms: 1_000,
        }
    }
}

/// Root of `~/.datapub/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PublishConfig {
    pub store_root: PathBuf,
    pub hosted_git: HostedGitConfig,
    pub object_storage: ObjectStorageConfig,
    pub daemon: DaemonConfig,
}

impl PublishConfig {
    /// Defaults with every path rooted under `<home>/.datapub/`.
    pub fn default_at(home: &Path) -> Self {
        let mut config = Self::default();
        config.apply_home_defaults(home);
        config
    }

    /// Fill empty paths with their `<home>/.datapub/...` defaults.
    pub fn apply_home_defaults(&mut self, home: &Path) {
        let root = datapub_root(home);
        if self.store_root.as_os_str().is_empty() {
            self.store_root = root.join("datasets");
        }
        if self.object_storage.root.as_os_str().is_empty() {
            self.object_storage.root = root.join("buckets");
        }
        if self.hosted_git.local_root.as_os_str().is_empty() {
            self.hosted_git.local_root = root.join("git");
        }
    }

    /// Override hosted-git credentials from `lookup` (normally the process
    /// environment). Unset keys leave the file values alone.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(login) = lookup(ENV_GITHUB_LOGIN) {
            self.hosted_git.login = Some(login);
        }
        if let Some(token) = lookup(ENV_GITHUB_TOKEN) {
            self.hosted_git.token = Some(token);
        }
        if let Some(org) = lookup(ENV_GITHUB_ORG) {
            self.hosted_git.organization = Some(org);
        }
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.datapub/`
pub fn datapub_root(home: &Path) -> PathBuf {
    home.join(".datapub")
}

/// `<home>/.datapub/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    datapub_root(home).join("config.yaml")
}

/// Load the config for `home`; a missing file yields [`PublishConfig::default_at`].
///
/// Returns `ConfigError::Parse` (with path) if the YAML is malformed.
pub fn load_at(home: &Path) -> Result<PublishConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(PublishConfig::default_at(home));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    let mut config: PublishConfig = if contents.trim().is_empty() {
        PublishConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?
    };
    config.apply_home_defaults(home);
    Ok(config)
}

/// `load_at` convenience wrapper, with environment overrides applied.
pub fn load() -> Result<PublishConfig, ConfigError> {
    Ok(load_at(&home()?)?.with_env_overrides())
}

/// Atomically save the config: `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &PublishConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path_at(home);
    let dir = datapub_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::Io {
        path: dir.clone(),
        source: e,
    })?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| ConfigError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| ConfigError::Io {
        path: path.clone(),
        source: e,
    })?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &PublishConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
        ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
