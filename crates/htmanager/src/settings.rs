//! Configuration of a managed repository.
//!
//! Values come from an optional TOML file, overridden by `HTMANAGER_*`
//! environment variables (`HTMANAGER_PASSWD_DIR`, `HTMANAGER_ADMINS=a,b`,
//! ...).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where password files live unless configured otherwise.
pub const DEFAULT_PASSWD_DIR: &str = "/etc/htmanager";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

fn default_passwd_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PASSWD_DIR)
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

/// `HTMANAGER_<KEY>` variables; nested keys would use `__`.
fn environment() -> Environment {
    Environment::with_prefix("HTMANAGER")
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("admins")
        .try_parsing(true)
}

/// Settings for one repository's password file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Repository name, also the default password file name.
    pub repository: String,

    /// Users allowed to manage other accounts.
    pub admins: Vec<String>,

    /// Directory holding the password file.
    #[serde(default = "default_passwd_dir")]
    pub passwd_dir: PathBuf,

    /// Password file name inside `passwd_dir`; defaults to `repository`.
    #[serde(default)]
    pub passwd_file: Option<String>,

    /// Maximum wait for the file lock, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Settings {
    /// Loads settings from `file` (if given) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(file, environment())
    }

    fn load_with(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }
        let settings: Settings = builder
            .add_source(env)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.is_empty() {
            return Err(ConfigError::Message("repository cannot be empty".into()));
        }
        if self.admins.iter().all(|admin| admin.is_empty()) {
            return Err(ConfigError::Message(
                "at least one administrator must be configured".into(),
            ));
        }
        if self.passwd_file.as_deref() == Some("") {
            return Err(ConfigError::Message("passwd_file cannot be empty".into()));
        }
        Ok(())
    }

    /// Full path of the password file.
    pub fn passwd_path(&self) -> PathBuf {
        self.passwd_dir
            .join(self.passwd_file.as_deref().unwrap_or(&self.repository))
    }

    /// Lock wait as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
