//! Daemon configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.reposync/
//!   config.yaml    (optional, defaults apply when absent)
//! ```
//!
//! Every function takes an explicit home (`fn_at(home: &Path, …)`) so tests
//! can point it at a `TempDir`; callers resolve the real one with [`home`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Component type tags of the repository's naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameTypes {
    pub generic: u8,
    pub version: u8,
    pub timestamp: u8,
}

impl Default for NameTypes {
    fn default() -> Self {
        Self {
            generic: 0x08,
            version: 0x36,
            timestamp: 0x38,
        }
    }
}

/// Argv templates for the external collaborators.
///
/// Placeholders: `{repo}`, `{name}`, `{file}`, `{timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Prints one hex-encoded key per line.
    pub list_keys: Vec<String>,
    pub insert: Vec<String>,
    pub delete: Vec<String>,
    pub cache_erase: Vec<String>,
    pub announce: Vec<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        let argv = |args: &[&str]| args.iter().map(|s| s.to_string()).collect();
        Self {
            list_keys: argv(&[
                "sqlite3",
                "~/.ndn/ndn-python-repo/sqlite3.db",
                "SELECT hex(key) FROM data",
            ]),
            insert: argv(&[
                "python3",
                "./putfile.py",
                "-r",
                "{repo}",
                "-f",
                "{file}",
                "-n",
                "{name}",
                "--timestamp",
                "{timestamp}",
            ]),
            delete: argv(&["python3", "./delfile.py", "-r", "{repo}", "-n", "{name}"]),
            cache_erase: argv(&["nfdc", "cs", "erase", "{name}"]),
            announce: argv(&["./psync-update", "psync", "{name}"]),
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local tree mirrored into the repository.
    pub watch_dir: PathBuf,
    /// Datagram socket the fetch client sends `LOCK:` / `UNLOCK:` to.
    pub signal_socket: PathBuf,
    /// Repository prefix handed to the insert / delete commands.
    pub repo_name: String,
    pub name_types: NameTypes,
    pub debounce_ms: u64,
    pub commit_poll_ms: u64,
    pub commit_poll_max_ms: u64,
    pub commit_timeout_ms: u64,
    pub commands: CommandTemplates,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("~/bmw"),
            signal_socket: PathBuf::from("~/tmp/ndn-fetch.sock"),
            repo_name: "/bmw".to_string(),
            name_types: NameTypes::default(),
            debounce_ms: 2000,
            commit_poll_ms: 100,
            commit_poll_max_ms: 1600,
            commit_timeout_ms: 30_000,
            commands: CommandTemplates::default(),
        }
    }
}

/// Upper bound for every millisecond setting: one day.
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reject settings the daemon cannot run with. `path` names the file
    /// the values came from.
    pub fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            field,
            reason,
        };

        for (field, value) in [
            ("debounce_ms", self.debounce_ms),
            ("commit_poll_ms", self.commit_poll_ms),
            ("commit_poll_max_ms", self.commit_poll_max_ms),
            ("commit_timeout_ms", self.commit_timeout_ms),
        ] {
            if value > MAX_INTERVAL_MS {
                return Err(invalid(
                    field,
                    format!("{value} exceeds the {MAX_INTERVAL_MS} ms limit"),
                ));
            }
        }
        if self.commit_poll_ms == 0 {
            return Err(invalid("commit_poll_ms", "must be at least 1".to_string()));
        }

        let NameTypes {
            generic,
            version,
            timestamp,
        } = self.name_types;
        if generic == version || generic == timestamp || version == timestamp {
            return Err(invalid(
                "name_types",
                format!("tags must be distinct (generic {generic}, version {version}, timestamp {timestamp})"),
            ));
        }
        Ok(())
    }

    /// Expand a leading `~` in every path-like field against `home`.
    pub fn expand_home(mut self, home: &Path) -> Self {
        self.watch_dir = expand_tilde(&self.watch_dir, home);
        self.signal_socket = expand_tilde(&self.signal_socket, home);
        for template in [
            &mut self.commands.list_keys,
            &mut self.commands.insert,
            &mut self.commands.delete,
            &mut self.commands.cache_erase,
            &mut self.commands.announce,
        ] {
            for arg in template.iter_mut() {
                if arg == "~" || arg.starts_with("~/") {
                    *arg = expand_tilde(Path::new(arg.as_str()), home)
                        .display()
                        .to_string();
                }
            }
        }
        self
    }
}

fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// `<home>/.reposync/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".reposync")
}

/// `<home>/.reposync/config.yaml`, pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

/// Load the configuration with `~` expanded.
///
/// Returns defaults if the file does not exist, `ConfigError::Parse`
/// (with path) if it is malformed and `ConfigError::Invalid` if a value is
/// out of range.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default().expand_home(home));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?;
    config.validate(&path)?;
    Ok(config.expand_home(home))
}

/// Save atomically: write `<path>.tmp`, then rename.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    let dir = config_dir_at(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
