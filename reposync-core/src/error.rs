//! Error types for reposync-core.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures decoding or encoding a binary name key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    /// A component header or value runs past the end of the blob.
    #[error(
        "malformed name: component at offset {offset} declares {declared} value bytes \
         but only {remaining} remain"
    )]
    Truncated {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// Fewer than two bytes left where a `(type, length)` header should start.
    #[error("malformed name: dangling header byte at offset {offset}")]
    TruncatedHeader { offset: usize },

    /// A version or timestamp value does not fit in a `u64`.
    #[error("malformed name: numeric component at offset {offset} is {width} bytes wide")]
    NumberTooWide { offset: usize, width: usize },

    /// The single length byte caps a value at 255 bytes.
    #[error("component value is {len} bytes; the one-byte length field allows at most 255")]
    ValueTooLong { len: usize },
}

/// Failures talking to an external collaborator (repository, cache, peer sync).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The repository could not be queried at all.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The collaborator command could not be spawned.
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The collaborator command ran and reported failure.
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// A command template is empty or otherwise unusable.
    #[error("invalid command template for {0}")]
    Template(&'static str),

    /// Staging the payload for an insert failed.
    #[error("I/O error staging payload: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid {field} in {path}: {reason}")]
    Invalid {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
