//! Reposync core library: name decoding, version resolution, collaborator
//! clients, configuration, errors.
//!
//! Public API surface:
//! - [`name`]: binary name decoder and renderer
//! - [`resolver`]: latest-version lookup over repository keys
//! - [`client`]: repository / cache / peer-sync client traits and the
//!   command-backed implementation
//! - [`config`]: YAML configuration load / save
//! - [`error`]: [`NameError`], [`ClientError`], [`ConfigError`]

pub mod client;
pub mod config;
pub mod error;
pub mod name;
pub mod resolver;

pub use client::{Clock, CommandClient, ContentCache, PeerSync, Repository, SystemClock};
pub use config::{CommandTemplates, NameTypes, SyncConfig};
pub use error::{ClientError, ConfigError, NameError};
pub use name::{ComponentKind, NameComponent, VersionedName};
pub use resolver::{CommitOutcome, CommitPolicy, VersionResolver};
