use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn reposync_root(home: &Path) -> PathBuf {
    reposync_core::config::config_dir_at(home)
}

/// Control socket for `status` / `stop` requests.
pub fn socket_path(home: &Path) -> PathBuf {
    reposync_root(home).join(DAEMON_SOCKET)
}
