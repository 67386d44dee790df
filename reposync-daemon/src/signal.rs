//! `LOCK:` / `UNLOCK:` datagram channel between fetch clients and the daemon.
//!
//! Text framed, one message per datagram, no acknowledgement. A dropped
//! message leaves the registry briefly inconsistent; the next edit cycle
//! heals it.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::net::UnixDatagram;
use tokio::sync::broadcast;

use crate::error::{io_err, DaemonError, SignalError};
use crate::locks::LockCoordinator;

const LOCK_PREFIX: &str = "LOCK:";
const UNLOCK_PREFIX: &str = "UNLOCK:";
const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Lock(PathBuf),
    Unlock(PathBuf),
}

impl SignalMessage {
    /// Same message with its path resolved the way watcher paths are.
    pub fn resolved(self) -> Self {
        match self {
            SignalMessage::Lock(path) => SignalMessage::Lock(resolve_path(&path)),
            SignalMessage::Unlock(path) => SignalMessage::Unlock(resolve_path(&path)),
        }
    }

    pub fn from_datagram(bytes: &[u8]) -> Result<Self, SignalError> {
        std::str::from_utf8(bytes)
            .map_err(|_| SignalError::NotUtf8)?
            .parse()
    }
}

impl FromStr for SignalMessage {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim_end_matches(['\n', '\r', '\0']);
        let (ctor, rest): (fn(PathBuf) -> Self, &str) =
            if let Some(rest) = text.strip_prefix(LOCK_PREFIX) {
                (SignalMessage::Lock, rest)
            } else if let Some(rest) = text.strip_prefix(UNLOCK_PREFIX) {
                (SignalMessage::Unlock, rest)
            } else {
                return Err(SignalError::Unrecognized(text.to_string()));
            };
        if rest.is_empty() {
            return Err(SignalError::EmptyPath);
        }
        Ok(ctor(PathBuf::from(rest)))
    }
}

impl fmt::Display for SignalMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalMessage::Lock(path) => write!(f, "{LOCK_PREFIX}{}", path.display()),
            SignalMessage::Unlock(path) => write!(f, "{UNLOCK_PREFIX}{}", path.display()),
        }
    }
}

/// Canonical form of `path`, tolerating files that do not exist yet.
///
/// A fetch may lock a file before creating it or any of its directories.
/// The deepest existing ancestor is canonicalized and the missing tail is
/// appended, so the result matches the watcher's path once the file exists.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut missing: Vec<OsString> = Vec::new();
    let mut ancestor = absolute.clone();

    loop {
        if let Ok(real) = fs::canonicalize(&ancestor) {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        let Some(name) = ancestor.file_name().map(OsString::from) else {
            return absolute;
        };
        if !ancestor.pop() {
            return absolute;
        }
        missing.push(name);
    }
}

/// Send one message to the daemon's signal socket.
pub fn send_signal(socket: &Path, message: &SignalMessage) -> Result<(), SignalError> {
    let io = |source| SignalError::Io {
        socket: socket.to_path_buf(),
        source,
    };
    let sender = StdUnixDatagram::unbound().map_err(io)?;
    sender
        .send_to(message.to_string().as_bytes(), socket)
        .map_err(io)?;
    Ok(())
}

/// Bind the signal socket, replacing a stale socket file.
pub fn bind(socket: &Path) -> Result<UnixDatagram, DaemonError> {
    if let Some(dir) = socket.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    match fs::remove_file(socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "removed stale signal socket"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(socket, err)),
    }
    UnixDatagram::bind(socket).map_err(|e| io_err(socket, e))
}

/// Receive messages until shutdown, applying each to the lock registry.
///
/// Receive and parse failures are logged; the loop keeps going.
pub async fn listen(
    datagrams: UnixDatagram,
    socket: PathBuf,
    coordinator: LockCoordinator,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = datagrams.recv_from(&mut buf) => {
                let len = match received {
                    Ok((len, _)) => len,
                    Err(source) => {
                        let err = SignalError::Io { socket: socket.clone(), source };
                        tracing::warn!(error = %err, "signal receive failed");
                        continue;
                    }
                };
                match SignalMessage::from_datagram(&buf[..len]) {
                    Ok(message) => coordinator.apply(message.resolved()),
                    Err(err) => tracing::warn!(error = %err, "ignoring signal message"),
                }
            }
        }
    }

    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(socket = %socket.display(), error = %err, "could not remove signal socket");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::locks::{PathLockRegistry, Suppression};
    use crate::state::SyncState;

    #[test]
    fn parses_lock_and_unlock() {
        assert_eq!(
            "LOCK:/tree/a.txt".parse::<SignalMessage>().unwrap(),
            SignalMessage::Lock(PathBuf::from("/tree/a.txt"))
        );
        assert_eq!(
            "UNLOCK:/tree/a b.txt\n".parse::<SignalMessage>().unwrap(),
            SignalMessage::Unlock(PathBuf::from("/tree/a b.txt"))
        );
    }

    #[test]
    fn rejects_unknown_and_empty_messages() {
        assert!(matches!(
            "PING:/x".parse::<SignalMessage>(),
            Err(SignalError::Unrecognized(_))
        ));
        assert!(matches!(
            "LOCK:".parse::<SignalMessage>(),
            Err(SignalError::EmptyPath)
        ));
        assert!(matches!(
            SignalMessage::from_datagram(&[0xff, 0xfe]),
            Err(SignalError::NotUtf8)
        ));
    }

    #[test]
    fn display_is_the_wire_form() {
        let message = SignalMessage::Unlock(PathBuf::from("/tree/a.txt"));
        assert_eq!(message.to_string(), "UNLOCK:/tree/a.txt");
        assert_eq!(message.to_string().parse::<SignalMessage>().unwrap(), message);
    }

    #[test]
    fn resolve_handles_missing_file_in_existing_dir() {
        let dir = TempDir::new().unwrap();
        let real_dir = fs::canonicalize(dir.path()).unwrap();
        let resolved = resolve_path(&dir.path().join("not-yet.txt"));
        assert_eq!(resolved, real_dir.join("not-yet.txt"));
    }

    #[test]
    fn resolve_follows_symlinked_root_into_missing_directories() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let requested = link.join("sub/dir/f.txt");
        let at_lock = resolve_path(&requested);
        let mut registry = PathLockRegistry::default();
        match SignalMessage::Lock(requested.clone()).resolved() {
            SignalMessage::Lock(path) => registry.lock(path),
            other => panic!("unexpected {other}"),
        }

        fs::create_dir_all(real.join("sub/dir")).unwrap();
        fs::write(real.join("sub/dir/f.txt"), b"fetched").unwrap();
        // The watcher sees the real location.
        let at_event = resolve_path(&real.join("sub/dir/f.txt"));

        assert_eq!(at_lock, at_event);
        assert_eq!(registry.check(&at_event), Some(Suppression::Locked));
        assert_eq!(
            at_lock,
            fs::canonicalize(&real).unwrap().join("sub/dir/f.txt")
        );
    }

    #[tokio::test]
    async fn listener_applies_datagrams_to_registry() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("fetch.sock");
        let target = dir.path().join("a.txt");
        fs::write(&target, b"x").unwrap();
        let target = fs::canonicalize(&target).unwrap();

        let state = SyncState::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let datagrams = bind(&socket).unwrap();
        let task = tokio::spawn(listen(
            datagrams,
            socket.clone(),
            LockCoordinator::new(state.clone()),
            shutdown_tx.subscribe(),
        ));

        send_signal(&socket, &SignalMessage::Lock(target.clone())).unwrap();
        send_signal(&socket, &SignalMessage::Unlock(target.clone())).unwrap();

        let mut snapshot = state.snapshot();
        for _ in 0..50 {
            if !snapshot.suppress_once.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = state.snapshot();
        }
        assert!(snapshot.locked.is_empty());
        assert_eq!(snapshot.suppress_once, vec![target]);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!socket.exists(), "socket removed on shutdown");
    }

    #[test]
    fn send_to_missing_socket_is_signal_error() {
        let dir = TempDir::new().unwrap();
        let err = send_signal(
            &dir.path().join("absent.sock"),
            &SignalMessage::Lock(PathBuf::from("/x")),
        )
        .unwrap_err();
        assert!(matches!(err, SignalError::Io { .. }));
    }
}
