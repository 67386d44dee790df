//! In-memory collaborators recording every call in one shared log.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use reposync_core::name::{encode, NameComponent};
use reposync_core::{ClientError, Clock, ContentCache, NameTypes, PeerSync, Repository};
use reposync_daemon::Collaborators;

pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Encode `/a/b.txt` + timestamp the way the repository stores it.
pub fn key(name: &str, timestamp: u64) -> Vec<u8> {
    let types = NameTypes::default();
    let mut components: Vec<_> = name
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| NameComponent::new(types.generic, part.as_bytes()))
        .collect();
    components.push(NameComponent::number(types.timestamp, timestamp));
    encode(&components).expect("encodable name")
}

#[derive(Default)]
pub struct Faults {
    pub delete: bool,
    pub insert: bool,
    pub erase: bool,
    pub announce: bool,
    pub list: bool,
    /// Inserts are accepted but never become visible.
    pub never_commit: bool,
}

pub struct Memory {
    pub log: CallLog,
    pub keys: Mutex<Vec<Vec<u8>>>,
    pub faults: Faults,
    pub yield_between: bool,
    clock: AtomicU64,
    clock_step: u64,
}

impl Memory {
    pub fn new(faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            keys: Mutex::new(Vec::new()),
            faults,
            yield_between: false,
            clock: AtomicU64::new(1_700_000_000),
            clock_step: 0,
        })
    }

    /// Every `now_secs` call returns a fresh, increasing value.
    pub fn ticking(faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            keys: Mutex::new(Vec::new()),
            faults,
            yield_between: true,
            clock: AtomicU64::new(1_700_000_000),
            clock_step: 1,
        })
    }

    pub fn seed(&self, name: &str, timestamp: u64) {
        self.keys.lock().unwrap().push(key(name, timestamp));
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            repo: self.clone(),
            cache: self.clone(),
            peers: self.clone(),
            clock: self.clone(),
        }
    }

    async fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
        if self.yield_between {
            tokio::task::yield_now().await;
        }
    }

    fn fail(op: &'static str) -> ClientError {
        ClientError::Unavailable(format!("{op} refused"))
    }
}

#[async_trait]
impl Repository for Memory {
    async fn list_all_keys(&self) -> Result<Vec<Vec<u8>>, ClientError> {
        self.record("list".to_string()).await;
        if self.faults.list {
            return Err(Self::fail("list"));
        }
        Ok(self.keys.lock().unwrap().clone())
    }

    async fn insert(&self, name: &str, content: &[u8], timestamp: u64) -> Result<(), ClientError> {
        self.record(format!(
            "insert:{name}@{timestamp}:{}",
            String::from_utf8_lossy(content)
        ))
        .await;
        if self.faults.insert {
            return Err(Self::fail("insert"));
        }
        if !self.faults.never_commit {
            self.keys.lock().unwrap().push(key(name, timestamp));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.record(format!("delete:{name}")).await;
        if self.faults.delete {
            return Err(Self::fail("delete"));
        }
        let types = NameTypes::default();
        self.keys.lock().unwrap().retain(|k| {
            reposync_core::name::decode_rendered(k, &types)
                .map(|r| r.uri != name)
                .unwrap_or(true)
        });
        Ok(())
    }
}

#[async_trait]
impl ContentCache for Memory {
    async fn erase(&self, prefix: &str) -> Result<(), ClientError> {
        self.record(format!("erase:{prefix}")).await;
        if self.faults.erase {
            return Err(Self::fail("erase"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSync for Memory {
    async fn announce(&self, versioned_name: &str) -> Result<(), ClientError> {
        self.record(format!("announce:{versioned_name}")).await;
        if self.faults.announce {
            return Err(Self::fail("announce"));
        }
        Ok(())
    }
}

impl Clock for Memory {
    fn now_secs(&self) -> u64 {
        self.clock.fetch_add(self.clock_step, Ordering::SeqCst)
    }
}

/// Name a mutating call refers to; `None` for reads.
pub fn call_target(call: &str) -> Option<&str> {
    let (op, rest) = call.split_once(':')?;
    match op {
        "erase" | "delete" | "announce" => Some(rest.split("/t=").next().unwrap_or(rest)),
        "insert" => Some(rest.split('@').next().unwrap_or(rest)),
        _ => None,
    }
}

/// Split the log into per-update segments, each ending with its announce.
pub fn segments(calls: &[String]) -> Vec<Vec<String>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for call in calls {
        current.push(call.clone());
        if call.starts_with("announce:") {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
