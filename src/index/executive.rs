//! Executive-machine election over a shared registration record.
//!
//! Every machine sharing a working folder registers itself as a participant.
//! The machine named in the record is the executive and the only one allowed
//! to write; it keeps the record alive with a heartbeat. A record whose
//! heartbeat is older than `stale_after` may be claimed by anyone.

use crate::error::{QuarryError, Result};
use crate::events::IndexEvents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub machine_name: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutiveRegistration {
    pub machine_name: String,
    pub registered_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub server_count: usize,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl ExecutiveRegistration {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        now - self.heartbeat_at > stale_after
    }

    fn touch_participant(&mut self, machine_name: &str, now: DateTime<Utc>) {
        match self
            .participants
            .iter_mut()
            .find(|p| p.machine_name.eq_ignore_ascii_case(machine_name))
        {
            Some(p) => p.last_seen = now,
            None => self.participants.push(Participant {
                machine_name: machine_name.to_string(),
                last_seen: now,
            }),
        }
    }

    fn prune_participants(&mut self, now: DateTime<Utc>, stale_after: chrono::Duration) {
        self.participants.retain(|p| now - p.last_seen <= stale_after);
        self.server_count = self.participants.len().max(1);
    }
}

/// Where the registration record lives. Swappable for a distributed lock.
pub trait RegistrationStore: Send + Sync {
    fn read(&self) -> Result<Option<ExecutiveRegistration>>;
    fn write(&self, record: &ExecutiveRegistration) -> Result<()>;
}

/// JSON record on a shared filesystem.
pub struct FileRegistrationStore {
    path: PathBuf,
}

impl FileRegistrationStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileRegistrationStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistrationStore for FileRegistrationStore {
    fn read(&self) -> Result<Option<ExecutiveRegistration>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let record = serde_json::from_str(&content).map_err(|e| {
            QuarryError::Registration(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(Some(record))
    }

    fn write(&self, record: &ExecutiveRegistration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

pub struct ExecutiveElection {
    machine_name: String,
    store: Arc<dyn RegistrationStore>,
    stale_after: chrono::Duration,
    initialized: Mutex<bool>,
    assigned: AtomicBool,
}

impl ExecutiveElection {
    pub fn new(
        machine_name: impl Into<String>,
        store: Arc<dyn RegistrationStore>,
        stale_after: Duration,
    ) -> Self {
        ExecutiveElection {
            machine_name: machine_name.into(),
            store,
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            initialized: Mutex::new(false),
            assigned: AtomicBool::new(false),
        }
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Register this machine and claim executive status if the seat is free.
    /// Only the first call does any work.
    pub fn initialize(&self, events: &dyn IndexEvents) -> Result<bool> {
        let mut initialized = self.initialized.lock().unwrap_or_else(|e| e.into_inner());
        if *initialized {
            return Ok(self.is_executive_machine());
        }
        let executive = self.elect(events, true)?;
        *initialized = true;
        Ok(executive)
    }

    /// Claim the seat if the current executive went stale.
    ///
    /// Unlike [`initialize`](Self::initialize) this never registers a new
    /// participant while another machine is live.
    pub fn reelect(&self, events: &dyn IndexEvents) -> Result<bool> {
        self.elect(events, false)
    }

    fn elect(&self, events: &dyn IndexEvents, register: bool) -> Result<bool> {
        let now = Utc::now();
        let current = self.store.read()?;

        let (mut record, claim) = match current {
            None => (self.fresh_record(now), true),
            Some(mut record) => {
                let is_self = record.machine_name.eq_ignore_ascii_case(&self.machine_name);
                let stale = record.is_stale(now, self.stale_after);
                if is_self || stale {
                    if stale && !is_self {
                        tracing::info!(
                            "[EXEC] executive {} last seen {}, {} taking over",
                            record.machine_name,
                            record.heartbeat_at,
                            self.machine_name
                        );
                    }
                    record.machine_name = self.machine_name.clone();
                    record.heartbeat_at = now;
                    if !is_self {
                        record.registered_at = now;
                    }
                    (record, true)
                } else if register {
                    (record, false)
                } else {
                    return Ok(false);
                }
            }
        };

        record.touch_participant(&self.machine_name, now);
        record.prune_participants(now, self.stale_after);
        self.store.write(&record)?;

        if claim {
            self.announce(events, record.server_count);
        } else {
            tracing::info!(
                "[EXEC] {} registered as participant, executive is {}",
                self.machine_name,
                record.machine_name
            );
        }
        Ok(claim)
    }

    fn fresh_record(&self, now: DateTime<Utc>) -> ExecutiveRegistration {
        ExecutiveRegistration {
            machine_name: self.machine_name.clone(),
            registered_at: now,
            heartbeat_at: now,
            server_count: 1,
            participants: Vec::new(),
        }
    }

    fn announce(&self, events: &dyn IndexEvents, server_count: usize) {
        if self.assigned.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(
            "[EXEC] {} is the executive machine ({} servers)",
            self.machine_name,
            server_count
        );
        events.executive_assigned(&self.machine_name, server_count);
    }

    /// Fresh read of the store. Unreadable means "not executive".
    ///
    /// A positive answer also refreshes the heartbeat once a quarter of the
    /// staleness window has passed, so an executive that only answers queries
    /// is not taken over.
    pub fn is_executive_machine(&self) -> bool {
        match self.store.read() {
            Ok(Some(record)) => {
                if !record.machine_name.eq_ignore_ascii_case(&self.machine_name) {
                    return false;
                }
                let now = Utc::now();
                if now - record.heartbeat_at > self.stale_after / 4 {
                    if let Err(e) = self.beat(record, now) {
                        tracing::warn!("[EXEC] heartbeat failed: {}", e);
                    }
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    "[EXEC] registration unreadable, refusing to write: {}",
                    e
                );
                false
            }
        }
    }

    /// Refresh the executive heartbeat. No-op for other machines.
    pub fn heartbeat(&self) -> Result<()> {
        let Some(record) = self.store.read()? else {
            return Ok(());
        };
        if !record.machine_name.eq_ignore_ascii_case(&self.machine_name) {
            return Ok(());
        }
        self.beat(record, Utc::now())
    }

    fn beat(&self, mut record: ExecutiveRegistration, now: DateTime<Utc>) -> Result<()> {
        record.heartbeat_at = now;
        record.touch_participant(&self.machine_name, now);
        self.store.write(&record)
    }
}
