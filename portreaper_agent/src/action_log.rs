//! Append-only audit trail of termination attempts.
//!
//! Entries live in a bounded in-memory ring (readers use `recent`) and are
//! mirrored as JSON lines to a size-rotated file when a path is configured.
//! Both happen under one lock, so `seq` and `timestamp` follow insertion
//! order and readers never see a half-written entry.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use tracing::{info, warn};

use crate::error::AuditError;
use crate::types::{Action, LogEntry, ResultCode};

/// Everything about an attempt except what the log assigns itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub action: Action,
    pub target_process: Option<String>,
    pub target_pid: u32,
    pub target_port: Option<u16>,
    pub result: ResultCode,
    pub actor: Option<String>,
}

#[derive(Debug)]
pub struct Appended {
    pub entry: LogEntry,
    /// Set when the durable copy could not be written; the in-memory entry
    /// exists regardless.
    pub sink_error: Option<AuditError>,
}

#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            backups: 5,
        }
    }
}

#[derive(Debug)]
struct AuditFile {
    path: PathBuf,
    rotation: RotationPolicy,
    file: Option<File>,
    size: u64,
}

impl AuditFile {
    fn new(path: PathBuf, rotation: RotationPolicy) -> Self {
        Self {
            path,
            rotation,
            file: None,
            size: 0,
        }
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push(format!(".{n}"));
        PathBuf::from(s)
    }

    fn open(&mut self) -> Result<&mut File, AuditError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(f) => Ok(f),
            None => Err(AuditError::Io(std::io::Error::other("audit file not open"))),
        }
    }

    // file -> file.1 -> ... -> file.N; the oldest backup falls off.
    fn rotate(&mut self) -> Result<(), AuditError> {
        self.file = None;
        let backups = self.rotation.backups.max(1);
        let oldest = self.backup_path(backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..backups).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, self.backup_path(1))?;
        }
        self.size = 0;
        Ok(())
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.open()?;
        if self.size > 0 && self.size + line.len() as u64 > self.rotation.max_bytes {
            self.rotate()?;
        }
        let f = self.open()?;
        f.write_all(&line)?;
        f.flush()?;
        self.size += line.len() as u64;
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
    sink: Option<AuditFile>,
}

#[derive(Debug)]
pub struct ActionLog {
    inner: Mutex<Inner>,
    capacity: usize,
    sink_failures: AtomicU64,
}

impl ActionLog {
    /// Memory-only log keeping the newest `capacity` entries.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                next_seq: 1,
                sink: None,
            }),
            capacity: capacity.max(1),
            sink_failures: AtomicU64::new(0),
        }
    }

    /// Memory log mirrored to `path` as JSON lines with size-based rotation.
    pub fn with_file(capacity: usize, path: impl AsRef<Path>, rotation: RotationPolicy) -> Self {
        let log = Self::in_memory(capacity);
        log.lock().sink = Some(AuditFile::new(path.as_ref().to_path_buf(), rotation));
        log
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, draft: AuditDraft) -> Appended {
        let mut inner = self.lock();
        let entry = LogEntry {
            seq: inner.next_seq,
            timestamp: Local::now(),
            action: draft.action,
            target_process: draft.target_process,
            target_pid: draft.target_pid,
            target_port: draft.target_port,
            result: draft.result,
            actor: draft.actor,
        };
        inner.next_seq += 1;
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(entry.clone());

        let sink_error = inner.sink.as_mut().and_then(|s| s.write(&entry).err());
        drop(inner);

        info!(
            seq = entry.seq,
            action = entry.action.as_str(),
            pid = entry.target_pid,
            port = ?entry.target_port,
            process = ?entry.target_process,
            result = entry.result.as_str(),
            actor = ?entry.actor,
            "audit"
        );
        if let Some(e) = &sink_error {
            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            warn!("audit entry {} not persisted: {e}", entry.seq);
        }
        Appended { entry, sink_error }
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let inner = self.lock();
        inner.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries that never reached the durable sink.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }
}
