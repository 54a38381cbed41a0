//! Process registry — tracks spawned subprocesses for resource exhaustion
//! protection.
//!
//! Prevents unbounded process spawning by maintaining a bounded registry of
//! active child processes with creation time and purpose, plus a reaper for
//! expired entries.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A tracked child process.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub pid: u32,
    pub purpose: String,
    pub created_at: Instant,
}

/// Registry for tracking spawned child processes.  Shared behind `Arc`;
/// interior state is mutex-guarded.
pub struct ProcessRegistry {
    max_concurrent: usize,
    processes: Mutex<HashMap<u32, ProcessEntry>>,
}

impl ProcessRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// When at capacity, further spawns must be refused (admission gate:
    /// the tool returns a failure result, not a block).
    pub fn at_capacity(&self) -> bool {
        self.count() >= self.max_concurrent
    }

    /// Register a newly spawned process.
    pub fn register(&self, pid: u32, purpose: &str) {
        let mut map = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(
            pid,
            ProcessEntry {
                pid,
                purpose: purpose.to_owned(),
                created_at: Instant::now(),
            },
        );
        log::debug!("process registered: pid={pid} purpose={purpose} total={}", map.len());
    }

    /// Remove a completed process from the registry.
    pub fn unregister(&self, pid: u32) {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid);
    }

    pub fn active_processes(&self) -> Vec<ProcessEntry> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Terminate and remove processes older than `max_age`.  Returns the
    /// count of reaped processes.
    pub fn reap_expired(&self, max_age: Duration) -> usize {
        let expired: Vec<u32> = {
            let map = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            map.values()
                .filter(|e| e.created_at.elapsed() > max_age)
                .map(|e| e.pid)
                .collect()
        };
        let mut reaped = 0;
        for pid in expired {
            terminate(pid);
            log::warn!("reaped expired process pid={pid}");
            self.unregister(pid);
            reaped += 1;
        }
        reaped
    }

    /// Remove entries whose pids no longer exist.  Returns the count removed.
    pub fn cleanup_dead(&self) -> usize {
        let dead: Vec<u32> = {
            let map = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            map.keys().copied().filter(|pid| !alive(*pid)).collect()
        };
        for pid in &dead {
            self.unregister(*pid);
        }
        dead.len()
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    // SIGTERM; already-dead processes are fine.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(unix)]
fn alive(pid: u32) -> bool {
    // Signal 0 = existence check.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn alive(_pid: u32) -> bool {
    true
}
