//! Checkpointer state machine (spec.md §4.10).
//!
//! One mutex plus one cancellable timer task, per Design Notes §9's
//! instruction to avoid holding the state lock across the timer's
//! cancel/join — `stop()` below releases the lock before blocking on the
//! condvar that the worker thread signals on its way out.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::lsid::LsidSet;
use crate::param::WALB_MAX_CHECKPOINT_INTERVAL_MS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointState {
    Stopped,
    Waiting,
    Running,
    Stopping,
}

/// Device-specific actions the checkpointer needs but doesn't own: syncing
/// the data device and writing the superblock, and flagging the device
/// read-only on a failed sync (spec.md §4.10, §7).
pub trait CheckpointHooks: Send + Sync {
    fn flush_and_write_superblock(&self) -> Result<()>;
    fn mark_read_only(&self);
}

pub struct Checkpointer<H: CheckpointHooks + 'static> {
    state: Mutex<CheckpointState>,
    cv: std::sync::Condvar,
    interval_ms: Mutex<u32>,
    hooks: Arc<H>,
    lsids: Arc<LsidSet>,
    self_ref: Mutex<Option<Arc<Self>>>,
}

impl<H: CheckpointHooks + 'static> Checkpointer<H> {
    pub fn new(interval_ms: u32, hooks: Arc<H>, lsids: Arc<LsidSet>) -> Arc<Self> {
        let this = Arc::new(Self {
            state: Mutex::new(CheckpointState::Stopped),
            cv: std::sync::Condvar::new(),
            interval_ms: Mutex::new(interval_ms.min(WALB_MAX_CHECKPOINT_INTERVAL_MS)),
            hooks,
            lsids,
            self_ref: Mutex::new(None),
        });
        *this.self_ref.lock().unwrap() = Some(this.clone());
        this
    }

    pub fn state(&self) -> CheckpointState {
        *self.state.lock().unwrap()
    }

    pub fn set_interval_ms(&self, ms: u32) {
        *self.interval_ms.lock().unwrap() = ms.min(WALB_MAX_CHECKPOINT_INTERVAL_MS);
    }

    pub fn interval_ms(&self) -> u32 {
        *self.interval_ms.lock().unwrap()
    }

    /// `STOPPED -> WAITING`, spawning the timer worker.
    pub fn start_checkpointing(&self) {
        let mut st = self.state.lock().unwrap();
        if *st != CheckpointState::Stopped {
            return;
        }
        *st = CheckpointState::Waiting;
        drop(st);
        let Some(this) = self.self_ref.lock().unwrap().clone() else {
            return;
        };
        thread::spawn(move || this.run());
        debug!("checkpointer started");
    }

    fn run(self: Arc<Self>) {
        loop {
            let interval = self.interval_ms().max(1) as u64;
            let mut st = self.state.lock().unwrap();
            if *st == CheckpointState::Stopping {
                *st = CheckpointState::Stopped;
                self.cv.notify_all();
                return;
            }
            let (mut st, timeout) = self
                .cv
                .wait_timeout(st, Duration::from_millis(interval))
                .unwrap();
            if *st == CheckpointState::Stopping {
                *st = CheckpointState::Stopped;
                self.cv.notify_all();
                return;
            }
            if timeout.timed_out() {
                *st = CheckpointState::Running;
                drop(st);
                let start = Instant::now();
                let outcome = self.sync_once();
                let sync_time_ms = start.elapsed().as_millis() as u32;

                let mut st = self.state.lock().unwrap();
                if *st == CheckpointState::Stopping {
                    *st = CheckpointState::Stopped;
                    self.cv.notify_all();
                    return;
                }
                match outcome {
                    Ok(()) => {
                        let rearm = self.interval_ms().saturating_sub(sync_time_ms).max(1);
                        self.set_interval_ms(rearm);
                        *st = CheckpointState::Waiting;
                    }
                    Err(_) => {
                        *st = CheckpointState::Stopped;
                        drop(st);
                        self.hooks.mark_read_only();
                        return;
                    }
                }
            }
        }
    }

    fn sync_once(&self) -> Result<()> {
        let snap = self.lsids.snapshot();
        if snap.written == snap.prev_written {
            debug!("checkpoint sync skipped, written == prev_written");
            return Ok(());
        }
        match self.hooks.flush_and_write_superblock() {
            Ok(()) => {
                self.lsids.superblock_synced();
                debug!(written = snap.written, "checkpoint synced");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "checkpoint sync failed");
                Err(e)
            }
        }
    }

    /// `TAKE_CHECKPOINT`: forces a sync regardless of the timer, bypassing
    /// the `written == prev_written` skip.
    pub fn take_checkpoint(&self) -> Result<()> {
        match self.hooks.flush_and_write_superblock() {
            Ok(()) => {
                self.lsids.superblock_synced();
                Ok(())
            }
            Err(e) => {
                self.hooks.mark_read_only();
                Err(e)
            }
        }
    }

    /// Cancel+join on the timer task; never called while holding the
    /// checkpoint write lock (Design Notes §9).
    pub fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        match *st {
            CheckpointState::Stopped => return,
            CheckpointState::Stopping => {}
            CheckpointState::Waiting | CheckpointState::Running => {
                *st = CheckpointState::Stopping;
                self.cv.notify_all();
            }
        }
        while *st != CheckpointState::Stopped {
            st = self.cv.wait(st).unwrap();
        }
        debug!("checkpointer stopped");
    }
}
