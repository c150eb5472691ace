//! Freeze / melt state machine (spec.md §4.11).
//!
//! The timeout path is a cancellable single-shot timer task, the same shape
//! Design Notes §9 calls for: a generation counter stands in for a proper
//! cancellation handle, so a timer that fires after a race has already
//! re-frozen or melted the device is a safe no-op instead of clobbering
//! newer state.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, WalbError};
use crate::param::WALB_MAX_FREEZE_TIMEOUT_SECS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreezeState {
    Melted,
    Frozen,
    FrozenWithTimeout,
}

struct Inner {
    state: FreezeState,
    generation: u64,
}

/// Hooks the freeze gate calls while holding no lock, matching the
/// "must not be called under the checkpoint write lock" rule from §5.
pub trait FreezeHooks: Send + Sync {
    fn stop_io_and_checkpointer(&self);
    fn start_checkpointer_and_resume_io(&self);
}

pub struct FreezeGate<H: FreezeHooks + 'static> {
    inner: Mutex<Inner>,
    hooks: Arc<H>,
    self_ref: Mutex<Option<Arc<FreezeGate<H>>>>,
}

impl<H: FreezeHooks + 'static> FreezeGate<H> {
    pub fn new(hooks: Arc<H>) -> Arc<Self> {
        let gate = Arc::new(Self {
            inner: Mutex::new(Inner {
                state: FreezeState::Melted,
                generation: 0,
            }),
            hooks,
            self_ref: Mutex::new(None),
        });
        *gate.self_ref.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn state(&self) -> FreezeState {
        self.inner.lock().unwrap().state
    }

    pub fn is_frozen(&self) -> bool {
        self.state() != FreezeState::Melted
    }

    /// `freeze(timeout_s)`; `timeout_s == 0` means manual (no auto-melt).
    pub fn freeze(&self, timeout_s: u32) -> Result<()> {
        let timeout_s = timeout_s.min(WALB_MAX_FREEZE_TIMEOUT_SECS);
        let mut g = self.inner.lock().unwrap();
        match g.state {
            FreezeState::Melted => {
                drop(g);
                self.hooks.stop_io_and_checkpointer();
                let mut g = self.inner.lock().unwrap();
                g.generation += 1;
                g.state = if timeout_s > 0 {
                    FreezeState::FrozenWithTimeout
                } else {
                    FreezeState::Frozen
                };
                debug!(timeout_s, state = ?g.state, "melted -> frozen");
                if timeout_s > 0 {
                    self.arm_timeout(g.generation, timeout_s);
                }
                Ok(())
            }
            FreezeState::Frozen => {
                debug!("freeze on already-frozen device is a no-op");
                Ok(())
            }
            FreezeState::FrozenWithTimeout => {
                if timeout_s > 0 {
                    // "cancel pending, re-arm"
                    g.generation += 1;
                    let gen = g.generation;
                    debug!(timeout_s, "re-arming freeze timeout");
                    drop(g);
                    self.arm_timeout(gen, timeout_s);
                    Ok(())
                } else {
                    warn!("freeze(0) against FROZEN_WITH_TIMEOUT is a race");
                    Err(WalbError::FreezeRace)
                }
            }
        }
    }

    pub fn melt(&self) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        match g.state {
            FreezeState::Melted => {
                debug!("melt on already-melted device is a no-op");
                Ok(())
            }
            FreezeState::Frozen | FreezeState::FrozenWithTimeout => {
                g.generation += 1;
                g.state = FreezeState::Melted;
                drop(g);
                debug!("frozen -> melted");
                self.hooks.start_checkpointer_and_resume_io();
                Ok(())
            }
        }
    }

    fn arm_timeout(&self, generation: u64, timeout_s: u32) {
        let Some(self_arc) = self.self_ref.lock().unwrap().clone() else {
            return;
        };
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(timeout_s as u64));
            let mut g = self_arc.inner.lock().unwrap();
            if g.state != FreezeState::FrozenWithTimeout || g.generation != generation {
                debug!("freeze timeout fired after a race; ignoring");
                return;
            }
            g.generation += 1;
            g.state = FreezeState::Melted;
            drop(g);
            debug!("freeze timeout elapsed -> melted");
            self_arc.hooks.start_checkpointer_and_resume_io();
        });
    }
}
