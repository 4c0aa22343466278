//! Effect sequencer.
//!
//! At most one [`Playback`] exists. The sequencer never sleeps: the owner
//! waits until [`Sequencer::deadline`] and then calls [`Sequencer::tick`],
//! which runs the due step through the session manager and schedules the
//! next one. Cancelling simply drops the playback, so a cancelled pattern
//! can never write again.
//!
//! Step `n` is written at `start + sum(hold[0..n])`. After the last step's
//! hold the playback completes without any trailing stop write.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use vest_types::{CellId, EffectPattern, EffectStep, Intensity, PlaybackInfo};

use crate::error::SessionError;
use crate::session::{SessionManager, StopReport};

/// The running instance of a pattern.
#[derive(Debug, Clone)]
pub struct Playback {
    pattern: EffectPattern,
    next_step: usize,
    due_at: Instant,
}

impl Playback {
    #[must_use]
    pub fn effect_name(&self) -> &str {
        &self.pattern.name
    }

    #[must_use]
    pub fn pattern(&self) -> &EffectPattern {
        &self.pattern
    }

    #[must_use]
    pub fn info(&self) -> PlaybackInfo {
        PlaybackInfo {
            effect_name: self.pattern.name.clone(),
            step: self.next_step,
            total_steps: self.pattern.steps.len(),
        }
    }
}

/// What one call to [`Sequencer::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Step `step` (zero-based) was written to every cell in `triggered`.
    Step {
        effect_name: String,
        step: usize,
        total_steps: usize,
        triggered: Vec<CellId>,
        intensity: Intensity,
    },
    /// The last step's hold elapsed.
    Completed { effect_name: String },
    /// A write failed; the playback was aborted. `triggered` lists the cells
    /// written before the failure.
    Failed {
        effect_name: String,
        step: usize,
        triggered: Vec<CellId>,
        intensity: Intensity,
        error: SessionError,
    },
}

/// Outcome of [`Sequencer::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    pub cancelled: Option<String>,
    pub report: StopReport,
}

#[derive(Debug, Default)]
pub struct Sequencer {
    active: Option<Playback>,
}

impl Sequencer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `pattern`, replacing any running playback. The first step is due
    /// immediately. Returns the name of the cancelled playback.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the session has no open device.
    pub fn play_effect(
        &mut self,
        session: &SessionManager,
        pattern: EffectPattern,
        now: Instant,
    ) -> Result<Option<String>, SessionError> {
        if !session.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let cancelled = self.cancel();
        debug!(
            "Starting effect {} ({} steps, {} ms)",
            pattern.name,
            pattern.steps.len(),
            pattern.total_duration_ms()
        );
        self.active = Some(Playback {
            pattern,
            next_step: 0,
            due_at: now,
        });
        Ok(cancelled)
    }

    /// Single-step convenience around [`play_effect`](Self::play_effect).
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the session has no open device.
    pub fn play_ad_hoc(
        &mut self,
        session: &SessionManager,
        cells: BTreeSet<CellId>,
        intensity: Intensity,
        hold_ms: u64,
        now: Instant,
    ) -> Result<Option<String>, SessionError> {
        let step = EffectStep {
            cells,
            intensity,
            hold_ms,
        };
        self.play_effect(session, EffectPattern::ad_hoc(vec![step]), now)
    }

    /// Drop the active playback without touching the hardware.
    pub fn cancel(&mut self) -> Option<String> {
        let playback = self.active.take()?;
        debug!(
            "Cancelled effect {} at step {}",
            playback.pattern.name, playback.next_step
        );
        Some(playback.pattern.name)
    }

    /// Cancel, then turn every cell off. Safe with nothing playing.
    pub fn stop(&mut self, session: &mut SessionManager) -> StopOutcome {
        let cancelled = self.cancel();
        let report = session.stop_all();
        StopOutcome { cancelled, report }
    }

    /// When the next step (or completion) is due.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|p| p.due_at)
    }

    #[must_use]
    pub fn active(&self) -> Option<&Playback> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn info(&self) -> Option<PlaybackInfo> {
        self.active.as_ref().map(Playback::info)
    }

    /// Advance the playback if it is due at `now`.
    pub fn tick(&mut self, session: &mut SessionManager, now: Instant) -> Option<TickOutcome> {
        let playback = self.active.as_mut()?;
        if now < playback.due_at {
            return None;
        }

        let index = playback.next_step;
        let Some(step) = playback.pattern.steps.get(index).cloned() else {
            let effect_name = playback.pattern.name.clone();
            self.active = None;
            debug!("Effect {effect_name} completed");
            return Some(TickOutcome::Completed { effect_name });
        };

        let mut triggered = Vec::with_capacity(step.cells.len());
        for &cell in &step.cells {
            if let Err(error) = session.trigger_cell(cell, step.intensity) {
                let effect_name = playback.pattern.name.clone();
                warn!("Effect {effect_name} aborted at step {index}: {error}");
                self.active = None;
                return Some(TickOutcome::Failed {
                    effect_name,
                    step: index,
                    triggered,
                    intensity: step.intensity,
                    error,
                });
            }
            triggered.push(cell);
        }

        playback.next_step += 1;
        playback.due_at += Duration::from_millis(step.hold_ms);

        Some(TickOutcome::Step {
            effect_name: playback.pattern.name.clone(),
            step: index,
            total_steps: playback.pattern.steps.len(),
            triggered,
            intensity: step.intensity,
        })
    }
}
