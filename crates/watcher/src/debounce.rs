//! Pause bookkeeping
//!
//! A writer can pause the monitor before a burst of its own writes. Each
//! pause bumps a generation; the un-pause timer carries the generation it was
//! armed with and only clears the flag while that generation is current, so
//! a superseded timer is a no-op even if it fires while being cancelled.

use crate::event::EventMask;
use crate::worker::ScheduledTask;

/// Pause flag, its un-pause timer and events dropped meanwhile
#[derive(Debug, Default)]
pub(crate) struct PauseState {
    paused: bool,
    generation: u64,
    timer: Option<ScheduledTask>,
    missed: EventMask,
}

impl PauseState {
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Enter (or extend) a pause, cancelling the previous timer
    ///
    /// Returns the generation the new timer must present to `expire`.
    pub fn begin(&mut self) -> u64 {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.generation += 1;
        self.paused = true;
        self.generation
    }

    /// Install the timer armed for `generation`
    pub fn arm(&mut self, generation: u64, timer: ScheduledTask) {
        if generation == self.generation && self.paused {
            self.timer = Some(timer);
        } else {
            timer.cancel();
        }
    }

    /// Remember structural events dropped while paused
    pub fn record_missed(&mut self, mask: EventMask) {
        self.missed |= mask & (EventMask::DELETE | EventMask::LINK | EventMask::RENAME);
    }

    /// Forget events missed so far; the pause itself keeps running
    pub fn discard_missed(&mut self) {
        self.missed = EventMask::empty();
    }

    /// Timer for `generation` fired
    ///
    /// Returns the structural events missed during the pause, or `None` when
    /// the timer was superseded.
    pub fn expire(&mut self, generation: u64) -> Option<EventMask> {
        if !self.paused || generation != self.generation {
            return None;
        }

        self.paused = false;
        self.timer = None;
        Some(std::mem::take(&mut self.missed))
    }

    /// Detach the outstanding timer, if any
    pub fn take_timer(&mut self) -> Option<ScheduledTask> {
        self.timer.take()
    }
}
