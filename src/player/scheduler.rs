//! Multi-track tick scheduler and loop rollback

use super::PlaybackSession;
use crate::midi::TrackCursor;
use crate::opl::RegisterSink;

/// Snapshot that `loopEnd` returns to
#[derive(Debug, Clone, PartialEq)]
pub struct LoopAnchor {
    pub tracks: Vec<TrackCursor>,
    pub play_wait: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingLoopStart,
    LoopActive,
}

/// Result of one scheduler step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Time moved forward by `delay` play units
    Advanced {
        delay: f64,
        /// A loop anchor was captured this tick
        anchored: bool,
        /// Cursors were rolled back to the anchor this tick
        looped: bool,
    },
    /// No track has events left
    Finished,
}

impl<S: RegisterSink> PlaybackSession<S> {
    /// Dispatch due events and advance to the next one
    pub fn tick(&mut self) -> TickOutcome {
        let rollback = self.tracks.clone();
        for track in 0..self.tracks.len() {
            if self.tracks[track].is_due() {
                self.dispatch_track(track);
            }
        }

        let mut anchored = false;
        let mut looped = false;
        if self.loop_start_pending {
            self.loop_start_pending = false;
            self.anchor = LoopAnchor {
                tracks: rollback,
                play_wait: self.play_wait,
            };
            self.loop_state = LoopState::LoopActive;
            anchored = true;
            log::debug!("Loop anchor captured at {:.2} units", self.clock);
        } else if self.loop_end_pending {
            self.restore_anchor();
            looped = true;
        }

        let Some(min_delay) = self
            .tracks
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.pending_delay)
            .reduce(f64::min)
        else {
            return TickOutcome::Finished;
        };

        for track in &mut self.tracks {
            track.pending_delay -= min_delay;
        }

        let delay = self.tempo.ticks_to_units(min_delay);
        if self.began {
            self.play_wait += delay;
        }
        self.clock += delay;
        self.voices.age_all(delay);

        if delay < 0.0 || self.loop_end_pending {
            self.restore_anchor();
            looped = true;
        }

        TickOutcome::Advanced {
            delay,
            anchored,
            looped,
        }
    }

    /// Jump back to the loop anchor
    pub fn rewind(&mut self) {
        self.restore_anchor();
    }

    fn restore_anchor(&mut self) {
        self.tracks.clone_from(&self.anchor.tracks);
        self.play_wait = self.anchor.play_wait;
        self.loop_end_pending = false;
        log::debug!("Rolled back to loop anchor");
    }
}
