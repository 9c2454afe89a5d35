//! Playback of the captured clip.
//!
//! `Idle → Playing ⇄ Paused → Ended`, with `unload()` returning to Idle. The
//! controller never owns the clip; it keeps the id of the clip its player was
//! built from and rebuilds when a different clip is offered.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{PollTimer, SharedClock};
use crate::audio::{Clip, ClipId, PlaybackDevice, PlaybackHandle};
use crate::graph::{SharedGraph, SourceKind};

/// Playback session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    Ended,
}

/// Plays one clip at a time through a [`PlaybackDevice`].
pub struct PlaybackController<P: PlaybackDevice> {
    device: P,
    graph: SharedGraph,
    clock: SharedClock,
    status: PlaybackStatus,
    position: f64,                        // Seconds, within [0, clip_duration]
    clip_duration: f64,
    player: Option<(ClipId, P::Handle)>,  // Player and the clip it was built for
    timer: PollTimer,
}

impl<P: PlaybackDevice> PlaybackController<P> {
    pub fn new(device: P, graph: SharedGraph, clock: SharedClock, poll_interval: Duration) -> Self {
        Self { device, graph, clock, status: PlaybackStatus::Idle, position: 0.0, clip_duration: 0.0, player: None, timer: PollTimer::new(poll_interval) }
    }

    /// Play `clip`: from 0 for a new clip or after the end, from the paused
    /// position otherwise.
    ///
    /// # Returns
    /// `true` if playback is running afterwards. An absent or empty clip and
    /// device errors leave the controller unchanged.
    pub fn play(&mut self, clip: Option<&Clip>) -> bool {
        let Some(clip) = clip.filter(|clip| !clip.is_empty()) else {
            debug!("Play requested without a clip");
            return false;
        };

        if self.player.as_ref().is_some_and(|(id, _)| *id != clip.id()) {
            debug!("Clip replaced, rebuilding player");
            self.unload();
        }

        if self.status == PlaybackStatus::Playing {
            return true;
        }

        if self.player.is_none() {
            match self.device.open(clip) {
                Ok(handle) => {
                    self.player = Some((clip.id(), handle));
                    self.clip_duration = clip.duration_seconds();
                    self.position = 0.0;
                }
                Err(e) => {
                    warn!("Could not open playback: {}", e);
                    return false;
                }
            }
        }

        if self.status == PlaybackStatus::Ended {
            self.position = 0.0;
        }
        self.start_player()
    }

    /// Pause, keeping the position. No-op unless Playing.
    ///
    /// # Returns
    /// `true` if the clip had already reached its end; playback then stops
    /// as it would on the next poll instead of pausing.
    pub fn pause(&mut self) -> bool {
        if self.status != PlaybackStatus::Playing {
            return false;
        }

        if self.player.as_ref().is_some_and(|(_, handle)| handle.has_ended() || handle.position() >= self.clip_duration) {
            info!("Playback reached the end ({:.1}s) before pause", self.clip_duration);
            self.stop();
            return true;
        }

        if let Some((_, handle)) = self.player.as_mut() {
            self.position = handle.position().clamp(0.0, self.clip_duration);
            handle.pause();
        }
        self.timer.cancel();
        self.detach_playback();
        self.status = PlaybackStatus::Paused;
        info!("⏸️ Playback paused at {:.1}s", self.position);
        false
    }

    /// Continue from the paused position. No-op unless Paused.
    pub fn resume(&mut self) -> bool {
        if self.status != PlaybackStatus::Paused {
            return false;
        }
        self.start_player()
    }

    /// Halt playback and rewind. Safe to call in any state.
    pub fn stop(&mut self) {
        if let Some((_, handle)) = self.player.as_mut() {
            handle.pause();
            handle.seek(0.0);
        }
        self.timer.cancel();
        self.detach_playback();
        self.position = 0.0;

        if self.player.is_some() && self.status != PlaybackStatus::Ended {
            self.status = PlaybackStatus::Ended;
            info!("⏹️ Playback stopped");
        }
    }

    /// Poll the play head; stops at the end of the clip.
    ///
    /// # Returns
    /// `true` on the tick that reached the end.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.status != PlaybackStatus::Playing || !self.timer.fire(now) {
            return false;
        }
        let Some((_, handle)) = self.player.as_ref() else {
            return false;
        };

        self.position = handle.position().clamp(0.0, self.clip_duration);
        if handle.has_ended() || self.position >= self.clip_duration {
            info!("Playback reached the end ({:.1}s)", self.clip_duration);
            self.stop();
            return true;
        }
        false
    }

    /// Stop and drop the player; used when the clip goes away.
    pub fn unload(&mut self) {
        self.stop();
        if self.player.take().is_some() {
            debug!("Player released");
        }
        self.clip_duration = 0.0;
        self.status = PlaybackStatus::Idle;
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn clip_duration(&self) -> f64 {
        self.clip_duration
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    fn start_player(&mut self) -> bool {
        let Some((_, handle)) = self.player.as_mut() else {
            return false;
        };

        handle.seek(self.position);
        if let Err(e) = handle.play() {
            warn!("Playback failed to start: {}", e);
            return false;
        }

        if let Some(tap) = handle.open_tap()
            && let Err(e) = self.graph.lock().attach_input_source(SourceKind::Playback, tap)
        {
            debug!("Playback analysis unavailable: {}", e);
        }

        self.timer.arm(self.clock.now());
        self.status = PlaybackStatus::Playing;
        info!("▶️ Playback from {:.1}s of {:.1}s", self.position, self.clip_duration);
        true
    }

    fn detach_playback(&self) {
        let mut graph = self.graph.lock();
        if graph.source_kind() == Some(SourceKind::Playback) {
            graph.detach_input_source();
        }
    }
}
