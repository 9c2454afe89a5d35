//! The recorder screen: one recording controller and one playback controller
//! sharing a single audio graph.
//!
//! User intents are serialized through [`ActiveMode`]; starting one activity
//! stops the other before anything else happens. Every state change is
//! published as a [`Snapshot`] on a watch channel for the presentation layer.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::SharedClock;
use super::playback::{PlaybackController, PlaybackStatus};
use super::recording::{RecordingController, RecordingStatus};
use super::waveform::{WaveformFrame, WaveformSampler};
use crate::audio::{CaptureDevice, Clip, WavEncoder, PlaybackDevice};
use crate::config::RecorderSettings;
use crate::error::{RecorderError, Result};
use crate::graph::{AudioGraphManager, ContextFactory, SharedGraph};

/// Which activity currently owns the audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveMode {
    None,
    Recording,
    Playing,
}

/// Everything the screen renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub recording_status: RecordingStatus,
    pub elapsed_seconds: f64,
    pub max_duration_seconds: f64,
    pub playback_status: PlaybackStatus,
    pub position_seconds: f64,
    pub clip_duration_seconds: f64,
    pub waveform_frame: WaveformFrame,
    pub clip_available: bool,
    pub active_mode: ActiveMode,
    pub recording_label: String, // "0:05 / 0:30"
    pub playback_label: String,  // "0:02/0:05"
    pub prompt: &'static str,
    pub last_error: Option<String>,
}

/// User intents accepted by [`Recorder::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleRecording,
    TogglePlayback,
    Stop,
    Cancel,
    Quit,
}

impl Command {
    /// Parse a one-letter console command.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "r" | "record" => Some(Command::ToggleRecording),
            "p" | "play" => Some(Command::TogglePlayback),
            "s" | "stop" => Some(Command::Stop),
            "c" | "cancel" => Some(Command::Cancel),
            "q" | "quit" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Format seconds as `m:ss`.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// The audio recorder screen.
pub struct Recorder<C: CaptureDevice, P: PlaybackDevice> {
    graph: SharedGraph,
    recording: RecordingController<C>,
    playback: PlaybackController<P>,
    waveform: WaveformSampler,
    clock: SharedClock,
    mode: ActiveMode,
    clip: Option<Clip>,            // Latest successful recording
    last_error: Option<String>,
    updates: watch::Sender<Snapshot>,
    disposed: bool,
}

impl<C: CaptureDevice, P: PlaybackDevice> Recorder<C, P> {
    /// Build the screen around one shared graph.
    ///
    /// # Arguments
    /// * `settings` - Durations, cadences and capture format
    /// * `capture` - Microphone source
    /// * `playback` - Speaker for the recorded clip
    /// * `contexts` - Builds the processing context on first use
    /// * `clock` - Time source for every timer
    pub fn new(settings: &RecorderSettings, capture: C, playback: P, contexts: Box<dyn ContextFactory>, clock: SharedClock) -> Self {
        let graph = AudioGraphManager::new(contexts).shared();
        let recording = RecordingController::new(
            capture,
            Box::new(WavEncoder::new()),
            graph.clone(),
            clock.clone(),
            settings.stream_constraints(),
            settings.max_duration_secs,
            settings.poll_interval(),
        );
        let playback = PlaybackController::new(playback, graph.clone(), clock.clone(), settings.poll_interval());
        let waveform = WaveformSampler::new(settings.waveform_bars, settings.waveform_interval());
        let (updates, _) = watch::channel(Snapshot::empty(settings));

        let mut recorder = Self {
            graph,
            recording,
            playback,
            waveform,
            clock,
            mode: ActiveMode::None,
            clip: None,
            last_error: None,
            updates,
            disposed: false,
        };
        recorder.publish();
        recorder
    }

    /// Receive a snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        let elapsed = self.recording.elapsed();
        let max = self.recording.max_duration();
        let position = self.playback.position();
        let clip_duration = self.clip.as_ref().map_or(0.0, Clip::duration_seconds);
        let recording_active = self.recording.is_active();
        let clip_available = self.clip_available();

        let prompt = if recording_active {
            "Tap to stop recording..."
        } else if clip_available && self.playback.is_playing() {
            "Pause"
        } else if clip_available {
            "Tap to play"
        } else {
            "Tap to start recording"
        };

        Snapshot {
            recording_status: self.recording.status(),
            elapsed_seconds: elapsed,
            max_duration_seconds: max,
            playback_status: self.playback.status(),
            position_seconds: position,
            clip_duration_seconds: clip_duration,
            waveform_frame: self.waveform.frame().clone(),
            clip_available,
            active_mode: self.mode,
            recording_label: format!("{} / {}", format_time(elapsed), format_time(max)),
            playback_label: format!("{}/{}", format_time(position), format_time(clip_duration)),
            prompt,
            last_error: self.last_error.clone(),
        }
    }

    pub fn mode(&self) -> ActiveMode {
        self.mode
    }

    pub fn clip(&self) -> Option<&Clip> {
        self.clip.as_ref()
    }

    pub fn clip_available(&self) -> bool {
        self.clip.as_ref().is_some_and(|clip| !clip.is_empty())
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn recording(&self) -> &RecordingController<C> {
        &self.recording
    }

    pub fn playback(&self) -> &PlaybackController<P> {
        &self.playback
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Start a new recording, stopping playback and discarding the current clip.
    ///
    /// # Errors
    /// Acquisition and graph failures; the message is also kept in the snapshot.
    pub async fn start_recording(&mut self) -> Result<()> {
        if self.disposed {
            return Err(RecorderError::GraphUnavailable("recorder has been disposed".to_string()));
        }

        self.playback.unload();
        self.clip = None;
        self.last_error = None;
        self.mode = ActiveMode::Recording;
        self.waveform.activate(self.clock.now());
        self.publish();

        let result = self.recording.start().await;
        if let Err(ref e) = result {
            self.mode = ActiveMode::None;
            self.waveform.deactivate();
            self.last_error = Some(e.user_message().to_string());
        }
        self.publish();
        result
    }

    /// Stop the current recording and keep its clip.
    ///
    /// # Errors
    /// `EncodingFailed` if nothing was captured.
    pub fn stop_recording(&mut self) -> Result<()> {
        let result = self.recording.stop();
        let outcome = self.finish_recording(result);
        self.publish();
        outcome
    }

    /// Play (or resume) the current clip. Stops a running recording first.
    pub fn play_clip(&mut self) -> bool {
        if self.recording.is_active() {
            let result = self.recording.stop();
            if let Err(e) = self.finish_recording(result) {
                debug!("Recording ended without a clip: {}", e);
            }
        }

        let started = self.playback.play(self.clip.as_ref());
        if started {
            self.mode = ActiveMode::Playing;
            self.waveform.activate(self.clock.now());
        }
        self.publish();
        started
    }

    pub fn pause_playback(&mut self) {
        self.playback.pause();
        self.leave_playing();
        self.publish();
    }

    pub fn resume_playback(&mut self) -> bool {
        if self.mode == ActiveMode::Recording {
            return false;
        }
        let resumed = self.playback.resume();
        if resumed {
            self.mode = ActiveMode::Playing;
            self.waveform.activate(self.clock.now());
        }
        self.publish();
        resumed
    }

    pub fn stop_playback(&mut self) {
        self.playback.stop();
        self.leave_playing();
        self.publish();
    }

    /// Record button: start when idle, stop when recording.
    pub async fn toggle_recording(&mut self) -> Result<()> {
        if self.recording.is_recording() { self.stop_recording() } else { self.start_recording().await }
    }

    /// Play button: pause when playing, otherwise play or resume.
    pub fn toggle_playback(&mut self) -> bool {
        match self.playback.status() {
            PlaybackStatus::Playing => {
                self.pause_playback();
                false
            }
            PlaybackStatus::Paused => self.resume_playback(),
            _ => self.play_clip(),
        }
    }

    /// Discard everything: recording, clip, playback and error. The graph stays.
    pub fn cancel(&mut self) {
        self.recording.reset();
        self.playback.unload();
        self.clip = None;
        self.last_error = None;
        self.mode = ActiveMode::None;
        self.waveform.deactivate();
        self.graph.lock().detach_input_source();
        info!("🗑️ Recording cancelled");
        self.publish();
    }

    /// Run every due timer. Call at least as often as the shortest interval.
    pub fn tick(&mut self) {
        if self.disposed {
            return;
        }
        let now = self.clock.now();

        match self.recording.tick(now) {
            Ok(None) => {}
            result => {
                if let Err(e) = self.finish_recording(result) {
                    debug!("Recording ended without a clip: {}", e);
                }
            }
        }

        if self.playback.tick(now) {
            self.leave_playing();
        }

        {
            let mut graph = self.graph.lock();
            self.waveform.tick(now, self.mode, &mut graph);
        }

        self.publish();
    }

    /// Tear the screen down: stop everything and close the graph. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.recording.reset();
        self.playback.unload();
        self.clip = None;
        self.mode = ActiveMode::None;
        self.waveform.deactivate();
        self.graph.lock().dispose();
        self.disposed = true;
        info!("Recorder disposed");
        self.publish();
    }

    /// Drive the screen until `Quit`, a closed command channel or `shutdown`.
    ///
    /// # Arguments
    /// * `commands` - User intents
    /// * `tick` - Timer resolution, at most the shortest controller interval
    /// * `shutdown` - Cancellation from the signal handler
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>, tick: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Recorder loop cancelled");
                    break;
                }
                _ = interval.tick() => self.tick(),
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => self.handle(command).await,
                },
            }
        }

        self.dispose();
    }

    async fn handle(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::ToggleRecording => {
                if let Err(e) = self.toggle_recording().await {
                    warn!("Recording failed: {}", e);
                }
            }
            Command::TogglePlayback => {
                if !self.toggle_playback() && !self.clip_available() {
                    debug!("Nothing to play");
                }
            }
            Command::Stop => {
                if self.recording.is_recording() {
                    if let Err(e) = self.stop_recording() {
                        warn!("Recording failed: {}", e);
                    }
                } else {
                    self.stop_playback();
                }
            }
            Command::Cancel => self.cancel(),
            Command::Quit => {}
        }
    }

    /// Apply a recording stop result: keep the clip or surface the error.
    fn finish_recording(&mut self, result: Result<Option<Clip>>) -> Result<()> {
        if self.mode == ActiveMode::Recording {
            self.mode = ActiveMode::None;
            self.waveform.deactivate();
        }
        match result {
            Ok(Some(clip)) => {
                self.clip = Some(clip);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.last_error = Some(e.user_message().to_string());
                Err(e)
            }
        }
    }

    fn leave_playing(&mut self) {
        if self.mode == ActiveMode::Playing {
            self.mode = ActiveMode::None;
            self.waveform.deactivate();
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.updates.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

impl<C: CaptureDevice, P: PlaybackDevice> Drop for Recorder<C, P> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Snapshot {
    fn empty(settings: &RecorderSettings) -> Self {
        Self {
            recording_status: RecordingStatus::Idle,
            elapsed_seconds: 0.0,
            max_duration_seconds: settings.max_duration_secs,
            playback_status: PlaybackStatus::Idle,
            position_seconds: 0.0,
            clip_duration_seconds: 0.0,
            waveform_frame: WaveformFrame::baseline(settings.waveform_bars),
            clip_available: false,
            active_mode: ActiveMode::None,
            recording_label: format!("0:00 / {}", format_time(settings.max_duration_secs)),
            playback_label: "0:00/0:00".to_string(),
            prompt: "Tap to start recording",
            last_error: None,
        }
    }
}
