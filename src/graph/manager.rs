//! Shared audio-processing graph: source node → analyser → tap → sink.
//!
//! One [`AudioGraphManager`] lives for the whole screen and is shared by the
//! recording and playback controllers. Sources come and go; the analyser and
//! tap survive until [`AudioGraphManager::dispose`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::analyser::{Analyser, DEFAULT_FFT_SIZE};
use crate::audio::SourceTap;
use crate::error::{RecorderError, Result};

/// Samples moved from the source into the analyser per pump step.
const PUMP_CHUNK: usize = 1024;

/// Lifecycle state of the underlying processing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// The platform processing context the graph is built on.
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;
    fn resume(&mut self) -> Result<()>;
    fn close(&mut self);
    fn sample_rate(&self) -> u32;
}

/// Builds processing contexts; fails in unsupported or blocked environments.
pub trait ContextFactory: Send {
    fn create(&self) -> Result<Box<dyn AudioContext>>;
}

/// Flag shared between devices and the context they run under.
///
/// A device that loses its hardware marks the context closed, so the next
/// [`AudioGraphManager::ensure_graph`] rebuilds it.
#[derive(Debug, Clone, Default)]
pub struct ContextHealth {
    closed: Arc<AtomicBool>,
}

impl ContextHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Clear the flag for a freshly built context.
    pub fn revive(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

/// Which controller currently feeds the source node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Microphone,
    Playback,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Microphone => write!(f, "microphone"),
            SourceKind::Playback => write!(f, "playback"),
        }
    }
}

/// The built graph.
pub struct GraphHandle {
    context: Box<dyn AudioContext>,
    source: Option<(SourceKind, SourceTap)>, // Source node (None = disconnected)
    analyser: Analyser,                      // Analysis node
    tap: Vec<u8>,                            // Tap node: latest byte frequency frame
    scratch: Vec<f32>,
}

impl GraphHandle {
    fn new(context: Box<dyn AudioContext>, fft_size: usize) -> Self {
        let analyser = Analyser::new(fft_size);
        let bins = analyser.frequency_bin_count();
        Self { context, source: None, analyser, tap: vec![0; bins], scratch: vec![0.0; PUMP_CHUNK] }
    }

    pub fn context_state(&self) -> ContextState {
        self.context.state()
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_ref().map(|(kind, _)| *kind)
    }

    /// Latest frame published by the tap node.
    pub fn frequency_data(&self) -> &[u8] {
        &self.tap
    }

    /// Run pending source samples through the analyser and refresh the tap.
    fn pump(&mut self) -> usize {
        let Some((_, source)) = self.source.as_mut() else {
            return 0;
        };

        let mut moved = 0;
        loop {
            let read = source.drain(&mut self.scratch);
            if read == 0 {
                break;
            }
            self.analyser.push_samples(&self.scratch[..read]);
            moved += read;
        }

        self.analyser.byte_frequency_data(&mut self.tap);
        moved
    }

    fn disconnect_source(&mut self) -> Option<SourceKind> {
        let (kind, _) = self.source.take()?;
        self.analyser.reset();
        self.tap.fill(0);
        Some(kind)
    }
}

/// Owner of the shared graph's lifecycle.
pub struct AudioGraphManager {
    factory: Box<dyn ContextFactory>,
    graph: Option<GraphHandle>,
    fft_size: usize,
    builds: usize,
    disposed: bool,
}

/// Handle injected into both controllers.
pub type SharedGraph = Arc<Mutex<AudioGraphManager>>;

impl AudioGraphManager {
    pub fn new(factory: Box<dyn ContextFactory>) -> Self {
        Self::with_fft_size(factory, DEFAULT_FFT_SIZE)
    }

    pub fn with_fft_size(factory: Box<dyn ContextFactory>, fft_size: usize) -> Self {
        Self { factory, graph: None, fft_size, builds: 0, disposed: false }
    }

    /// Wrap the manager for sharing between controllers.
    pub fn shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    /// Return the initialized graph, rebuilding it if the context closed.
    ///
    /// # Errors
    /// `GraphUnavailable` if the context cannot be created or resumed, or the
    /// manager has been disposed.
    pub fn ensure_graph(&mut self) -> Result<&mut GraphHandle> {
        if self.disposed {
            return Err(RecorderError::GraphUnavailable("audio graph has been disposed".to_string()));
        }

        let closed = self.graph.as_ref().is_some_and(|graph| graph.context_state() == ContextState::Closed);
        if closed {
            warn!("Audio context closed, rebuilding graph");
            self.graph = None;
        }

        if self.graph.is_none() {
            let context = self.factory.create()?;
            info!("Audio graph built ({} Hz, FFT size {})", context.sample_rate(), self.fft_size);
            self.graph = Some(GraphHandle::new(context, self.fft_size));
            self.builds += 1;
        }

        let graph = self.graph.as_mut().ok_or_else(|| RecorderError::GraphUnavailable("graph missing after build".to_string()))?;
        if graph.context_state() == ContextState::Suspended {
            debug!("Resuming suspended audio context");
            graph.context.resume()?;
        }
        Ok(graph)
    }

    /// Connect a new source node, replacing any previous one. The analyser is kept.
    pub fn attach_input_source(&mut self, kind: SourceKind, tap: SourceTap) -> Result<()> {
        let graph = self.ensure_graph()?;
        if let Some(previous) = graph.disconnect_source() {
            debug!("Replacing {} source", previous);
        }
        graph.source = Some((kind, tap));
        debug!("Attached {} source to graph", kind);
        Ok(())
    }

    /// Disconnect the active source only. No-op when nothing is connected.
    pub fn detach_input_source(&mut self) {
        if let Some(graph) = self.graph.as_mut()
            && let Some(kind) = graph.disconnect_source()
        {
            debug!("Detached {} source from graph", kind);
        }
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.graph.as_ref().and_then(GraphHandle::source_kind)
    }

    pub fn has_source(&self) -> bool {
        self.source_kind().is_some()
    }

    /// Move pending source audio through the analyser. Returns the sample count.
    pub fn pump(&mut self) -> usize {
        self.graph.as_mut().map_or(0, GraphHandle::pump)
    }

    /// Latest analyser frame, if a source is connected.
    pub fn frequency_data(&self) -> Option<&[u8]> {
        self.graph.as_ref().filter(|graph| graph.source.is_some()).map(GraphHandle::frequency_data)
    }

    pub fn is_built(&self) -> bool {
        self.graph.is_some()
    }

    /// Number of times a context has been constructed.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Tear the graph down for good. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(mut graph) = self.graph.take() {
            graph.disconnect_source();
            if graph.context_state() != ContextState::Closed {
                graph.context.close();
            }
            info!("Audio graph disposed");
        }
    }
}

impl Drop for AudioGraphManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeContextFactory;

    #[test]
    fn test_graph_is_built_lazily_once() {
        let factory = FakeContextFactory::new();
        let mut manager = AudioGraphManager::new(Box::new(factory.clone()));
        assert!(!manager.is_built());

        manager.ensure_graph().unwrap();
        manager.ensure_graph().unwrap();
        assert_eq!(manager.builds(), 1);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_closed_context_is_rebuilt() {
        let factory = FakeContextFactory::new();
        let mut manager = AudioGraphManager::new(Box::new(factory.clone()));
        manager.ensure_graph().unwrap();

        factory.set_state(ContextState::Closed);
        let graph = manager.ensure_graph().unwrap();
        assert_eq!(graph.context_state(), ContextState::Running);
        assert_eq!(manager.builds(), 2);
    }

    #[test]
    fn test_suspended_context_is_resumed() {
        let factory = FakeContextFactory::new();
        let mut manager = AudioGraphManager::new(Box::new(factory.clone()));
        manager.ensure_graph().unwrap();

        factory.set_state(ContextState::Suspended);
        manager.ensure_graph().unwrap();
        assert_eq!(factory.state(), ContextState::Running);
        assert_eq!(manager.builds(), 1);
    }

    #[test]
    fn test_unavailable_context_reports_graph_error() {
        let factory = FakeContextFactory::failing();
        let mut manager = AudioGraphManager::new(Box::new(factory));
        let err = manager.ensure_graph().err();
        assert!(matches!(err, Some(RecorderError::GraphUnavailable(_))));
    }

    #[test]
    fn test_attach_replaces_source_and_keeps_analyser() {
        let mut manager = AudioGraphManager::new(Box::new(FakeContextFactory::new()));
        let (mut mic, mic_tap) = SourceTap::channel(256);
        manager.attach_input_source(SourceKind::Microphone, mic_tap).unwrap();
        mic.push(&[0.5; 64]);
        assert_eq!(manager.pump(), 64);
        assert!(manager.frequency_data().is_some_and(|data| data[0] > 0));

        let (_player, player_tap) = SourceTap::channel(256);
        manager.attach_input_source(SourceKind::Playback, player_tap).unwrap();
        assert_eq!(manager.source_kind(), Some(SourceKind::Playback));
        assert_eq!(manager.builds(), 1);

        // Old writer is now disconnected from the graph.
        mic.push(&[0.5; 64]);
        assert_eq!(manager.pump(), 0);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let mut manager = AudioGraphManager::new(Box::new(FakeContextFactory::new()));
        manager.detach_input_source();

        let (_writer, tap) = SourceTap::channel(16);
        manager.attach_input_source(SourceKind::Microphone, tap).unwrap();
        manager.detach_input_source();
        manager.detach_input_source();
        assert!(!manager.has_source());
        assert!(manager.is_built());
        assert!(manager.frequency_data().is_none());
    }

    #[test]
    fn test_dispose_closes_context_once() {
        let factory = FakeContextFactory::new();
        let mut manager = AudioGraphManager::new(Box::new(factory.clone()));
        manager.ensure_graph().unwrap();

        manager.dispose();
        manager.dispose();
        assert_eq!(factory.closes(), 1);
        assert!(matches!(manager.ensure_graph().err(), Some(RecorderError::GraphUnavailable(_))));
    }
}
