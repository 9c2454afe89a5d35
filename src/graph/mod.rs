//! Shared audio-processing graph and its analysis node.

pub mod analyser;
mod manager;

pub use analyser::Analyser;
pub use manager::{AudioContext, AudioGraphManager, ContextFactory, ContextHealth, ContextState, GraphHandle, SharedGraph, SourceKind};
