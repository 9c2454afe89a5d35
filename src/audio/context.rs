//! Processing context backed by the cpal host.
//!
//! cpal has no context object of its own; the context here is the selected host
//! plus the input device's native rate, closed either explicitly or when a
//! device reports that its hardware disappeared.

use cpal::traits::DeviceTrait;
use tracing::{debug, info};

use super::util::{find_input_device, get_device_name};
use crate::error::{RecorderError, Result};
use crate::graph::{AudioContext, ContextFactory, ContextHealth, ContextState};

/// Probes the default cpal host for a usable input device.
#[derive(Debug, Clone)]
pub struct CpalContextFactory {
    input_device: Option<String>,
    health: ContextHealth,
}

impl CpalContextFactory {
    pub fn new(input_device: Option<String>, health: ContextHealth) -> Self {
        Self { input_device, health }
    }
}

impl ContextFactory for CpalContextFactory {
    fn create(&self) -> Result<Box<dyn AudioContext>> {
        let host = cpal::default_host();
        debug!("Probing audio host {:?}", host.id());

        let device = find_input_device(&host, self.input_device.as_deref()).map_err(|e| RecorderError::GraphUnavailable(e.to_string()))?;
        let config = device.default_input_config().map_err(|e| RecorderError::GraphUnavailable(e.to_string()))?;

        self.health.revive();
        info!("Audio context ready on {} ({} Hz)", get_device_name(&device), config.sample_rate());

        Ok(Box::new(CpalContext { sample_rate: config.sample_rate(), health: self.health.clone(), closed: false }))
    }
}

/// Context handle; closed by [`AudioContext::close`] or by device loss.
#[derive(Debug)]
struct CpalContext {
    sample_rate: u32,
    health: ContextHealth,
    closed: bool,
}

impl AudioContext for CpalContext {
    fn state(&self) -> ContextState {
        if self.closed || self.health.is_closed() { ContextState::Closed } else { ContextState::Running }
    }

    fn resume(&mut self) -> Result<()> {
        if self.state() == ContextState::Closed {
            return Err(RecorderError::GraphUnavailable("audio context is closed".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
