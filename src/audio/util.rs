//! Shared cpal helpers for capture, playback and context probing.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

use crate::error::RecorderError;

/// Get a human-readable device name.
///
/// # Returns
/// Device name string, or "Unknown" if the name cannot be retrieved.
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Pick an input device: the first whose name contains `wanted`, else the default.
pub fn find_input_device(host: &Host, wanted: Option<&str>) -> Result<Device> {
    if let Some(wanted) = wanted {
        let needle = wanted.to_lowercase();
        let devices = host.input_devices().context("Failed to enumerate input devices")?;
        for device in devices {
            if get_device_name(&device).to_lowercase().contains(&needle) {
                return Ok(device);
            }
        }
        anyhow::bail!("No input device matching '{}'", wanted);
    }
    host.default_input_device().context("No input device available")
}

/// Pick an output device: the first whose name contains `wanted`, else the default.
pub fn find_output_device(host: &Host, wanted: Option<&str>) -> Result<Device> {
    if let Some(wanted) = wanted {
        let needle = wanted.to_lowercase();
        let devices = host.output_devices().context("Failed to enumerate output devices")?;
        for device in devices {
            if get_device_name(&device).to_lowercase().contains(&needle) {
                return Ok(device);
            }
        }
        anyhow::bail!("No output device matching '{}'", wanted);
    }
    host.default_output_device().context("No output device available")
}

/// Find the best matching audio configuration.
///
/// Searches for a configuration that:
/// 1. Supports mono or stereo (max 2 channels)
/// 2. Uses F32 sample format
/// 3. Matches the target sample rate, or uses the closest available rate
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let f32_configs: Vec<SupportedStreamConfigRange> = configs.filter(|config| config.channels() <= 2 && config.sample_format() == SampleFormat::F32).collect();

    let Some(first) = f32_configs.first() else {
        anyhow::bail!("No F32 audio configuration found");
    };

    for config in &f32_configs {
        if (config.min_sample_rate()..=config.max_sample_rate()).contains(&target_sample_rate) {
            return Ok((*config).with_sample_rate(target_sample_rate));
        }
    }

    let rate = if target_sample_rate < first.min_sample_rate() { first.min_sample_rate() } else { first.max_sample_rate() };
    Ok((*first).with_sample_rate(rate))
}

/// Mix interleaved frames down to mono by averaging channels.
pub fn convert_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    }
}

/// Map a device error message onto the recorder taxonomy.
///
/// Backends report a refused microphone in prose, so this goes by wording.
pub fn classify_device_error(message: &str) -> RecorderError {
    let lowered = message.to_lowercase();
    let refused = ["permission", "denied", "not authorized", "not permitted"].iter().any(|word| lowered.contains(word));
    if refused { RecorderError::PermissionDenied(message.to_string()) } else { RecorderError::DeviceUnavailable(message.to_string()) }
}

/// Whether a stream error means the hardware is gone rather than a glitch.
pub fn is_device_lost(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("no longer available") || lowered.contains("unplugged") || lowered.contains("disconnected")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_to_mono() {
        let data = vec![0.5f32, 1.0, -0.5, -1.0];
        let result = convert_to_mono(&data, 2);
        assert_eq!(result, vec![0.75, -0.75]);
    }

    #[test]
    fn test_mono_passthrough() {
        assert_eq!(convert_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_classify_permission_errors() {
        assert!(matches!(classify_device_error("Access denied by user"), RecorderError::PermissionDenied(_)));
        assert!(matches!(classify_device_error("Microphone permission not granted"), RecorderError::PermissionDenied(_)));
        assert!(matches!(classify_device_error("No input device available"), RecorderError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_device_lost_wording() {
        assert!(is_device_lost("The requested device is no longer available. For example, it has been unplugged."));
        assert!(!is_device_lost("buffer underrun"));
    }
}
