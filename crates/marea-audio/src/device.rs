//! Audio device enumeration and selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};

use crate::{AudioError, AudioResult};

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub output_channels: u16,
    pub sample_rates: Vec<u32>,
}

/// Get the audio host (platform-specific backend)
///
/// Prefers a pro-audio backend when cpal was built with one (JACK on Linux,
/// ASIO on Windows); falls back to the platform default (CoreAudio, WASAPI,
/// ALSA).
pub fn get_host() -> Host {
    for host_id in cpal::available_hosts() {
        let name = host_id.name();
        if name.eq_ignore_ascii_case("jack") || name.eq_ignore_ascii_case("asio") {
            if let Ok(host) = cpal::host_from_id(host_id) {
                log::info!("using {} audio backend", name);
                return host;
            }
        }
    }
    cpal::default_host()
}

/// List available output devices
pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_device = host.default_output_device();
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    let mut devices = Vec::new();

    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_ref().map(|d| d == &name).unwrap_or(false);
            let (output_channels, sample_rates) = get_device_info(&device);

            devices.push(DeviceInfo {
                name,
                is_default,
                output_channels,
                sample_rates,
            });
        }
    }

    Ok(devices)
}

/// Get the system default output device
pub fn get_default_output_device() -> AudioResult<Device> {
    get_host()
        .default_output_device()
        .ok_or(AudioError::NoDevice)
}

/// Find an output device by name
pub fn get_output_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();
    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn get_device_info(device: &Device) -> (u16, Vec<u32>) {
    let mut channels = 0;
    let mut sample_rates = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            channels = channels.max(config.channels());
            for rate in [44_100, 48_000, 88_200, 96_000] {
                if config.min_sample_rate() <= rate
                    && config.max_sample_rate() >= rate
                    && !sample_rates.contains(&rate)
                {
                    sample_rates.push(rate);
                }
            }
        }
    }

    sample_rates.sort_unstable();
    (channels, sample_rates)
}
