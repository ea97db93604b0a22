//! Audio output stream management

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, Device, SampleFormat, Stream, StreamConfig,
    SupportedStreamConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{AudioConfig, AudioError, AudioResult};

/// Output callback: fills an interleaved Float32 buffer (LRLR...)
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

struct StreamState {
    callback: Mutex<OutputCallback>,
    running: AtomicBool,
}

/// Audio output stream wrapper
pub struct AudioStream {
    _stream: Stream,
    state: Arc<StreamState>,
    config: AudioConfig,
}

impl AudioStream {
    /// Create a new output stream with the given configuration
    pub fn new(device: &Device, config: AudioConfig, callback: OutputCallback) -> AudioResult<Self> {
        let state = Arc::new(StreamState {
            callback: Mutex::new(callback),
            running: AtomicBool::new(false),
        });

        let supported = get_output_stream_config(device, &config)?;
        let stream = build_output_stream(device, &supported, &config, Arc::clone(&state))?;

        Ok(Self {
            _stream: stream,
            state,
            config,
        })
    }

    /// Start the audio stream
    pub fn start(&self) -> AudioResult<()> {
        self._stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.state.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the audio stream
    pub fn stop(&self) -> AudioResult<()> {
        self._stream
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.state.running.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

fn get_output_stream_config(
    device: &Device,
    config: &AudioConfig,
) -> AudioResult<SupportedStreamConfig> {
    let sample_rate: cpal::SampleRate = config.sample_rate.as_u32();
    let channels = 2u16;

    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;

    for supported in configs {
        if supported.channels() >= channels
            && supported.min_sample_rate() <= sample_rate
            && supported.max_sample_rate() >= sample_rate
            && supported.sample_format() == SampleFormat::F32
        {
            return Ok(supported.with_sample_rate(sample_rate));
        }
    }

    Err(AudioError::ConfigError(format!(
        "No matching output config for {} channels @ {}Hz",
        channels,
        config.sample_rate.as_u32()
    )))
}

fn build_output_stream(
    device: &Device,
    supported_config: &SupportedStreamConfig,
    config: &AudioConfig,
    state: Arc<StreamState>,
) -> AudioResult<Stream> {
    let channels = supported_config.channels() as usize;

    let stream_config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(config.buffer_size.as_u32()),
    };

    // Pre-allocated stereo scratch for devices with more than two channels
    let buffer_frames = config.buffer_size.as_usize();
    let mut stereo_buffer = vec![0.0f32; buffer_frames * 2];

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !state.running.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }

                let frames = data.len() / channels;

                if channels == 2 {
                    let mut callback = state.callback.lock();
                    callback(data);
                } else {
                    // Render stereo and spread onto the device channels.
                    // If the device delivered more frames than configured,
                    // render what fits and leave the remainder silent.
                    let usable = frames.min(stereo_buffer.len() / 2);
                    if usable < frames {
                        data.fill(0.0);
                    }
                    {
                        let mut callback = state.callback.lock();
                        callback(&mut stereo_buffer[..usable * 2]);
                    }
                    for (frame, chunk) in data.chunks_mut(channels).enumerate().take(usable) {
                        chunk[0] = stereo_buffer[frame * 2];
                        if channels > 1 {
                            chunk[1] = stereo_buffer[frame * 2 + 1];
                        }
                        for sample in chunk.iter_mut().skip(2) {
                            *sample = 0.0;
                        }
                    }
                }
            },
            move |err| {
                log::error!("Audio output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
