//! Duplex audio channel for device management and chunked sample I/O
//!
//! Provides:
//! - Fixed-format configuration (mono, signed 16-bit, fixed rate and chunk size)
//! - Blocking `read_chunk` / `write_chunk` over cpal's callback streams
//! - Device enumeration for the `--list` front-end command
//!
//! The cpal callbacks never block: the input callback pushes into a ring
//! buffer and silently drops samples on overrun, the output callback pops
//! from a ring buffer and fills silence on underrun. The blocking side of
//! each ring buffer is handed out as [`RingInput`] / [`RingOutput`].
//!
//! The input ring fills up whenever nobody reads, so readers that want the
//! signal present *now* call [`AudioInput::discard_pending`] first.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Ring buffer capacity, in chunks, for each direction
const RING_CHUNKS: usize = 16;

/// Sleep between ring buffer polls while a blocking call waits
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors that can occur while opening or using the audio channel
#[derive(Error, Debug)]
pub enum AudioChannelError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("No default {0} device available")]
    NoDefaultDevice(&'static str),

    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Audio channel disconnected")]
    Disconnected,
}

/// Fixed stream format shared by the input and output side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per chunk
    pub chunk_size: usize,
}

impl AudioConfig {
    pub fn new(sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE, crate::DEFAULT_CHUNK_SIZE)
    }
}

/// One block of consecutively sampled input values
pub type WaveformChunk = Vec<i16>;

/// Input side of the channel
pub trait AudioInput: Send {
    /// Block until exactly one chunk of samples is available
    fn read_chunk(&mut self) -> Result<WaveformChunk, AudioChannelError>;

    /// Drop everything captured before this call so the next read starts
    /// with fresh samples
    ///
    /// # Returns
    /// Number of samples discarded
    fn discard_pending(&mut self) -> usize {
        0
    }
}

/// Output side of the channel
pub trait AudioOutput: Send {
    /// Block until every sample has been accepted by the device
    fn write_chunk(&mut self, samples: &[i16]) -> Result<(), AudioChannelError>;
}

/// Input shared between measurement tasks and the live readout.
///
/// Whoever holds the lock owns the sample sequence; measurement tasks keep it
/// for their entire capture.
pub type SharedInput = Arc<Mutex<Box<dyn AudioInput>>>;

/// Output shared with the generator task
pub type SharedOutput = Arc<Mutex<Box<dyn AudioOutput>>>;

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default input or output device
    pub is_default: bool,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
    /// Number of input channels
    pub input_channels: u16,
    /// Number of output channels
    pub output_channels: u16,
}

/// Blocking reader over the input ring buffer
pub struct RingInput {
    consumer: HeapCons<i16>,
    chunk_size: usize,
    alive: Arc<AtomicBool>,
}

impl AudioInput for RingInput {
    fn read_chunk(&mut self) -> Result<WaveformChunk, AudioChannelError> {
        let mut chunk = vec![0i16; self.chunk_size];
        let mut filled = 0;

        while filled < self.chunk_size {
            if !self.alive.load(Ordering::Acquire) {
                return Err(AudioChannelError::Disconnected);
            }
            filled += self.consumer.pop_slice(&mut chunk[filled..]);
            if filled < self.chunk_size {
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        Ok(chunk)
    }

    fn discard_pending(&mut self) -> usize {
        let pending = self.consumer.occupied_len();
        self.consumer.skip(pending)
    }
}

/// Blocking writer over the output ring buffer
pub struct RingOutput {
    producer: HeapProd<i16>,
    alive: Arc<AtomicBool>,
}

impl AudioOutput for RingOutput {
    fn write_chunk(&mut self, samples: &[i16]) -> Result<(), AudioChannelError> {
        let mut written = 0;

        // The device drains the ring at its own pace; a full ring is back-pressure
        while written < samples.len() {
            if !self.alive.load(Ordering::Acquire) {
                return Err(AudioChannelError::Disconnected);
            }
            written += self.producer.push_slice(&samples[written..]);
            if written < samples.len() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }

        Ok(())
    }
}

/// Open cpal duplex channel.
///
/// Owns the device streams; dropping it stops both streams and makes any
/// pending [`RingInput`] / [`RingOutput`] call fail with
/// [`AudioChannelError::Disconnected`].
pub struct CpalChannel {
    config: AudioConfig,
    input_name: String,
    output_name: String,
    _input_stream: Stream,
    _output_stream: Stream,
    alive: Arc<AtomicBool>,
}

impl CpalChannel {
    /// Open the input and output devices with the fixed mono i16 format
    ///
    /// # Arguments
    /// * `config` - Sample rate and chunk size
    /// * `input_device` - Input device name, or `None` for the host default
    /// * `output_device` - Output device name, or `None` for the host default
    ///
    /// # Returns
    /// The channel (stream owner) plus its blocking input and output halves
    pub fn open(
        config: AudioConfig,
        input_device: Option<&str>,
        output_device: Option<&str>,
    ) -> Result<(Self, RingInput, RingOutput), AudioChannelError> {
        let host = cpal::default_host();
        let input = Self::find_input(&host, input_device)?;
        let output = Self::find_output(&host, output_device)?;

        let input_name = input.name().unwrap_or_else(|_| "Unknown".to_string());
        let output_name = output.name().unwrap_or_else(|_| "Unknown".to_string());

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let alive = Arc::new(AtomicBool::new(true));
        let ring_len = config.chunk_size * RING_CHUNKS;
        let (mut in_producer, in_consumer) = HeapRb::<i16>::new(ring_len).split();
        let (out_producer, mut out_consumer) = HeapRb::<i16>::new(ring_len).split();

        let input_count = Arc::new(AtomicUsize::new(0));
        let input_stream = input
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // Overrun: whatever does not fit is dropped
                    let pushed = in_producer.push_slice(data);
                    let prev = input_count.fetch_add(data.len(), Ordering::Relaxed);
                    if prev == 0 {
                        tracing::info!(
                            "Input callback started: {} samples, {} buffered",
                            data.len(),
                            pushed
                        );
                    }
                },
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioChannelError::UnsupportedConfig(format!("input: {e}")))?;

        let output_count = Arc::new(AtomicUsize::new(0));
        let output_stream = output
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let popped = out_consumer.pop_slice(data);
                    data[popped..].fill(0);
                    let prev = output_count.fetch_add(data.len(), Ordering::Relaxed);
                    if prev == 0 {
                        tracing::info!(
                            "Output callback started: {} samples, {} pending",
                            data.len(),
                            out_consumer.occupied_len()
                        );
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioChannelError::UnsupportedConfig(format!("output: {e}")))?;

        input_stream
            .play()
            .map_err(|e| AudioChannelError::StreamError(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| AudioChannelError::StreamError(e.to_string()))?;

        tracing::info!(
            "Audio channel open: in='{}' out='{}' @ {} Hz, {} samples/chunk",
            input_name,
            output_name,
            config.sample_rate,
            config.chunk_size
        );

        let reader = RingInput {
            consumer: in_consumer,
            chunk_size: config.chunk_size,
            alive: Arc::clone(&alive),
        };
        let writer = RingOutput {
            producer: out_producer,
            alive: Arc::clone(&alive),
        };

        let channel = Self {
            config,
            input_name,
            output_name,
            _input_stream: input_stream,
            _output_stream: output_stream,
            alive,
        };

        Ok((channel, reader, writer))
    }

    /// Get the stream format
    pub fn config(&self) -> AudioConfig {
        self.config
    }

    /// Get the input device name
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Get the output device name
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    fn find_input(host: &Host, name: Option<&str>) -> Result<Device, AudioChannelError> {
        match name {
            Some(name) => host
                .input_devices()
                .map_err(|e| AudioChannelError::StreamError(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioChannelError::DeviceNotFound(name.to_string())),
            None => host
                .default_input_device()
                .ok_or(AudioChannelError::NoDefaultDevice("input")),
        }
    }

    fn find_output(host: &Host, name: Option<&str>) -> Result<Device, AudioChannelError> {
        match name {
            Some(name) => host
                .output_devices()
                .map_err(|e| AudioChannelError::StreamError(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioChannelError::DeviceNotFound(name.to_string())),
            None => host
                .default_output_device()
                .ok_or(AudioChannelError::NoDefaultDevice("output")),
        }
    }

    /// List available audio devices on the default host
    ///
    /// # Returns
    /// Vector of device information for all devices the host reports
    pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioChannelError> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let all = host
            .devices()
            .map_err(|e| AudioChannelError::StreamError(e.to_string()))?;

        for device in all {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_input.as_deref() == Some(name.as_str())
                || default_output.as_deref() == Some(name.as_str());

            let input_channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            let common_rates = [22050, 44100, 48000, 96000];
            let mut sample_rates = Vec::new();
            if let Ok(configs) = device.supported_input_configs() {
                for config in configs {
                    for &rate in &common_rates {
                        if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                            && !sample_rates.contains(&rate)
                        {
                            sample_rates.push(rate);
                        }
                    }
                }
            }
            sample_rates.sort();

            devices.push(DeviceInfo {
                name,
                is_default,
                sample_rates,
                input_channels,
                output_channels,
            });
        }

        Ok(devices)
    }
}

impl Drop for CpalChannel {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        tracing::info!("Audio channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_pair(len: usize, chunk_size: usize) -> (HeapProd<i16>, RingInput, Arc<AtomicBool>) {
        let (producer, consumer) = HeapRb::<i16>::new(len).split();
        let alive = Arc::new(AtomicBool::new(true));
        let input = RingInput {
            consumer,
            chunk_size,
            alive: Arc::clone(&alive),
        };
        (producer, input, alive)
    }

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn test_ring_input_reads_exact_chunk() {
        let (mut producer, mut input, _alive) = ring_pair(64, 8);
        let samples: Vec<i16> = (0..12).collect();
        producer.push_slice(&samples);

        let chunk = input.read_chunk().unwrap();
        assert_eq!(chunk, (0..8).collect::<Vec<i16>>());
    }

    #[test]
    fn test_ring_input_waits_for_late_samples() {
        let (mut producer, mut input, _alive) = ring_pair(64, 8);
        producer.push_slice(&[1, 2, 3]);

        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push_slice(&[4, 5, 6, 7, 8]);
        });

        let chunk = input.read_chunk().unwrap();
        assert_eq!(chunk, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        feeder.join().unwrap();
    }

    #[test]
    fn test_discard_pending_skips_backlog() {
        let (mut producer, mut input, _alive) = ring_pair(64, 8);
        producer.push_slice(&[1; 40]);

        assert_eq!(input.discard_pending(), 40);
        assert_eq!(input.discard_pending(), 0);

        producer.push_slice(&[7; 8]);
        assert_eq!(input.read_chunk().unwrap(), vec![7; 8]);
    }

    #[test]
    fn test_reader_slower_than_device_stays_current() {
        // Device delivers ~4 chunks per poll into a 16-chunk ring, the poll reads one
        let chunk_size = 64;
        let (mut producer, mut input, _alive) = ring_pair(chunk_size * 16, chunk_size);
        let mut clock: i32 = 0;
        let mut tick = |producer: &mut HeapProd<i16>| {
            let block: Vec<i16> = (0..276).map(|i| ((clock + i) % 30_000) as i16).collect();
            producer.push_slice(&block);
            clock += 276;
        };

        let mut last_read = 0;
        for _ in 0..20 {
            tick(&mut producer);
            input.discard_pending();
            tick(&mut producer);
            let chunk = input.read_chunk().unwrap();
            last_read = chunk[chunk_size - 1] as i32;
        }

        let newest = (clock - 1) % 30_000;
        assert!(
            newest - last_read < 276,
            "reader lags device by {} samples",
            newest - last_read
        );
    }

    #[test]
    fn test_ring_input_disconnected() {
        let (_producer, mut input, alive) = ring_pair(64, 8);
        alive.store(false, Ordering::Release);
        assert!(matches!(
            input.read_chunk(),
            Err(AudioChannelError::Disconnected)
        ));
    }

    #[test]
    fn test_ring_output_applies_back_pressure() {
        let (producer, mut consumer) = HeapRb::<i16>::new(4).split();
        let alive = Arc::new(AtomicBool::new(true));
        let mut output = RingOutput {
            producer,
            alive: Arc::clone(&alive),
        };

        let drain = std::thread::spawn(move || {
            let mut received = Vec::new();
            let mut buf = [0i16; 4];
            while received.len() < 10 {
                let n = consumer.pop_slice(&mut buf);
                received.extend_from_slice(&buf[..n]);
                std::thread::sleep(Duration::from_millis(2));
            }
            received
        });

        let samples: Vec<i16> = (0..10).collect();
        output.write_chunk(&samples).unwrap();
        assert_eq!(drain.join().unwrap(), samples);
    }

    #[test]
    fn test_list_devices() {
        // May find nothing on CI without audio hardware, but must not panic
        match CpalChannel::list_devices() {
            Ok(devices) => {
                for device in &devices {
                    println!(
                        "  - {} (in:{}, out:{})",
                        device.name, device.input_channels, device.output_channels
                    );
                }
            }
            Err(e) => println!("No audio devices available: {}", e),
        }
    }
}
