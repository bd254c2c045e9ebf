//! Audio device boundary.
//!
//! Device I/O is supplied by the host through [`AudioBackend`]. The crate
//! ships [`ClockedBackend`], which drives the render callback from a plain
//! thread at the stream's block rate with no device attached.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::monotonic_timestamp_ns;

/// Non-interleaved block of `f32` samples with a fixed channel count.
///
/// Storage is allocated once for `max_frames`; the active length can shrink
/// per callback with [`set_frames`](Self::set_frames) without reallocating.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    samples: Vec<f32>,
    channels: usize,
    max_frames: usize,
    frames: usize,
}

impl AudioBlock {
    /// Allocate a silent block.
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            samples: vec![0.0; channels * max_frames],
            channels,
            max_frames,
            frames: max_frames,
        }
    }

    /// Channel count.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Active frames in this block.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Allocated frame capacity.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Set the active length, clamped to capacity. Returns the applied length.
    pub fn set_frames(&mut self, frames: usize) -> usize {
        self.frames = frames.min(self.max_frames);
        self.frames
    }

    /// Samples of one channel, empty when out of range.
    pub fn channel(&self, channel: usize) -> &[f32] {
        if channel >= self.channels {
            return &[];
        }
        let start = channel * self.max_frames;
        &self.samples[start..start + self.frames]
    }

    /// Mutable samples of one channel, empty when out of range.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        if channel >= self.channels {
            return &mut [];
        }
        let start = channel * self.max_frames;
        &mut self.samples[start..start + self.frames]
    }

    /// Zero the active region.
    pub fn silence(&mut self) {
        for ch in 0..self.channels {
            self.channel_mut(ch).fill(0.0);
        }
    }

    /// Multiply the active region by `gain`.
    pub fn scale(&mut self, gain: f32) {
        for ch in 0..self.channels {
            for sample in self.channel_mut(ch) {
                *sample *= gain;
            }
        }
    }

    /// Accumulate `value` into `(channel, frame)`. Out of range is ignored.
    #[inline]
    pub fn add(&mut self, channel: usize, frame: usize, value: f32) {
        if channel < self.channels && frame < self.frames {
            self.samples[channel * self.max_frames + frame] += value;
        }
    }

    /// Sample at `(channel, frame)`, zero when out of range.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.channel(channel).get(frame).copied().unwrap_or(0.0)
    }
}

/// Per-callback facts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallbackInfo {
    /// Stream rate in Hz.
    pub sample_rate: u32,
    /// Output path latency in samples.
    pub output_latency_samples: u32,
    /// Input path latency in samples.
    pub input_latency_samples: u32,
    /// Total underruns seen by the device so far.
    pub underruns: u64,
    /// Total overruns seen by the device so far.
    pub overruns: u64,
}

/// Stream parameters requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    /// Rate in Hz.
    pub sample_rate: u32,
    /// Frames per callback.
    pub buffer_size: usize,
    /// Input channel count.
    pub input_channels: usize,
    /// Output channel count.
    pub output_channels: usize,
}

/// Callback invoked once per block on the backend's real-time thread.
pub type RenderCallback = Box<dyn FnMut(&AudioBlock, &mut AudioBlock, &CallbackInfo) + Send>;

/// Errors from opening or running a stream.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The stream was started before `open`.
    #[error("stream not open")]
    NotOpen,
    /// The stream is already running.
    #[error("stream already running")]
    AlreadyRunning,
    /// Parameters are unusable.
    #[error("unsupported stream configuration: {0}")]
    Unsupported(String),
    /// Failure reported by the platform.
    #[error("device error: {0}")]
    Device(String),
    /// Spawning the render thread failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Host-supplied audio device.
pub trait AudioBackend: Send {
    /// Configure the stream. Must precede [`start`](Self::start).
    fn open(&mut self, config: StreamConfig) -> Result<(), BackendError>;
    /// Begin invoking `callback` on the real-time thread.
    fn start(&mut self, callback: RenderCallback) -> Result<(), BackendError>;
    /// Stop the stream and release the callback. Safe to call repeatedly.
    fn stop(&mut self);
    /// Whether callbacks are being delivered.
    fn is_running(&self) -> bool;
    /// Output latency in samples.
    fn output_latency_samples(&self) -> u32;
    /// Input latency in samples.
    fn input_latency_samples(&self) -> u32;
    /// Fraction of the block period spent inside the callback, `0.0..=1.0`.
    fn cpu_load(&self) -> f32;
}

struct ClockShared {
    running: AtomicBool,
    underruns: AtomicU64,
    load_bits: AtomicU32,
}

/// Free-running render clock without a device.
///
/// Paced mode sleeps between blocks to hold real time and counts an underrun
/// whenever a block finishes more than one period late. Unpaced mode renders
/// as fast as possible, which suits soak tests.
pub struct ClockedBackend {
    config: Option<StreamConfig>,
    paced: bool,
    shared: Arc<ClockShared>,
    worker: Option<JoinHandle<()>>,
}

impl Default for ClockedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockedBackend {
    /// Real-time paced clock.
    pub fn new() -> Self {
        Self {
            config: None,
            paced: true,
            shared: Arc::new(ClockShared {
                running: AtomicBool::new(false),
                underruns: AtomicU64::new(0),
                load_bits: AtomicU32::new(0.0f32.to_bits()),
            }),
            worker: None,
        }
    }

    /// Clock that renders without sleeping.
    pub fn unpaced() -> Self {
        let mut backend = Self::new();
        backend.paced = false;
        backend
    }

    /// Underruns counted so far.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

impl AudioBackend for ClockedBackend {
    fn open(&mut self, config: StreamConfig) -> Result<(), BackendError> {
        if config.sample_rate == 0 || config.buffer_size == 0 || config.output_channels == 0 {
            return Err(BackendError::Unsupported(format!("{config:?}")));
        }
        if self.is_running() {
            return Err(BackendError::AlreadyRunning);
        }
        debug!(?config, "clocked backend opened");
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self, mut callback: RenderCallback) -> Result<(), BackendError> {
        let config = self.config.ok_or(BackendError::NotOpen)?;
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(BackendError::AlreadyRunning);
        }
        let shared = Arc::clone(&self.shared);
        let paced = self.paced;
        let period = Duration::from_secs_f64(config.buffer_size as f64 / config.sample_rate as f64);
        let period_ns = period.as_nanos().max(1) as f64;
        let latency = config.buffer_size as u32;

        let spawned = std::thread::Builder::new()
            .name("cue-audio".into())
            .spawn(move || {
                let input = AudioBlock::new(config.input_channels, config.buffer_size);
                let mut output = AudioBlock::new(config.output_channels, config.buffer_size);
                let mut deadline = Instant::now() + period;
                while shared.running.load(Ordering::Acquire) {
                    let info = CallbackInfo {
                        sample_rate: config.sample_rate,
                        output_latency_samples: latency,
                        input_latency_samples: 0,
                        underruns: shared.underruns.load(Ordering::Relaxed),
                        overruns: 0,
                    };
                    let began = monotonic_timestamp_ns();
                    callback(&input, &mut output, &info);
                    let spent = monotonic_timestamp_ns().saturating_sub(began) as f64;
                    let load = (spent / period_ns).clamp(0.0, 1.0) as f32;
                    shared.load_bits.store(load.to_bits(), Ordering::Relaxed);

                    if !paced {
                        continue;
                    }
                    let now = Instant::now();
                    if now > deadline + period {
                        shared.underruns.fetch_add(1, Ordering::Relaxed);
                        deadline = now + period;
                        continue;
                    }
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    deadline += period;
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    sample_rate = config.sample_rate,
                    buffer_size = config.buffer_size,
                    paced,
                    "clocked backend started"
                );
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("render thread panicked");
            }
            info!("clocked backend stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn output_latency_samples(&self) -> u32 {
        self.config.map_or(0, |c| c.buffer_size as u32)
    }

    fn input_latency_samples(&self) -> u32 {
        0
    }

    fn cpu_load(&self) -> f32 {
        f32::from_bits(self.shared.load_bits.load(Ordering::Relaxed))
    }
}

impl Drop for ClockedBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn block_channels_are_disjoint() {
        let mut block = AudioBlock::new(2, 8);
        block.channel_mut(0).fill(1.0);
        block.channel_mut(1).fill(-1.0);
        assert!(block.channel(0).iter().all(|&s| s == 1.0));
        assert!(block.channel(1).iter().all(|&s| s == -1.0));
        assert_eq!(block.set_frames(4), 4);
        block.scale(0.5);
        assert_eq!(block.sample(0, 3), 0.5);
        assert_eq!(block.set_frames(64), 8);
        assert_eq!(block.sample(0, 7), 1.0);
        assert!(block.channel(5).is_empty());
    }

    #[test]
    fn unpaced_clock_drives_callback() {
        let mut backend = ClockedBackend::unpaced();
        assert!(matches!(
            backend.start(Box::new(|_: &AudioBlock, _: &mut AudioBlock, _: &CallbackInfo| {})),
            Err(BackendError::NotOpen)
        ));
        backend
            .open(StreamConfig {
                sample_rate: 48_000,
                buffer_size: 64,
                input_channels: 0,
                output_channels: 2,
            })
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        backend
            .start(Box::new(move |_: &AudioBlock, out: &mut AudioBlock, info: &CallbackInfo| {
                if out.frames() == 64 && info.sample_rate == 48_000 {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            }))
            .unwrap();
        while calls.load(Ordering::Relaxed) < 10 {
            std::thread::yield_now();
        }
        backend.stop();
        assert!(!backend.is_running());
    }
}
