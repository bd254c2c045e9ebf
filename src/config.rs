//! Engine configuration.
use crate::CoreError;
use crate::command::DEFAULT_COMMAND_CAPACITY;
use crate::crossfade::CrossfadeCurve;

/// Settings fixed at [`initialize`](crate::initialize) time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Stream sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum frames per render block.
    pub buffer_size: usize,
    /// Input channel count requested from the backend.
    pub input_channels: usize,
    /// Output channel count requested from the backend.
    pub output_channels: usize,
    /// Control-to-audio command ring capacity. Must be a power of two.
    pub command_capacity: usize,
    /// Upper bound on simultaneously loaded cues.
    pub max_cues: usize,
    /// Pending crossfade slots.
    pub crossfade_queue_capacity: usize,
    /// Minimum spacing between status frames, in milliseconds.
    pub report_interval_ms: u32,
    /// Curve used when a crossfade request does not name one.
    pub default_curve: CrossfadeCurve,
    /// Start the target cue when a crossfade begins and it is stopped.
    pub auto_start_target: bool,
    /// Latency the stream should aim for, in milliseconds.
    pub target_latency_ms: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 256,
            input_channels: 2,
            output_channels: 2,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            max_cues: 64,
            crossfade_queue_capacity: 16,
            report_interval_ms: 10,
            default_curve: CrossfadeCurve::EqualPower,
            auto_start_target: true,
            target_latency_ms: 5.0,
        }
    }
}

impl EngineConfig {
    /// Check the settings for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |msg: String| Err(CoreError::InvalidConfig(msg));
        if self.sample_rate == 0 {
            return fail("sample rate must be positive".into());
        }
        if self.buffer_size == 0 {
            return fail("buffer size must be positive".into());
        }
        if self.output_channels == 0 || self.output_channels > crate::cue::MAX_CHANNELS {
            return fail(format!(
                "output channels must be within 1..={}, got {}",
                crate::cue::MAX_CHANNELS,
                self.output_channels
            ));
        }
        if self.command_capacity < 2 || !self.command_capacity.is_power_of_two() {
            return fail(format!(
                "command capacity {} must be a power of two >= 2",
                self.command_capacity
            ));
        }
        if self.max_cues == 0 {
            return fail("max cues must be positive".into());
        }
        if !self.target_latency_ms.is_finite() || self.target_latency_ms < 0.0 {
            return fail("target latency must be finite and non-negative".into());
        }
        Ok(())
    }

    /// Builder: sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Builder: block size.
    pub fn with_buffer_size(mut self, frames: usize) -> Self {
        self.buffer_size = frames;
        self
    }

    /// Builder: output channel count.
    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    /// Builder: command ring capacity.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    /// Builder: maximum loaded cues.
    pub fn with_max_cues(mut self, max_cues: usize) -> Self {
        self.max_cues = max_cues;
        self
    }

    /// Builder: crossfade queue capacity.
    pub fn with_crossfade_queue_capacity(mut self, capacity: usize) -> Self {
        self.crossfade_queue_capacity = capacity;
        self
    }

    /// Builder: status report interval.
    pub fn with_report_interval_ms(mut self, interval_ms: u32) -> Self {
        self.report_interval_ms = interval_ms;
        self
    }

    /// Builder: default crossfade curve.
    pub fn with_default_curve(mut self, curve: CrossfadeCurve) -> Self {
        self.default_curve = curve;
        self
    }

    /// Builder: crossfade target auto-start.
    pub fn with_auto_start_target(mut self, enabled: bool) -> Self {
        self.auto_start_target = enabled;
        self
    }

    /// Block length in seconds at the configured rate.
    pub fn block_seconds(&self) -> f64 {
        self.buffer_size as f64 / self.sample_rate.max(1) as f64
    }
}
