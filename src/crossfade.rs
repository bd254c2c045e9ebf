//! Curve-shaped crossfades between two named cues.
//!
//! The engine only tracks time and ids. Each [`process`](CrossfadeEngine::process)
//! call reports the gains the two cues should reach by the end of the block;
//! the caller ramps the cues towards them.
use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::CoreError;
use crate::command::{CrossfadeRequest, CueId};

/// Most control points a custom curve can hold.
pub const MAX_CURVE_POINTS: usize = 32;

/// `p`
pub fn linear(p: f32) -> f32 {
    p
}

/// `p²`
pub fn logarithmic(p: f32) -> f32 {
    p * p
}

/// `sin(pπ/2)`. Squared gains of the two sides always sum to one.
pub fn equal_power(p: f32) -> f32 {
    (p * PI * 0.5).sin()
}

/// `0.5(1 − cos pπ)`
pub fn sine_cosine(p: f32) -> f32 {
    0.5 * (1.0 - (p * PI).cos())
}

/// `p³`
pub fn exponential(p: f32) -> f32 {
    p * p * p
}

/// Piecewise-linear interpolation over evenly spaced control values.
/// An empty set behaves like [`linear`].
pub fn custom(p: f32, points: &[f32]) -> f32 {
    match points {
        [] => linear(p),
        [only] => *only,
        _ => {
            let scaled = p * (points.len() - 1) as f32;
            let index = scaled.floor() as usize;
            if index >= points.len() - 1 {
                return points[points.len() - 1];
            }
            let fraction = scaled - index as f32;
            points[index] + fraction * (points[index + 1] - points[index])
        }
    }
}

/// Inline control values for [`CrossfadeCurve::Custom`].
#[derive(Clone, Copy, PartialEq)]
pub struct CurvePoints {
    values: [f32; MAX_CURVE_POINTS],
    len: u8,
}

impl CurvePoints {
    /// Copy up to [`MAX_CURVE_POINTS`] values.
    pub fn new(values: &[f32]) -> Result<Self, CoreError> {
        if values.len() > MAX_CURVE_POINTS {
            return Err(CoreError::TooManyCurvePoints(values.len()));
        }
        let mut inline = [0.0; MAX_CURVE_POINTS];
        inline[..values.len()].copy_from_slice(values);
        Ok(Self {
            values: inline,
            len: values.len() as u8,
        })
    }

    /// The stored values.
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len as usize]
    }
}

impl std::fmt::Debug for CurvePoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Shape of a crossfade.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CrossfadeCurve {
    /// Straight line.
    Linear,
    /// Slow start, fast finish.
    Logarithmic,
    /// Constant perceived loudness.
    #[default]
    EqualPower,
    /// S-shaped raised cosine.
    SineCosine,
    /// Steeper than logarithmic.
    Exponential,
    /// User-supplied control values.
    Custom(CurvePoints),
}

impl CrossfadeCurve {
    /// Map a `-1..=1` shape parameter onto a curve: strongly negative picks
    /// [`Logarithmic`](Self::Logarithmic), strongly positive picks
    /// [`Exponential`](Self::Exponential), anything else is linear.
    pub fn from_parameter(parameter: f32) -> Self {
        if parameter < -0.5 {
            CrossfadeCurve::Logarithmic
        } else if parameter > 0.5 {
            CrossfadeCurve::Exponential
        } else {
            CrossfadeCurve::Linear
        }
    }

    /// Curve value at progress `p`, clamped to `[0, 1]`.
    pub fn gain(&self, p: f32) -> f32 {
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        match self {
            CrossfadeCurve::Linear => linear(p),
            CrossfadeCurve::Logarithmic => logarithmic(p),
            CrossfadeCurve::EqualPower => equal_power(p),
            CrossfadeCurve::SineCosine => sine_cosine(p),
            CrossfadeCurve::Exponential => exponential(p),
            CrossfadeCurve::Custom(points) => custom(p, points.as_slice()),
        }
    }

    /// Gain of the incoming side.
    pub fn fade_in_gain(&self, p: f32) -> f32 {
        self.gain(p)
    }

    /// Gain of the outgoing side.
    pub fn fade_out_gain(&self, p: f32) -> f32 {
        self.gain(1.0 - p)
    }

    /// Short display label.
    pub fn name(&self) -> &'static str {
        match self {
            CrossfadeCurve::Linear => "linear",
            CrossfadeCurve::Logarithmic => "logarithmic",
            CrossfadeCurve::EqualPower => "equal power",
            CrossfadeCurve::SineCosine => "sine/cosine",
            CrossfadeCurve::Exponential => "exponential",
            CrossfadeCurve::Custom(_) => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    from: CueId,
    to: CueId,
    total: usize,
    elapsed: usize,
    curve: CrossfadeCurve,
}

impl Session {
    fn progress(&self) -> f32 {
        (self.elapsed as f64 / self.total as f64) as f32
    }
}

/// Gains for the two sides of a crossfade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeGains {
    /// Outgoing cue.
    pub from: CueId,
    /// Incoming cue.
    pub to: CueId,
    /// Outgoing gain.
    pub from_gain: f32,
    /// Incoming gain.
    pub to_gain: f32,
    /// Frames over which the gains are reached.
    pub frames: usize,
}

/// What happened during one [`CrossfadeEngine::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CrossfadeTick {
    /// A session began; gains are the starting values.
    pub started: Option<CrossfadeGains>,
    /// Target gains at the end of this advance.
    pub gains: Option<CrossfadeGains>,
    /// The session that finished during this advance, as `(from, to)`.
    pub completed: Option<(CueId, CueId)>,
}

/// Read-only crossfade state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeStatus {
    /// A session is running.
    pub active: bool,
    /// Outgoing cue of the running session.
    pub from: Option<CueId>,
    /// Incoming cue of the running session.
    pub to: Option<CueId>,
    /// Session length in seconds.
    pub duration_seconds: f64,
    /// Time already crossfaded in seconds.
    pub elapsed_seconds: f64,
    /// Progress in `[0, 1]`.
    pub progress: f32,
    /// Curve of the running session, or the default when idle.
    pub curve: CrossfadeCurve,
    /// Pending queued sessions.
    pub queued: usize,
}

impl Default for CrossfadeStatus {
    fn default() -> Self {
        Self {
            active: false,
            from: None,
            to: None,
            duration_seconds: 0.0,
            elapsed_seconds: 0.0,
            progress: 0.0,
            curve: CrossfadeCurve::default(),
            queued: 0,
        }
    }
}

/// Single-session crossfade timer with an optional bounded queue.
#[derive(Debug)]
pub struct CrossfadeEngine {
    sample_rate: u32,
    initialized: bool,
    active: Option<Session>,
    just_started: bool,
    progress: f32,
    queue: VecDeque<CrossfadeRequest>,
    queue_capacity: usize,
    default_curve: CrossfadeCurve,
    auto_start_target: bool,
}

impl CrossfadeEngine {
    /// Create an uninitialised engine whose queue holds `queue_capacity`
    /// pending sessions. Storage is reserved here.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sample_rate: 0,
            initialized: false,
            active: None,
            just_started: false,
            progress: 0.0,
            queue: VecDeque::with_capacity(queue_capacity),
            queue_capacity,
            default_curve: CrossfadeCurve::default(),
            auto_start_target: true,
        }
    }

    /// Arm the engine for `sample_rate`. `false` on a zero rate.
    pub fn initialize(&mut self, sample_rate: u32) -> bool {
        if sample_rate == 0 {
            return false;
        }
        self.sample_rate = sample_rate;
        self.initialized = true;
        true
    }

    /// Whether [`initialize`](Self::initialize) succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Drop every session and disarm.
    pub fn shutdown(&mut self) {
        self.active = None;
        self.just_started = false;
        self.queue.clear();
        self.progress = 0.0;
        self.initialized = false;
    }

    fn session_for(&self, request: &CrossfadeRequest) -> Session {
        let samples = request.duration_seconds.max(0.0) * self.sample_rate as f64;
        let total = if samples.is_finite() {
            (samples.round() as usize).max(1)
        } else {
            1
        };
        Session {
            from: request.from,
            to: request.to,
            total,
            elapsed: 0,
            curve: request.curve.unwrap_or(self.default_curve),
        }
    }

    fn begin(&mut self, request: &CrossfadeRequest) {
        self.active = Some(self.session_for(request));
        self.just_started = true;
        self.progress = 0.0;
    }

    /// Start a crossfade now, replacing any running one. Durations below one
    /// sample are raised to one sample.
    pub fn start_crossfade(
        &mut self,
        from: CueId,
        to: CueId,
        duration_seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> bool {
        self.start_request(&CrossfadeRequest {
            from,
            to,
            duration_seconds,
            curve,
        })
    }

    /// [`start_crossfade`](Self::start_crossfade) from a request value.
    pub fn start_request(&mut self, request: &CrossfadeRequest) -> bool {
        if !self.initialized {
            return false;
        }
        self.begin(request);
        true
    }

    /// Append a crossfade to run once the engine is idle. `false` when
    /// uninitialised or the queue is full.
    pub fn queue_crossfade(&mut self, request: CrossfadeRequest) -> bool {
        if !self.initialized || self.queue.len() >= self.queue_capacity {
            return false;
        }
        self.queue.push_back(request);
        true
    }

    /// Cancel the running session. `false` when idle.
    pub fn stop_crossfade(&mut self) -> bool {
        self.just_started = false;
        self.progress = 0.0;
        self.active.take().is_some()
    }

    /// Drop pending sessions.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Pending session count.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether a session is running.
    pub fn is_crossfading(&self) -> bool {
        self.active.is_some()
    }

    /// Ids of the running session.
    pub fn active_pair(&self) -> Option<(CueId, CueId)> {
        self.active.map(|s| (s.from, s.to))
    }

    /// Progress of the running session; 1.0 after completion, 0.0 after a
    /// stop or before any session.
    pub fn progress(&self) -> f32 {
        match &self.active {
            Some(session) => session.progress(),
            None => self.progress,
        }
    }

    /// Seconds left in the running session.
    pub fn remaining_time(&self) -> f64 {
        match &self.active {
            Some(s) => (s.total - s.elapsed) as f64 / self.sample_rate.max(1) as f64,
            None => 0.0,
        }
    }

    /// Seconds already crossfaded in the running session.
    pub fn elapsed_time(&self) -> f64 {
        match &self.active {
            Some(s) => s.elapsed as f64 / self.sample_rate.max(1) as f64,
            None => 0.0,
        }
    }

    /// Curve used when a request names none.
    pub fn default_curve(&self) -> CrossfadeCurve {
        self.default_curve
    }

    /// Change the default curve.
    pub fn set_default_curve(&mut self, curve: CrossfadeCurve) {
        self.default_curve = curve;
    }

    /// Whether the incoming cue should be started when a session begins.
    pub fn auto_start_target(&self) -> bool {
        self.auto_start_target
    }

    /// Toggle incoming cue auto-start.
    pub fn set_auto_start_target(&mut self, enabled: bool) {
        self.auto_start_target = enabled;
    }

    /// Snapshot for reporting.
    pub fn status(&self) -> CrossfadeStatus {
        let rate = self.sample_rate.max(1) as f64;
        match &self.active {
            Some(s) => CrossfadeStatus {
                active: true,
                from: Some(s.from),
                to: Some(s.to),
                duration_seconds: s.total as f64 / rate,
                elapsed_seconds: s.elapsed as f64 / rate,
                progress: s.progress(),
                curve: s.curve,
                queued: self.queue.len(),
            },
            None => CrossfadeStatus {
                progress: self.progress,
                curve: self.default_curve,
                queued: self.queue.len(),
                ..CrossfadeStatus::default()
            },
        }
    }

    /// Advance by up to `frames` samples.
    pub fn process(&mut self, frames: usize) -> CrossfadeTick {
        let mut tick = CrossfadeTick::default();
        if !self.initialized {
            return tick;
        }
        if self.active.is_none() {
            if let Some(request) = self.queue.pop_front() {
                self.begin(&request);
            }
        }
        let Some(session) = self.active.as_mut() else {
            return tick;
        };

        if self.just_started {
            self.just_started = false;
            tick.started = Some(CrossfadeGains {
                from: session.from,
                to: session.to,
                from_gain: session.curve.fade_out_gain(0.0),
                to_gain: session.curve.fade_in_gain(0.0),
                frames: 0,
            });
        }

        let advance = frames.min(session.total - session.elapsed);
        session.elapsed += advance;
        let progress = session.progress();
        tick.gains = Some(CrossfadeGains {
            from: session.from,
            to: session.to,
            from_gain: session.curve.fade_out_gain(progress),
            to_gain: session.curve.fade_in_gain(progress),
            frames: advance,
        });

        if session.elapsed >= session.total {
            tick.completed = Some((session.from, session.to));
            self.active = None;
            self.progress = 1.0;
        }
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (CueId, CueId) {
        (CueId::new("a").unwrap(), CueId::new("b").unwrap())
    }

    #[test]
    fn curve_endpoints() {
        for curve in [
            CrossfadeCurve::Linear,
            CrossfadeCurve::Logarithmic,
            CrossfadeCurve::EqualPower,
            CrossfadeCurve::SineCosine,
            CrossfadeCurve::Exponential,
        ] {
            assert!(curve.gain(0.0).abs() < 1e-6, "{}", curve.name());
            assert!((curve.gain(1.0) - 1.0).abs() < 1e-6, "{}", curve.name());
        }
        assert_eq!(logarithmic(0.5), 0.25);
        assert_eq!(exponential(0.5), 0.125);
        assert!((sine_cosine(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn custom_interpolates() {
        assert_eq!(custom(0.25, &[]), 0.25);
        assert_eq!(custom(0.5, &[0.0, 0.2, 1.0]), 0.2);
        assert!((custom(0.75, &[0.0, 0.2, 1.0]) - 0.6).abs() < 1e-6);
        assert_eq!(custom(1.0, &[0.0, 0.2, 1.0]), 1.0);
        assert!(CurvePoints::new(&[0.0; MAX_CURVE_POINTS + 1]).is_err());
    }

    #[test]
    fn parameter_mapping() {
        assert_eq!(CrossfadeCurve::from_parameter(-0.9), CrossfadeCurve::Logarithmic);
        assert_eq!(CrossfadeCurve::from_parameter(0.0), CrossfadeCurve::Linear);
        assert_eq!(CrossfadeCurve::from_parameter(0.6), CrossfadeCurve::Exponential);
    }

    #[test]
    fn requires_initialization() {
        let (a, b) = ids();
        let mut engine = CrossfadeEngine::new(4);
        assert!(!engine.start_crossfade(a, b, 1.0, None));
        assert_eq!(engine.process(64), CrossfadeTick::default());
        assert!(engine.initialize(1_000));
        assert!(engine.start_crossfade(a, b, 1.0, None));
        engine.shutdown();
        assert!(!engine.is_crossfading());
    }

    #[test]
    fn completes_after_exact_sample_count() {
        let (a, b) = ids();
        let mut engine = CrossfadeEngine::new(4);
        engine.initialize(1_000);
        engine.start_crossfade(a, b, 0.25, Some(CrossfadeCurve::Linear));
        let first = engine.process(100);
        assert!(first.started.is_some());
        assert!((engine.progress() - 0.4).abs() < 1e-6);
        assert!(engine.process(100).completed.is_none());
        let last = engine.process(100);
        assert_eq!(last.completed, Some((a, b)));
        assert_eq!(last.gains.map(|g| g.frames), Some(50));
        assert_eq!(engine.progress(), 1.0);
        assert!(!engine.is_crossfading());
    }

    #[test]
    fn stop_resets_progress() {
        let (a, b) = ids();
        let mut engine = CrossfadeEngine::new(4);
        engine.initialize(1_000);
        engine.start_crossfade(a, b, 1.0, None);
        engine.process(500);
        assert!(engine.stop_crossfade());
        assert_eq!(engine.progress(), 0.0);
        assert!(!engine.stop_crossfade());
    }

    #[test]
    fn queue_is_bounded_and_drains_when_idle() {
        let (a, b) = ids();
        let mut engine = CrossfadeEngine::new(2);
        engine.initialize(1_000);
        let request = CrossfadeRequest {
            from: a,
            to: b,
            duration_seconds: 0.01,
            curve: None,
        };
        assert!(engine.queue_crossfade(request));
        assert!(engine.queue_crossfade(request));
        assert!(!engine.queue_crossfade(request));
        let tick = engine.process(64);
        assert!(tick.started.is_some());
        assert!(tick.completed.is_some());
        assert_eq!(engine.queued_count(), 1);
        engine.clear_queue();
        assert_eq!(engine.process(64), CrossfadeTick::default());
    }
}
