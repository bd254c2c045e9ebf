//! A single playable cue and its transport state machine.
//!
//! A [`Cue`] owns fully decoded, de-interleaved samples. All transport
//! changes are strict: an operation that does not apply in the current state
//! returns `false` and leaves the cue untouched. Rendering adds into the
//! output block and never allocates.
use std::fmt;

use dasp_frame::{Frame, Stereo};

use crate::backend::AudioBlock;
use crate::command::{CueAction, CueId};
use crate::decoder::DecodedAudio;

/// Largest output channel count a cue can pan across.
pub const MAX_CHANNELS: usize = 32;

/// Transport state of a cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CueState {
    /// Silent with the cursor at the start.
    #[default]
    Stopped,
    /// Rendering at the base volume.
    Playing,
    /// Silent with the cursor held.
    Paused,
    /// Rendering while ramping up to the base volume.
    FadingIn,
    /// Rendering while ramping down to silence.
    FadingOut,
}

impl CueState {
    /// Whether the state produces audio.
    pub fn is_audible(self) -> bool {
        matches!(
            self,
            CueState::Playing | CueState::FadingIn | CueState::FadingOut
        )
    }

    /// Short display label.
    pub fn label(self) -> &'static str {
        match self {
            CueState::Stopped => "stopped",
            CueState::Playing => "playing",
            CueState::Paused => "paused",
            CueState::FadingIn => "fading in",
            CueState::FadingOut => "fading out",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FadeRamp {
    from: f32,
    to: f32,
    remaining: usize,
    total: usize,
}

impl FadeRamp {
    fn current(&self) -> f32 {
        if self.total == 0 {
            return self.to;
        }
        let done = (self.total - self.remaining) as f32 / self.total as f32;
        self.from + (self.to - self.from) * done
    }

    fn advance(&mut self) -> f32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.current()
    }
}

/// Linear per-sample gain ramp driven from outside the cue.
#[derive(Debug, Clone, Copy)]
struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
}

impl GainRamp {
    const UNITY: GainRamp = GainRamp {
        current: 1.0,
        target: 1.0,
        step: 0.0,
        remaining: 0,
    };

    fn ramp_to(&mut self, target: f32, frames: usize) {
        self.target = target;
        if frames == 0 {
            self.current = target;
            self.remaining = 0;
            self.step = 0.0;
        } else {
            self.step = (target - self.current) / frames as f32;
            self.remaining = frames;
        }
    }

    fn set(&mut self, value: f32) {
        *self = GainRamp {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        };
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }
}

/// Stereo pan law: the side opposite the pan direction is attenuated
/// linearly, the near side stays at `gain`.
pub fn stereo_pan(gain: f32, pan: f32) -> Stereo<f32> {
    let pan = pan.clamp(-1.0, 1.0);
    let law: Stereo<f32> = [1.0 - pan.max(0.0), 1.0 + pan.min(0.0)];
    law.scale_amp(gain)
}

/// Per-channel pan factors for `channels` outputs spread evenly from -1 to 1.
fn pan_factors(pan: f32, channels: usize, factors: &mut [f32; MAX_CHANNELS]) {
    let channels = channels.min(MAX_CHANNELS);
    match channels {
        0 => {}
        1 => factors[0] = 1.0,
        2 => {
            let [left, right] = stereo_pan(1.0, pan);
            factors[0] = left;
            factors[1] = right;
        }
        n => {
            for (ch, factor) in factors.iter_mut().take(n).enumerate() {
                let position = -1.0 + 2.0 * ch as f32 / (n - 1) as f32;
                *factor = 1.0 - (-pan * position).max(0.0);
            }
        }
    }
}

/// Read-only view of a cue for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CueInfo {
    /// Identifier.
    pub id: CueId,
    /// Transport state.
    pub state: CueState,
    /// Loop flag.
    pub looping: bool,
    /// Base volume set by the operator.
    pub volume: f32,
    /// Pan position.
    pub pan: f32,
    /// Gain currently applied, including fades and crossfades.
    pub gain: f32,
    /// Cursor in seconds.
    pub position_seconds: f64,
    /// Length in seconds.
    pub duration_seconds: f64,
    /// Source channel count.
    pub channels: usize,
    /// Source rate in Hz.
    pub sample_rate: u32,
}

/// Decoded audio plus playback state.
pub struct Cue {
    id: CueId,
    data: Vec<Vec<f32>>,
    frames: usize,
    sample_rate: u32,
    position: usize,
    volume: f32,
    pan: f32,
    looping: bool,
    state: CueState,
    fade: Option<FadeRamp>,
    crossfade: GainRamp,
}

impl fmt::Debug for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cue")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("channels", &self.data.len())
            .field("frames", &self.frames)
            .field("position", &self.position)
            .field("volume", &self.volume)
            .field("pan", &self.pan)
            .field("looping", &self.looping)
            .finish()
    }
}

impl Cue {
    /// Wrap decoded audio. The cue starts stopped at full volume, centred.
    pub fn new(id: CueId, audio: DecodedAudio) -> Self {
        let frames = audio
            .channels
            .iter()
            .map(Vec::len)
            .min()
            .unwrap_or(0);
        Self {
            id,
            data: audio.channels,
            frames,
            sample_rate: audio.sample_rate.max(1),
            position: 0,
            volume: 1.0,
            pan: 0.0,
            looping: false,
            state: CueState::Stopped,
            fade: None,
            crossfade: GainRamp::UNITY,
        }
    }

    /// Identifier.
    pub fn id(&self) -> CueId {
        self.id
    }

    /// Transport state.
    pub fn state(&self) -> CueState {
        self.state
    }

    /// Base volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Pan position.
    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Loop flag.
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Cursor in frames.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Length in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Source rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Source channel count.
    pub fn channels(&self) -> usize {
        self.data.len()
    }

    fn samples_for(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.sample_rate as f64).round() as usize
    }

    /// Play from the beginning, cancelling any fade.
    pub fn start(&mut self) -> bool {
        self.position = 0;
        self.fade = None;
        self.state = CueState::Playing;
        true
    }

    /// Stop and rewind. `false` when already stopped.
    pub fn stop(&mut self) -> bool {
        if self.state == CueState::Stopped {
            return false;
        }
        self.halt();
        true
    }

    fn halt(&mut self) {
        self.state = CueState::Stopped;
        self.position = 0;
        self.fade = None;
    }

    /// Hold the cursor. Only valid while playing.
    pub fn pause(&mut self) -> bool {
        if self.state != CueState::Playing {
            return false;
        }
        self.state = CueState::Paused;
        true
    }

    /// Continue after [`pause`](Self::pause).
    pub fn resume(&mut self) -> bool {
        if self.state != CueState::Paused {
            return false;
        }
        self.state = CueState::Playing;
        true
    }

    /// Ramp from silence to the base volume. A stopped cue plays from the
    /// start, a paused cue from its cursor.
    pub fn fade_in(&mut self, seconds: f64) -> bool {
        let total = self.samples_for(seconds);
        if total == 0 {
            self.fade = None;
            self.state = CueState::Playing;
            return true;
        }
        self.fade = Some(FadeRamp {
            from: 0.0,
            to: self.volume,
            remaining: total,
            total,
        });
        self.state = CueState::FadingIn;
        true
    }

    /// Ramp from the current gain to silence, then stop.
    pub fn fade_out(&mut self, seconds: f64) -> bool {
        match self.state {
            CueState::Stopped => return false,
            CueState::Paused => {
                self.halt();
                return true;
            }
            _ => {}
        }
        let total = self.samples_for(seconds);
        if total == 0 {
            self.halt();
            return true;
        }
        self.fade = Some(FadeRamp {
            from: self.fade_gain(),
            to: 0.0,
            remaining: total,
            total,
        });
        self.state = CueState::FadingOut;
        true
    }

    /// Set the base volume, clamped to `[0, 1]`. A fade-in in progress
    /// retargets to the new volume.
    pub fn set_volume(&mut self, volume: f32) -> bool {
        if !volume.is_finite() {
            return false;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if self.state == CueState::FadingIn {
            if let Some(fade) = self.fade.as_mut() {
                fade.to = self.volume;
            }
        }
        true
    }

    /// Set the pan position, clamped to `[-1, 1]`.
    pub fn set_pan(&mut self, pan: f32) -> bool {
        if !pan.is_finite() {
            return false;
        }
        self.pan = pan.clamp(-1.0, 1.0);
        true
    }

    /// Enable or disable looping.
    pub fn set_loop(&mut self, looping: bool) -> bool {
        self.looping = looping;
        true
    }

    /// Move the cursor, clamped to the cue length.
    pub fn seek(&mut self, seconds: f64) -> bool {
        if seconds.is_nan() {
            return false;
        }
        let target = (seconds.max(0.0) * self.sample_rate as f64).round();
        self.position = if target >= self.frames as f64 {
            self.frames
        } else {
            target as usize
        };
        true
    }

    /// Dispatch a transport or parameter action.
    pub fn apply(&mut self, action: CueAction) -> bool {
        match action {
            CueAction::Start => self.start(),
            CueAction::Stop => self.stop(),
            CueAction::Pause => self.pause(),
            CueAction::Resume => self.resume(),
            CueAction::SetVolume(v) => self.set_volume(v),
            CueAction::SetPan(p) => self.set_pan(p),
            CueAction::SetLoop(l) => self.set_loop(l),
            CueAction::FadeIn(s) => self.fade_in(s),
            CueAction::FadeOut(s) => self.fade_out(s),
            CueAction::Seek(s) => self.seek(s),
        }
    }

    /// Volume including any fade, excluding the crossfade multiplier.
    fn fade_gain(&self) -> f32 {
        match self.fade {
            Some(fade) => fade.current(),
            None => self.volume,
        }
    }

    /// Gain that the next rendered sample would carry, zero when silent.
    pub fn current_gain(&self) -> f32 {
        if !self.state.is_audible() {
            return 0.0;
        }
        self.fade_gain() * self.crossfade.current
    }

    /// Crossfade multiplier currently applied.
    pub fn crossfade_gain(&self) -> f32 {
        self.crossfade.current
    }

    /// Ramp the crossfade multiplier linearly to `target` over `frames`.
    pub fn ramp_crossfade_gain(&mut self, target: f32, frames: usize) {
        self.crossfade.ramp_to(target, frames);
    }

    /// Jump the crossfade multiplier to `value`.
    pub fn set_crossfade_gain(&mut self, value: f32) {
        self.crossfade.set(value);
    }

    /// Advance the fade by one sample, handling completion.
    /// Returns the gain and whether the cue stopped on this sample.
    #[inline]
    fn next_fade_gain(&mut self) -> (f32, bool) {
        let Some(fade) = self.fade.as_mut() else {
            return (self.volume, false);
        };
        let gain = fade.advance();
        if fade.remaining > 0 {
            return (gain, false);
        }
        self.fade = None;
        match self.state {
            CueState::FadingOut => (gain, true),
            _ => {
                self.state = CueState::Playing;
                (gain, false)
            }
        }
    }

    /// Add this cue's contribution into `out`. Silent cues are skipped.
    pub fn render(&mut self, out: &mut AudioBlock) {
        if !self.state.is_audible() {
            return;
        }
        let out_channels = out.channels().min(MAX_CHANNELS);
        let src_channels = self.data.len();
        if src_channels == 0 {
            self.halt();
            return;
        }
        let mut factors = [0.0f32; MAX_CHANNELS];
        pan_factors(self.pan, out_channels, &mut factors);

        for frame in 0..out.frames() {
            if self.position >= self.frames {
                if self.looping && self.frames > 0 {
                    self.position = 0;
                } else {
                    self.halt();
                    break;
                }
            }
            let (fade, finished) = self.next_fade_gain();
            let gain = fade * self.crossfade.next();
            for (ch, factor) in factors.iter().take(out_channels).enumerate() {
                let src = if src_channels == 1 {
                    &self.data[0]
                } else if ch < src_channels {
                    &self.data[ch]
                } else {
                    continue;
                };
                out.add(ch, frame, src[self.position] * gain * factor);
            }
            self.position += 1;
            if finished {
                self.halt();
                break;
            }
        }
    }

    /// Status projection.
    pub fn info(&self) -> CueInfo {
        let rate = self.sample_rate as f64;
        CueInfo {
            id: self.id,
            state: self.state,
            looping: self.looping,
            volume: self.volume,
            pan: self.pan,
            gain: self.current_gain(),
            position_seconds: self.position as f64 / rate,
            duration_seconds: self.frames as f64 / rate,
            channels: self.data.len(),
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_cue(name: &str, value: f32, frames: usize) -> Cue {
        Cue::new(
            CueId::new(name).unwrap(),
            DecodedAudio {
                channels: vec![vec![value; frames]; 2],
                sample_rate: 1_000,
            },
        )
    }

    #[test]
    fn pan_law_edges() {
        assert_eq!(stereo_pan(1.0, 0.0), [1.0, 1.0]);
        assert_eq!(stereo_pan(1.0, 1.0), [0.0, 1.0]);
        assert_eq!(stereo_pan(1.0, -1.0), [1.0, 0.0]);
        let [l, r] = stereo_pan(0.5, 0.5);
        assert!((l - 0.25).abs() < 1e-6 && (r - 0.5).abs() < 1e-6);
        assert_eq!(stereo_pan(1.0, 0.0).channels().count(), 2);
    }

    #[test]
    fn surround_pan_spreads_across_positions() {
        let mut factors = [0.0; MAX_CHANNELS];
        pan_factors(1.0, 3, &mut factors);
        assert_eq!(&factors[..3], &[0.0, 1.0, 1.0]);
        pan_factors(-0.5, 5, &mut factors);
        assert_eq!(&factors[..5], &[1.0, 1.0, 1.0, 0.75, 0.5]);
    }

    #[test]
    fn strict_transitions() {
        let mut cue = constant_cue("a", 0.5, 100);
        assert!(!cue.stop());
        assert!(!cue.pause());
        assert!(!cue.resume());
        assert!(!cue.fade_out(1.0));
        assert_eq!(cue.state(), CueState::Stopped);

        assert!(cue.start());
        assert!(!cue.resume());
        assert!(cue.pause());
        assert!(!cue.pause());
        assert!(cue.resume());
        assert_eq!(cue.state(), CueState::Playing);
        assert!(cue.stop());
        assert_eq!(cue.position(), 0);
    }

    #[test]
    fn renders_until_end_then_stops() {
        let mut cue = constant_cue("a", 0.5, 10);
        let mut block = AudioBlock::new(2, 16);
        cue.start();
        cue.render(&mut block);
        assert_eq!(cue.state(), CueState::Stopped);
        assert_eq!(block.sample(0, 9), 0.5);
        assert_eq!(block.sample(0, 10), 0.0);
    }

    #[test]
    fn looping_wraps() {
        let mut cue = constant_cue("a", 0.5, 10);
        let mut block = AudioBlock::new(2, 16);
        cue.set_loop(true);
        cue.start();
        cue.render(&mut block);
        assert_eq!(cue.state(), CueState::Playing);
        assert_eq!(cue.position(), 6);
        assert!(block.channel(1).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn fade_out_keeps_volume_and_stops() {
        let mut cue = constant_cue("a", 1.0, 1_000);
        cue.set_volume(0.8);
        cue.start();
        assert!(cue.fade_out(0.01));
        let mut block = AudioBlock::new(2, 16);
        cue.render(&mut block);
        assert_eq!(cue.state(), CueState::Stopped);
        assert_eq!(cue.volume(), 0.8);
        assert!(block.sample(0, 9).abs() < 1e-6);
        assert_eq!(block.sample(0, 10), 0.0);
    }

    #[test]
    fn zero_duration_fades_complete_immediately() {
        let mut cue = constant_cue("a", 1.0, 100);
        assert!(cue.fade_in(0.0));
        assert_eq!(cue.state(), CueState::Playing);
        assert!(cue.fade_out(-1.0));
        assert_eq!(cue.state(), CueState::Stopped);
    }

    #[test]
    fn seek_clamps() {
        let mut cue = constant_cue("a", 1.0, 1_000);
        cue.seek(0.25);
        assert_eq!(cue.position(), 250);
        cue.seek(99.0);
        assert_eq!(cue.position(), 1_000);
        cue.seek(-3.0);
        assert_eq!(cue.position(), 0);
        assert!(!cue.seek(f64::NAN));
    }

    #[test]
    fn mono_feeds_every_output() {
        let mut cue = Cue::new(
            CueId::new("mono").unwrap(),
            DecodedAudio {
                channels: vec![vec![0.25; 8]],
                sample_rate: 1_000,
            },
        );
        let mut block = AudioBlock::new(4, 8);
        cue.start();
        cue.render(&mut block);
        for ch in 0..4 {
            assert_eq!(block.sample(ch, 3), 0.25);
        }
    }
}
