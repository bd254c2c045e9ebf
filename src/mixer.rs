//! Owner of loaded cues and the additive mix.
//!
//! The mixer lives on the audio thread. Its cue storage is reserved up front
//! for `max_cues` entries, so inserting and removing never reallocates; cues
//! leave the mixer whole (boxed) so the caller decides where they are freed.
use crate::backend::AudioBlock;
use crate::command::{CueAction, CueId};
use crate::cue::{Cue, CueInfo, CueState};
use crate::decoder::{DecodeError, Decoder};

/// Why a cue could not be added.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// A cue with the same id is already loaded.
    #[error("cue `{0}` is already loaded")]
    DuplicateId(CueId),
    /// The decoder failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The mixer is at its cue limit.
    #[error("cue limit of {0} reached")]
    CapacityExceeded(usize),
}

/// Cue handed back by [`CueMixer::insert`] together with the reason.
#[derive(Debug)]
pub struct Rejected {
    /// The cue that was not inserted.
    pub cue: Box<Cue>,
    /// Why.
    pub reason: LoadError,
}

/// Sums every audible cue into the output block.
#[derive(Debug)]
pub struct CueMixer {
    cues: Vec<Box<Cue>>,
    max_cues: usize,
    sample_rate: u32,
    master_volume: f32,
}

impl CueMixer {
    /// Mixer with room for `max_cues` cues.
    pub fn new(sample_rate: u32, max_cues: usize) -> Self {
        Self {
            cues: Vec::with_capacity(max_cues),
            max_cues,
            sample_rate,
            master_volume: 1.0,
        }
    }

    /// Engine rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode `source` and insert it as `id`. Allocates; not for the audio
    /// thread.
    pub fn load(&mut self, id: CueId, source: &str, decoder: &dyn Decoder) -> Result<(), LoadError> {
        if self.is_loaded(&id) {
            return Err(LoadError::DuplicateId(id));
        }
        if self.cues.len() >= self.max_cues {
            return Err(LoadError::CapacityExceeded(self.max_cues));
        }
        let audio = decoder.decode(source)?;
        self.insert(Box::new(Cue::new(id, audio)))
            .map_err(|rejected| rejected.reason)
    }

    /// Insert a decoded cue into reserved storage. Never allocates.
    pub fn insert(&mut self, cue: Box<Cue>) -> Result<(), Rejected> {
        let id = cue.id();
        if self.is_loaded(&id) {
            return Err(Rejected {
                cue,
                reason: LoadError::DuplicateId(id),
            });
        }
        if self.cues.len() >= self.max_cues {
            return Err(Rejected {
                cue,
                reason: LoadError::CapacityExceeded(self.max_cues),
            });
        }
        self.cues.push(cue);
        Ok(())
    }

    /// Remove and drop a cue. `false` for an unknown id.
    pub fn unload(&mut self, id: &CueId) -> bool {
        self.take(id).is_some()
    }

    /// Remove a cue and hand it back, keeping the order of the rest.
    pub fn take(&mut self, id: &CueId) -> Option<Box<Cue>> {
        let index = self.cues.iter().position(|cue| cue.id() == *id)?;
        Some(self.cues.remove(index))
    }

    /// Remove every cue, passing each to `retire`.
    pub fn clear_all(&mut self, mut retire: impl FnMut(Box<Cue>)) {
        for cue in self.cues.drain(..) {
            retire(cue);
        }
    }

    /// Apply an action to one cue. `false` for an unknown id or an action
    /// that does not apply in the cue's state.
    pub fn apply(&mut self, id: &CueId, action: CueAction) -> bool {
        match self.cue_mut(id) {
            Some(cue) => cue.apply(action),
            None => false,
        }
    }

    /// Add every audible cue into `out`, then apply master volume. The block
    /// is not cleared first and sums are not clipped.
    pub fn process(&mut self, out: &mut AudioBlock) {
        for cue in self.cues.iter_mut() {
            cue.render(out);
        }
        if self.master_volume != 1.0 {
            out.scale(self.master_volume);
        }
    }

    /// Stop every cue. Returns how many changed state.
    pub fn stop_all(&mut self) -> usize {
        self.cues.iter_mut().map(|c| c.stop()).filter(|changed| *changed).count()
    }

    /// Pause every playing cue.
    pub fn pause_all(&mut self) -> usize {
        self.cues.iter_mut().map(|c| c.pause()).filter(|changed| *changed).count()
    }

    /// Resume every paused cue.
    pub fn resume_all(&mut self) -> usize {
        self.cues.iter_mut().map(|c| c.resume()).filter(|changed| *changed).count()
    }

    /// Set the post-mix gain, clamped to `[0, 1]`.
    pub fn set_master_volume(&mut self, volume: f32) -> bool {
        if !volume.is_finite() {
            return false;
        }
        self.master_volume = volume.clamp(0.0, 1.0);
        true
    }

    /// Post-mix gain.
    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Ramp a cue's crossfade multiplier. `false` for an unknown id.
    pub fn set_crossfade_ramp(&mut self, id: &CueId, target: f32, frames: usize) -> bool {
        match self.cue_mut(id) {
            Some(cue) => {
                cue.ramp_crossfade_gain(target, frames);
                true
            }
            None => false,
        }
    }

    /// Jump a cue's crossfade multiplier. `false` for an unknown id.
    pub fn set_crossfade_gain(&mut self, id: &CueId, gain: f32) -> bool {
        match self.cue_mut(id) {
            Some(cue) => {
                cue.set_crossfade_gain(gain);
                true
            }
            None => false,
        }
    }

    /// Whether `id` is loaded.
    pub fn is_loaded(&self, id: &CueId) -> bool {
        self.cue(id).is_some()
    }

    /// Whether `id` is loaded and audible.
    pub fn is_playing(&self, id: &CueId) -> bool {
        self.cue(id).is_some_and(|c| c.state().is_audible())
    }

    /// State of `id`, if loaded.
    pub fn state(&self, id: &CueId) -> Option<CueState> {
        self.cue(id).map(|c| c.state())
    }

    /// Count of cues that are not stopped.
    pub fn active_count(&self) -> usize {
        self.cues
            .iter()
            .filter(|c| c.state() != CueState::Stopped)
            .count()
    }

    /// Loaded cue count.
    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// Whether no cues are loaded.
    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Cue limit.
    pub fn capacity(&self) -> usize {
        self.max_cues
    }

    /// Borrow a cue.
    pub fn cue(&self, id: &CueId) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id() == *id).map(|c| &**c)
    }

    fn cue_mut(&mut self, id: &CueId) -> Option<&mut Cue> {
        self.cues.iter_mut().find(|c| c.id() == *id).map(|c| &mut **c)
    }

    /// Status of every cue in load order, or only non-stopped ones.
    pub fn snapshot(&self, active_only: bool) -> Vec<CueInfo> {
        let mut infos = Vec::with_capacity(self.cues.len());
        self.for_each_info(active_only, |info| infos.push(info));
        infos
    }

    /// Allocation-free variant of [`snapshot`](Self::snapshot).
    pub fn for_each_info(&self, active_only: bool, mut visit: impl FnMut(CueInfo)) {
        for cue in &self.cues {
            if active_only && cue.state() == CueState::Stopped {
                continue;
            }
            visit(cue.info());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ToneDecoder;

    fn id(name: &str) -> CueId {
        CueId::new(name).unwrap()
    }

    #[test]
    fn load_rejects_duplicates_and_overflow() {
        let decoder = ToneDecoder::new(8_000);
        let mut mixer = CueMixer::new(8_000, 2);
        mixer.load(id("a"), "tone:440:0.1", &decoder).unwrap();
        assert_eq!(
            mixer.load(id("a"), "tone:440:0.1", &decoder),
            Err(LoadError::DuplicateId(id("a")))
        );
        assert!(matches!(
            mixer.load(id("b"), "nope", &decoder),
            Err(LoadError::Decode(_))
        ));
        mixer.load(id("b"), "silence:0.1", &decoder).unwrap();
        assert_eq!(
            mixer.load(id("c"), "silence:0.1", &decoder),
            Err(LoadError::CapacityExceeded(2))
        );
    }

    #[test]
    fn unknown_ids_are_refused() {
        let mut mixer = CueMixer::new(8_000, 4);
        assert!(!mixer.apply(&id("ghost"), CueAction::Start));
        assert!(!mixer.unload(&id("ghost")));
        assert!(!mixer.set_crossfade_ramp(&id("ghost"), 0.5, 10));
    }

    #[test]
    fn bulk_transport() {
        let decoder = ToneDecoder::new(8_000);
        let mut mixer = CueMixer::new(8_000, 4);
        for name in ["a", "b", "c"] {
            mixer.load(id(name), "tone:220:1", &decoder).unwrap();
            mixer.apply(&id(name), CueAction::Start);
        }
        assert_eq!(mixer.pause_all(), 3);
        assert_eq!(mixer.active_count(), 3);
        assert_eq!(mixer.resume_all(), 3);
        assert!(mixer.is_playing(&id("b")));
        assert_eq!(mixer.stop_all(), 3);
        assert_eq!(mixer.active_count(), 0);
        assert!(mixer.snapshot(true).is_empty());
        assert_eq!(mixer.snapshot(false).len(), 3);
    }

    #[test]
    fn clear_all_hands_back_every_cue() {
        let decoder = ToneDecoder::new(8_000);
        let mut mixer = CueMixer::new(8_000, 4);
        mixer.load(id("a"), "silence:0.1", &decoder).unwrap();
        mixer.load(id("b"), "silence:0.1", &decoder).unwrap();
        let mut retired = Vec::new();
        mixer.clear_all(|cue| retired.push(cue.id()));
        assert_eq!(retired, vec![id("a"), id("b")]);
        assert!(mixer.is_empty());
    }
}
