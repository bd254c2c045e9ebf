//! Control-to-audio command vocabulary.
//!
//! Every [`Command`] has a fixed size independent of its payload. Cue names
//! travel inline as [`CueId`] and decoded audio travels as a single boxed
//! pointer, so pushing a command never allocates on the audio thread and
//! popping one never frees.
use std::fmt;

use crate::CoreError;
use crate::crossfade::CrossfadeCurve;
use crate::cue::Cue;

/// Maximum length of a cue identifier in bytes.
pub const MAX_CUE_ID_LEN: usize = 64;

/// Default capacity of the control-to-audio command ring.
pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Inline, fixed-capacity cue identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CueId {
    len: u8,
    bytes: [u8; MAX_CUE_ID_LEN],
}

impl CueId {
    /// Build an identifier. Empty names and names longer than
    /// [`MAX_CUE_ID_LEN`] bytes are rejected rather than truncated.
    pub fn new(name: &str) -> Result<Self, CoreError> {
        let raw = name.as_bytes();
        if raw.is_empty() || raw.len() > MAX_CUE_ID_LEN {
            return Err(CoreError::InvalidCueId(name.to_string()));
        }
        let mut bytes = [0u8; MAX_CUE_ID_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            len: raw.len() as u8,
            bytes,
        })
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        // Constructed only from a whole `&str`, so the prefix is valid UTF-8.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl TryFrom<&str> for CueId {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CueId").field(&self.as_str()).finish()
    }
}

/// Operation addressed at a single loaded cue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CueAction {
    /// Play from the beginning.
    Start,
    /// Stop and rewind.
    Stop,
    /// Hold the cursor.
    Pause,
    /// Continue from the held cursor.
    Resume,
    /// Set the base volume (clamped to `[0, 1]`).
    SetVolume(f32),
    /// Set the pan position (clamped to `[-1, 1]`).
    SetPan(f32),
    /// Enable or disable looping.
    SetLoop(bool),
    /// Fade in over the given number of seconds.
    FadeIn(f64),
    /// Fade out over the given number of seconds, then stop.
    FadeOut(f64),
    /// Move the cursor to the given position in seconds.
    Seek(f64),
}

/// Parameters of one crossfade between two cues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossfadeRequest {
    /// Cue that fades out.
    pub from: CueId,
    /// Cue that fades in.
    pub to: CueId,
    /// Crossfade length in seconds.
    pub duration_seconds: f64,
    /// Curve override; the engine default is used when `None`.
    pub curve: Option<CrossfadeCurve>,
}

/// Crossfade engine control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossfadeCommand {
    /// Start immediately, replacing any running crossfade.
    Start(CrossfadeRequest),
    /// Append to the pending queue.
    Queue(CrossfadeRequest),
    /// Cancel the running crossfade.
    Stop,
    /// Drop every pending crossfade.
    ClearQueue,
    /// Change the curve used when a request does not name one.
    SetDefaultCurve(CrossfadeCurve),
    /// Toggle starting the target cue when a crossfade begins.
    SetAutoStart(bool),
}

/// Message sent from the control thread to the audio thread.
#[derive(Debug)]
pub enum Command {
    /// Install an already decoded cue.
    Load(Box<Cue>),
    /// Remove a cue; its storage is handed back for release.
    Unload(CueId),
    /// Remove every cue.
    ClearAll,
    /// Per-cue transport or parameter change.
    Cue {
        /// Target cue.
        cue: CueId,
        /// What to do with it.
        action: CueAction,
    },
    /// Stop every cue.
    StopAll,
    /// Pause every playing cue.
    PauseAll,
    /// Resume every paused cue.
    ResumeAll,
    /// Set the post-mix gain (clamped to `[0, 1]`).
    SetMasterVolume(f32),
    /// Crossfade engine control.
    Crossfade(CrossfadeCommand),
}

impl Command {
    /// Short label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Load(_) => "load",
            Command::Unload(_) => "unload",
            Command::ClearAll => "clear_all",
            Command::Cue { action, .. } => match action {
                CueAction::Start => "start",
                CueAction::Stop => "stop",
                CueAction::Pause => "pause",
                CueAction::Resume => "resume",
                CueAction::SetVolume(_) => "set_volume",
                CueAction::SetPan(_) => "set_pan",
                CueAction::SetLoop(_) => "set_loop",
                CueAction::FadeIn(_) => "fade_in",
                CueAction::FadeOut(_) => "fade_out",
                CueAction::Seek(_) => "seek",
            },
            Command::StopAll => "stop_all",
            Command::PauseAll => "pause_all",
            Command::ResumeAll => "resume_all",
            Command::SetMasterVolume(_) => "set_master_volume",
            Command::Crossfade(cmd) => match cmd {
                CrossfadeCommand::Start(_) => "crossfade_start",
                CrossfadeCommand::Queue(_) => "crossfade_queue",
                CrossfadeCommand::Stop => "crossfade_stop",
                CrossfadeCommand::ClearQueue => "crossfade_clear_queue",
                CrossfadeCommand::SetDefaultCurve(_) => "crossfade_default_curve",
                CrossfadeCommand::SetAutoStart(_) => "crossfade_auto_start",
            },
        }
    }
}
