#![deny(missing_docs)]

//! Real-time cue playback core for show control.
//!
//! [`initialize`] splits the engine into two owned halves. [`AudioCore`] stays
//! on the control side: it validates requests, decodes audio and turns every
//! call into a fixed-size [`Command`](command::Command) pushed through a
//! lock-free ring. [`AudioProcessor`](processor::AudioProcessor) moves onto the
//! audio thread, drains those commands at the top of each block, renders the
//! cue mix with any running crossfade, and publishes the latest status through
//! a triple-buffered [`snapshot`] cell. The audio side never locks, allocates,
//! frees or logs.

use std::collections::{HashMap, VecDeque};
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::backend::{AudioBackend, StreamConfig};
use crate::command::{Command, CrossfadeCommand, CrossfadeRequest, CueAction, CueId};
use crate::config::EngineConfig;
use crate::crossfade::{CrossfadeCurve, CrossfadeEngine, CrossfadeStatus};
use crate::cue::{Cue, CueInfo, CueState};
use crate::decoder::{DecodeError, Decoder, ToneDecoder};
use crate::mixer::CueMixer;
use crate::processor::{AudioProcessor, PerformanceSnapshot, RetireReason, Retired};
use crate::ring::{Consumer, Producer, ring};
use crate::snapshot::{SnapshotReader, snapshot};

pub mod backend;
pub mod clock;
pub mod command;
pub mod config;
/// Developer-facing console.
pub mod control;
pub mod crossfade;
pub mod cue;
pub mod decoder;
pub mod mixer;
pub mod processor;
pub mod ring;
pub mod snapshot;


static TRACING_INIT: Once = Once::new();
const EVENT_LOG_LINES: usize = 256;

/// Install the `tracing` fmt subscriber once. Later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Errors surfaced by the control API.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// No cue with this id is loaded.
    #[error("cue not found: {0}")]
    NotFound(String),
    /// A cue with this id is already loaded.
    #[error("cue already loaded: {0}")]
    DuplicateId(String),
    /// The decoder could not produce audio.
    #[error("decode failed: {0}")]
    DecodeFailure(#[from] DecodeError),
    /// The command ring is full; the request was dropped.
    #[error("command channel full")]
    ChannelFull,
    /// The core was never initialised or has been shut down.
    #[error("audio core not initialized")]
    NotInitialized,
    /// The audio backend failed.
    #[error("audio device error: {0}")]
    Device(String),
    /// Cue ids must be 1 to 64 bytes.
    #[error("invalid cue id `{0}`")]
    InvalidCueId(String),
    /// Durations must be finite and positive.
    #[error("invalid duration {0}")]
    InvalidDuration(f64),
    /// Parameter was not a finite number.
    #[error("invalid {name}: {value}")]
    InvalidValue {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// The cue limit is reached.
    #[error("cue limit of {0} reached")]
    CapacityExceeded(usize),
    /// Configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A custom curve had more control points than fit inline.
    #[error("custom curve has {0} points, at most {max} are supported", max = crossfade::MAX_CURVE_POINTS)]
    TooManyCurvePoints(usize),
}

/// Latest status frame published by the audio thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreStatus {
    /// Block counter when the frame was taken.
    pub block: u64,
    /// Every loaded cue in load order.
    pub cues: Vec<CueInfo>,
    /// Crossfade engine state.
    pub crossfade: CrossfadeStatus,
    /// Callback health.
    pub performance: PerformanceSnapshot,
}

impl CoreStatus {
    /// Empty status with room for `max_cues` cues.
    pub fn with_capacity(max_cues: usize) -> Self {
        Self {
            cues: Vec::with_capacity(max_cues),
            ..Self::default()
        }
    }
}

struct Feedback {
    status: SnapshotReader<CoreStatus>,
    retired: Consumer<Retired>,
}

impl Feedback {
    fn drain(&mut self, registry: &Mutex<Registry>) {
        while let Some(Retired { cue, reason }) = self.retired.pop() {
            if let RetireReason::Rejected(err) = reason {
                warn!(cue = %cue.id(), error = %err, "audio thread rejected cue");
                registry.lock().remove(&cue.id());
            } else {
                debug!(cue = %cue.id(), ?reason, "cue released");
            }
        }
    }

    fn latest(&mut self) -> &CoreStatus {
        self.status.read()
    }
}

/// Control-side bookkeeping of what has been sent to the audio thread.
#[derive(Default)]
struct Registry {
    sources: HashMap<CueId, String>,
}

impl Registry {
    fn contains(&self, id: &CueId) -> bool {
        self.sources.contains_key(id)
    }

    fn remove(&mut self, id: &CueId) -> Option<String> {
        self.sources.remove(id)
    }
}

/// Control-thread handle to a running engine.
///
/// All methods may block briefly on control-side locks and are safe to call
/// from several control threads. The boolean methods report whether the
/// request was validated and queued; failures are recorded for
/// [`last_error`](Self::last_error). The `try_*` variants return the error.
///
/// Queries answer from the most recent status frame, which trails commands
/// by up to one report interval.
pub struct AudioCore {
    config: EngineConfig,
    commands: Mutex<Producer<Command>>,
    feedback: Mutex<Feedback>,
    registry: Mutex<Registry>,
    decoder: Box<dyn Decoder>,
    last_error: Mutex<Option<String>>,
    events: Mutex<VecDeque<String>>,
    backend: Mutex<Option<Box<dyn AudioBackend>>>,
    initialized: AtomicBool,
}

/// Build an engine with the built-in [`ToneDecoder`].
pub fn initialize(config: EngineConfig) -> Result<(AudioCore, AudioProcessor), CoreError> {
    let decoder = ToneDecoder::new(config.sample_rate).with_channels(config.output_channels.min(2));
    initialize_with_decoder(config, Box::new(decoder))
}

/// Build an engine that decodes sources with `decoder`.
pub fn initialize_with_decoder(
    config: EngineConfig,
    decoder: Box<dyn Decoder>,
) -> Result<(AudioCore, AudioProcessor), CoreError> {
    init_tracing();
    config.validate()?;

    // Every cue can be retired at most once per load, plus one full clear.
    let retire_capacity = (config.max_cues + config.command_capacity).next_power_of_two();
    let ring_error = |err: ring::RingError| CoreError::InvalidConfig(err.to_string());
    let (command_tx, command_rx) = ring(config.command_capacity).map_err(ring_error)?;
    let (retire_tx, retire_rx) = ring(retire_capacity).map_err(ring_error)?;
    let (status_tx, status_rx) = snapshot(|| CoreStatus::with_capacity(config.max_cues));

    let mut crossfade = CrossfadeEngine::new(config.crossfade_queue_capacity);
    if !crossfade.initialize(config.sample_rate) {
        return Err(CoreError::InvalidConfig("crossfade engine rejected sample rate".into()));
    }
    crossfade.set_default_curve(config.default_curve);
    crossfade.set_auto_start_target(config.auto_start_target);

    let processor = AudioProcessor::new(
        command_rx,
        status_tx,
        retire_tx,
        CueMixer::new(config.sample_rate, config.max_cues),
        crossfade,
        config.report_interval_ms,
    );
    let core = AudioCore {
        config,
        commands: Mutex::new(command_tx),
        feedback: Mutex::new(Feedback {
            status: status_rx,
            retired: retire_rx,
        }),
        registry: Mutex::new(Registry::default()),
        decoder,
        last_error: Mutex::new(None),
        events: Mutex::new(VecDeque::with_capacity(EVENT_LOG_LINES)),
        backend: Mutex::new(None),
        initialized: AtomicBool::new(true),
    };
    info!(
        sample_rate = config.sample_rate,
        buffer_size = config.buffer_size,
        max_cues = config.max_cues,
        "audio core initialized"
    );
    Ok((core, processor))
}

fn finite(name: &'static str, value: f64) -> Result<(), CoreError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(CoreError::InvalidValue { name, value })
    }
}

fn positive_duration(seconds: f64) -> Result<(), CoreError> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidDuration(seconds))
    }
}

impl AudioCore {
    /// Configuration the core was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the core accepts requests.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Text of the most recent failure.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Recent control-side events, oldest first.
    pub fn recent_events(&self) -> Vec<String> {
        self.events.lock().iter().cloned().collect()
    }

    fn push_event(&self, line: String) {
        let mut events = self.events.lock();
        if events.len() == EVENT_LOG_LINES {
            events.pop_front();
        }
        events.push_back(line);
    }

    fn record(&self, op: &str, result: Result<(), CoreError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(op, error = %err, "request refused");
                self.push_event(format!("{op}: {err}"));
                *self.last_error.lock() = Some(err.to_string());
                false
            }
        }
    }

    fn ensure_initialized(&self) -> Result<(), CoreError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoreError::NotInitialized)
        }
    }

    fn send(&self, command: Command) -> Result<(), CoreError> {
        let label = command.label();
        match self.commands.lock().try_push(command) {
            Ok(()) => {
                debug!(command = label, "queued");
                Ok(())
            }
            Err(_rejected) => Err(CoreError::ChannelFull),
        }
    }

    fn registered(&self, name: &str) -> Result<CueId, CoreError> {
        let id = CueId::new(name)?;
        if self.registry.lock().contains(&id) {
            Ok(id)
        } else {
            Err(CoreError::NotFound(name.to_string()))
        }
    }

    fn feedback(&self) -> MutexGuard<'_, Feedback> {
        let mut feedback = self.feedback.lock();
        feedback.drain(&self.registry);
        feedback
    }

    /// Decode `source` and queue it for the audio thread as `name`.
    pub fn try_load_cue(&self, name: &str, source: &str) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        let id = CueId::new(name)?;
        drop(self.feedback());
        let mut registry = self.registry.lock();
        if registry.contains(&id) {
            return Err(CoreError::DuplicateId(name.to_string()));
        }
        if registry.sources.len() >= self.config.max_cues {
            return Err(CoreError::CapacityExceeded(self.config.max_cues));
        }
        let audio = self.decoder.decode(source)?;
        let cue = Box::new(Cue::new(id, audio));
        let frames = cue.frames();
        self.send(Command::Load(cue))?;
        registry.sources.insert(id, source.to_string());
        info!(cue = name, source, frames, "cue loaded");
        self.push_event(format!("loaded {name} from {source}"));
        Ok(())
    }

    /// See [`try_load_cue`](Self::try_load_cue).
    pub fn load_cue(&self, name: &str, source: &str) -> bool {
        self.record("load_cue", self.try_load_cue(name, source))
    }

    /// Remove a cue. Its storage is released on the control thread.
    pub fn try_unload_cue(&self, name: &str) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        let id = self.registered(name)?;
        self.send(Command::Unload(id))?;
        self.registry.lock().remove(&id);
        info!(cue = name, "cue unloaded");
        self.push_event(format!("unloaded {name}"));
        Ok(())
    }

    /// See [`try_unload_cue`](Self::try_unload_cue).
    pub fn unload_cue(&self, name: &str) -> bool {
        self.record("unload_cue", self.try_unload_cue(name))
    }

    /// Remove every cue.
    pub fn try_clear_cues(&self) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        self.send(Command::ClearAll)?;
        self.registry.lock().sources.clear();
        info!("all cues cleared");
        self.push_event("cleared all cues".into());
        Ok(())
    }

    /// See [`try_clear_cues`](Self::try_clear_cues).
    pub fn clear_cues(&self) -> bool {
        self.record("clear_cues", self.try_clear_cues())
    }

    /// Whether `name` has been loaded and not unloaded.
    pub fn is_cue_loaded(&self, name: &str) -> bool {
        match CueId::new(name) {
            Ok(id) => self.registry.lock().contains(&id),
            Err(_) => false,
        }
    }

    /// Source string `name` was loaded from.
    pub fn cue_source(&self, name: &str) -> Option<String> {
        let id = CueId::new(name).ok()?;
        self.registry.lock().sources.get(&id).cloned()
    }

    /// Queue `action` for the cue `name`.
    pub fn try_cue_action(&self, name: &str, action: CueAction) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        match action {
            CueAction::SetVolume(v) => finite("volume", v as f64)?,
            CueAction::SetPan(p) => finite("pan", p as f64)?,
            CueAction::FadeIn(s) | CueAction::FadeOut(s) => finite("fade duration", s)?,
            CueAction::Seek(s) => finite("seek position", s)?,
            _ => {}
        }
        let id = self.registered(name)?;
        self.send(Command::Cue { cue: id, action })
    }

    fn cue_action(&self, op: &str, name: &str, action: CueAction) -> bool {
        self.record(op, self.try_cue_action(name, action))
    }

    /// Play from the start.
    pub fn start_cue(&self, name: &str) -> bool {
        self.cue_action("start_cue", name, CueAction::Start)
    }

    /// Stop and rewind.
    pub fn stop_cue(&self, name: &str) -> bool {
        self.cue_action("stop_cue", name, CueAction::Stop)
    }

    /// Hold at the current position.
    pub fn pause_cue(&self, name: &str) -> bool {
        self.cue_action("pause_cue", name, CueAction::Pause)
    }

    /// Continue a paused cue.
    pub fn resume_cue(&self, name: &str) -> bool {
        self.cue_action("resume_cue", name, CueAction::Resume)
    }

    /// Base volume in `[0, 1]`; out-of-range values are clamped.
    pub fn set_volume(&self, name: &str, volume: f32) -> bool {
        self.cue_action("set_volume", name, CueAction::SetVolume(volume))
    }

    /// Pan in `[-1, 1]`; out-of-range values are clamped.
    pub fn set_pan(&self, name: &str, pan: f32) -> bool {
        self.cue_action("set_pan", name, CueAction::SetPan(pan))
    }

    /// Loop at the end of the data instead of stopping.
    pub fn set_loop(&self, name: &str, looping: bool) -> bool {
        self.cue_action("set_loop", name, CueAction::SetLoop(looping))
    }

    /// Jump to `seconds`, clamped to the cue length.
    pub fn seek_cue(&self, name: &str, seconds: f64) -> bool {
        self.cue_action("seek_cue", name, CueAction::Seek(seconds))
    }

    /// Fade in from silence. Zero or negative durations start at full volume.
    pub fn fade_in(&self, name: &str, seconds: f64) -> bool {
        self.cue_action("fade_in", name, CueAction::FadeIn(seconds))
    }

    /// Fade to silence and stop.
    pub fn fade_out(&self, name: &str, seconds: f64) -> bool {
        self.cue_action("fade_out", name, CueAction::FadeOut(seconds))
    }

    fn broadcast(&self, op: &str, command: Command) -> bool {
        let result = self.ensure_initialized().and_then(|()| self.send(command));
        self.record(op, result)
    }

    /// Stop every cue.
    pub fn stop_all(&self) -> bool {
        self.broadcast("stop_all", Command::StopAll)
    }

    /// Pause every playing cue.
    pub fn pause_all(&self) -> bool {
        self.broadcast("pause_all", Command::PauseAll)
    }

    /// Resume every paused cue.
    pub fn resume_all(&self) -> bool {
        self.broadcast("resume_all", Command::ResumeAll)
    }

    /// Post-mix gain in `[0, 1]`.
    pub fn set_master_volume(&self, volume: f32) -> bool {
        let result = finite("master volume", volume as f64)
            .and_then(|()| self.ensure_initialized())
            .and_then(|()| self.send(Command::SetMasterVolume(volume)));
        self.record("set_master_volume", result)
    }

    fn crossfade_request(
        &self,
        from: &str,
        to: &str,
        seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> Result<CrossfadeRequest, CoreError> {
        self.ensure_initialized()?;
        positive_duration(seconds)?;
        Ok(CrossfadeRequest {
            from: self.registered(from)?,
            to: self.registered(to)?,
            duration_seconds: seconds,
            curve,
        })
    }

    /// Start a crossfade now, replacing any running one.
    pub fn try_start_crossfade(
        &self,
        from: &str,
        to: &str,
        seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> Result<(), CoreError> {
        let request = self.crossfade_request(from, to, seconds, curve)?;
        self.send(Command::Crossfade(CrossfadeCommand::Start(request)))?;
        info!(from, to, seconds, "crossfade started");
        Ok(())
    }

    /// See [`try_start_crossfade`](Self::try_start_crossfade).
    pub fn start_crossfade(
        &self,
        from: &str,
        to: &str,
        seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> bool {
        self.record(
            "start_crossfade",
            self.try_start_crossfade(from, to, seconds, curve),
        )
    }

    /// Run a crossfade after the current one finishes. A full queue drops
    /// the request on the audio side.
    pub fn try_queue_crossfade(
        &self,
        from: &str,
        to: &str,
        seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> Result<(), CoreError> {
        let request = self.crossfade_request(from, to, seconds, curve)?;
        self.send(Command::Crossfade(CrossfadeCommand::Queue(request)))
    }

    /// See [`try_queue_crossfade`](Self::try_queue_crossfade).
    pub fn queue_crossfade(
        &self,
        from: &str,
        to: &str,
        seconds: f64,
        curve: Option<CrossfadeCurve>,
    ) -> bool {
        self.record(
            "queue_crossfade",
            self.try_queue_crossfade(from, to, seconds, curve),
        )
    }

    /// Cancel the running crossfade; both cues return to their own volume.
    pub fn stop_crossfade(&self) -> bool {
        self.broadcast("stop_crossfade", Command::Crossfade(CrossfadeCommand::Stop))
    }

    /// Drop queued crossfades.
    pub fn clear_crossfade_queue(&self) -> bool {
        self.broadcast(
            "clear_crossfade_queue",
            Command::Crossfade(CrossfadeCommand::ClearQueue),
        )
    }

    /// Curve used when a crossfade request does not name one.
    pub fn set_crossfade_curve(&self, curve: CrossfadeCurve) -> bool {
        self.broadcast(
            "set_crossfade_curve",
            Command::Crossfade(CrossfadeCommand::SetDefaultCurve(curve)),
        )
    }

    /// Default curve from a `-1..=1` shape parameter.
    pub fn set_crossfade_curve_parameter(&self, parameter: f32) -> bool {
        self.set_crossfade_curve(CrossfadeCurve::from_parameter(parameter))
    }

    /// Whether starting a crossfade also starts a stopped target cue.
    pub fn set_auto_start_target(&self, enabled: bool) -> bool {
        self.broadcast(
            "set_auto_start_target",
            Command::Crossfade(CrossfadeCommand::SetAutoStart(enabled)),
        )
    }

    /// Latest status frame.
    pub fn status(&self) -> CoreStatus {
        self.feedback().latest().clone()
    }

    /// Cues that are not stopped.
    pub fn get_active_cues(&self) -> Vec<CueInfo> {
        self.feedback()
            .latest()
            .cues
            .iter()
            .filter(|c| c.state != CueState::Stopped)
            .copied()
            .collect()
    }

    /// Every loaded cue in load order.
    pub fn all_cues(&self) -> Vec<CueInfo> {
        self.feedback().latest().cues.clone()
    }

    /// Status of one cue.
    pub fn cue_info(&self, name: &str) -> Option<CueInfo> {
        let id = CueId::new(name).ok()?;
        self.feedback().latest().cues.iter().find(|c| c.id == id).copied()
    }

    /// Whether `name` is audible.
    pub fn is_cue_playing(&self, name: &str) -> bool {
        self.cue_info(name).is_some_and(|c| c.state.is_audible())
    }

    /// Callback health.
    pub fn get_performance_metrics(&self) -> PerformanceSnapshot {
        self.feedback().latest().performance
    }

    /// Crossfade engine state.
    pub fn crossfade_status(&self) -> CrossfadeStatus {
        self.feedback().latest().crossfade
    }

    /// Whether a crossfade is running.
    pub fn is_crossfading(&self) -> bool {
        self.crossfade_status().active
    }

    /// Progress of the running crossfade in `[0, 1]`.
    pub fn crossfade_progress(&self) -> f32 {
        self.crossfade_status().progress
    }

    /// Open `backend` with the configured stream and hand `processor` to its
    /// real-time thread.
    pub fn start_audio(
        &self,
        mut backend: Box<dyn AudioBackend>,
        mut processor: AudioProcessor,
    ) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        let mut slot = self.backend.lock();
        if slot.as_ref().is_some_and(|b| b.is_running()) {
            return Err(CoreError::Device("audio already running".into()));
        }
        let stream = StreamConfig {
            sample_rate: self.config.sample_rate,
            buffer_size: self.config.buffer_size,
            input_channels: self.config.input_channels,
            output_channels: self.config.output_channels,
        };
        let started = backend.open(stream).and_then(|()| {
            backend.start(Box::new(
                move |input: &backend::AudioBlock,
                      output: &mut backend::AudioBlock,
                      info: &backend::CallbackInfo| {
                    processor.process(input, output, info)
                },
            ))
        });
        if let Err(err) = started {
            let err = CoreError::Device(err.to_string());
            self.record("start_audio", Err(err.clone()));
            return Err(err);
        }
        info!(
            sample_rate = stream.sample_rate,
            buffer_size = stream.buffer_size,
            "audio started"
        );
        self.push_event("audio started".into());
        *slot = Some(backend);
        Ok(())
    }

    /// Stop and release the backend. `false` when nothing was running.
    pub fn stop_audio(&self) -> bool {
        let Some(mut backend) = self.backend.lock().take() else {
            return false;
        };
        backend.stop();
        info!("audio stopped");
        self.push_event("audio stopped".into());
        true
    }

    /// Whether the backend is delivering callbacks.
    pub fn is_audio_running(&self) -> bool {
        self.backend.lock().as_ref().is_some_and(|b| b.is_running())
    }

    /// Stop audio and refuse further requests.
    pub fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_audio();
        drop(self.feedback());
        self.registry.lock().sources.clear();
        info!("audio core shut down");
    }
}

impl Drop for AudioCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
