//! Per-block entry point for the audio thread.
//!
//! [`AudioProcessor`] owns the mixer and the crossfade engine outright. The
//! control thread reaches it only through two rings, commands in and retired
//! cues out, plus a snapshot cell carrying the latest [`CoreStatus`]. Nothing
//! here locks, logs, allocates or frees.
use std::mem;

use crate::CoreStatus;
use crate::backend::{AudioBlock, CallbackInfo};
use crate::clock::monotonic_timestamp_ns;
use crate::command::{Command, CrossfadeCommand, CueAction};
use crate::crossfade::{CrossfadeEngine, CrossfadeTick};
use crate::cue::{Cue, CueState};
use crate::mixer::{CueMixer, LoadError};
use crate::ring::{Consumer, Producer};
use crate::snapshot::SnapshotWriter;

const CPU_SMOOTHING: f32 = 0.05;
const STABLE_CPU_PERCENT: f32 = 80.0;

/// Callback health figures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceSnapshot {
    /// Input plus output latency in milliseconds.
    pub latency_ms: f32,
    /// Smoothed share of the block period spent processing.
    pub cpu_usage_percent: f32,
    /// Underruns reported by the backend.
    pub buffer_underrun_count: u64,
    /// Overruns reported by the backend.
    pub buffer_overrun_count: u64,
    /// Load is under 80% and no xrun occurred in the last second.
    pub is_stable: bool,
    /// Blocks rendered since start.
    pub blocks_processed: u64,
    /// Stream rate in Hz.
    pub sample_rate: u32,
    /// Frames in the most recent block.
    pub buffer_size: u32,
}

/// Why a cue left the audio thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RetireReason {
    /// Explicit unload.
    Unloaded,
    /// Clear-all.
    Cleared,
    /// The mixer refused the cue.
    Rejected(LoadError),
}

/// Cue on its way back to the control thread to be dropped there.
#[derive(Debug)]
pub struct Retired {
    /// The cue storage.
    pub cue: Box<Cue>,
    /// Why it was removed.
    pub reason: RetireReason,
}

fn retire(out: &mut Producer<Retired>, item: Retired) {
    if let Err(item) = out.try_push(item) {
        // Freeing here would stall the callback; leak instead.
        mem::forget(item);
    }
}

/// Owns all audio-side state and renders one block per call.
pub struct AudioProcessor {
    commands: Consumer<Command>,
    status: SnapshotWriter<CoreStatus>,
    retired: Producer<Retired>,
    mixer: CueMixer,
    crossfade: CrossfadeEngine,
    metrics: PerformanceSnapshot,
    last_xrun_block: Option<u64>,
    report_interval_frames: usize,
    frames_since_report: usize,
}

impl AudioProcessor {
    /// Assemble a processor from its rings and components.
    ///
    /// Every buffer behind `status` must have room for the mixer's capacity
    /// in `cues`, so publishing never allocates.
    pub fn new(
        commands: Consumer<Command>,
        status: SnapshotWriter<CoreStatus>,
        retired: Producer<Retired>,
        mixer: CueMixer,
        crossfade: CrossfadeEngine,
        report_interval_ms: u32,
    ) -> Self {
        let sample_rate = mixer.sample_rate();
        let report_interval_frames =
            (sample_rate as u64 * report_interval_ms as u64 / 1_000) as usize;
        Self {
            commands,
            status,
            retired,
            mixer,
            crossfade,
            metrics: PerformanceSnapshot {
                sample_rate,
                is_stable: true,
                ..PerformanceSnapshot::default()
            },
            last_xrun_block: None,
            report_interval_frames,
            frames_since_report: usize::MAX,
        }
    }

    /// The cue mixer.
    pub fn mixer(&self) -> &CueMixer {
        &self.mixer
    }

    /// The crossfade engine.
    pub fn crossfade(&self) -> &CrossfadeEngine {
        &self.crossfade
    }

    /// Latest performance figures.
    pub fn metrics(&self) -> PerformanceSnapshot {
        self.metrics
    }

    /// Render one block into `output`.
    pub fn process(&mut self, _input: &AudioBlock, output: &mut AudioBlock, info: &CallbackInfo) {
        let began = monotonic_timestamp_ns();
        let frames = output.frames();

        while let Some(command) = self.commands.pop() {
            self.handle(command);
        }

        output.silence();
        let tick = self.crossfade.process(frames);
        self.apply_crossfade_gains(&tick);
        self.mixer.process(output);
        if let Some((from, to)) = tick.completed {
            self.mixer.apply(&from, CueAction::Stop);
            self.mixer.set_crossfade_gain(&from, 1.0);
            self.mixer.set_crossfade_gain(&to, 1.0);
        }

        let spent = monotonic_timestamp_ns().saturating_sub(began);
        self.update_metrics(frames, spent, info);
        self.frames_since_report = self.frames_since_report.saturating_add(frames);
        if self.frames_since_report >= self.report_interval_frames {
            self.publish();
            self.frames_since_report = 0;
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Load(cue) => {
                if let Err(rejected) = self.mixer.insert(cue) {
                    retire(
                        &mut self.retired,
                        Retired {
                            cue: rejected.cue,
                            reason: RetireReason::Rejected(rejected.reason),
                        },
                    );
                }
            }
            Command::Unload(id) => {
                if let Some(cue) = self.mixer.take(&id) {
                    retire(
                        &mut self.retired,
                        Retired {
                            cue,
                            reason: RetireReason::Unloaded,
                        },
                    );
                }
            }
            Command::ClearAll => {
                let retired = &mut self.retired;
                self.mixer.clear_all(|cue| {
                    retire(
                        retired,
                        Retired {
                            cue,
                            reason: RetireReason::Cleared,
                        },
                    )
                });
            }
            Command::Cue { cue, action } => {
                self.mixer.apply(&cue, action);
            }
            Command::StopAll => {
                self.mixer.stop_all();
            }
            Command::PauseAll => {
                self.mixer.pause_all();
            }
            Command::ResumeAll => {
                self.mixer.resume_all();
            }
            Command::SetMasterVolume(volume) => {
                self.mixer.set_master_volume(volume);
            }
            Command::Crossfade(command) => self.handle_crossfade(command),
        }
    }

    fn handle_crossfade(&mut self, command: CrossfadeCommand) {
        match command {
            CrossfadeCommand::Start(request) => {
                self.release_crossfade_gains();
                self.crossfade.start_request(&request);
            }
            CrossfadeCommand::Queue(request) => {
                self.crossfade.queue_crossfade(request);
            }
            CrossfadeCommand::Stop => {
                self.release_crossfade_gains();
                self.crossfade.stop_crossfade();
            }
            CrossfadeCommand::ClearQueue => self.crossfade.clear_queue(),
            CrossfadeCommand::SetDefaultCurve(curve) => self.crossfade.set_default_curve(curve),
            CrossfadeCommand::SetAutoStart(enabled) => {
                self.crossfade.set_auto_start_target(enabled)
            }
        }
    }

    /// Return both cues of the running crossfade to unity gain.
    fn release_crossfade_gains(&mut self) {
        if let Some((from, to)) = self.crossfade.active_pair() {
            self.mixer.set_crossfade_gain(&from, 1.0);
            self.mixer.set_crossfade_gain(&to, 1.0);
        }
    }

    fn apply_crossfade_gains(&mut self, tick: &CrossfadeTick) {
        if let Some(start) = tick.started {
            self.mixer.set_crossfade_gain(&start.from, start.from_gain);
            self.mixer.set_crossfade_gain(&start.to, start.to_gain);
            if self.crossfade.auto_start_target()
                && self.mixer.state(&start.to) == Some(CueState::Stopped)
            {
                self.mixer.apply(&start.to, CueAction::Start);
            }
        }
        if let Some(gains) = tick.gains {
            self.mixer
                .set_crossfade_ramp(&gains.from, gains.from_gain, gains.frames);
            self.mixer
                .set_crossfade_ramp(&gains.to, gains.to_gain, gains.frames);
        }
    }

    fn update_metrics(&mut self, frames: usize, spent_ns: u64, info: &CallbackInfo) {
        let rate = if info.sample_rate > 0 {
            info.sample_rate
        } else {
            self.mixer.sample_rate()
        };
        let metrics = &mut self.metrics;
        let block = metrics.blocks_processed;

        if frames > 0 && rate > 0 {
            let period_ns = frames as f64 * 1e9 / rate as f64;
            let load = (spent_ns as f64 / period_ns * 100.0) as f32;
            metrics.cpu_usage_percent = if block == 0 {
                load
            } else {
                metrics.cpu_usage_percent + CPU_SMOOTHING * (load - metrics.cpu_usage_percent)
            };
        }
        if rate > 0 {
            let latency = info.output_latency_samples as f32 + info.input_latency_samples as f32;
            metrics.latency_ms = latency * 1_000.0 / rate as f32;
        }
        if info.underruns > metrics.buffer_underrun_count
            || info.overruns > metrics.buffer_overrun_count
        {
            self.last_xrun_block = Some(block);
        }
        metrics.buffer_underrun_count = info.underruns;
        metrics.buffer_overrun_count = info.overruns;

        let blocks_per_second = if frames > 0 {
            (rate as u64 / frames as u64).max(1)
        } else {
            1
        };
        let recent_xrun = self
            .last_xrun_block
            .is_some_and(|at| block.saturating_sub(at) < blocks_per_second);
        metrics.is_stable = metrics.cpu_usage_percent < STABLE_CPU_PERCENT && !recent_xrun;
        metrics.blocks_processed = block + 1;
        metrics.sample_rate = rate;
        metrics.buffer_size = frames as u32;
    }

    /// Overwrite the status snapshot with the current state.
    fn publish(&mut self) {
        let status = self.status.back_mut();
        status.block = self.metrics.blocks_processed;
        status.cues.clear();
        self.mixer.for_each_info(false, |info| status.cues.push(info));
        status.crossfade = self.crossfade.status();
        status.performance = self.metrics;
        self.status.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CueId;
    use crate::decoder::{Decoder, ToneDecoder};
    use crate::ring::ring;
    use crate::snapshot::{SnapshotReader, snapshot};

    struct Rig {
        commands: Producer<Command>,
        status: SnapshotReader<CoreStatus>,
        retired: Consumer<Retired>,
        processor: AudioProcessor,
    }

    fn rig(max_cues: usize) -> Rig {
        let (commands, command_rx) = ring(16).unwrap();
        let (status_tx, status) = snapshot(|| CoreStatus::with_capacity(max_cues));
        let (retire_tx, retired) = ring(32).unwrap();
        let mut crossfade = CrossfadeEngine::new(4);
        crossfade.initialize(1_000);
        Rig {
            commands,
            status,
            retired,
            processor: AudioProcessor::new(
                command_rx,
                status_tx,
                retire_tx,
                CueMixer::new(1_000, max_cues),
                crossfade,
                0,
            ),
        }
    }

    fn cue(name: &str) -> Box<Cue> {
        let audio = ToneDecoder::new(1_000).decode("tone:50:1").unwrap();
        Box::new(Cue::new(CueId::new(name).unwrap(), audio))
    }

    fn run(processor: &mut AudioProcessor, output: &mut AudioBlock) {
        let input = AudioBlock::new(0, output.max_frames());
        let info = CallbackInfo {
            sample_rate: 1_000,
            ..CallbackInfo::default()
        };
        processor.process(&input, output, &info);
    }

    #[test]
    fn rejected_and_unloaded_cues_come_back() {
        let mut rig = rig(1);
        let mut out = AudioBlock::new(2, 10);
        assert!(rig.commands.push(Command::Load(cue("a"))));
        assert!(rig.commands.push(Command::Load(cue("b"))));
        run(&mut rig.processor, &mut out);
        let rejected = rig.retired.pop().unwrap();
        assert_eq!(rejected.cue.id().as_str(), "b");
        assert_eq!(
            rejected.reason,
            RetireReason::Rejected(LoadError::CapacityExceeded(1))
        );

        rig.commands.push(Command::Unload(CueId::new("a").unwrap()));
        run(&mut rig.processor, &mut out);
        assert_eq!(rig.retired.pop().unwrap().reason, RetireReason::Unloaded);
        assert!(rig.processor.mixer().is_empty());
    }

    #[test]
    fn status_tracks_every_block() {
        let mut rig = rig(4);
        let mut out = AudioBlock::new(2, 10);
        assert!(!rig.status.has_update());
        rig.commands.push(Command::Load(cue("a")));
        run(&mut rig.processor, &mut out);
        let status = rig.status.read();
        assert_eq!(status.block, 1);
        assert_eq!(status.cues.len(), 1);
        assert_eq!(status.performance.blocks_processed, 1);

        for _ in 0..9 {
            run(&mut rig.processor, &mut out);
        }
        let status = rig.status.read();
        assert_eq!(status.block, 10);
        assert_eq!(status.cues[0].id.as_str(), "a");
    }

    #[test]
    fn crossfade_start_auto_starts_target_and_completion_stops_source() {
        let mut rig = rig(4);
        let mut out = AudioBlock::new(2, 10);
        let (a, b) = (CueId::new("a").unwrap(), CueId::new("b").unwrap());
        rig.commands.push(Command::Load(cue("a")));
        rig.commands.push(Command::Load(cue("b")));
        rig.commands.push(Command::Cue {
            cue: a,
            action: CueAction::Start,
        });
        rig.commands
            .push(Command::Crossfade(CrossfadeCommand::Start(
                crate::command::CrossfadeRequest {
                    from: a,
                    to: b,
                    duration_seconds: 0.02,
                    curve: None,
                },
            )));
        run(&mut rig.processor, &mut out);
        assert_eq!(rig.processor.mixer().state(&b), Some(CueState::Playing));
        run(&mut rig.processor, &mut out);
        let mixer = rig.processor.mixer();
        assert_eq!(mixer.state(&a), Some(CueState::Stopped));
        assert_eq!(mixer.cue(&b).map(|c| c.crossfade_gain()), Some(1.0));
        assert!(!rig.processor.crossfade().is_crossfading());
    }
}
