use std::time::{Duration, Instant};

use cue_kit::backend::{AudioBlock, CallbackInfo, ClockedBackend};
use cue_kit::command::CueAction;
use cue_kit::config::EngineConfig;
use cue_kit::cue::CueState;
use cue_kit::decoder::DecodeError;
use cue_kit::{CoreError, initialize};

fn small_config() -> EngineConfig {
    EngineConfig::default()
        .with_buffer_size(128)
        .with_report_interval_ms(0)
}

#[test]
fn load_errors_are_reported_synchronously() {
    let (core, _processor) = initialize(small_config().with_max_cues(2)).expect("core");
    core.try_load_cue("a", "tone:440:1").expect("load a");

    assert_eq!(
        core.try_load_cue("a", "tone:440:1"),
        Err(CoreError::DuplicateId("a".into()))
    );
    assert!(matches!(
        core.try_load_cue("b", "mystery.wav"),
        Err(CoreError::DecodeFailure(DecodeError::Unsupported(_)))
    ));
    assert!(matches!(
        core.try_load_cue(&"x".repeat(65), "tone:440:1"),
        Err(CoreError::InvalidCueId(_))
    ));
    for source in ["silence:1e30", "tone:440:1e30"] {
        assert!(matches!(
            core.try_load_cue("b", source),
            Err(CoreError::DecodeFailure(DecodeError::InvalidParameter { .. }))
        ));
    }
    assert!(!core.load_cue("b", "silence:1e30"));
    core.try_load_cue("b", "silence:1").expect("load b");
    assert_eq!(
        core.try_load_cue("c", "silence:1"),
        Err(CoreError::CapacityExceeded(2))
    );
    assert!(core.is_cue_loaded("a"));
    assert_eq!(core.cue_source("b").as_deref(), Some("silence:1"));
}

#[test]
fn unknown_cues_fail_and_record_last_error() {
    let (core, _processor) = initialize(small_config()).expect("core");
    assert!(core.last_error().is_none());
    assert!(!core.start_cue("ghost"));
    assert_eq!(core.last_error().as_deref(), Some("cue not found: ghost"));
    assert!(!core.fade_in("ghost", 1.0));
    assert!(!core.unload_cue("ghost"));
    assert!(core.recent_events().iter().any(|line| line.contains("ghost")));
}

#[test]
fn crossfade_validation() {
    let (core, _processor) = initialize(small_config()).expect("core");
    assert!(core.load_cue("a", "tone:440:1"));
    assert!(core.load_cue("b", "tone:660:1"));
    assert_eq!(
        core.try_start_crossfade("a", "b", 0.0, None),
        Err(CoreError::InvalidDuration(0.0))
    );
    assert!(matches!(
        core.try_start_crossfade("a", "b", f64::NAN, None),
        Err(CoreError::InvalidDuration(_))
    ));
    assert_eq!(
        core.try_start_crossfade("a", "zz", 1.0, None),
        Err(CoreError::NotFound("zz".into()))
    );
    assert!(core.start_crossfade("a", "b", 1.0, None));
    assert!(core.queue_crossfade("b", "a", 1.0, None));
    assert!(core.clear_crossfade_queue());
    assert!(core.stop_crossfade());
}

#[test]
fn full_command_channel_is_refused() {
    let config = small_config().with_command_capacity(4);
    let (core, _processor) = initialize(config).expect("core");
    assert!(core.load_cue("a", "tone:440:1"));
    assert!(core.start_cue("a"));
    assert!(core.pause_cue("a"));
    assert!(core.resume_cue("a"));
    assert_eq!(
        core.try_cue_action("a", CueAction::Stop),
        Err(CoreError::ChannelFull)
    );
    assert_eq!(core.last_error(), None, "try_* variants do not record");
    assert!(!core.stop_cue("a"));
    assert_eq!(core.last_error().as_deref(), Some("command channel full"));
}

#[test]
fn shutdown_refuses_further_requests() {
    let (core, _processor) = initialize(small_config()).expect("core");
    assert!(core.is_initialized());
    core.shutdown();
    assert!(!core.is_initialized());
    assert_eq!(
        core.try_load_cue("a", "tone:440:1"),
        Err(CoreError::NotInitialized)
    );
    assert!(!core.stop_all());
}

#[test]
fn invalid_config_is_rejected() {
    let config = EngineConfig::default().with_command_capacity(48);
    assert!(matches!(initialize(config), Err(CoreError::InvalidConfig(_))));
}

#[test]
fn unload_and_clear_release_cues() {
    let (core, mut processor) = initialize(small_config()).expect("core");
    let input = AudioBlock::new(2, 128);
    let mut output = AudioBlock::new(2, 128);
    let info = CallbackInfo {
        sample_rate: 48_000,
        ..CallbackInfo::default()
    };

    for name in ["a", "b", "c"] {
        assert!(core.load_cue(name, "tone:440:1"));
    }
    processor.process(&input, &mut output, &info);
    assert_eq!(core.all_cues().len(), 3);

    assert!(core.unload_cue("b"));
    processor.process(&input, &mut output, &info);
    let names: Vec<String> = core.all_cues().iter().map(|c| c.id.to_string()).collect();
    assert_eq!(names, ["a", "c"]);

    assert!(core.clear_cues());
    processor.process(&input, &mut output, &info);
    assert!(core.all_cues().is_empty());
    assert!(!core.is_cue_loaded("a"));
    assert!(processor.mixer().is_empty());
}

#[test]
fn performance_metrics_follow_callback_info() {
    let (core, mut processor) = initialize(small_config()).expect("core");
    let input = AudioBlock::new(2, 128);
    let mut output = AudioBlock::new(2, 128);
    let mut info = CallbackInfo {
        sample_rate: 48_000,
        output_latency_samples: 192,
        input_latency_samples: 48,
        ..CallbackInfo::default()
    };
    processor.process(&input, &mut output, &info);
    let perf = core.get_performance_metrics();
    assert_eq!(perf.blocks_processed, 1);
    assert!((perf.latency_ms - 5.0).abs() < 1e-4);
    assert_eq!(perf.buffer_size, 128);
    assert_eq!(perf.sample_rate, 48_000);

    info.underruns = 1;
    processor.process(&input, &mut output, &info);
    let perf = core.get_performance_metrics();
    assert_eq!(perf.buffer_underrun_count, 1);
    assert!(!perf.is_stable);
}

#[test]
fn runs_on_the_clocked_backend() {
    let (core, processor) = initialize(small_config()).expect("core");
    assert!(core.load_cue("a", "tone:440:5"));
    assert!(core.set_loop("a", true));
    assert!(core.start_cue("a"));
    core.start_audio(Box::new(ClockedBackend::unpaced()), processor)
        .expect("start audio");
    assert!(core.is_audio_running());

    let deadline = Instant::now() + Duration::from_secs(5);
    while core.get_performance_metrics().blocks_processed < 50 {
        assert!(Instant::now() < deadline, "render thread made no progress");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(core.is_cue_playing("a"));
    assert_eq!(
        core.get_active_cues().first().map(|c| c.state),
        Some(CueState::Playing)
    );

    assert!(core.stop_audio());
    assert!(!core.is_audio_running());
    assert!(!core.stop_audio());
}

#[test]
fn status_stays_current_without_polling() {
    let config = EngineConfig::default();
    let blocks_per_report =
        (config.sample_rate as usize * config.report_interval_ms as usize / 1_000)
            .div_ceil(config.buffer_size) as u64;
    let (core, mut processor) = initialize(config).expect("core");
    let input = AudioBlock::new(2, config.buffer_size);
    let mut output = AudioBlock::new(2, config.buffer_size);
    let info = CallbackInfo {
        sample_rate: config.sample_rate,
        ..CallbackInfo::default()
    };

    assert!(core.load_cue("a", "tone:440:30"));
    for _ in 0..250 {
        processor.process(&input, &mut output, &info);
    }
    assert!(core.start_cue("a"));
    for _ in 0..1_000 {
        processor.process(&input, &mut output, &info);
    }

    let status = core.status();
    assert!(
        status.block + blocks_per_report >= 1_250,
        "status is from block {}",
        status.block
    );
    assert_eq!(status.performance.blocks_processed, status.block);
    assert_eq!(
        core.cue_info("a").map(|c| c.state),
        Some(CueState::Playing)
    );
    assert!(core.is_cue_playing("a"));
}
