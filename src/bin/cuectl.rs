use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use cue_kit::backend::ClockedBackend;
use cue_kit::config::EngineConfig;
use cue_kit::{AudioCore, initialize};

const DEFAULT_CUES: [(&str, &str); 2] = [("a", "tone:440:10"), ("b", "tone:880:10")];

struct Options {
    status_only: bool,
    config: EngineConfig,
    cues: Vec<(String, String)>,
}

fn usage() -> &'static str {
    "Usage: cuectl [--status] [--sample-rate HZ] [--buffer FRAMES] [ID=SOURCE ...]\n\n\
     Sources: tone:<hz>[:<seconds>] or silence[:<seconds>].\n\
     Without --status the interactive console launches."
}

fn parse_args() -> Result<Option<Options>, String> {
    let mut options = Options {
        status_only: false,
        config: EngineConfig::default(),
        cues: Vec::new(),
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--status" | "-s" => options.status_only = true,
            "--help" | "-h" => return Ok(None),
            "--sample-rate" => {
                let value = args.next().ok_or("--sample-rate needs a value")?;
                let rate = value
                    .parse()
                    .map_err(|_| format!("invalid sample rate '{value}'"))?;
                options.config = options.config.with_sample_rate(rate);
            }
            "--buffer" => {
                let value = args.next().ok_or("--buffer needs a value")?;
                let frames = value
                    .parse()
                    .map_err(|_| format!("invalid buffer size '{value}'"))?;
                options.config = options.config.with_buffer_size(frames);
            }
            other => match other.split_once('=') {
                Some((id, source)) => options.cues.push((id.to_string(), source.to_string())),
                None => return Err(format!("unknown argument '{other}'")),
            },
        }
    }
    if options.cues.is_empty() {
        options.cues = DEFAULT_CUES
            .iter()
            .map(|(id, source)| (id.to_string(), source.to_string()))
            .collect();
    }
    Ok(Some(options))
}

fn print_status(core: &AudioCore) {
    let status = core.status();
    let perf = status.performance;
    println!("Sample Rate : {} Hz", perf.sample_rate);
    println!("Buffer Size : {} frames", perf.buffer_size);
    println!(
        "Latency     : {:.2} ms (target {:.2} ms)",
        perf.latency_ms,
        core.config().target_latency_ms
    );
    println!("CPU Usage   : {:.1}%", perf.cpu_usage_percent);
    println!(
        "Xruns       : {} under / {} over",
        perf.buffer_underrun_count, perf.buffer_overrun_count
    );
    println!("Stable      : {}", if perf.is_stable { "yes" } else { "no" });
    println!("Crossfade   : {}", if status.crossfade.active { "active" } else { "idle" });
    println!("Cues:");
    for cue in status.cues {
        println!(
            "  {} | {} | vol={:.2} | pan={:+.2} | loop={} | {:.1}/{:.1} s | {} ch @ {} Hz | source={}",
            cue.id,
            cue.state.label(),
            cue.volume,
            cue.pan,
            if cue.looping { "yes" } else { "no" },
            cue.position_seconds,
            cue.duration_seconds,
            cue.channels,
            cue.sample_rate,
            core.cue_source(cue.id.as_str()).unwrap_or_default(),
        );
    }
}

fn main() {
    cue_kit::init_tracing();

    let options = match parse_args() {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("{}", usage());
            return;
        }
        Err(err) => {
            eprintln!("cuectl: {err}\n\n{}", usage());
            process::exit(2);
        }
    };

    let (core, processor) = match initialize(options.config) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("cuectl: {err}");
            process::exit(1);
        }
    };
    for (id, source) in &options.cues {
        if let Err(err) = core.try_load_cue(id, source) {
            eprintln!("cuectl: cannot load {id}: {err}");
            process::exit(1);
        }
    }
    if let Err(err) = core.start_audio(Box::new(ClockedBackend::new()), processor) {
        eprintln!("cuectl: {err}");
        process::exit(1);
    }

    let core = Arc::new(core);
    if options.status_only {
        std::thread::sleep(Duration::from_millis(100));
        print_status(&core);
        core.shutdown();
        return;
    }

    let result = cue_kit::control::ui::run(Arc::clone(&core));
    core.shutdown();
    if let Err(err) = result {
        eprintln!("cuectl: {err}");
        process::exit(1);
    }
}
