use anyhow::{anyhow, bail, Context, Result};
use crabcast::audio::{list_audio_devices, SourceKind};
use crabcast::recording::assemble;
use crabcast::testing::SyntheticScreen;
use crabcast::{CrabcastConfig, RecorderCallback, RecorderError};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

const USAGE: &str = "Usage: crabcast-cli <command> [args]

Commands:
  record [--duration <secs>] [--output <file.mp4>] [--config <file.toml>] [--fps <n>]
  devices [--json]
  config [--write [<file.toml>]]";

fn main() -> Result<()> {
    crabcast::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "record" => cmd_record(&args[2..]),
        "devices" => cmd_devices(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

/// Prints recorder notifications and hands the final result to `main`
struct CliCallback {
    done: Mutex<Option<mpsc::Sender<Result<PathBuf, String>>>>,
}

impl RecorderCallback for CliCallback {
    fn on_start(&self) {
        println!("Recording started");
    }

    fn on_stop(&self, result: Result<PathBuf, RecorderError>) {
        let sender = self.done.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = sender {
            let _ = tx.send(result.map_err(|e| e.to_string()));
        }
    }

    fn on_internal_audio_not_available(&self, kind: SourceKind) {
        eprintln!("Internal audio unavailable, continuing without {:?}", kind);
    }

    fn on_weak_audio_signal(&self, kind: SourceKind) {
        eprintln!("Weak signal on {:?} source", kind);
    }

    fn on_silence_detected(&self, consecutive_frames: u32) {
        eprintln!("Audio has been silent for {} frames", consecutive_frames);
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn cmd_record(args: &[String]) -> Result<()> {
    let config = match flag_value(args, "--config") {
        Some(path) => CrabcastConfig::load_from_file(path)?,
        None => CrabcastConfig::load_or_default(),
    };

    let duration = flag_value(args, "--duration")
        .map(|s| s.parse::<f64>().with_context(|| format!("invalid duration: {}", s)))
        .transpose()?;
    if matches!(duration, Some(d) if d <= 0.0) {
        bail!("duration must be positive");
    }

    let fps = flag_value(args, "--fps")
        .map(|s| s.parse::<f64>().with_context(|| format!("invalid fps: {}", s)))
        .transpose()?
        .unwrap_or(config.video.fps);

    let output = match flag_value(args, "--output") {
        Some(path) => PathBuf::from(path),
        None => config.output_path_for(chrono::Local::now()),
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }

    let screen = SyntheticScreen::new(fps);
    let (parts, recorder_config) = assemble(&config, Box::new(screen))?;

    let (done_tx, done_rx) = mpsc::channel();
    let callback = Arc::new(CliCallback {
        done: Mutex::new(Some(done_tx)),
    });

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut recorder = crabcast::ScreenRecorder::new(&output, recorder_config, parts, callback);
    recorder.start()?;
    println!(
        "Recording {}x{} to {} (Ctrl-C to stop)",
        config.video.width,
        config.video.height,
        output.display()
    );

    let started = Instant::now();
    loop {
        if interrupted.load(Ordering::SeqCst) || recorder.is_finished() {
            break;
        }
        if let Some(secs) = duration {
            if started.elapsed().as_secs_f64() >= secs {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    recorder.stop();
    if !recorder.wait(Duration::from_secs(10)) {
        bail!("recorder did not finish within 10s");
    }

    let stats = recorder.stats();
    let result = done_rx
        .recv_timeout(Duration::from_secs(1))
        .map_err(|_| anyhow!("recorder finished without reporting a result"))?;
    let path = result.map_err(|e| anyhow!("recording failed: {}", e))?;

    println!("Saved {}", path.display());
    println!(
        "  video: {} samples ({} bytes), audio: {} samples ({} bytes), {:.1}s",
        stats.video_samples,
        stats.video_bytes,
        stats.audio_samples,
        stats.audio_bytes,
        stats.duration_secs()
    );
    Ok(())
}

fn cmd_devices(args: &[String]) -> Result<()> {
    let devices = list_audio_devices()?;
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string(&devices)?);
    } else if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        for d in devices {
            let marker = if d.is_default { " (default)" } else { "" };
            println!(
                "{}: {} {}Hz {}ch{}",
                d.id, d.name, d.sample_rate, d.channels, marker
            );
        }
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<()> {
    let config = CrabcastConfig::load_or_default();
    match args.iter().position(|a| a == "--write") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .map(PathBuf::from)
                .unwrap_or_else(CrabcastConfig::default_path);
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", config.to_toml()?),
    }
    Ok(())
}
