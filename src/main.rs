//! Voice Memo - a terminal voice memo recorder.
//!
//! Reads one-letter commands from stdin (`r` record, `p` play/pause, `s` stop,
//! `c` cancel, `q` quit) and renders the recorder screen as a status line or
//! as JSON snapshots.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use voice_memo::audio::{CpalCaptureDevice, CpalContextFactory, CpalPlaybackDevice};
use voice_memo::graph::ContextHealth;
use voice_memo::recorder::SystemClock;
use voice_memo::{ActiveMode, AppConfig, Command, Recorder, Snapshot};

/// Bar glyphs from lowest to highest.
const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Spawn the stdin reader that turns lines into commands.
///
/// Runs on a plain thread: a blocked stdin read would otherwise hold up
/// runtime shutdown.
///
/// # Arguments
/// * `commands` - Channel into the recorder loop
/// * `shutdown` - Stops forwarding once cancelled
fn spawn_input_thread(commands: mpsc::Sender<Command>, shutdown: CancellationToken) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if shutdown.is_cancelled() {
                break;
            }

            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            };

            let Some(command) = Command::parse(&line) else {
                if !line.trim().is_empty() {
                    warn!("Unknown command '{}' (r=record, p=play, s=stop, c=cancel, q=quit)", line.trim());
                }
                continue;
            };
            if commands.blocking_send(command).is_err() || command == Command::Quit {
                return;
            }
        }

        debug!("stdin closed");
        let _ = commands.blocking_send(Command::Quit);
    });
}

/// Spawn the renderer printing every published snapshot.
///
/// # Arguments
/// * `updates` - Snapshot stream from the recorder
/// * `json` - Emit JSON lines instead of a status line
fn spawn_render_task(mut updates: watch::Receiver<Snapshot>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if json {
                match serde_json::to_string(&snapshot) {
                    Ok(line) => println!("{}", line),
                    Err(e) => debug!("Failed to serialize snapshot: {}", e),
                }
            } else {
                print!("\r{}", render_status(&snapshot));
                let _ = std::io::stdout().flush();
            }
        }
        if !json {
            println!();
        }
    })
}

/// One-line rendering of the screen.
fn render_status(snapshot: &Snapshot) -> String {
    let bars: String = snapshot
        .waveform_frame
        .bars()
        .iter()
        .map(|&height| BAR_GLYPHS[(height as usize * (BAR_GLYPHS.len() - 1) / 100).min(BAR_GLYPHS.len() - 1)])
        .collect();

    let mode = match snapshot.active_mode {
        ActiveMode::None => "idle",
        ActiveMode::Recording => "recording",
        ActiveMode::Playing => "playing",
    };

    let mut line = format!("{} {}  rec {}  play {}  [{}]", bars, snapshot.prompt, snapshot.recording_label, snapshot.playback_label, mode);
    if let Some(ref message) = snapshot.last_error {
        line.push_str(&format!("  ⚠️ {}", message));
    }
    format!("{:<100}", line)
}

/// Wait for Ctrl+C or SIGTERM, then cancel `shutdown`.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env().or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 Voice Memo v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let settings = config.recorder_settings();
    let health = ContextHealth::new();
    let capture = CpalCaptureDevice::new(health.clone());
    let playback = CpalPlaybackDevice::new(config.output_device.clone());
    let contexts = CpalContextFactory::new(config.input_device.clone(), health);

    // cpal streams are not Send, so the recorder stays on this task.
    let mut recorder = Recorder::new(&settings, capture, playback, Box::new(contexts), Arc::new(SystemClock));

    let shutdown = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel::<Command>(16);

    let render_handle = spawn_render_task(recorder.subscribe(), config.json);
    spawn_input_thread(command_tx, shutdown.clone());
    let signal_handle = tokio::spawn(wait_for_shutdown(shutdown.clone()));

    info!("Ready. Commands: r=record/stop, p=play/pause, s=stop, c=cancel, q=quit");

    recorder.run(command_rx, config.tick_interval(), shutdown.clone()).await;
    shutdown.cancel();
    drop(recorder);

    let _ = render_handle.await;
    signal_handle.abort();

    info!("👋 Goodbye!");
    Ok(())
}
