mod audio;
mod cli;
mod config;
mod effects;
mod playback;
mod protocol;
mod show;
mod visualizer;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use audio::analysis::TimelineBuilder;
use audio::timeline::Mode;
use cli::{Cli, Command as CliCommand, PlayArgs, SendCommand};
use config::Overrides;
use effects::encoder::EffectEncoder;
use playback::RodioPlayback;
use protocol::command::{Command, Rgb};
use protocol::transport::{Transport, UdpTransport};
use show::session::Session;
use visualizer::tui::{Frontend, HeadlessFrontend, TerminalFrontend};
use visualizer::view::ViewSettings;

/// How long readback, reset-info and uptime wait for the controller
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Play(args) => {
            let terminal_view = !args.no_visualizer && std::io::stdout().is_terminal();
            let log_file = terminal_view.then(|| {
                args.log_file
                    .clone()
                    .unwrap_or_else(|| std::env::temp_dir().join("treelight.log"))
            });
            init_logging(log_file.as_deref())?;
            let overrides = Overrides {
                host: cli.host,
                port: cli.port,
                pixel_count: args.pixels,
                window_size: args.window,
                latency_ms: args.latency_ms,
            };
            play(cli.config.as_deref(), overrides, args, terminal_view)
        }
        CliCommand::Send(command) => {
            init_logging(None)?;
            let overrides = Overrides {
                host: cli.host,
                port: cli.port,
                ..Overrides::default()
            };
            send(cli.config.as_deref(), overrides, command)
        }
    }
}

/// Logs go to stderr, or to `log_file` while the terminal view owns the screen.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
        eprintln!("Logging to {}", path.display());
    }
    builder.init();
    Ok(())
}

fn play(config_path: Option<&Path>, overrides: Overrides, args: PlayArgs, terminal_view: bool) -> Result<()> {
    let config = config::resolve(config_path, overrides)?;

    let input: &PathBuf = &args.input;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("treelight - {}", args.mode.label());
    log::info!("Input: {}", input.display());
    log::info!(
        "Tree: {} pixels at {}:{}",
        config.tree.pixel_count,
        config.network.host,
        config.network.port
    );

    // 1. Decode and analyze before anything is opened
    log::info!("Decoding audio...");
    let audio_data = audio::decode::decode_audio(input)
        .with_context(|| format!("Failed to decode {}", input.display()))?;

    let mut builder = TimelineBuilder::new(config.normalizer(), config.analysis.window_size);
    if args.mode != Mode::Beat {
        let pb = ProgressBar::new(builder.window_count(&audio_data) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} windows ({eta} remaining)")?
                .progress_chars("=>-"),
        );
        builder = builder.with_progress(pb);
    }
    let timeline = Arc::new(builder.build(&audio_data, args.mode)?);
    if timeline.is_empty() {
        log::warn!("No timeline entries; the tree will stay as it is");
    }

    // 2. Scoped resources, released when the session returns
    let transport = UdpTransport::connect(&config.network.host, config.network.port)
        .context("Failed to open UDP transport")?;
    let playback = RodioPlayback::open(&audio_data)?;

    let encoder = EffectEncoder::new(args.mode, config.encoder_settings());
    let session = Session::new(
        Arc::clone(&timeline),
        encoder,
        ViewSettings {
            thresholds: config.thresholds(),
            pixel_count: config.tree.pixel_count,
            latency: config.dispatch.latency_offset,
        },
        transport,
        playback,
        config.dispatch.latency_offset,
    );

    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl+C handler")?;

    let frontend: Box<dyn Frontend> = if terminal_view {
        let title = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| input.display().to_string());
        Box::new(TerminalFrontend::new(title)?)
    } else {
        Box::new(HeadlessFrontend::new())
    };

    // 3. Playback, dispatch and visualizer run until done or cancelled
    let result = session.run(Some(frontend));
    // a detached visualizer thread never drops its frontend
    if terminal_view && result.as_ref().map_or(true, |r| r.detached) {
        ratatui::restore();
    }
    let report = result?;

    log::info!(
        "Session {}: {} sent, {} failed",
        if report.cancelled { "stopped" } else { "complete" },
        report.sent,
        report.failed
    );
    println!(
        "{} {} of {} commands sent ({} failed)",
        if report.cancelled { "Stopped:" } else { "Done:" },
        report.sent,
        timeline.len(),
        report.failed
    );
    Ok(())
}

fn send(config_path: Option<&Path>, overrides: Overrides, command: SendCommand) -> Result<()> {
    let config = config::resolve(config_path, overrides)?;
    let command = match command {
        SendCommand::Off => Command::Off,
        SendCommand::Brightness { value } => Command::Brightness(value),
        SendCommand::Fill { r, g, b } => Command::FillColor(Rgb::new(r, g, b)),
        SendCommand::Pixel { offset, r, g, b } => Command::PixelColor {
            offset,
            color: Rgb::new(r, g, b),
        },
        SendCommand::Chase { r, g, b, repeat } => Command::TheaterChase {
            repeat,
            color: Rgb::new(r, g, b),
        },
        SendCommand::Rainbow { repeat, delay_ms } => Command::Rainbow { repeat, delay_ms },
        SendCommand::RainbowCycle { repeat } => Command::RainbowCycle { repeat },
        SendCommand::Holiday { repeat } => Command::HolidayRotation { repeat },
        SendCommand::Readback => Command::Readback,
        SendCommand::ResetInfo => Command::ResetInfo,
        SendCommand::Uptime => Command::Uptime,
    };

    let mut transport = UdpTransport::connect(&config.network.host, config.network.port)
        .context("Failed to open UDP transport")?;

    if !command.expects_reply() {
        transport.send_command(&command)?;
        log::info!("Sent {:?} to {}", command.opcode(), transport.target());
        return Ok(());
    }

    let reply = transport
        .query(&command, QUERY_TIMEOUT)
        .with_context(|| format!("No answer from {}", transport.target()))?;
    match command {
        Command::ResetInfo => println!("{}", String::from_utf8_lossy(&reply)),
        Command::Uptime => println!("Uptime: {} ms", String::from_utf8_lossy(&reply).trim()),
        _ => {
            println!("Received {} bytes", reply.len());
            println!("First bytes: {:?}", &reply[..reply.len().min(10)]);
        }
    }
    Ok(())
}
