use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::audio::timeline::Mode;

#[derive(Parser, Debug)]
#[command(name = "treelight", about = "Music-synchronized light show for a networked LED tree")]
pub struct Cli {
    /// Config file (default: ./treelight.toml, then ~/.config/treelight/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tree controller host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Tree controller UDP port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze an audio file and play it with synchronized effects
    Play(PlayArgs),

    /// Send a single command to the tree
    #[command(subcommand)]
    Send(SendCommand),
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: PathBuf,

    /// Effect mode: effects, vu, beat or brightness
    #[arg(short, long, default_value = "effects")]
    pub mode: Mode,

    /// Send commands this many milliseconds early
    #[arg(long)]
    pub latency_ms: Option<f64>,

    /// Number of pixels on the tree
    #[arg(long)]
    pub pixels: Option<usize>,

    /// Analysis window in samples
    #[arg(long)]
    pub window: Option<usize>,

    /// Log progress instead of drawing the terminal view
    #[arg(long)]
    pub no_visualizer: bool,

    /// Log file used while the terminal view is active
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum SendCommand {
    /// Turn every pixel off
    Off,
    /// Set strip brightness
    Brightness { value: u8 },
    /// Fill the tree with one color
    Fill { r: u8, g: u8, b: u8 },
    /// Set one pixel
    Pixel { offset: u8, r: u8, g: u8, b: u8 },
    /// Theater chase in one color
    Chase {
        r: u8,
        g: u8,
        b: u8,
        #[arg(long)]
        repeat: bool,
    },
    /// Rainbow across the strip
    Rainbow {
        #[arg(long)]
        repeat: bool,
        /// Step delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u16>,
    },
    /// Rainbow cycling along the strip
    RainbowCycle {
        #[arg(long)]
        repeat: bool,
    },
    /// Holiday color rotation
    Holiday {
        #[arg(long)]
        repeat: bool,
    },
    /// Dump the controller's pixel buffer
    Readback,
    /// Ask the controller why it last reset
    ResetInfo,
    /// Ask the controller how long it has been running
    Uptime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_mode_alias() {
        let cli = Cli::parse_from(["treelight", "play", "song.mp3", "--mode", "vu_meter", "--latency-ms", "25"]);
        match cli.command {
            Command::Play(args) => {
                assert_eq!(args.mode, Mode::Vu);
                assert_eq!(args.latency_ms, Some(25.0));
                assert!(!args.no_visualizer);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_send_with_global_host() {
        let cli = Cli::parse_from(["treelight", "send", "fill", "255", "215", "0", "--host", "10.0.0.5"]);
        assert_eq!(cli.host.as_deref(), Some("10.0.0.5"));
        assert!(matches!(cli.command, Command::Send(SendCommand::Fill { r: 255, g: 215, b: 0 })));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["treelight", "play", "a.wav", "--mode", "disco"]).is_err());
    }
}
