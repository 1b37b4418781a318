//! splicemix - render sound generators and timeline macros to audio files.
//!
//! # Usage
//!
//! ```bash
//! splicemix render TRACK OUT.wav -t 30 -p-freq 220
//! splicemix render-loop TRACK out/base -intro 6 -loop 18 -xf 2
//! splicemix render-macro PROJECT_DIR song.txt song.mp3
//! ```
//!
//! Every track runs in a child process: the binary re-invokes itself with
//! the hidden `generator` subcommand, which speaks the worker protocol on
//! stdin/stdout. Logs always go to stderr (`RUST_LOG=debug` for details).

use anyhow::{bail, Context, Result};
use splicemix::generator::{host, patch_loader};
use splicemix::render::jobs::{self, LoopOptions};
use splicemix::EngineConfig;
use std::io;
use std::path::PathBuf;

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    /// Render one track for a fixed duration.
    Render {
        track: String,
        out: PathBuf,
        duration: f64,
        params: Vec<(String, String)>,
    },
    /// Render an intro file and a loop file with crossfades.
    RenderLoop {
        track: String,
        out_base: String,
        options: LoopOptions,
        params: Vec<(String, String)>,
    },
    /// Render a timeline macro against a project directory.
    RenderMacro {
        project_dir: PathBuf,
        macro_path: PathBuf,
        out: PathBuf,
    },
    /// Serve the worker protocol on stdin/stdout.
    Generator,
}

/// Command-line options for the application.
#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    command: Command,
    /// Engine config file.
    config: Option<PathBuf>,
    sample_rate: Option<u32>,
    block_frames: Option<usize>,
    /// Write `.wav` outputs without the external encoder.
    native_wav: bool,
}

const HELP: &str = "splicemix - offline multi-track audio renderer

Usage:
  splicemix render TRACK OUT [-t SECONDS] [-p-PARAM X ...]
  splicemix render-loop TRACK OUT_BASE [-intro X] [-loop X] [-xf X] [-ext EXT] [-p-PARAM X ...]
  splicemix render-macro PROJECT_DIR MACRO OUT

Options:
  --config PATH        Load engine settings from a JSON file
  --sample-rate N      Override the sample rate (default 44100)
  --block-frames N     Override the block size in frames (default 1024)
  --native-wav         Write .wav outputs in-process instead of via ffmpeg
  -h, --help           Print this help message

Set RUST_LOG=info (or debug) to see progress on stderr.";

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.iter().any(|a| a == "--help" || a == "-h") || args.is_empty() {
            eprintln!("{}", HELP);
            std::process::exit(0);
        }
        Self::parse_from(&args)
    }

    fn parse_from(args: &[String]) -> Result<Self> {
        let mut positional: Vec<String> = Vec::new();
        let mut params: Vec<(String, String)> = Vec::new();
        let mut config = None;
        let mut sample_rate = None;
        let mut block_frames = None;
        let mut native_wav = false;
        let mut duration = 10.0;
        let mut loop_options = LoopOptions::default();

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            if arg == "--native-wav" {
                native_wav = true;
                i += 1;
                continue;
            }
            if !arg.starts_with('-') || arg.parse::<f64>().is_ok() {
                positional.push(arg.to_string());
                i += 1;
                continue;
            }
            let value = args
                .get(i + 1)
                .with_context(|| format!("{} requires a value", arg))?;
            match arg {
                "--config" => config = Some(PathBuf::from(value)),
                "--sample-rate" => {
                    sample_rate = Some(value.parse().context("invalid --sample-rate")?)
                }
                "--block-frames" => {
                    block_frames = Some(value.parse().context("invalid --block-frames")?)
                }
                "-t" => duration = value.parse().context("invalid duration for -t")?,
                "-intro" => loop_options.intro = value.parse().context("invalid -intro")?,
                "-loop" => loop_options.loop_length = value.parse().context("invalid -loop")?,
                "-xf" => loop_options.crossfade = value.parse().context("invalid -xf")?,
                "-ext" => loop_options.extension = value.clone(),
                other => match other.strip_prefix("-p-") {
                    Some(name) if !name.is_empty() => params.push((name.to_string(), value.clone())),
                    _ => bail!("Unknown option: {}\nUse --help for usage information", other),
                },
            }
            i += 2;
        }

        let command = match positional.first().map(String::as_str) {
            Some("render") => match &positional[1..] {
                [track, out] => Command::Render {
                    track: track.clone(),
                    out: PathBuf::from(out),
                    duration,
                    params,
                },
                _ => bail!("render expects TRACK OUT"),
            },
            Some("render-loop") => match &positional[1..] {
                [track, out_base] => Command::RenderLoop {
                    track: track.clone(),
                    out_base: out_base.clone(),
                    options: loop_options,
                    params,
                },
                _ => bail!("render-loop expects TRACK OUT_BASE"),
            },
            Some("render-macro") => match &positional[1..] {
                [project_dir, macro_path, out] => Command::RenderMacro {
                    project_dir: PathBuf::from(project_dir),
                    macro_path: PathBuf::from(macro_path),
                    out: PathBuf::from(out),
                },
                _ => bail!("render-macro expects PROJECT_DIR MACRO OUT"),
            },
            Some("generator") => Command::Generator,
            Some(other) => bail!("Unknown subcommand: {}\nUse --help for usage information", other),
            None => bail!("Missing subcommand\nUse --help for usage information"),
        };

        Ok(Self {
            command,
            config,
            sample_rate,
            block_frames,
            native_wav,
        })
    }

    /// Builds the engine config: file first, then flag overrides.
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(frames) = self.block_frames {
            config.block_frames = frames;
        }
        config.encoder.native_wav |= self.native_wav;
        config.validate().context("Invalid engine settings")?;
        Ok(config)
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    // Stdout carries audio in generator mode, so logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = cli.engine_config()?;
    match cli.command {
        Command::Generator => {
            host::serve(
                &patch_loader(),
                io::stdin().lock(),
                io::stdout().lock(),
                config.sample_rate,
                config.block_frames,
            )
            .context("Generator worker failed")?;
        }
        Command::Render {
            track,
            out,
            duration,
            params,
        } => {
            let mut renderer = jobs::child_process_renderer(config)?;
            jobs::render_track(&mut renderer, &track, &params, duration, &out)
                .with_context(|| format!("Failed to render {}", out.display()))?;
            eprintln!("Rendered {}", out.display());
        }
        Command::RenderLoop {
            track,
            out_base,
            options,
            params,
        } => {
            let mut renderer = jobs::child_process_renderer(config)?;
            let outputs = jobs::render_loop(&mut renderer, &track, &params, &out_base, &options)
                .with_context(|| format!("Failed to render loop {}", out_base))?;
            eprintln!(
                "Rendered {} and {}",
                outputs.intro.display(),
                outputs.looped.display()
            );
        }
        Command::RenderMacro {
            project_dir,
            macro_path,
            out,
        } => {
            let mut renderer = jobs::child_process_renderer(config)?;
            let report = jobs::render_macro(&mut renderer, &project_dir, &macro_path, &out)
                .with_context(|| format!("Failed to render macro {}", macro_path.display()))?;
            eprintln!(
                "Rendered {:.1}s to {} ({:.2}x realtime)",
                report.seconds,
                out.display(),
                report.speed
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use splicemix::config::{DEFAULT_BLOCK_FRAMES, DEFAULT_SAMPLE_RATE};

    fn parse(line: &str) -> Result<CliOptions> {
        let args: Vec<String> = line.split_whitespace().map(String::from).collect();
        CliOptions::parse_from(&args)
    }

    #[test]
    fn test_parse_render_with_params() {
        let cli = parse("render proj/lead out.wav -t 30 -p-freq 220 -p-gain -0.5").unwrap();
        assert_eq!(
            cli.command,
            Command::Render {
                track: "proj/lead".to_string(),
                out: PathBuf::from("out.wav"),
                duration: 30.0,
                params: vec![
                    ("freq".to_string(), "220".to_string()),
                    ("gain".to_string(), "-0.5".to_string()),
                ],
            }
        );
    }

    #[test]
    fn test_parse_render_loop_defaults() {
        let cli = parse("render-loop lead out/song -xf 3").unwrap();
        match cli.command {
            Command::RenderLoop { options, .. } => {
                assert_eq!(options.intro, 6.0);
                assert_eq!(options.loop_length, 18.0);
                assert_eq!(options.crossfade, 3.0);
                assert_eq!(options.extension, "ogg");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_generator_flags() {
        let cli = parse("generator --sample-rate 48000 --block-frames 512").unwrap();
        assert_eq!(cli.command, Command::Generator);
        let config = cli.engine_config().unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.block_frames, 512);
        assert_ne!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_ne!(config.block_frames, DEFAULT_BLOCK_FRAMES);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("render only-track").is_err());
        assert!(parse("mix a b").is_err());
        assert!(parse("render a b --bogus 1").is_err());
        assert!(parse("render a b -t").is_err());
        assert!(parse("generator --block-frames 0")
            .unwrap()
            .engine_config()
            .is_err());
    }

    #[test]
    fn test_native_wav_flag() {
        let cli = parse("render-macro proj song.txt song.wav --native-wav").unwrap();
        assert!(cli.engine_config().unwrap().encoder.native_wav);
    }
}
