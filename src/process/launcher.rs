//! Starting generator workers.

use super::{ProcessHandle, Worker};
use crate::config::EngineConfig;
use crate::error::RenderError;
use crate::generator::{host, GeneratorLoader};
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

/// Starts one generator worker per track.
pub trait GeneratorLauncher: Send + Sync {
    fn launch(&self, track: &str) -> Result<ProcessHandle, RenderError>;
}

/// Launches each worker as a child process speaking the protocol over
/// stdin/stdout. Worker stderr is inherited so generator diagnostics show up
/// next to the renderer's own log.
#[derive(Debug, Clone)]
pub struct ChildProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    block_frames: usize,
}

impl ChildProcessLauncher {
    /// Uses the configured generator program, or re-invokes the current
    /// executable with the `generator` subcommand.
    pub fn from_config(config: &EngineConfig) -> io::Result<Self> {
        let (program, mut args) = match &config.generator.program {
            Some(program) => (program.clone(), config.generator.args.clone()),
            None => (env::current_exe()?, vec!["generator".to_string()]),
        };
        args.extend([
            "--sample-rate".to_string(),
            config.sample_rate.to_string(),
            "--block-frames".to_string(),
            config.block_frames.to_string(),
        ]);
        Ok(Self {
            program,
            args,
            block_frames: config.block_frames,
        })
    }

    pub fn command_line(&self) -> (&PathBuf, &[String]) {
        (&self.program, &self.args)
    }
}

impl GeneratorLauncher for ChildProcessLauncher {
    fn launch(&self, track: &str) -> Result<ProcessHandle, RenderError> {
        let launch_error = |source: io::Error| RenderError::Launch {
            track: track.to_string(),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(launch_error)?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(launch_error(io::Error::other("worker pipes unavailable")));
            }
        };
        tracing::debug!("Launched worker pid {} for '{}'", child.id(), track);
        Ok(ProcessHandle::new(
            track,
            Box::new(stdin),
            Box::new(stdout),
            Worker::Child(child),
            self.block_frames,
        ))
    }
}

/// Runs each worker on a thread of this process, connected by OS pipes.
///
/// The wire traffic is identical to [`ChildProcessLauncher`], but nothing is
/// isolated, so this is meant for tests and for generators known to be
/// well-behaved.
#[derive(Clone)]
pub struct InProcessLauncher {
    loader: GeneratorLoader,
    sample_rate: u32,
    block_frames: usize,
}

impl InProcessLauncher {
    pub fn new(loader: GeneratorLoader, config: &EngineConfig) -> Self {
        Self {
            loader,
            sample_rate: config.sample_rate,
            block_frames: config.block_frames,
        }
    }
}

impl GeneratorLauncher for InProcessLauncher {
    fn launch(&self, track: &str) -> Result<ProcessHandle, RenderError> {
        let launch_error = |source: io::Error| RenderError::Launch {
            track: track.to_string(),
            source,
        };
        let (request_reader, request_writer) = io::pipe().map_err(launch_error)?;
        let (reply_reader, reply_writer) = io::pipe().map_err(launch_error)?;
        let loader = self.loader.clone();
        let (sample_rate, block_frames) = (self.sample_rate, self.block_frames);
        let worker = thread::Builder::new()
            .name(format!("gen-{}", track))
            .spawn(move || {
                host::serve(&loader, request_reader, reply_writer, sample_rate, block_frames)
            })
            .map_err(launch_error)?;
        Ok(ProcessHandle::new(
            track,
            Box::new(request_writer),
            Box::new(reply_reader),
            Worker::Thread(Some(worker)),
            self.block_frames,
        ))
    }
}
