//! Process handles: one generator worker per track, driven over byte pipes.
//!
//! Each track's generator runs in its own child process, mainly so that a
//! track's memory is really freed when it stops, and so that generators with
//! global state can be loaded several times. A handle sends one request per
//! round trip and reads back exactly one reply.

pub mod launcher;
pub mod protocol;

use crate::audio::{AudioBlock, BlockAssembler};
use crate::error::{ProtocolError, RenderError};
use crate::generator::ParamSpec;
use protocol::{Request, OK_REPLY};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::process::Child;
use std::thread::JoinHandle;

pub use launcher::{ChildProcessLauncher, GeneratorLauncher, InProcessLauncher};

/// Longest text reply accepted before the worker is considered broken.
const MAX_TEXT_REPLY: usize = 1 << 20;

/// What runs on the other end of the pipes.
pub enum Worker {
    /// A generator child process.
    Child(Child),
    /// A host thread of the in-process launcher.
    Thread(Option<JoinHandle<io::Result<()>>>),
}

/// Owns one generator worker and the two pipes connected to it.
pub struct ProcessHandle {
    track: String,
    input: Option<Box<dyn Write + Send>>,
    output: Box<dyn Read + Send>,
    worker: Worker,
    assembler: BlockAssembler,
    chunk: Vec<u8>,
    block: AudioBlock,
    process_calls: u64,
    terminated: bool,
}

impl ProcessHandle {
    /// Wraps a running worker.
    ///
    /// `input` is the worker's request pipe, `output` its reply pipe.
    pub fn new(
        track: impl Into<String>,
        input: Box<dyn Write + Send>,
        output: Box<dyn Read + Send>,
        worker: Worker,
        block_frames: usize,
    ) -> Self {
        let block = AudioBlock::new(block_frames);
        let block_bytes = block.samples().len() * 4;
        Self {
            track: track.into(),
            input: Some(input),
            output,
            worker,
            assembler: BlockAssembler::new(block_bytes),
            // Reads may hand back more than one block's worth, which is how
            // an oversized reply is detected.
            chunk: vec![0; block_bytes * 2],
            block,
            process_calls: 0,
            terminated: false,
        }
    }

    /// Name of the track this handle plays, used in diagnostics.
    pub fn track(&self) -> &str {
        &self.track
    }

    /// The block produced by the last successful `render_block`.
    pub fn block(&self) -> &AudioBlock {
        &self.block
    }

    /// Number of `process` requests sent so far.
    pub fn process_calls(&self) -> u64 {
        self.process_calls
    }

    /// Loads a generator and applies its initial parameters.
    pub fn load(
        &mut self,
        path: &str,
        initial_params: &BTreeMap<String, String>,
    ) -> Result<(), RenderError> {
        self.send(&Request::Load {
            path: path.to_string(),
        })?;
        let reply = self.read_text()?;
        if reply != OK_REPLY {
            return Err(RenderError::Load {
                track: self.track.clone(),
                message: reply,
            });
        }
        if !initial_params.is_empty() {
            self.set_parameters(initial_params)?;
        }
        Ok(())
    }

    /// Sets parameters on the loaded generator.
    pub fn set_parameters(&mut self, params: &BTreeMap<String, String>) -> Result<(), RenderError> {
        self.send(&Request::Set {
            params: params.clone(),
        })?;
        let reply = self.read_text()?;
        if reply != OK_REPLY {
            return Err(RenderError::Set {
                track: self.track.clone(),
                message: reply,
            });
        }
        Ok(())
    }

    /// Asks the generator for its parameter ranges.
    pub fn describe(&mut self) -> Result<Vec<ParamSpec>, RenderError> {
        self.send(&Request::Describe)?;
        let reply = self.read_text()?;
        serde_json::from_str(&reply).map_err(|e| {
            ProtocolError::Malformed {
                track: self.track.clone(),
                detail: format!("describe reply is not a parameter list: {}", e),
            }
            .into()
        })
    }

    /// Renders the next block, readable through [`block`](Self::block).
    ///
    /// Returns true if the generator signaled a splice point. In that case
    /// the sentinel block is discarded and the real audio for this slot is
    /// requested right away.
    pub fn render_block(&mut self) -> Result<bool, ProtocolError> {
        self.read_block()?;
        if !self.block.is_splice_marker() {
            return Ok(false);
        }
        tracing::debug!("Track '{}' signaled a splice point", self.track);
        self.read_block()?;
        if self.block.is_splice_marker() {
            return Err(ProtocolError::RepeatedSplice {
                track: self.track.clone(),
            });
        }
        Ok(true)
    }

    /// Asks the worker to exit and waits for it.
    pub fn terminate(&mut self) -> Result<(), RenderError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if let Some(mut input) = self.input.take() {
            // A worker that already died cannot be asked to exit.
            if let Err(e) = input
                .write_all(Request::Exit.to_line().as_bytes())
                .and_then(|_| input.flush())
            {
                tracing::debug!("Track '{}' exit request not delivered: {}", self.track, e);
            }
        }
        let track = self.track.clone();
        match &mut self.worker {
            Worker::Child(child) => {
                child
                    .wait()
                    .map_err(|source| ProtocolError::Io { track, source })?;
            }
            Worker::Thread(handle) => {
                if let Some(handle) = handle.take() {
                    match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!("Track '{}' worker failed: {}", track, e),
                        Err(_) => tracing::warn!("Track '{}' worker panicked", track),
                    }
                }
            }
        }
        Ok(())
    }

    fn send(&mut self, request: &Request) -> Result<(), ProtocolError> {
        let input = self.input.as_mut().ok_or_else(|| ProtocolError::Unresponsive {
            track: self.track.clone(),
        })?;
        let line = request.to_line();
        input
            .write_all(line.as_bytes())
            .and_then(|_| input.flush())
            .map_err(|source| match source.kind() {
                io::ErrorKind::BrokenPipe => ProtocolError::Unresponsive {
                    track: self.track.clone(),
                },
                _ => ProtocolError::Io {
                    track: self.track.clone(),
                    source,
                },
            })
    }

    fn read_chunk(&mut self) -> Result<usize, ProtocolError> {
        loop {
            match self.output.read(&mut self.chunk) {
                Ok(0) => {
                    return Err(ProtocolError::Unresponsive {
                        track: self.track.clone(),
                    })
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(ProtocolError::Io {
                        track: self.track.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Reads one newline-terminated text reply.
    fn read_text(&mut self) -> Result<String, ProtocolError> {
        let mut staged: Vec<u8> = Vec::new();
        loop {
            let n = self.read_chunk()?;
            staged.extend_from_slice(&self.chunk[..n]);
            if let Some(end) = staged.iter().position(|&b| b == b'\n') {
                if staged.len() > end + 1 {
                    return Err(ProtocolError::TooManyBytes {
                        track: self.track.clone(),
                        expected: end + 1,
                        received: staged.len(),
                    });
                }
                staged.truncate(end);
                return String::from_utf8(staged).map_err(|_| ProtocolError::Malformed {
                    track: self.track.clone(),
                    detail: "reply is not UTF-8 text".to_string(),
                });
            }
            if staged.len() > MAX_TEXT_REPLY {
                return Err(ProtocolError::Malformed {
                    track: self.track.clone(),
                    detail: "text reply has no line end".to_string(),
                });
            }
        }
    }

    /// Sends `process` and reassembles the raw block reply.
    fn read_block(&mut self) -> Result<(), ProtocolError> {
        self.send(&Request::Process)?;
        self.process_calls += 1;
        self.assembler.reset();
        loop {
            let n = self.read_chunk()?;
            let complete = self
                .assembler
                .feed(&self.chunk[..n])
                .map_err(|overflow| ProtocolError::TooManyBytes {
                    track: self.track.clone(),
                    expected: overflow.expected,
                    received: overflow.received,
                })?;
            if complete {
                self.assembler.finish_into(&mut self.block);
                return Ok(());
            }
            tracing::debug!(
                "Got partial pipe output from '{}' ({} of {} bytes), catching up",
                self.track,
                self.assembler.received(),
                self.assembler.expected()
            );
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        // Closing the request pipe ends a well-behaved worker; a child that
        // is stuck gets killed so it cannot outlive the renderer.
        drop(self.input.take());
        if let Worker::Child(child) = &mut self.worker {
            if let Err(e) = child.kill().and_then(|_| child.wait().map(|_| ())) {
                tracing::warn!("Failed to reap worker for '{}': {}", self.track, e);
            }
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("track", &self.track)
            .field("process_calls", &self.process_calls)
            .field("terminated", &self.terminated)
            .finish()
    }
}
