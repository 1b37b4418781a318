//! The worker side of the pipe protocol.
//!
//! [`serve`] runs inside a generator child process (reading stdin, writing
//! stdout) or on a thread of the in-process launcher. Stdout carries audio,
//! so all diagnostics go through `tracing`, which the binary sends to stderr.

use super::{GeneratorLoader, SoundGenerator};
use crate::audio::{AudioBlock, SPLICE_SENTINEL};
use crate::error::PatchError;
use crate::expr;
use crate::process::protocol::{text_reply, Request, OK_REPLY};
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

/// Serves requests until `exit` or until the input pipe closes.
pub fn serve<R: Read, W: Write>(
    loader: &GeneratorLoader,
    input: R,
    mut output: W,
    sample_rate: u32,
    block_frames: usize,
) -> io::Result<()> {
    let mut input = BufReader::new(input);
    let mut line = String::new();
    let mut generator: Option<Box<dyn SoundGenerator>> = None;
    let mut block = AudioBlock::new(block_frames);
    let mut bytes = Vec::with_capacity(block_frames * 8);

    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            tracing::debug!("Input pipe closed, worker exiting");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let request = match Request::from_line(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Malformed request {:?}: {}", line.trim(), e);
                output.write_all(&text_reply(&format!("malformed request: {}", e)))?;
                output.flush()?;
                continue;
            }
        };

        match request {
            Request::Load { path } => {
                let reply = match loader(Path::new(&path), sample_rate) {
                    Ok(loaded) => {
                        generator = Some(loaded);
                        OK_REPLY.to_string()
                    }
                    Err(e) => {
                        tracing::error!("Loading {} failed: {}", path, e);
                        e.to_string()
                    }
                };
                output.write_all(&text_reply(&reply))?;
            }
            Request::Set { params } => {
                let reply = match apply_params(generator.as_deref_mut(), &params) {
                    Ok(()) => OK_REPLY.to_string(),
                    Err(e) => e.to_string(),
                };
                output.write_all(&text_reply(&reply))?;
            }
            Request::Describe => {
                let params = generator.as_ref().map(|g| g.params()).unwrap_or_default();
                let json = serde_json::to_string(&params).map_err(io::Error::other)?;
                output.write_all(&text_reply(&json))?;
            }
            Request::Process => {
                match generator.as_deref_mut() {
                    Some(g) => {
                        if g.take_splice_point() {
                            block.samples_mut().fill(SPLICE_SENTINEL);
                        } else {
                            for frame in block.samples_mut().chunks_exact_mut(2) {
                                let (left, right) = g.process();
                                frame[0] = left;
                                frame[1] = right;
                            }
                            // Only take_splice_point may emit the sentinel.
                            if block.is_splice_marker() {
                                block.samples_mut()[0] = SPLICE_SENTINEL + f32::EPSILON;
                            }
                        }
                    }
                    None => {
                        tracing::warn!("Process requested before load, sending silence");
                        block.clear();
                    }
                }
                bytes.clear();
                block.write_le_bytes(&mut bytes);
                output.write_all(&bytes)?;
            }
            Request::Exit => {
                tracing::debug!("Exit requested");
                output.flush()?;
                return Ok(());
            }
        }
        output.flush()?;
    }
}

fn apply_params(
    generator: Option<&mut (dyn SoundGenerator + 'static)>,
    params: &BTreeMap<String, String>,
) -> Result<(), PatchError> {
    let generator = generator.ok_or(PatchError::NotLoaded)?;
    for (name, value) in params {
        let parsed = expr::evaluate(value).map_err(|_| PatchError::InvalidValue {
            name: name.clone(),
            value: value.clone(),
        })?;
        generator.set_param(name, parsed)?;
    }
    Ok(())
}
