//! Error types for the rendering core and the timeline scheduler.
//!
//! Protocol violations and scheduler failures abort a render. Generator
//! errors (`load`/`set` replies other than `ok`) are scoped to one track.

use crate::audio::sink::SinkId;
use crate::render::track::TrackId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A worker broke the block/reply framing of the pipe protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(
        "the child process for track '{track}' stopped responding. This could be due to:\n\
         \t- an error in the sound generator (check its stderr output above)\n\
         \t- running out of memory (check resource usage)"
    )]
    Unresponsive { track: String },

    #[error("track '{track}' sent too many bytes: {received} instead of {expected}")]
    TooManyBytes {
        track: String,
        expected: usize,
        received: usize,
    },

    #[error("track '{track}' sent two splice markers in a row")]
    RepeatedSplice { track: String },

    #[error("track '{track}' sent a malformed reply: {detail}")]
    Malformed { track: String, detail: String },

    #[error("pipe I/O with track '{track}' failed")]
    Io {
        track: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the renderer, its process handles and its sinks.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("RPC load error in track '{track}': {message}")]
    Load { track: String, message: String },

    #[error("RPC set error in track '{track}': {message}")]
    Set { track: String, message: String },

    #[error("failed to launch a generator worker for track '{track}'")]
    Launch {
        track: String,
        #[source]
        source: io::Error,
    },

    #[error("writing to output '{}' failed (is the encoder installed and still running?)", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoder for '{}' exited with {status}", path.display())]
    EncoderExit { path: PathBuf, status: String },

    #[error("invalid value for parameter '{name}'")]
    Param {
        name: String,
        #[source]
        source: ExprError,
    },

    #[error("no track with id {0}")]
    UnknownTrack(TrackId),

    #[error("no output sink with id {0}")]
    UnknownSink(SinkId),
}

/// Errors raised while reading or replaying a timeline script.
#[derive(Debug, Error)]
pub enum MacroError {
    #[error("error parsing timestamp: {0}")]
    Timestamp(String),

    #[error("line {line}: error parsing event: {text}")]
    Malformed { line: usize, text: String },

    #[error("line {line}: no such track: {track} #{instance}")]
    UnknownInstance {
        line: usize,
        track: String,
        instance: u32,
    },

    #[error("line {line}: the render target rejected the event")]
    Target {
        line: usize,
        #[source]
        source: RenderError,
    },
}

/// Errors raised by the high-level render jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Macro(#[from] MacroError),

    #[error("failed to read '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot locate the generator worker executable")]
    WorkerExecutable(#[source] io::Error),
}

/// Errors from the numeric value-expression evaluator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("parentheses nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Errors raised when reading a patch file or configuring a generator.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to read patch file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid patch file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no param {0}")]
    UnknownParam(String),

    #[error("value '{value}' for param {name} is not a number")]
    InvalidValue { name: String, value: String },

    #[error("no generator loaded")]
    NotLoaded,
}

/// Errors raised when loading an engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("block_frames and sample_rate must be non-zero")]
    ZeroSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresponsive_message_is_actionable() {
        let err = ProtocolError::Unresponsive {
            track: "drums".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("drums"));
        assert!(msg.contains("stopped responding"));
        assert!(msg.contains("memory"));
    }

    #[test]
    fn test_rpc_errors_are_named() {
        let load = RenderError::Load {
            track: "pad".to_string(),
            message: "no such file".to_string(),
        };
        assert!(load.to_string().starts_with("RPC load error"));
        let set = RenderError::Set {
            track: "pad".to_string(),
            message: "no param q".to_string(),
        };
        assert!(set.to_string().starts_with("RPC set error"));
    }
}
