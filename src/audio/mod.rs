//! Audio buffers, fades and output sinks.
//!
//! This module provides the pieces the renderer moves audio through:
//! - Fixed-size interleaved stereo blocks and their wire encoding
//! - Reassembly of blocks from partial pipe reads
//! - Crossfade envelopes
//! - Output sinks (encoder processes, WAV files, arbitrary writers)

pub mod block;
pub mod envelope;
pub mod sink;

pub use block::{AudioBlock, BlockAssembler, SPLICE_SENTINEL};
pub use envelope::{fade_curve, Envelope, FadeDirection};
pub use sink::{CaptureBuffer, OutputSink, SinkId};
