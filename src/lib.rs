//! splicemix - an offline multi-track audio renderer.
//!
//! This library provides the rendering core (one generator worker per track,
//! block-wise mixing, encoder sinks with crossfades) and the timeline macro
//! scheduler that drives it.

pub mod audio;
pub mod config;
pub mod error;
pub mod expr;
pub mod generator;
pub mod process;
pub mod render;
pub mod timeline;

// Re-export commonly used types
pub use audio::{AudioBlock, OutputSink, SinkId};
pub use config::EngineConfig;
pub use error::{JobError, MacroError, ProtocolError, RenderError};
pub use render::track::{TrackId, TrackInstance, TrackStatus};
pub use render::{RenderOptions, RenderReport, Renderer};
pub use timeline::{MacroRecorder, MacroSession, MacroTarget};
