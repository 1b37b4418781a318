//! Engine-wide configuration.
//!
//! Block size and sample rate are fixed for the lifetime of a renderer and
//! are handed to every generator worker on its command line.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Sample rate used by the encoders and generators (44.1 kHz standard).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Frames per block. The block size bounds the timing accuracy of
/// track starts, stops and parameter changes.
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

/// Settings shared by the renderer, its workers and its sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per rendered block.
    pub block_frames: usize,
    /// How generator child processes are launched.
    pub generator: GeneratorCommand,
    /// How output files are encoded.
    pub encoder: EncoderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
            generator: GeneratorCommand::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the render loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_frames == 0 || self.sample_rate == 0 {
            return Err(ConfigError::ZeroSize);
        }
        Ok(())
    }

    /// Number of interleaved stereo samples in one block.
    pub fn block_samples(&self) -> usize {
        self.block_frames * 2
    }

    /// Number of bytes in one raw `f32` block on the wire.
    pub fn block_bytes(&self) -> usize {
        self.block_samples() * 4
    }

    /// Duration of one block in seconds.
    pub fn block_seconds(&self) -> f64 {
        self.block_frames as f64 / self.sample_rate as f64
    }

    /// Number of blocks needed to cover `duration` seconds.
    ///
    /// Exact multiples of the block duration must not round up because of
    /// floating point noise, hence the small guard.
    pub fn blocks_for(&self, duration: f64) -> usize {
        if duration <= 0.0 {
            return 0;
        }
        let blocks = duration * self.sample_rate as f64 / self.block_frames as f64;
        (blocks - 1e-9).ceil().max(0.0) as usize
    }
}

/// Command used to start a generator worker process.
///
/// With no program set, the running executable is re-invoked with the
/// `generator` subcommand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorCommand {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Settings for the external encoder behind each output sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable.
    pub program: String,
    /// Bitrate used for lossy outputs (`.mp3`).
    pub lossy_bitrate: String,
    /// Write `.wav` outputs in-process instead of through the encoder.
    pub native_wav: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            lossy_bitrate: "192k".to_string(),
            native_wav: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        let config = EngineConfig::default();
        assert_eq!(config.block_samples(), 2048);
        assert_eq!(config.block_bytes(), 8192);
    }

    #[test]
    fn test_blocks_for_exact_multiples() {
        let config = EngineConfig::default();
        for n in [1usize, 2, 3, 7, 43, 100, 1000] {
            let duration = n as f64 * config.block_seconds();
            assert_eq!(config.blocks_for(duration), n, "n = {}", n);
        }
        assert_eq!(config.blocks_for(0.0), 0);
        assert_eq!(config.blocks_for(-1.0), 0);
    }

    #[test]
    fn test_blocks_for_rounds_up() {
        let config = EngineConfig::default();
        // One second is 43.07 blocks of 1024 frames.
        assert_eq!(config.blocks_for(1.0), 44);
        assert_eq!(config.blocks_for(config.block_seconds() * 0.1), 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "block_frames": 256, "encoder": { "native_wav": true } }"#)
                .unwrap();
        assert_eq!(config.block_frames, 256);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(config.encoder.native_wav);
        assert_eq!(config.encoder.program, "ffmpeg");
    }

    #[test]
    fn test_zero_block_frames_rejected() {
        let config = EngineConfig {
            block_frames: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSize)));
    }
}
