//! Sound generators: the DSP code behind each track.
//!
//! A generator produces one stereo frame per call and owns its own state.
//! Generators run behind the pipe protocol, either in a dedicated child
//! process or on a host thread (see [`host::serve`]).

pub mod host;
pub mod oscillator;
pub mod patch;

use crate::error::PatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use oscillator::{Oscillator, Waveform};
pub use patch::{load_patch, PatchSpec, PATCH_FILE_NAME};

/// Declared range and default of one generator parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub default: f64,
}

fn default_max() -> f64 {
    1.0
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            default,
        }
    }

    /// Clamps `value` into the declared range.
    pub fn clamp(&self, value: f64) -> f64 {
        if self.min <= self.max {
            value.clamp(self.min, self.max)
        } else {
            value
        }
    }
}

/// A track's DSP code.
pub trait SoundGenerator: Send {
    /// Sets one parameter. Unknown names are an error.
    fn set_param(&mut self, name: &str, value: f64) -> Result<(), PatchError>;

    /// Describes the parameters this generator accepts.
    fn params(&self) -> Vec<ParamSpec>;

    /// Produces the next stereo frame.
    fn process(&mut self) -> (f32, f32);

    /// Returns true, once, after the generator asked for a splice point.
    fn take_splice_point(&mut self) -> bool {
        false
    }
}

/// Resolves a load path to a fresh generator at the given sample rate.
pub type GeneratorLoader =
    Arc<dyn Fn(&Path, u32) -> Result<Box<dyn SoundGenerator>, PatchError> + Send + Sync>;

/// The loader used by worker processes: reads a patch file.
pub fn patch_loader() -> GeneratorLoader {
    Arc::new(load_patch)
}
