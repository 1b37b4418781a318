//! Patch files describing built-in generators.
//!
//! A patch is a small JSON document:
//!
//! ```json
//! {
//!   "waveform": "saw",
//!   "params": [
//!     { "name": "freq", "min": 20, "max": 2000, "default": 110 },
//!     { "name": "gain", "min": 0, "max": 1, "default": 0.3 }
//!   ]
//! }
//! ```
//!
//! Parameters left out take the built-in defaults.

use super::oscillator::{Oscillator, Waveform};
use super::{ParamSpec, SoundGenerator};
use crate::error::PatchError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up when a patch path names a directory.
pub const PATCH_FILE_NAME: &str = "patch.json";

/// Contents of a patch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSpec {
    pub waveform: Waveform,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl PatchSpec {
    /// Reads a patch file, or `patch.json` inside a directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PatchError> {
        let path = resolve_patch_path(path.as_ref());
        let json = fs::read_to_string(&path).map_err(|source| PatchError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| PatchError::Parse { path, source })
    }

    /// The declared parameters merged over the built-in defaults.
    ///
    /// Built-in parameters keep their order; extra declared ones follow.
    pub fn effective_params(&self) -> Vec<ParamSpec> {
        let mut params = builtin_params();
        for declared in &self.params {
            match params.iter_mut().find(|p| p.name == declared.name) {
                Some(existing) => *existing = declared.clone(),
                None => params.push(declared.clone()),
            }
        }
        params
    }
}

/// Parameters every built-in generator understands.
pub fn builtin_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("freq", 1.0, 20000.0, 440.0),
        ParamSpec::new("gain", 0.0, 1.0, 0.5),
        ParamSpec::new("pan", -1.0, 1.0, 0.0),
        ParamSpec::new("loop", 0.0, 600.0, 0.0),
    ]
}

fn resolve_patch_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(PATCH_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

/// Loads a patch file into a ready-to-run generator.
pub fn load_patch(path: &Path, sample_rate: u32) -> Result<Box<dyn SoundGenerator>, PatchError> {
    let spec = PatchSpec::from_path(path)?;
    Ok(Box::new(Oscillator::new(&spec, sample_rate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_patch() {
        let spec: PatchSpec = serde_json::from_str(r#"{ "waveform": "sine" }"#).unwrap();
        assert_eq!(spec.waveform, Waveform::Sine);
        let names: Vec<_> = spec.effective_params().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["freq", "gain", "pan", "loop"]);
    }

    #[test]
    fn test_declared_params_override_defaults() {
        let spec: PatchSpec = serde_json::from_str(
            r#"{ "waveform": "saw",
                 "params": [ { "name": "freq", "min": 20, "max": 200, "default": 55 },
                             { "name": "drive", "max": 4 } ] }"#,
        )
        .unwrap();
        let params = spec.effective_params();
        assert_eq!(params[0], ParamSpec::new("freq", 20.0, 200.0, 55.0));
        assert_eq!(params.last().unwrap(), &ParamSpec::new("drive", 0.0, 4.0, 0.0));
    }

    #[test]
    fn test_patch_directory_lookup() {
        let dir = std::env::temp_dir().join(format!("splicemix-patch-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PATCH_FILE_NAME), r#"{ "waveform": "square" }"#).unwrap();

        let spec = PatchSpec::from_path(&dir).unwrap();
        assert_eq!(spec.waveform, Waveform::Square);
        assert!(load_patch(&dir, 44100).is_ok());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_patch_is_read_error() {
        let err = PatchSpec::from_path("/nonexistent/splicemix/patch.json").unwrap_err();
        assert!(matches!(err, PatchError::Read { .. }));
    }
}
