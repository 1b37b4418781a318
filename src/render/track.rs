//! Track instances owned by the renderer.
//!
//! A track is one running copy of a generator. It owns at most one process
//! handle; stopping the track terminates the handle.

use crate::error::{ProtocolError, RenderError};
use crate::generator::ParamSpec;
use crate::process::ProcessHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for generating unique track IDs.
static TRACK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a track within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    /// Generates a new unique track ID.
    pub fn new() -> Self {
        Self(TRACK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Added, waiting for its load task.
    Proposed,
    /// Worker launched, generator being loaded.
    Loading,
    /// Rendering every block.
    Playing,
    /// Handle terminated; renders nothing.
    Stopped,
}

/// One generator parameter as last applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// The text the value was evaluated from.
    pub value_expression: String,
    pub min: f64,
    pub max: f64,
}

/// A parameter value evaluated when its control task was queued.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    pub name: String,
    pub expression: String,
    pub value: f64,
}

/// A running (or about to run) generator.
#[derive(Debug)]
pub struct TrackInstance {
    pub id: TrackId,
    pub name: String,
    /// Path handed to the generator's `load`.
    pub path: String,
    params: Vec<Parameter>,
    status: TrackStatus,
    handle: Option<ProcessHandle>,
    /// Set once removal was requested; the exit task is still queued.
    pub(crate) retired: bool,
}

impl TrackInstance {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(),
            name: name.into(),
            path: path.into(),
            params: Vec::new(),
            status: TrackStatus::Proposed,
            handle: None,
            retired: false,
        }
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == TrackStatus::Playing
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Takes ownership of a freshly launched worker.
    ///
    /// A previous handle is terminated first so that no worker is leaked.
    pub(crate) fn attach(&mut self, handle: ProcessHandle) -> Result<(), RenderError> {
        if let Some(mut previous) = self.handle.take() {
            tracing::warn!("Track '{}' already had a worker, terminating it", self.name);
            previous.terminate()?;
        }
        self.handle = Some(handle);
        self.status = TrackStatus::Loading;
        Ok(())
    }

    /// Loads the generator and applies the initial parameters.
    pub(crate) fn load(&mut self, initial: &[ParamValue]) -> Result<(), RenderError> {
        let handle = self.handle.as_mut().ok_or_else(|| ProtocolError::Unresponsive {
            track: self.name.clone(),
        })?;
        handle.load(&self.path, &wire_params(initial))?;
        let described = handle.describe()?;
        self.status = TrackStatus::Playing;
        self.record(initial, &described);
        Ok(())
    }

    /// Sends a parameter change to the generator.
    pub(crate) fn set(&mut self, changes: &[ParamValue]) -> Result<(), RenderError> {
        let handle = self.handle.as_mut().ok_or_else(|| ProtocolError::Unresponsive {
            track: self.name.clone(),
        })?;
        handle.set_parameters(&wire_params(changes))?;
        self.record(changes, &[]);
        Ok(())
    }

    /// Renders this track's next block.
    pub(crate) fn render_block(&mut self) -> Result<bool, ProtocolError> {
        match self.handle.as_mut() {
            Some(handle) => handle.render_block(),
            None => Err(ProtocolError::Unresponsive {
                track: self.name.clone(),
            }),
        }
    }

    /// Terminates the worker, if any. Stopping twice is a no-op.
    pub(crate) fn stop(&mut self) -> Result<(), RenderError> {
        self.status = TrackStatus::Stopped;
        match self.handle.take() {
            Some(mut handle) => handle.terminate(),
            None => Ok(()),
        }
    }

    fn record(&mut self, values: &[ParamValue], described: &[ParamSpec]) {
        for spec in described {
            match self.params.iter_mut().find(|p| p.name == spec.name) {
                Some(param) => {
                    param.min = spec.min;
                    param.max = spec.max;
                }
                None => self.params.push(Parameter {
                    name: spec.name.clone(),
                    value: spec.default,
                    value_expression: spec.default.to_string(),
                    min: spec.min,
                    max: spec.max,
                }),
            }
        }
        for value in values {
            match self.params.iter_mut().find(|p| p.name == value.name) {
                Some(param) => {
                    param.value = value.value;
                    param.value_expression = value.expression.clone();
                }
                None => self.params.push(Parameter {
                    name: value.name.clone(),
                    value: value.value,
                    value_expression: value.expression.clone(),
                    min: 0.0,
                    max: 1.0,
                }),
            }
        }
    }
}

/// Parameter values as sent over the pipe.
fn wire_params(values: &[ParamValue]) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|v| (v.name.clone(), v.value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str, expression: &str, value: f64) -> ParamValue {
        ParamValue {
            name: name.to_string(),
            expression: expression.to_string(),
            value,
        }
    }

    #[test]
    fn test_track_ids_are_unique() {
        let a = TrackId::new();
        let b = TrackId::new();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), a.as_u64().to_string());
    }

    #[test]
    fn test_new_track_is_proposed() {
        let track = TrackInstance::new("bass", "proj/bass");
        assert_eq!(track.status(), TrackStatus::Proposed);
        assert!(track.handle().is_none());
        assert!(!track.is_playing());
    }

    #[test]
    fn test_record_merges_ranges_and_values() {
        let mut track = TrackInstance::new("lead", "proj/lead");
        let described = vec![
            ParamSpec::new("freq", 20.0, 2000.0, 440.0),
            ParamSpec::new("gain", 0.0, 1.0, 0.5),
        ];
        track.record(&[value("freq", "200+20", 220.0)], &described);

        let freq = track.param("freq").unwrap();
        assert_eq!(freq.value, 220.0);
        assert_eq!(freq.value_expression, "200+20");
        assert_eq!((freq.min, freq.max), (20.0, 2000.0));
        assert_eq!(track.param("gain").unwrap().value, 0.5);

        track.record(&[value("gain", "0.25", 0.25)], &[]);
        assert_eq!(track.param("gain").unwrap().value, 0.25);
        assert_eq!(track.params().len(), 2);
    }

    #[test]
    fn test_undescribed_param_defaults_to_unit_range() {
        let mut track = TrackInstance::new("lead", "proj/lead");
        track.record(&[value("detune", "3", 3.0)], &[]);
        let detune = track.param("detune").unwrap();
        assert_eq!((detune.min, detune.max), (0.0, 1.0));
    }

    #[test]
    fn test_wire_params_use_evaluated_values() {
        let wire = wire_params(&[value("freq", "2*110", 220.0), value("gain", "1/4", 0.25)]);
        assert_eq!(wire["freq"], "220");
        assert_eq!(wire["gain"], "0.25");
    }

    #[test]
    fn test_stop_without_handle() {
        let mut track = TrackInstance::new("pad", "proj/pad");
        track.stop().unwrap();
        track.stop().unwrap();
        assert_eq!(track.status(), TrackStatus::Stopped);
        assert!(matches!(
            track.render_block(),
            Err(ProtocolError::Unresponsive { .. })
        ));
    }
}
