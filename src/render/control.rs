//! Deferred track mutations.
//!
//! Adding, tweaking and removing tracks only queues a task. The queue is
//! drained in order, one task at a time, right before the next render, so
//! that a load always completes before a later set on the same track.

use super::track::{ParamValue, TrackId};
use crate::error::{ExprError, RenderError};
use crate::expr;

/// One queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlTask {
    /// Launch a worker and load the generator with initial parameters.
    Load {
        track: TrackId,
        params: Vec<ParamValue>,
    },
    /// Send a parameter change.
    Set {
        track: TrackId,
        params: Vec<ParamValue>,
    },
    /// Terminate the worker and drop the track.
    Exit { track: TrackId },
}

impl ControlTask {
    pub fn track(&self) -> TrackId {
        match self {
            ControlTask::Load { track, .. }
            | ControlTask::Set { track, .. }
            | ControlTask::Exit { track } => *track,
        }
    }
}

/// Evaluates `(name, expression)` pairs into parameter values.
pub fn evaluate_params<N, E>(params: &[(N, E)]) -> Result<Vec<ParamValue>, RenderError>
where
    N: AsRef<str>,
    E: AsRef<str>,
{
    params
        .iter()
        .map(|(name, expression)| {
            let (name, expression) = (name.as_ref(), expression.as_ref());
            let value = expr::evaluate(expression).map_err(|source: ExprError| {
                RenderError::Param {
                    name: name.to_string(),
                    source,
                }
            })?;
            Ok(ParamValue {
                name: name.to_string(),
                expression: expression.to_string(),
                value,
            })
        })
        .collect()
}
