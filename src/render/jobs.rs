//! High-level render jobs: one track for a fixed time, an intro/loop pair
//! with crossfades, and a whole timeline script against a project directory.
//!
//! Every job finalizes its renderer, also when it fails halfway.

use super::track::TrackId;
use super::{RenderOptions, Renderer};
use crate::config::EngineConfig;
use crate::error::{JobError, RenderError};
use crate::timeline::event::ParamAssignment;
use crate::timeline::{format_stamp, parse_timeline, MacroSession, MacroTarget};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Timing of an intro/loop export, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    pub intro: f64,
    pub loop_length: f64,
    pub crossfade: f64,
    /// Extension of both output files.
    pub extension: String,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            intro: 6.0,
            loop_length: 18.0,
            crossfade: 2.0,
            extension: "ogg".to_string(),
        }
    }
}

/// Files written by [`render_loop`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutputs {
    pub intro: PathBuf,
    pub looped: PathBuf,
}

/// Summary of a [`render_macro`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroReport {
    /// Virtual time rendered, in seconds.
    pub seconds: f64,
    /// Rendered seconds per wall-clock second.
    pub speed: f64,
}

/// A renderer running each track in a child process of this executable.
pub fn child_process_renderer(config: EngineConfig) -> Result<Renderer, JobError> {
    Renderer::with_child_processes(config).map_err(JobError::WorkerExecutable)
}

/// Renders one track for `duration` seconds into `out`.
pub fn render_track(
    renderer: &mut Renderer,
    track_path: &str,
    params: &[(String, String)],
    duration: f64,
    out: &Path,
) -> Result<(), JobError> {
    let result = run_track(renderer, track_path, params, duration, out);
    finish(renderer, result)
}

fn run_track(
    renderer: &mut Renderer,
    track_path: &str,
    params: &[(String, String)],
    duration: f64,
    out: &Path,
) -> Result<(), JobError> {
    let sink = renderer.add_output(out)?;
    renderer.add_track(&track_name(track_path), track_path, params)?;
    tracing::info!("Rendering {:.2}s of {}", duration, track_path);
    renderer.render(duration, RenderOptions::default())?;
    renderer.remove_output(sink)?;
    Ok(())
}

/// Renders an intro file and a seamless loop file.
///
/// The intro fades out while the loop fades in over the crossfade, and the
/// loop ends with a fade-out of the same length. Played back to back
/// (intro, then the loop repeated) the cut points overlap seamlessly.
pub fn render_loop(
    renderer: &mut Renderer,
    track_path: &str,
    params: &[(String, String)],
    out_base: &str,
    options: &LoopOptions,
) -> Result<LoopOutputs, JobError> {
    let result = run_loop(renderer, track_path, params, out_base, options);
    finish(renderer, result)
}

fn run_loop(
    renderer: &mut Renderer,
    track_path: &str,
    params: &[(String, String)],
    out_base: &str,
    options: &LoopOptions,
) -> Result<LoopOutputs, JobError> {
    let outputs = LoopOutputs {
        intro: PathBuf::from(format!("{}_intro.{}", out_base, options.extension)),
        looped: PathBuf::from(format!("{}_loop.{}", out_base, options.extension)),
    };
    let defaults = RenderOptions::default();
    renderer.add_track(&track_name(track_path), track_path, params)?;

    let intro = renderer.add_output(&outputs.intro)?;
    renderer.render(options.intro, defaults)?;
    renderer.fade_out(intro, options.crossfade)?;
    let looped = renderer.add_output(&outputs.looped)?;
    renderer.fade_in(looped, options.crossfade)?;
    renderer.render(options.crossfade, defaults)?;
    renderer.remove_output(intro)?;

    renderer.render(options.loop_length, defaults)?;
    renderer.fade_out(looped, options.crossfade)?;
    renderer.render(options.crossfade, defaults)?;
    renderer.remove_output(looped)?;
    Ok(outputs)
}

/// Plays a timeline script against tracks found in `project_dir` (each
/// track name is a patch directory) and renders the result into `out`.
pub fn render_macro(
    renderer: &mut Renderer,
    project_dir: &Path,
    macro_path: &Path,
    out: &Path,
) -> Result<MacroReport, JobError> {
    let result = run_macro(renderer, project_dir, macro_path, out);
    finish(renderer, result)
}

fn run_macro(
    renderer: &mut Renderer,
    project_dir: &Path,
    macro_path: &Path,
    out: &Path,
) -> Result<MacroReport, JobError> {
    let content = fs::read_to_string(macro_path).map_err(|source| JobError::Read {
        path: macro_path.to_path_buf(),
        source,
    })?;
    let events = parse_timeline(&content)?;
    tracing::info!(
        "Rendering timeline {} ({} events)",
        macro_path.display(),
        events.len()
    );

    let started = Instant::now();
    let sink = renderer.add_output(out)?;
    let mut session = MacroSession::new();
    let mut target = RendererTarget {
        renderer: &mut *renderer,
        project_dir,
    };
    let mut now = 0;
    while let Some(next) = session.play_up_to_stamp(&content, &mut target, now)? {
        // Rendering up to an absolute time keeps block rounding from
        // accumulating over many spans.
        let span = next as f64 / 1000.0 - target.renderer.position();
        if span > 0.0 {
            target.renderer.render(span, RenderOptions::default())?;
        }
        tracing::debug!("Rendered up to {}", format_stamp(next));
        now = next;
    }
    renderer.remove_output(sink)?;

    let seconds = renderer.position();
    let speed = seconds / started.elapsed().as_secs_f64().max(1e-9);
    tracing::info!("Done. Speed: {:.2}x", speed);
    Ok(MacroReport { seconds, speed })
}

/// Finalizes the renderer; the job's own error wins over a cleanup error.
fn finish<T>(renderer: &mut Renderer, result: Result<T, JobError>) -> Result<T, JobError> {
    let finalized = renderer.finalize();
    match result {
        Ok(value) => {
            finalized?;
            Ok(value)
        }
        Err(e) => {
            if let Err(cleanup) = finalized {
                tracing::warn!("Cleanup after failed render also failed: {}", cleanup);
            }
            Err(e)
        }
    }
}

/// Display name of a track: the last path component.
fn track_name(track_path: &str) -> String {
    Path::new(track_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| track_path.to_string())
}

/// Drives a renderer from a timeline session.
pub struct RendererTarget<'a> {
    pub renderer: &'a mut Renderer,
    pub project_dir: &'a Path,
}

impl MacroTarget for RendererTarget<'_> {
    type Handle = TrackId;

    fn start(&mut self, track: &str, params: &[ParamAssignment]) -> Result<TrackId, RenderError> {
        let path = self.project_dir.join(track);
        let params: Vec<(&str, &str)> = params
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        self.renderer
            .add_track(track, &path.to_string_lossy(), &params)
    }

    fn stop(&mut self, handle: &TrackId) -> Result<(), RenderError> {
        self.renderer.remove_track(*handle)
    }

    fn tweak(&mut self, handle: &TrackId, name: &str, value: &str) -> Result<(), RenderError> {
        self.renderer.tweak_track(*handle, &[(name, value)])
    }
}
