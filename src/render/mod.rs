//! The mixing core.
//!
//! The [`Renderer`] owns every track and output sink. Time only advances
//! inside [`Renderer::render`], one block at a time: each playing track
//! renders a block (tracks run concurrently), the blocks are summed into the
//! master block in track order, and the master is forwarded to every sink.

pub mod control;
pub mod jobs;
pub mod track;

use crate::audio::{AudioBlock, Envelope, OutputSink, SinkId};
use crate::config::EngineConfig;
use crate::error::{ProtocolError, RenderError};
use crate::process::{ChildProcessLauncher, GeneratorLauncher};
use control::{evaluate_params, ControlTask};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use track::{TrackId, TrackInstance, TrackStatus};

/// Options for a single [`Renderer::render`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Return right after the first block in which a track signaled a
    /// splice point.
    pub stop_at_splice_point: bool,
}

/// What a [`Renderer::render`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Blocks mixed and forwarded to the sinks.
    pub blocks: usize,
    /// Whether any track signaled a splice point.
    pub splice_point: bool,
}

/// Multi-track renderer with one worker per track.
pub struct Renderer {
    config: EngineConfig,
    launcher: Box<dyn GeneratorLauncher>,
    tracks: Vec<TrackInstance>,
    sinks: Vec<OutputSink>,
    control: VecDeque<ControlTask>,
    master: AudioBlock,
    staging: AudioBlock,
    blocks_rendered: u64,
}

impl Renderer {
    pub fn new(config: EngineConfig, launcher: Box<dyn GeneratorLauncher>) -> Self {
        let master = AudioBlock::new(config.block_frames);
        let staging = AudioBlock::new(config.block_frames);
        Self {
            config,
            launcher,
            tracks: Vec::new(),
            sinks: Vec::new(),
            control: VecDeque::new(),
            master,
            staging,
            blocks_rendered: 0,
        }
    }

    /// A renderer whose tracks each run in their own child process.
    pub fn with_child_processes(config: EngineConfig) -> io::Result<Self> {
        let launcher = ChildProcessLauncher::from_config(&config)?;
        Ok(Self::new(config, Box::new(launcher)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Virtual time rendered so far, in seconds.
    pub fn position(&self) -> f64 {
        self.blocks_rendered as f64 * self.config.block_seconds()
    }

    /// All tracks not yet removed, in the order they were added.
    pub fn tracks(&self) -> &[TrackInstance] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackInstance> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn sink(&self, id: SinkId) -> Option<&OutputSink> {
        self.sinks.iter().find(|s| s.id() == id)
    }

    /// Number of control tasks waiting for the next render.
    pub fn pending_tasks(&self) -> usize {
        self.control.len()
    }

    /// Queues a new track. Parameter expressions are evaluated now.
    pub fn add_track<N, E>(
        &mut self,
        name: &str,
        path: &str,
        params: &[(N, E)],
    ) -> Result<TrackId, RenderError>
    where
        N: AsRef<str>,
        E: AsRef<str>,
    {
        let params = evaluate_params(params)?;
        let track = TrackInstance::new(name, path);
        let id = track.id;
        tracing::debug!("Adding track '{}' ({}) from {}", name, id, path);
        self.tracks.push(track);
        self.control.push_back(ControlTask::Load { track: id, params });
        Ok(id)
    }

    /// Queues the removal of a track.
    pub fn remove_track(&mut self, id: TrackId) -> Result<(), RenderError> {
        let track = self.live_track_mut(id)?;
        track.retired = true;
        self.control.push_back(ControlTask::Exit { track: id });
        Ok(())
    }

    /// Queues a parameter change for a track.
    pub fn tweak_track<N, E>(&mut self, id: TrackId, params: &[(N, E)]) -> Result<(), RenderError>
    where
        N: AsRef<str>,
        E: AsRef<str>,
    {
        let params = evaluate_params(params)?;
        self.live_track_mut(id)?;
        self.control.push_back(ControlTask::Set { track: id, params });
        Ok(())
    }

    /// Opens an encoder sink for `path`.
    pub fn add_output<P: AsRef<Path>>(&mut self, path: P) -> Result<SinkId, RenderError> {
        tracing::info!("Adding output: {}", path.as_ref().display());
        let sink = OutputSink::open(path, &self.config)?;
        Ok(self.add_sink(sink))
    }

    /// Attaches any sink. Sinks receive blocks in the order they were added.
    pub fn add_sink(&mut self, sink: OutputSink) -> SinkId {
        let id = sink.id();
        self.sinks.push(sink);
        id
    }

    /// Detaches a sink, closes it and waits for its encoder to finish.
    pub fn remove_output(&mut self, id: SinkId) -> Result<(), RenderError> {
        let index = self
            .sinks
            .iter()
            .position(|s| s.id() == id)
            .ok_or(RenderError::UnknownSink(id))?;
        let mut sink = self.sinks.remove(index);
        tracing::info!(
            "Removing output: {} ({} blocks)",
            sink.path().display(),
            sink.blocks_written()
        );
        sink.close()
    }

    /// Fades a sink in over `duration` seconds.
    pub fn fade_in(&mut self, id: SinkId, duration: f64) -> Result<(), RenderError> {
        let envelope = Envelope::fade_in(duration, self.config.block_seconds());
        self.sink_mut(id)?.set_envelope(envelope);
        Ok(())
    }

    /// Fades a sink out over `duration` seconds. The sink stays silent
    /// afterwards until it is removed or faded in again.
    pub fn fade_out(&mut self, id: SinkId, duration: f64) -> Result<(), RenderError> {
        let envelope = Envelope::fade_out(duration, self.config.block_seconds());
        self.sink_mut(id)?.set_envelope(envelope);
        Ok(())
    }

    /// Renders `duration` seconds, rounded up to whole blocks.
    pub fn render(
        &mut self,
        duration: f64,
        options: RenderOptions,
    ) -> Result<RenderReport, RenderError> {
        self.drain_control()?;

        let blocks = self.config.blocks_for(duration);
        let mut report = RenderReport::default();
        for _ in 0..blocks {
            let splice = self.render_one_block()?;
            report.blocks += 1;
            report.splice_point |= splice;
            if options.stop_at_splice_point && splice {
                tracing::debug!("Stopping at splice point after {} blocks", report.blocks);
                break;
            }
        }
        Ok(report)
    }

    /// Applies remaining tasks, then terminates every worker and closes
    /// every sink. Returns the first error met along the way.
    pub fn finalize(&mut self) -> Result<(), RenderError> {
        let mut first_error = self.drain_control().err();

        let playing = self.tracks.iter().filter(|t| t.is_playing()).count();
        if playing > 0 {
            tracing::warn!("Rendering done but {} tracks still in playing state", playing);
        }
        for mut track in self.tracks.drain(..) {
            if let Err(e) = track.stop() {
                first_error.get_or_insert(e);
            }
        }
        for mut sink in self.sinks.drain(..) {
            if let Err(e) = sink.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn render_one_block(&mut self) -> Result<bool, RenderError> {
        let results: Vec<Result<bool, ProtocolError>> = self
            .tracks
            .par_iter_mut()
            .filter(|t| t.is_playing())
            .map(|t| t.render_block())
            .collect();

        let mut splice = false;
        for result in results {
            splice |= result?;
        }

        self.master.clear();
        for track in self.tracks.iter().filter(|t| t.is_playing()) {
            if let Some(handle) = track.handle() {
                self.master.mix_in(handle.block());
            }
        }
        for sink in &mut self.sinks {
            sink.write_block(&self.master, &mut self.staging)?;
        }
        self.blocks_rendered += 1;
        Ok(splice)
    }

    /// Runs queued tasks in order. A generator rejecting `load` or `set`
    /// stops only that track; the first such error is returned once the
    /// queue is empty. Any other failure returns immediately.
    fn drain_control(&mut self) -> Result<(), RenderError> {
        let mut first_error = None;
        while let Some(task) = self.control.pop_front() {
            match self.run_task(task) {
                Ok(()) => {}
                Err(e @ (RenderError::Load { .. } | RenderError::Set { .. })) => {
                    tracing::error!("{}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn run_task(&mut self, task: ControlTask) -> Result<(), RenderError> {
        let id = task.track();
        let index = self
            .tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(RenderError::UnknownTrack(id))?;

        match task {
            ControlTask::Load { params, .. } => {
                let track = &mut self.tracks[index];
                if track.retired {
                    return Ok(());
                }
                let handle = self.launcher.launch(&track.name)?;
                track.attach(handle)?;
                if let Err(e) = track.load(&params) {
                    track.stop()?;
                    return Err(e);
                }
                tracing::debug!("Track '{}' ({}) playing", track.name, track.id);
                Ok(())
            }
            ControlTask::Set { params, .. } => {
                let track = &mut self.tracks[index];
                if track.status() != TrackStatus::Playing {
                    tracing::debug!("Skipping tweak of stopped track '{}'", track.name);
                    return Ok(());
                }
                if let Err(e) = track.set(&params) {
                    track.stop()?;
                    return Err(e);
                }
                Ok(())
            }
            ControlTask::Exit { .. } => {
                let mut track = self.tracks.remove(index);
                tracing::debug!("Track '{}' ({}) exiting", track.name, track.id);
                track.stop()
            }
        }
    }

    fn live_track_mut(&mut self, id: TrackId) -> Result<&mut TrackInstance, RenderError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id && !t.retired)
            .ok_or(RenderError::UnknownTrack(id))
    }

    fn sink_mut(&mut self, id: SinkId) -> Result<&mut OutputSink, RenderError> {
        self.sinks
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or(RenderError::UnknownSink(id))
    }
}
