//! Timeline macros: replaying start/stop/tweak scripts against virtual time.
//!
//! A [`MacroSession`] walks a script line by line. Each call to
//! [`MacroSession::play_up_to_stamp`] applies everything due by the given
//! time and reports when it needs to be called next, so the caller can
//! render exactly up to that point.

pub mod event;
pub mod recorder;

use crate::error::{MacroError, RenderError};
use event::{extract_stamp, parse_command, MacroAction, ParamAssignment, TweakValue};

pub use event::{
    format_stamp, parse_stamp, parse_timeline, restamp, Breakpoint, EventKind, MacroEvent,
    ParamChange,
};
pub use recorder::MacroRecorder;

/// Lines stamped up to this many milliseconds in the future are played
/// early rather than waited for.
pub const STAMP_SLACK_MS: u64 = 50;

/// Where a timeline's events take effect.
pub trait MacroTarget {
    /// Identifies a started track.
    type Handle: Clone + PartialEq;

    fn start(&mut self, track: &str, params: &[ParamAssignment])
        -> Result<Self::Handle, RenderError>;

    fn stop(&mut self, handle: &Self::Handle) -> Result<(), RenderError>;

    fn tweak(&mut self, handle: &Self::Handle, name: &str, value: &str)
        -> Result<(), RenderError>;
}

/// A started track, addressed by name and ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance<H> {
    pub track: String,
    pub ordinal: u32,
    pub handle: H,
}

/// A single automation breakpoint waiting for its time.
#[derive(Debug, Clone, PartialEq)]
pub struct BacklogEntry<H> {
    pub stamp: u64,
    pub handle: H,
    pub name: String,
    pub value: String,
    /// Script line the entry came from.
    pub line: usize,
}

/// Playback state of one timeline script.
#[derive(Debug, Clone)]
pub struct MacroSession<H> {
    /// Index of the last line played.
    cursor: Option<usize>,
    /// Stamp of the most recent stamped line, inherited by unstamped ones.
    current_stamp: u64,
    instances: Vec<Instance<H>>,
    backlog: Vec<BacklogEntry<H>>,
}

impl<H> Default for MacroSession<H> {
    fn default() -> Self {
        Self {
            cursor: None,
            current_stamp: 0,
            instances: Vec::new(),
            backlog: Vec::new(),
        }
    }
}

impl<H: Clone + PartialEq> MacroSession<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks started by the script and not yet stopped.
    pub fn instances(&self) -> &[Instance<H>] {
        &self.instances
    }

    /// Pending automation breakpoints, in insertion order.
    pub fn backlog(&self) -> &[BacklogEntry<H>] {
        &self.backlog
    }

    /// Plays every line due by `now` (plus [`STAMP_SLACK_MS`]) and every
    /// backlog entry due by `now`.
    ///
    /// Returns the stamp of the next pending line or breakpoint, or `None`
    /// once the script and the backlog are both exhausted.
    pub fn play_up_to_stamp<T>(
        &mut self,
        content: &str,
        target: &mut T,
        now: u64,
    ) -> Result<Option<u64>, MacroError>
    where
        T: MacroTarget<Handle = H>,
    {
        let next_line = self.play_lines(content, target, now)?;
        let next_backlog = self.play_backlog(target, now)?;
        Ok(match (next_line, next_backlog) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    /// Moves the cursor so that playback resumes at the first line stamped
    /// at or after `stamp`. Skipped lines are not played.
    pub fn seek(&mut self, content: &str, stamp: u64) -> Result<(), MacroError> {
        let mut last_stamp = 0;
        for (n, line) in content.split('\n').enumerate() {
            if let (Some(line_stamp), _) = extract_stamp(line)? {
                if line_stamp >= stamp {
                    self.cursor = n.checked_sub(1);
                    self.current_stamp = last_stamp;
                    return Ok(());
                }
                last_stamp = line_stamp;
            }
        }
        self.cursor = content.split('\n').count().checked_sub(1);
        self.current_stamp = last_stamp;
        Ok(())
    }

    fn play_lines<T>(
        &mut self,
        content: &str,
        target: &mut T,
        now: u64,
    ) -> Result<Option<u64>, MacroError>
    where
        T: MacroTarget<Handle = H>,
    {
        for (n, line) in content.split('\n').enumerate() {
            if self.cursor.is_some_and(|c| n <= c) || line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (stamp, command) = extract_stamp(line)?;
            if let Some(stamp) = stamp {
                if stamp > now + STAMP_SLACK_MS {
                    return Ok(Some(stamp));
                }
                self.current_stamp = stamp;
            }
            if command.is_empty() {
                continue;
            }
            self.cursor = Some(n);
            tracing::info!("{}", line);
            let event = parse_command(n + 1, self.current_stamp, command)?;
            self.apply(n + 1, event, target)?;
        }
        Ok(None)
    }

    fn play_backlog<T>(&mut self, target: &mut T, now: u64) -> Result<Option<u64>, MacroError>
    where
        T: MacroTarget<Handle = H>,
    {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.backlog.drain(..).partition(|e| e.stamp <= now);
        self.backlog = pending;
        due.sort_by_key(|e| e.stamp);
        for entry in due {
            target
                .tweak(&entry.handle, &entry.name, &entry.value)
                .map_err(|source| MacroError::Target {
                    line: entry.line,
                    source,
                })?;
        }
        Ok(self.backlog.iter().map(|e| e.stamp).min())
    }

    fn apply<T>(&mut self, line: usize, event: MacroEvent, target: &mut T) -> Result<(), MacroError>
    where
        T: MacroTarget<Handle = H>,
    {
        let target_error = |source| MacroError::Target { line, source };
        match event.action {
            MacroAction::Start(params) => {
                if let Some(previous) = self.take_instance(&event.track, event.instance) {
                    tracing::warn!(
                        "Overwriting instance {} #{}",
                        event.track,
                        event.instance
                    );
                    target.stop(&previous.handle).map_err(target_error)?;
                }
                let handle = target.start(&event.track, &params).map_err(target_error)?;
                self.instances.push(Instance {
                    track: event.track,
                    ordinal: event.instance,
                    handle,
                });
            }
            MacroAction::Stop => {
                let instance = self
                    .take_instance(&event.track, event.instance)
                    .ok_or_else(|| MacroError::UnknownInstance {
                        line,
                        track: event.track.clone(),
                        instance: event.instance,
                    })?;
                target.stop(&instance.handle).map_err(target_error)?;
            }
            MacroAction::Tweak(changes) => {
                let handle = self
                    .instances
                    .iter()
                    .find(|i| i.track == event.track && i.ordinal == event.instance)
                    .map(|i| i.handle.clone())
                    .ok_or_else(|| MacroError::UnknownInstance {
                        line,
                        track: event.track.clone(),
                        instance: event.instance,
                    })?;
                for change in changes {
                    match change.value {
                        TweakValue::Immediate(value) => {
                            target
                                .tweak(&handle, &change.name, &value)
                                .map_err(target_error)?;
                        }
                        TweakValue::Automation(points) => {
                            for point in points {
                                let offset_ms = (point.offset_seconds * 1000.0).round();
                                let stamp = if offset_ms >= 0.0 {
                                    event.stamp.saturating_add(offset_ms as u64)
                                } else {
                                    event.stamp.saturating_sub((-offset_ms) as u64)
                                };
                                self.backlog.push(BacklogEntry {
                                    stamp,
                                    handle: handle.clone(),
                                    name: change.name.clone(),
                                    value: point.value,
                                    line,
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes an instance along with its pending automation.
    fn take_instance(&mut self, track: &str, ordinal: u32) -> Option<Instance<H>> {
        let index = self
            .instances
            .iter()
            .position(|i| i.track == track && i.ordinal == ordinal)?;
        let instance = self.instances.remove(index);
        self.backlog.retain(|e| e.handle != instance.handle);
        Some(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start(String, Vec<(String, String)>),
        Stop(u32),
        Tweak(u32, String, String),
    }

    /// Records calls; handles are sequential numbers.
    #[derive(Default)]
    struct Recorder {
        next: u32,
        calls: Vec<Call>,
    }

    impl MacroTarget for Recorder {
        type Handle = u32;

        fn start(&mut self, track: &str, params: &[ParamAssignment]) -> Result<u32, RenderError> {
            self.next += 1;
            let params = params
                .iter()
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect();
            self.calls.push(Call::Start(track.to_string(), params));
            Ok(self.next)
        }

        fn stop(&mut self, handle: &u32) -> Result<(), RenderError> {
            self.calls.push(Call::Stop(*handle));
            Ok(())
        }

        fn tweak(&mut self, handle: &u32, name: &str, value: &str) -> Result<(), RenderError> {
            self.calls
                .push(Call::Tweak(*handle, name.to_string(), value.to_string()));
            Ok(())
        }
    }

    fn tweak(handle: u32, name: &str, value: &str) -> Call {
        Call::Tweak(handle, name.to_string(), value.to_string())
    }

    #[test]
    fn test_start_then_stop() {
        let content = "00:00 start a. freq: 100\n00:02 stop a.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();

        assert_eq!(session.play_up_to_stamp(content, &mut target, 0).unwrap(), Some(2000));
        assert_eq!(
            target.calls,
            vec![Call::Start(
                "a".to_string(),
                vec![("freq".to_string(), "100".to_string())]
            )]
        );
        assert_eq!(session.instances().len(), 1);

        assert_eq!(session.play_up_to_stamp(content, &mut target, 2000).unwrap(), None);
        assert_eq!(target.calls[1], Call::Stop(1));
        assert!(session.instances().is_empty());
    }

    #[test]
    fn test_slack_plays_lines_slightly_early() {
        let content = "00:00 start a.\n00:01 stop a.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        session.play_up_to_stamp(content, &mut target, 0).unwrap();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 949).unwrap(), Some(1000));
        assert_eq!(session.play_up_to_stamp(content, &mut target, 950).unwrap(), None);
        assert_eq!(target.calls.last(), Some(&Call::Stop(1)));
    }

    #[test]
    fn test_automation_goes_through_backlog() {
        let content = "00:00 start a.\n00:01 tweak a. freq: 0=100, 2=200\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();

        assert_eq!(session.play_up_to_stamp(content, &mut target, 0).unwrap(), Some(1000));
        let next = session.play_up_to_stamp(content, &mut target, 1000).unwrap();
        assert_eq!(next, Some(3000));
        assert_eq!(target.calls.last(), Some(&tweak(1, "freq", "100")));
        assert_eq!(session.backlog().len(), 1);
        assert_eq!(session.backlog()[0].stamp, 3000);

        assert_eq!(session.play_up_to_stamp(content, &mut target, 3000).unwrap(), None);
        assert_eq!(target.calls.last(), Some(&tweak(1, "freq", "200")));
        assert!(session.backlog().is_empty());
    }

    #[test]
    fn test_backlog_and_lines_interleave() {
        let content = "00:00 start a.\ntweak a. gain: 0=0.1, 1=0.2, 3=0.3\n00:02 tweak a. freq: 50\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 0).unwrap(), Some(1000));
        assert_eq!(session.play_up_to_stamp(content, &mut target, 1000).unwrap(), Some(2000));
        assert_eq!(session.play_up_to_stamp(content, &mut target, 2000).unwrap(), Some(3000));
        assert_eq!(session.play_up_to_stamp(content, &mut target, 3000).unwrap(), None);
        assert_eq!(
            target.calls[1..].to_vec(),
            vec![
                tweak(1, "gain", "0.1"),
                tweak(1, "gain", "0.2"),
                tweak(1, "freq", "50"),
                tweak(1, "gain", "0.3"),
            ]
        );
    }

    #[test]
    fn test_instances_are_addressed_by_ordinal() {
        let content = "00:00 start a. freq: 1\nstart a #2. freq: 2\n00:01 tweak a #2. freq: 3\nstop a.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        session.play_up_to_stamp(content, &mut target, 0).unwrap();
        session.play_up_to_stamp(content, &mut target, 1000).unwrap();
        assert_eq!(target.calls[2], tweak(2, "freq", "3"));
        assert_eq!(target.calls[3], Call::Stop(1));
        assert_eq!(session.instances().len(), 1);
        assert_eq!(session.instances()[0].ordinal, 2);
    }

    #[test]
    fn test_restart_stops_previous_instance() {
        let content = "00:00 start a.\ntweak a. freq: 0=1, 5=2\n00:01 start a.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        session.play_up_to_stamp(content, &mut target, 0).unwrap();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 1000).unwrap(), None);
        assert!(target.calls.contains(&Call::Stop(1)));
        assert_eq!(session.instances()[0].handle, 2);
        // Automation of the replaced instance is dropped.
        assert!(session.backlog().is_empty());
    }

    #[test]
    fn test_unknown_instance_is_fatal() {
        let content = "00:00 start a.\nstop b.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        let err = session.play_up_to_stamp(content, &mut target, 0).unwrap_err();
        assert!(matches!(
            err,
            MacroError::UnknownInstance { line: 2, ref track, instance: 1 } if track == "b"
        ));
    }

    #[test]
    fn test_comments_blank_and_bare_stamp_lines() {
        let content = "# setup\n\n00:00 start a.\n00:04\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 0).unwrap(), Some(4000));
        assert_eq!(session.play_up_to_stamp(content, &mut target, 4000).unwrap(), None);
        assert_eq!(target.calls.len(), 1);
    }

    #[test]
    fn test_seek_skips_earlier_lines() {
        let content = "00:00 start a.\n00:02 start b.\n00:04 stop b.\n";
        let mut session = MacroSession::new();
        let mut target = Recorder::default();
        session.seek(content, 2000).unwrap();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 2000).unwrap(), Some(4000));
        assert_eq!(target.calls, vec![Call::Start("b".to_string(), Vec::new())]);

        let mut session = MacroSession::<u32>::new();
        session.seek(content, 60_000).unwrap();
        assert_eq!(session.play_up_to_stamp(content, &mut target, 60_000).unwrap(), None);
    }

    #[test]
    fn test_target_error_carries_line() {
        struct Refuse;
        impl MacroTarget for Refuse {
            type Handle = u32;
            fn start(&mut self, track: &str, _: &[ParamAssignment]) -> Result<u32, RenderError> {
                Err(RenderError::Load {
                    track: track.to_string(),
                    message: "nope".to_string(),
                })
            }
            fn stop(&mut self, _: &u32) -> Result<(), RenderError> {
                Ok(())
            }
            fn tweak(&mut self, _: &u32, _: &str, _: &str) -> Result<(), RenderError> {
                Ok(())
            }
        }
        let mut session = MacroSession::new();
        let err = session
            .play_up_to_stamp("\n00:00 start a.", &mut Refuse, 0)
            .unwrap_err();
        assert!(matches!(err, MacroError::Target { line: 2, .. }));
    }
}
