//! Timeline script lines: timestamps, events and their text form.
//!
//! ```text
//! # comment
//! 00:00 start bass. freq: 55, gain: 0.4
//! 00:04 tweak bass. freq: 0=55, 2=110, 4=55
//! start bass #2. freq: 110
//! 00:12 stop bass #2.
//! ```
//!
//! A line without a timestamp happens at the same time as the line before it.

use crate::error::MacroError;
use std::fmt;

/// Kind of a timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
    Tweak,
}

impl EventKind {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "start" => Some(EventKind::Start),
            "stop" => Some(EventKind::Stop),
            "tweak" => Some(EventKind::Tweak),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Tweak => "tweak",
        }
    }
}

/// `name: value` in a start line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAssignment {
    pub name: String,
    pub value: String,
}

/// One point of an automation curve, relative to its event.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub offset_seconds: f64,
    pub value: String,
}

/// New value(s) for one parameter in a tweak line.
#[derive(Debug, Clone, PartialEq)]
pub enum TweakValue {
    /// Applied when the line is played.
    Immediate(String),
    /// Applied point by point as time passes.
    Automation(Vec<Breakpoint>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamChange {
    pub name: String,
    pub value: TweakValue,
}

/// What an event does.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroAction {
    Start(Vec<ParamAssignment>),
    Stop,
    Tweak(Vec<ParamChange>),
}

/// One parsed timeline line.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroEvent {
    /// Virtual time in milliseconds.
    pub stamp: u64,
    pub track: String,
    /// 1-based instance ordinal of the track.
    pub instance: u32,
    pub action: MacroAction,
}

impl MacroEvent {
    pub fn kind(&self) -> EventKind {
        match self.action {
            MacroAction::Start(_) => EventKind::Start,
            MacroAction::Stop => EventKind::Stop,
            MacroAction::Tweak(_) => EventKind::Tweak,
        }
    }

    /// The line as written to a timeline file, timestamp included.
    pub fn to_line(&self) -> String {
        format!("{} {}", format_stamp(self.stamp), self)
    }
}

impl fmt::Display for MacroEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind().as_str(), self.track)?;
        if self.instance != 1 {
            write!(f, " #{}", self.instance)?;
        }
        f.write_str(". ")?;
        let body = match &self.action {
            MacroAction::Stop => String::new(),
            MacroAction::Start(params) => params
                .iter()
                .map(|p| format!("{}: {}", p.name, p.value))
                .collect::<Vec<_>>()
                .join(", "),
            MacroAction::Tweak(changes) => changes
                .iter()
                .map(format_change)
                .collect::<Vec<_>>()
                .join("; "),
        };
        f.write_str(&body)
    }
}

fn format_change(change: &ParamChange) -> String {
    match &change.value {
        TweakValue::Immediate(value) => format!("{}: {}", change.name, value),
        TweakValue::Automation(points) => {
            let points: Vec<String> = points
                .iter()
                .map(|p| format!("{}={}", p.offset_seconds, p.value))
                .collect();
            format!("{}: {}", change.name, points.join(", "))
        }
    }
}

/// Formats milliseconds as `MM:SS`, truncating to whole seconds.
pub fn format_stamp(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Parses `MM:SS` into milliseconds.
pub fn parse_stamp(text: &str) -> Result<u64, MacroError> {
    let error = || MacroError::Timestamp(text.to_string());
    let (minutes, seconds) = text.split_once(':').ok_or_else(error)?;
    let minutes: u64 = minutes.trim().parse().map_err(|_| error())?;
    let seconds: u64 = seconds.trim().parse().map_err(|_| error())?;
    Ok((minutes * 60 + seconds) * 1000)
}

/// Splits a leading `MM:SS` timestamp off a line.
///
/// Returns the stamp, if any, and the trimmed rest of the line.
pub fn extract_stamp(line: &str) -> Result<(Option<u64>, &str), MacroError> {
    let bytes = line.as_bytes();
    let has_stamp = bytes.len() >= 5
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[2] == b':'
        && bytes[3..5].iter().all(u8::is_ascii_digit);
    if !has_stamp {
        return Ok((None, line.trim()));
    }
    let stamp = parse_stamp(&line[..5])?;
    Ok((Some(stamp), line[5..].trim()))
}

/// Parses the command part of a line (timestamp already removed).
///
/// `line` is the 1-based line number used in errors.
pub fn parse_command(line: usize, stamp: u64, command: &str) -> Result<MacroEvent, MacroError> {
    let malformed = || MacroError::Malformed {
        line,
        text: command.to_string(),
    };
    let padded = format!("{} ", command);
    let (head, rest) = padded.split_once(". ").unwrap_or((padded.as_str(), ""));
    // Anything after a second ". " is ignored.
    let body = rest.split(". ").next().unwrap_or("").trim();

    let mut words = head.split_whitespace();
    let kind = words.next().and_then(EventKind::parse).ok_or_else(malformed)?;
    let track = words.next().ok_or_else(malformed)?.to_string();
    let instance = match words.next() {
        Some(word) => word
            .trim_start_matches('#')
            .parse::<u32>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(malformed)?,
        None => 1,
    };

    let action = match kind {
        EventKind::Start => MacroAction::Start(parse_assignments(body).ok_or_else(malformed)?),
        EventKind::Stop => MacroAction::Stop,
        EventKind::Tweak => MacroAction::Tweak(parse_changes(body).ok_or_else(malformed)?),
    };
    Ok(MacroEvent {
        stamp,
        track,
        instance,
        action,
    })
}

fn parse_assignments(body: &str) -> Option<Vec<ParamAssignment>> {
    body.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let (name, value) = s.split_once(':')?;
            Some(ParamAssignment {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

fn parse_changes(body: &str) -> Option<Vec<ParamChange>> {
    body.split(';')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let (name, tail) = s.split_once(':')?;
            let parts: Vec<&str> = tail.split(',').collect();
            let value = if parts.len() == 1 {
                TweakValue::Immediate(tail.trim().to_string())
            } else {
                let points = parts
                    .iter()
                    .map(|p| {
                        let (offset, value) = p.split_once('=')?;
                        let offset_seconds: f64 = offset.trim().parse().ok()?;
                        Some(Breakpoint {
                            offset_seconds,
                            value: value.trim().to_string(),
                        })
                    })
                    .collect::<Option<Vec<_>>>()?;
                TweakValue::Automation(points)
            };
            Some(ParamChange {
                name: name.trim().to_string(),
                value,
            })
        })
        .collect()
}

/// Parses a whole script up front, resolving inherited timestamps.
pub fn parse_timeline(content: &str) -> Result<Vec<MacroEvent>, MacroError> {
    let mut stamp = 0;
    let mut events = Vec::new();
    for (n, line) in content.split('\n').enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (line_stamp, command) = extract_stamp(line)?;
        if let Some(s) = line_stamp {
            stamp = s;
        }
        if command.is_empty() {
            continue;
        }
        events.push(parse_command(n + 1, stamp, command)?);
    }
    Ok(events)
}

/// Rewrites every timestamp in `content` through `f`, which maps seconds to
/// seconds. Results below zero are clamped to `00:00`.
pub fn restamp<F>(content: &str, mut f: F) -> Result<String, MacroError>
where
    F: FnMut(f64) -> f64,
{
    let mut lines = Vec::new();
    for line in content.split('\n') {
        match extract_stamp(line)? {
            (Some(stamp), command) => {
                let seconds = f(stamp as f64 / 1000.0).max(0.0);
                let ms = (seconds * 1000.0).round() as u64;
                lines.push(format!("{} {}", format_stamp(ms), command));
            }
            (None, _) => lines.push(line.to_string()),
        }
    }
    Ok(lines.join("\n"))
}
