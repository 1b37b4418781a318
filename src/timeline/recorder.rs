//! Recording performances into timeline scripts.
//!
//! Consecutive tweaks of the same parameter form a streak. A streak is kept
//! in memory and written as a single automation line once something else
//! happens or once it goes stale, which keeps knob sweeps readable.

use super::event::{
    format_stamp, Breakpoint, MacroAction, MacroEvent, ParamAssignment, ParamChange, TweakValue,
};

/// A streak is flushed when its last tweak is older than this.
pub const STREAK_TIMEOUT_MS: u64 = 2000;

/// Streaks longer than this are sampled once per second instead of twice.
const LONG_STREAK_MS: u64 = 4000;

/// Formats a parameter value with precision decreasing as it grows.
pub fn format_value(value: f64) -> String {
    let rounded = if value >= 1000.0 {
        value.round()
    } else if value >= 100.0 {
        (value * 10.0).round() / 10.0
    } else {
        (value * 100.0).round() / 100.0
    };
    // Avoids printing "-0".
    (rounded + 0.0).to_string()
}

#[derive(Debug, Clone)]
struct RecordedTweak {
    stamp: u64,
    track: String,
    instance: u32,
    name: String,
    value: String,
}

/// Appends recorded events to a timeline script.
///
/// `K` identifies a running generator; the first time a key is seen it is
/// given the next free ordinal for its track name.
#[derive(Debug, Clone)]
pub struct MacroRecorder<K> {
    content: String,
    instances: Vec<(String, u32, K)>,
    streak: Vec<RecordedTweak>,
}

impl<K: Clone + PartialEq> MacroRecorder<K> {
    /// Starts recording at the end of `content`.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            instances: Vec::new(),
            streak: Vec::new(),
        }
    }

    /// The script so far, without the streak in progress.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn record_start(&mut self, stamp: u64, key: &K, track: &str, params: &[(String, f64)]) {
        let instance = self.instance_for(key, track);
        let params = params
            .iter()
            .map(|(name, value)| ParamAssignment {
                name: name.clone(),
                value: format_value(*value),
            })
            .collect();
        self.append_event(MacroEvent {
            stamp,
            track: track.to_string(),
            instance,
            action: MacroAction::Start(params),
        });
    }

    pub fn record_stop(&mut self, stamp: u64, key: &K, track: &str) {
        let instance = self.instance_for(key, track);
        self.append_event(MacroEvent {
            stamp,
            track: track.to_string(),
            instance,
            action: MacroAction::Stop,
        });
    }

    pub fn record_tweak(&mut self, stamp: u64, key: &K, track: &str, name: &str, value: f64) {
        let instance = self.instance_for(key, track);
        let tweak = RecordedTweak {
            stamp,
            track: track.to_string(),
            instance,
            name: name.to_string(),
            value: format_value(value),
        };
        let continues = self.streak.first().is_some_and(|first| {
            first.track == tweak.track && first.instance == tweak.instance && first.name == tweak.name
        });
        if !continues {
            self.write_streak();
        }
        self.streak.push(tweak);
    }

    /// Writes the streak in progress if it has gone stale by `now`.
    /// Returns true if a line was written.
    pub fn check_streak(&mut self, now: u64) -> bool {
        let stale = self
            .streak
            .last()
            .is_some_and(|last| now.saturating_sub(last.stamp) > STREAK_TIMEOUT_MS);
        if stale {
            self.write_streak();
        }
        stale
    }

    /// Writes any streak in progress and returns the finished script.
    pub fn finish(mut self) -> String {
        self.write_streak();
        self.content
    }

    fn instance_for(&mut self, key: &K, track: &str) -> u32 {
        if let Some((_, ordinal, _)) = self.instances.iter().find(|(_, _, k)| k == key) {
            return *ordinal;
        }
        let ordinal = self.instances.iter().filter(|(t, _, _)| t == track).count() as u32 + 1;
        self.instances.push((track.to_string(), ordinal, key.clone()));
        ordinal
    }

    fn append_event(&mut self, event: MacroEvent) {
        self.write_streak();
        self.append_line(&event.to_line());
    }

    fn append_line(&mut self, line: &str) {
        if !self.content.is_empty() && !self.content.ends_with('\n') {
            self.content.push('\n');
        }
        self.content.push_str(line);
    }

    /// Merges the streak into one line, sampling offsets at 0.5 s (or 1 s
    /// for long streaks). The last breakpoint always carries the final value.
    fn write_streak(&mut self) {
        let streak = std::mem::take(&mut self.streak);
        let (Some(first), Some(last)) = (streak.first(), streak.last()) else {
            return;
        };
        let duration = last.stamp.saturating_sub(first.stamp);
        let steps_per_second = if duration > LONG_STREAK_MS { 1.0 } else { 2.0 };

        let mut points = vec![Breakpoint {
            offset_seconds: 0.0,
            value: first.value.clone(),
        }];
        for tweak in &streak {
            let elapsed = tweak.stamp.saturating_sub(first.stamp) as f64 / 1000.0;
            let offset = (elapsed * steps_per_second).round() / steps_per_second;
            if points.last().is_some_and(|p| p.offset_seconds == offset) {
                continue;
            }
            points.push(Breakpoint {
                offset_seconds: offset,
                value: tweak.value.clone(),
            });
        }
        if let Some(point) = points.last_mut() {
            point.value = last.value.clone();
        }

        let value = if points.len() == 1 {
            TweakValue::Immediate(last.value.clone())
        } else {
            TweakValue::Automation(points)
        };
        let event = MacroEvent {
            stamp: first.stamp,
            track: first.track.clone(),
            instance: first.instance,
            action: MacroAction::Tweak(vec![ParamChange {
                name: first.name.clone(),
                value,
            }]),
        };
        tracing::debug!("Writing streak of {} tweaks at {}", streak.len(), format_stamp(first.stamp));
        self.append_line(&event.to_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::parse_timeline;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1234.56), "1235");
        assert_eq!(format_value(123.456), "123.5");
        assert_eq!(format_value(0.12345), "0.12");
        assert_eq!(format_value(440.0), "440");
        assert_eq!(format_value(-0.001), "0");
    }

    #[test]
    fn test_start_and_stop_lines() {
        let mut rec = MacroRecorder::new("");
        rec.record_start(0, &1, "bass", &[("freq".to_string(), 55.0)]);
        rec.record_start(1500, &2, "bass", &[]);
        rec.record_stop(62_000, &1, "bass");
        assert_eq!(
            rec.finish(),
            "00:00 start bass. freq: 55\n00:01 start bass #2. \n01:02 stop bass. "
        );
    }

    #[test]
    fn test_single_tweak_is_immediate() {
        let mut rec = MacroRecorder::new("00:00 start a.");
        rec.record_tweak(3000, &7, "a", "gain", 0.5);
        assert_eq!(rec.finish(), "00:00 start a.\n00:03 tweak a. gain: 0.5");
    }

    #[test]
    fn test_short_streak_uses_half_seconds() {
        let mut rec = MacroRecorder::new("");
        for (stamp, value) in [(1000, 100.0), (1200, 110.0), (1600, 120.0), (2100, 130.0), (2200, 135.0)] {
            rec.record_tweak(stamp, &1, "a", "freq", value);
        }
        assert_eq!(rec.finish(), "00:01 tweak a. freq: 0=100, 0.5=120, 1=135");
    }

    #[test]
    fn test_long_streak_uses_whole_seconds() {
        let mut rec = MacroRecorder::new("");
        for (i, value) in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0].iter().enumerate() {
            rec.record_tweak(i as u64 * 1000, &1, "a", "gain", *value);
        }
        rec.record_tweak(5600, &1, "a", "gain", 0.75);
        assert_eq!(
            rec.finish(),
            "00:00 tweak a. gain: 0=1, 1=2, 2=3, 3=4, 4=5, 5=6, 6=0.75"
        );
    }

    #[test]
    fn test_other_event_ends_streak() {
        let mut rec = MacroRecorder::new("");
        rec.record_tweak(0, &1, "a", "freq", 100.0);
        rec.record_tweak(500, &1, "a", "freq", 200.0);
        rec.record_tweak(700, &1, "a", "gain", 0.25);
        rec.record_stop(4000, &1, "a");
        let script = rec.finish();
        assert_eq!(
            script,
            "00:00 tweak a. freq: 0=100, 0.5=200\n00:00 tweak a. gain: 0.25\n00:04 stop a. "
        );
        assert_eq!(parse_timeline(&script).unwrap().len(), 3);
    }

    #[test]
    fn test_streak_with_earlier_stamp_is_clamped() {
        let mut rec = MacroRecorder::new("");
        rec.record_tweak(2000, &1, "a", "freq", 100.0);
        rec.record_tweak(1500, &1, "a", "freq", 150.0);
        rec.record_tweak(3000, &1, "a", "freq", 200.0);
        // The out-of-order tweak lands on the streak start.
        assert_eq!(rec.finish(), "00:02 tweak a. freq: 0=100, 1=200");
    }

    #[test]
    fn test_check_streak_flushes_stale_streaks() {
        let mut rec = MacroRecorder::new("");
        rec.record_tweak(1000, &1, "a", "freq", 100.0);
        assert!(!rec.check_streak(2500));
        assert_eq!(rec.content(), "");
        assert!(rec.check_streak(3001));
        assert_eq!(rec.content(), "00:01 tweak a. freq: 100");
        assert!(!rec.check_streak(10_000));
    }
}
