//! Interaction mode adaptation.
//!
//! [`InteractionModeMachine`] watches tap accuracy and falls back to voice-assist
//! after a burst of rapid misses. Sundowning and ambient light are orthogonal,
//! advisory signals for the presentation layer.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// How readily rapid missed taps trigger voice-assist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapSensitivity {
    Low,
    Medium,
    High,
}

impl TapSensitivity {
    /// Consecutive qualifying misses needed to enter voice-assist.
    pub fn threshold(self) -> u32 {
        match self {
            Self::Low => 5,
            Self::Medium => 3,
            Self::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    Normal,
    VoiceAssist,
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::VoiceAssist => f.write_str("voice_assist"),
        }
    }
}

/// Emitted whenever the mode actually changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub from: InteractionMode,
    pub to: InteractionMode,
    /// Missed-tap count at the moment of the change.
    pub missed_taps: u32,
}

/// Tap-failure detector driving the normal/voice-assist switch.
#[derive(Debug)]
pub struct InteractionModeMachine {
    sensitivity: TapSensitivity,
    window: Duration,
    mode: InteractionMode,
    missed_tap_count: u32,
    last_tap: Option<Instant>,
}

impl InteractionModeMachine {
    pub fn new(sensitivity: TapSensitivity, window: Duration) -> Self {
        Self {
            sensitivity,
            window,
            mode: InteractionMode::Normal,
            missed_tap_count: 0,
            last_tap: None,
        }
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn missed_tap_count(&self) -> u32 {
        self.missed_tap_count
    }

    pub fn register_tap(&mut self, hit_target: bool) -> Option<ModeChange> {
        self.register_tap_at(hit_target, Instant::now())
    }

    /// Record a tap at `at`. A miss counts only when it lands inside the window
    /// after the previous tap; the first tap of a session has no predecessor.
    pub fn register_tap_at(&mut self, hit_target: bool, at: Instant) -> Option<ModeChange> {
        let elapsed = self.last_tap.map(|prev| at.saturating_duration_since(prev));
        self.last_tap = Some(at);

        if hit_target {
            // Resets the counter only. Leaving voice-assist needs a dismissal or command.
            self.missed_tap_count = 0;
            return None;
        }

        match elapsed {
            Some(gap) if gap < self.window => {
                self.missed_tap_count += 1;
                tracing::debug!(missed = self.missed_tap_count, "rapid missed tap");
            }
            _ => {
                tracing::debug!("isolated missed tap ignored");
                return None;
            }
        }

        if self.missed_tap_count >= self.sensitivity.threshold()
            && self.mode == InteractionMode::Normal
        {
            return Some(self.switch_to(InteractionMode::VoiceAssist));
        }
        None
    }

    /// Manual override into voice-assist.
    pub fn activate_voice_mode(&mut self) -> Option<ModeChange> {
        if self.mode == InteractionMode::VoiceAssist {
            return None;
        }
        Some(self.switch_to(InteractionMode::VoiceAssist))
    }

    /// Back to normal with a clean counter. Used after a recognized voice command
    /// or an explicit dismissal.
    pub fn reset_voice_mode(&mut self) -> Option<ModeChange> {
        let change = (self.mode != InteractionMode::Normal)
            .then(|| self.switch_to(InteractionMode::Normal));
        self.missed_tap_count = 0;
        change
    }

    fn switch_to(&mut self, to: InteractionMode) -> ModeChange {
        let change = ModeChange {
            from: self.mode,
            to,
            missed_taps: self.missed_tap_count,
        };
        self.mode = to;
        tracing::info!(from = %change.from, to = %change.to, missed_taps = change.missed_taps, "interaction mode changed");
        change
    }
}

/// A recognized spoken command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    Next,
    Like,
    Recall,
    Unrecognized,
}

impl VoiceCommand {
    /// Loose, case-insensitive keyword match on a recognizer transcript.
    pub fn parse(transcript: &str) -> Self {
        let heard = transcript.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| heard.contains(w));

        if any(&["next", "skip", "forward"]) {
            Self::Next
        } else if any(&["like", "love", "heart"]) {
            Self::Like
        } else if any(&["recall", "remember", "save"]) {
            Self::Recall
        } else {
            Self::Unrecognized
        }
    }
}

/// Configured start of the evening window. `None` means sundowning is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SundowningSchedule {
    start: Option<NaiveTime>,
}

impl SundowningSchedule {
    /// Parse `HH:MM`. Malformed input disables sundowning instead of failing.
    pub fn parse(raw: &str) -> Self {
        match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
            Ok(start) => Self { start: Some(start) },
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "invalid sundowning time, sundowning disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { start: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.start.is_some()
    }

    pub fn is_active_at(&self, time: NaiveTime) -> bool {
        self.start.is_some_and(|start| time >= start)
    }
}

/// Tracks the sundowning flag and reports only transitions.
#[derive(Debug)]
pub struct SundowningMonitor {
    schedule: SundowningSchedule,
    active: bool,
}

impl SundowningMonitor {
    pub fn new(schedule: SundowningSchedule) -> Self {
        Self {
            schedule,
            active: false,
        }
    }

    pub fn schedule(&self) -> SundowningSchedule {
        self.schedule
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-evaluate at local `time`. Returns the new flag when it flipped.
    pub fn evaluate(&mut self, time: NaiveTime) -> Option<bool> {
        let active = self.schedule.is_active_at(time);
        if active == self.active {
            return None;
        }
        self.active = active;
        tracing::info!(active, "sundowning mode changed");
        Some(active)
    }
}

/// Coarse ambient light level from an illuminance reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbientLight {
    Dark,
    Dim,
    Bright,
}

impl AmbientLight {
    pub fn from_lux(lux: f64) -> Self {
        if lux < 10.0 {
            Self::Dark
        } else if lux < 50.0 {
            Self::Dim
        } else {
            Self::Bright
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(2000);

    fn machine(sensitivity: TapSensitivity) -> (InteractionModeMachine, Instant) {
        (InteractionModeMachine::new(sensitivity, WINDOW), Instant::now())
    }

    #[test]
    fn medium_switches_exactly_on_third_rapid_miss() {
        let (mut m, t0) = machine(TapSensitivity::Medium);
        // Opening tap establishes the timing baseline.
        assert!(m.register_tap_at(true, t0).is_none());

        let step = Duration::from_millis(500);
        assert!(m.register_tap_at(false, t0 + step).is_none());
        assert!(m.register_tap_at(false, t0 + step * 2).is_none());
        assert_eq!(m.mode(), InteractionMode::Normal);

        let change = m.register_tap_at(false, t0 + step * 3).unwrap();
        assert_eq!(change.from, InteractionMode::Normal);
        assert_eq!(change.to, InteractionMode::VoiceAssist);
        assert_eq!(change.missed_taps, 3);
        assert_eq!(m.mode(), InteractionMode::VoiceAssist);
    }

    #[test]
    fn thresholds_follow_sensitivity() {
        assert_eq!(TapSensitivity::Low.threshold(), 5);
        assert_eq!(TapSensitivity::Medium.threshold(), 3);
        assert_eq!(TapSensitivity::High.threshold(), 2);

        let (mut m, t0) = machine(TapSensitivity::High);
        m.register_tap_at(false, t0);
        assert!(m.register_tap_at(false, t0 + Duration::from_millis(100)).is_none());
        assert!(m.register_tap_at(false, t0 + Duration::from_millis(200)).is_some());
    }

    #[test]
    fn first_tap_miss_does_not_count() {
        let (mut m, t0) = machine(TapSensitivity::Medium);
        m.register_tap_at(false, t0);
        assert_eq!(m.missed_tap_count(), 0);
    }

    #[test]
    fn slow_misses_are_ignored() {
        let (mut m, t0) = machine(TapSensitivity::Medium);
        m.register_tap_at(true, t0);
        m.register_tap_at(false, t0 + Duration::from_millis(500));
        assert_eq!(m.missed_tap_count(), 1);

        // At or beyond the window the miss is treated as deliberate.
        m.register_tap_at(false, t0 + Duration::from_millis(2500));
        assert_eq!(m.missed_tap_count(), 1);
    }

    #[test]
    fn hit_resets_counter_but_keeps_voice_mode() {
        let (mut m, t0) = machine(TapSensitivity::High);
        m.register_tap_at(true, t0);
        m.register_tap_at(false, t0 + Duration::from_millis(100));
        m.register_tap_at(false, t0 + Duration::from_millis(200));
        assert_eq!(m.mode(), InteractionMode::VoiceAssist);

        assert!(m.register_tap_at(true, t0 + Duration::from_millis(300)).is_none());
        assert_eq!(m.missed_tap_count(), 0);
        assert_eq!(m.mode(), InteractionMode::VoiceAssist);
    }

    #[test]
    fn reset_returns_to_normal() {
        let (mut m, _) = machine(TapSensitivity::Medium);
        m.activate_voice_mode().unwrap();
        assert!(m.activate_voice_mode().is_none());

        let change = m.reset_voice_mode().unwrap();
        assert_eq!(change.to, InteractionMode::Normal);
        assert_eq!(m.missed_tap_count(), 0);
        assert!(m.reset_voice_mode().is_none());
    }

    #[test]
    fn voice_commands_match_keywords() {
        assert_eq!(VoiceCommand::parse("Next please"), VoiceCommand::Next);
        assert_eq!(VoiceCommand::parse("skip this one"), VoiceCommand::Next);
        assert_eq!(VoiceCommand::parse("I LOVE it"), VoiceCommand::Like);
        assert_eq!(VoiceCommand::parse("save that"), VoiceCommand::Recall);
        assert_eq!(VoiceCommand::parse("I remember"), VoiceCommand::Recall);
        assert_eq!(VoiceCommand::parse("what time is it"), VoiceCommand::Unrecognized);
    }

    #[test]
    fn sundowning_schedule_parses_and_falls_back() {
        let schedule = SundowningSchedule::parse("18:00");
        assert!(schedule.is_enabled());
        assert!(schedule.is_active_at(NaiveTime::from_hms_opt(18, 0, 0).unwrap()));
        assert!(schedule.is_active_at(NaiveTime::from_hms_opt(23, 59, 0).unwrap()));
        assert!(!schedule.is_active_at(NaiveTime::from_hms_opt(17, 59, 59).unwrap()));

        for bad in ["", "six pm", "25:00", "18"] {
            let schedule = SundowningSchedule::parse(bad);
            assert!(!schedule.is_enabled(), "{bad:?} should disable sundowning");
            assert!(!schedule.is_active_at(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        }
    }

    #[test]
    fn sundowning_monitor_reports_transitions_only() {
        let mut monitor = SundowningMonitor::new(SundowningSchedule::parse("18:00"));
        let afternoon = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        let evening = NaiveTime::from_hms_opt(18, 30, 0).unwrap();

        assert_eq!(monitor.evaluate(afternoon), None);
        assert_eq!(monitor.evaluate(evening), Some(true));
        assert_eq!(monitor.evaluate(evening), None);
        assert!(monitor.is_active());
        // Past midnight the evening window closes again.
        assert_eq!(monitor.evaluate(NaiveTime::from_hms_opt(0, 5, 0).unwrap()), Some(false));
    }

    #[test]
    fn ambient_light_bands() {
        assert_eq!(AmbientLight::from_lux(3.0), AmbientLight::Dark);
        assert_eq!(AmbientLight::from_lux(10.0), AmbientLight::Dim);
        assert_eq!(AmbientLight::from_lux(49.9), AmbientLight::Dim);
        assert_eq!(AmbientLight::from_lux(50.0), AmbientLight::Bright);
    }
}
