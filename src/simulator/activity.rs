//! Activity and time-of-day terms.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::data::{ActivityEvent, Meal};

/// First hour of the night
pub const NIGHT_START_HOUR: f64 = 22.0;
/// Hour the night ends
pub const NIGHT_END_HOUR: f64 = 6.0;

/// Sum of the intensities of the given events.
///
/// No time windowing happens here: callers pass only the events active at
/// the current step, see [`active_events`].
pub fn activity_effect<'a>(events: impl IntoIterator<Item = &'a ActivityEvent>) -> f64 {
    events.into_iter().map(|e| e.intensity).sum()
}

/// Events active at time `t`
pub fn active_events(events: &[ActivityEvent], t: f64) -> impl Iterator<Item = &ActivityEvent> {
    events.iter().filter(move |e| e.is_active(t))
}

/// Hour of day in `[0, 24)`
pub fn clock_hour(hour: f64) -> f64 {
    hour.rem_euclid(24.0)
}

/// `(sin(2π·h/24), cos(2π·h/24))`
pub fn circadian_encoding(hour: f64) -> (f64, f64) {
    let angle = 2.0 * PI * hour / 24.0;
    (angle.sin(), angle.cos())
}

/// Night is `[22, 24) ∪ [0, 6)` on the local clock
pub fn is_night(hour: f64) -> bool {
    let h = clock_hour(hour);
    h >= NIGHT_START_HOUR || h < NIGHT_END_HOUR
}

/// Window of time since a meal, in scenario time units, during which a
/// night meal is penalised
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NightPenaltyWindow {
    pub start: f64,
    pub end: f64,
}

impl Default for NightPenaltyWindow {
    fn default() -> Self {
        NightPenaltyWindow {
            start: 0.0,
            end: 120.0,
        }
    }
}

impl NightPenaltyWindow {
    pub fn contains(&self, since_meal: f64) -> bool {
        since_meal >= self.start && since_meal <= self.end
    }
}

/// 1 when it is night and the time since the meal lies in the window
pub fn night_meal_penalty(night: bool, since_meal: f64, window: &NightPenaltyWindow) -> f64 {
    if night && window.contains(since_meal) {
        1.0
    } else {
        0.0
    }
}

/// Penalty against the most recent meal that has started by `t`
pub fn night_penalty_at(t: f64, night: bool, meals: &[Meal], window: &NightPenaltyWindow) -> f64 {
    meals
        .iter()
        .filter(|m| m.has_started(t))
        .max_by(|a, b| a.time().total_cmp(&b.time()))
        .map_or(0.0, |m| night_meal_penalty(night, t - m.time(), window))
}
