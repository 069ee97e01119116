//! Plain data stored in runtime memory: timer spans, loop position, metrics,
//! execution records and the UI control projection.

use serde::Serialize;
use wod::fragment::FragmentValue;
use wod::statement::CodeStatement;

use crate::block::{BlockKey, BlockType};

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimerDirection {
    Up,
    Down,
}

/// One running interval of a timer. `stop` is `None` while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSpan {
    pub start: i64,
    pub stop: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerState {
    /// Cap or countdown length in ms. `None` for an open count-up.
    pub duration: Option<i64>,
    pub direction: TimerDirection,
    pub spans: Vec<TimeSpan>,
}

impl TimerState {
    pub fn new(duration: Option<i64>, direction: TimerDirection) -> Self {
        TimerState {
            duration,
            direction,
            spans: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.spans.last().is_some_and(|s| s.stop.is_none())
    }

    /// Open a new span. No-op if one is already open.
    pub fn start(&mut self, now: i64) {
        if !self.is_running() {
            self.spans.push(TimeSpan {
                start: now,
                stop: None,
            });
        }
    }

    /// Close the open span, if any.
    pub fn stop(&mut self, now: i64) {
        if let Some(span) = self.spans.last_mut().filter(|s| s.stop.is_none()) {
            span.stop = Some(now.max(span.start));
        }
    }

    pub fn elapsed(&self, now: i64) -> i64 {
        self.spans
            .iter()
            .map(|s| (s.stop.unwrap_or(now) - s.start).max(0))
            .sum()
    }

    pub fn remaining(&self, now: i64) -> Option<i64> {
        self.duration.map(|d| (d - self.elapsed(now)).max(0))
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.duration.is_some_and(|d| self.elapsed(now) >= d)
    }

    /// What a clock face would show: elapsed time counting up, remaining
    /// time counting down.
    pub fn display(&self, now: i64) -> i64 {
        match self.direction {
            TimerDirection::Up => self.elapsed(now),
            TimerDirection::Down => self.remaining(now).unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Position of a looping block within its child groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopState {
    /// Rounds left including the current one. `None` loops until something
    /// else (usually a timer) ends the block.
    pub remaining_rounds: Option<u32>,
    pub total_rounds: Option<u32>,
    /// 1-based once started, 0 before the first advance.
    pub current_round: u32,
    /// Index of the group being executed, -1 before the first advance.
    pub current_child_index: i64,
    pub child_count: usize,
}

impl LoopState {
    pub fn new(rounds: Option<u32>, child_count: usize) -> Self {
        LoopState {
            remaining_rounds: rounds,
            total_rounds: rounds,
            current_round: 0,
            current_child_index: -1,
            child_count,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_rounds == Some(0)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricKind {
    Repetitions,
    Resistance,
    Distance,
    Time,
    Rounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub kind: MetricKind,
    pub value: f64,
    pub unit: Option<String>,
}

/// Measurable values attributed to one source statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeMetric {
    pub source_id: usize,
    pub exercise: String,
    pub values: Vec<MetricValue>,
}

impl RuntimeMetric {
    /// Extract the measurable fragments of a statement. Only the first rep
    /// fragment counts; a scheme is resolved per round by the parent.
    pub fn from_statement(statement: &CodeStatement) -> Self {
        let mut values = Vec::new();
        let mut seen_rep = false;
        for fragment in &statement.fragments {
            let value = match &fragment.value {
                FragmentValue::Rep(n) if !seen_rep => {
                    seen_rep = true;
                    Some((MetricKind::Repetitions, f64::from(*n), None))
                }
                FragmentValue::Resistance(q) => {
                    Some((MetricKind::Resistance, q.amount, Some(q.unit.clone())))
                }
                FragmentValue::Distance(q) => {
                    Some((MetricKind::Distance, q.amount, Some(q.unit.clone())))
                }
                FragmentValue::Timer(ms) => {
                    Some((MetricKind::Time, ms.unsigned_abs() as f64, Some("ms".to_string())))
                }
                FragmentValue::Rounds(n) => Some((MetricKind::Rounds, f64::from(*n), None)),
                _ => None,
            };
            if let Some((kind, value, unit)) = value {
                values.push(MetricValue { kind, value, unit });
            }
        }

        RuntimeMetric {
            source_id: statement.id,
            exercise: statement.effort().unwrap_or_default().to_string(),
            values,
        }
    }

    pub fn value(&self, kind: MetricKind) -> Option<f64> {
        self.values.iter().find(|v| v.kind == kind).map(|v| v.value)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A block's presence on the stack. Lives in runtime-owned memory so it
/// survives the block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub block_key: BlockKey,
    pub parent_key: Option<BlockKey>,
    pub block_type: BlockType,
    pub label: String,
    pub source_ids: Vec<usize>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub metrics: Vec<RuntimeMetric>,
}

impl ExecutionRecord {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

// ---------------------------------------------------------------------------
// Controls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Idle,
    Executing,
    Paused,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayMode {
    Clock,
    Timer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonSpec {
    pub id: String,
    pub label: String,
    /// Event dispatched when pressed.
    pub event: String,
}

impl ButtonSpec {
    fn new(id: &str, label: &str, event: &str) -> Self {
        ButtonSpec {
            id: id.to_string(),
            label: label.to_string(),
            event: event.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeControls {
    pub display_mode: DisplayMode,
    pub buttons: Vec<ButtonSpec>,
}

impl RuntimeControls {
    pub fn for_state(state: LifecycleState) -> Self {
        use crate::event::names;

        let (display_mode, buttons) = match state {
            LifecycleState::Idle => (
                DisplayMode::Clock,
                vec![ButtonSpec::new("btn-start", "Start", names::TIMER_START)],
            ),
            LifecycleState::Executing => (
                DisplayMode::Timer,
                vec![
                    ButtonSpec::new("btn-pause", "Pause", names::TIMER_PAUSE),
                    ButtonSpec::new("btn-next", "Next", names::NEXT),
                    ButtonSpec::new("btn-complete", "Complete", names::WORKOUT_COMPLETE),
                ],
            ),
            LifecycleState::Paused => (
                DisplayMode::Timer,
                vec![
                    ButtonSpec::new("btn-resume", "Resume", names::TIMER_RESUME),
                    ButtonSpec::new("btn-next", "Next", names::NEXT),
                    ButtonSpec::new("btn-complete", "Complete", names::WORKOUT_COMPLETE),
                ],
            ),
            LifecycleState::Complete => (
                DisplayMode::Clock,
                vec![ButtonSpec::new("btn-analytics", "Analytics", "analytics")],
            ),
        };
        RuntimeControls {
            display_mode,
            buttons,
        }
    }

    pub fn button_ids(&self) -> Vec<&str> {
        self.buttons.iter().map(|b| b.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wod::fragment::{Fragment, Quantity};

    #[test]
    fn timer_spans_exclude_paused_time() {
        let mut timer = TimerState::new(Some(60_000), TimerDirection::Down);
        timer.start(0);
        timer.stop(10_000);
        timer.start(25_000);
        assert_eq!(timer.elapsed(30_000), 15_000);
        assert_eq!(timer.display(30_000), 45_000);
        assert!(!timer.is_expired(30_000));
        assert!(timer.is_expired(70_000));
    }

    #[test]
    fn starting_twice_keeps_one_open_span() {
        let mut timer = TimerState::new(None, TimerDirection::Up);
        timer.start(0);
        timer.start(5);
        assert_eq!(timer.spans.len(), 1);
        assert!(!timer.is_expired(i64::MAX / 2));
    }

    #[test]
    fn metric_from_statement_takes_first_rep() {
        let stmt = CodeStatement::new(
            4,
            vec![
                Fragment::parsed(FragmentValue::Rep(21)),
                Fragment::parsed(FragmentValue::Rep(15)),
                Fragment::parsed(FragmentValue::Effort("Thrusters".into())),
                Fragment::parsed(FragmentValue::Resistance(Quantity {
                    amount: 95.0,
                    unit: "lb".into(),
                })),
            ],
        );
        let metric = RuntimeMetric::from_statement(&stmt);
        assert_eq!(metric.exercise, "Thrusters");
        assert_eq!(metric.value(MetricKind::Repetitions), Some(21.0));
        assert_eq!(metric.value(MetricKind::Resistance), Some(95.0));
        assert_eq!(metric.values.len(), 2);
    }

    #[test]
    fn controls_per_state() {
        let paused = RuntimeControls::for_state(LifecycleState::Paused);
        assert_eq!(paused.button_ids(), vec!["btn-resume", "btn-next", "btn-complete"]);
        let idle = RuntimeControls::for_state(LifecycleState::Idle);
        assert_eq!(idle.display_mode, DisplayMode::Clock);
        assert_eq!(idle.button_ids(), vec!["btn-start"]);
    }
}
