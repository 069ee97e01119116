use tracing::debug;

use super::{Behavior, BehaviorContext, BehaviorKind, BehaviorPriority, HookResult, PriorityTier, TimerSource};
use crate::error::RuntimeError;
use crate::event::{RuntimeEvent, names};
use crate::memory::{Memory, TypedMemoryReference, Visibility};
use crate::state::{TimerDirection, TimerState};

pub const TIMER: &str = "timer";

/// Owns a block's clock. Publishes its spans as public `timer` memory so
/// displays and children can read them.
#[derive(Debug)]
pub struct TimerBehavior {
    state: TimerState,
    reference: Option<TypedMemoryReference<TimerState>>,
}

impl TimerBehavior {
    /// A missing or zero duration always counts up.
    pub fn new(duration: Option<i64>, direction: TimerDirection) -> Self {
        let duration = duration.map(i64::saturating_abs).filter(|&d| d > 0);
        let direction = if duration.is_none() {
            TimerDirection::Up
        } else {
            direction
        };
        TimerBehavior {
            state: TimerState::new(duration, direction),
            reference: None,
        }
    }

    pub fn count_up(cap: Option<i64>) -> Self {
        TimerBehavior::new(cap, TimerDirection::Up)
    }

    pub fn count_down(duration: i64) -> Self {
        TimerBehavior::new(Some(duration), TimerDirection::Down)
    }

    pub fn is_paused(&self) -> bool {
        !self.state.spans.is_empty() && !self.state.is_running()
    }

    fn publish(&self, memory: &mut Memory) -> Result<(), RuntimeError> {
        match &self.reference {
            Some(reference) => memory.set(reference, self.state.clone()),
            None => Ok(()),
        }
    }
}

impl Behavior for TimerBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Timer
    }

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Pre, 0)
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        self.state.start(ctx.now);
        if ctx.paused {
            self.state.stop(ctx.now);
        }
        self.reference = Some(ctx.context.allocate(
            ctx.memory,
            TIMER,
            self.state.clone(),
            Visibility::Public,
        )?);
        Ok(Vec::new())
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> HookResult {
        match event.name.as_str() {
            names::TIMER_PAUSE if self.state.is_running() => {
                self.state.stop(ctx.now);
                debug!(block = %ctx.key, elapsed = self.state.elapsed(ctx.now), "timer paused");
            }
            names::TIMER_RESUME if self.is_paused() => {
                self.state.start(ctx.now);
                debug!(block = %ctx.key, "timer resumed");
            }
            _ => return Ok(Vec::new()),
        }
        self.publish(ctx.memory)?;
        Ok(Vec::new())
    }

    fn on_pop(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        self.state.stop(ctx.now);
        self.publish(ctx.memory)?;
        Ok(Vec::new())
    }

    fn as_timer_source(&self) -> Option<&dyn TimerSource> {
        Some(self)
    }
}

impl TimerSource for TimerBehavior {
    fn timer_state(&self) -> &TimerState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_counts_up() {
        let timer = TimerBehavior::count_down(0);
        assert_eq!(timer.timer_state().direction, TimerDirection::Up);
        assert_eq!(timer.timer_state().duration, None);
    }

    #[test]
    fn negative_duration_is_normalised() {
        let timer = TimerBehavior::count_down(-30_000);
        assert_eq!(timer.timer_state().duration, Some(30_000));
        assert_eq!(timer.timer_state().direction, TimerDirection::Down);
    }

    #[test]
    fn minimum_duration_saturates() {
        let timer = TimerBehavior::count_down(i64::MIN);
        assert_eq!(timer.timer_state().duration, Some(i64::MAX));
    }
}
