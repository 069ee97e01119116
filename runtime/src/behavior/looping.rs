use tracing::debug;

use super::timer::TIMER;
use super::{
    Behavior, BehaviorContext, BehaviorKind, ChildIndexSource, CompletionSource, HookResult,
    RoundSource,
};
use crate::action::Action;
use crate::block::BlockKey;
use crate::error::RuntimeError;
use crate::event::{RuntimeEvent, names};
use crate::memory::{Memory, TypedMemoryReference, Visibility};
use crate::state::{LoopState, TimerState};

pub const LOOP_STATE: &str = "loop-state";

/// Walks a block's child groups round after round, asking the runtime to
/// compile each group just before it runs.
///
/// In interval mode (EMOM, Tabata) rounds advance on the clock instead of on
/// completion: when a `timer:tick` crosses a round boundary the block unwinds
/// whatever child is still running and starts the next round.
#[derive(Debug)]
pub struct LoopBehavior {
    groups: Vec<Vec<usize>>,
    state: LoopState,
    interval: Option<i64>,
    start_on_push: bool,
    reference: Option<TypedMemoryReference<LoopState>>,
}

impl LoopBehavior {
    /// `rounds: None` loops until something else ends the block.
    pub fn new(groups: Vec<Vec<usize>>, rounds: Option<u32>) -> Self {
        let groups: Vec<Vec<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
        LoopBehavior {
            state: LoopState::new(rounds, groups.len()),
            groups,
            interval: None,
            start_on_push: true,
            reference: None,
        }
    }

    pub fn with_interval(mut self, interval: i64) -> Self {
        self.interval = Some(interval.saturating_abs()).filter(|&i| i > 0);
        self
    }

    /// Wait for the first `next` instead of starting the first group on push.
    pub fn deferred(mut self) -> Self {
        self.start_on_push = false;
        self
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn interval(&self) -> Option<i64> {
        self.interval
    }

    fn compile_current(&self, key: BlockKey) -> Vec<Action> {
        usize::try_from(self.state.current_child_index)
            .ok()
            .and_then(|i| self.groups.get(i))
            .map(|group| {
                vec![Action::CompileChildren {
                    parent: key,
                    statement_ids: group.clone(),
                }]
            })
            .unwrap_or_default()
    }

    /// Close the current round and open the next. False when none are left.
    fn next_round(&mut self) -> bool {
        if let Some(remaining) = self.state.remaining_rounds.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                return false;
            }
        }
        self.state.current_round += 1;
        self.state.current_child_index = if self.groups.is_empty() { -1 } else { 0 };
        true
    }

    fn publish(&self, memory: &mut Memory) -> Result<(), RuntimeError> {
        match &self.reference {
            Some(reference) => memory.set(reference, self.state.clone()),
            None => Ok(()),
        }
    }

    fn advance(&mut self, key: BlockKey) -> Vec<Action> {
        match self.advance_to_next_child() {
            Some(index) => {
                debug!(
                    block = %key,
                    round = self.state.current_round,
                    index,
                    "loop advanced"
                );
                self.compile_current(key)
            }
            None => {
                debug!(block = %key, exhausted = self.state.is_exhausted(), "loop has no next child");
                Vec::new()
            }
        }
    }

    fn on_tick(&mut self, interval: i64, ctx: &mut BehaviorContext<'_>) -> HookResult {
        if self.state.current_round == 0 || self.state.is_exhausted() {
            return Ok(Vec::new());
        }
        let elapsed = ctx
            .context
            .find::<TimerState>(ctx.memory, TIMER)
            .and_then(|r| ctx.memory.get(&r))
            .map(|t| t.elapsed(ctx.now));
        let Some(elapsed) = elapsed else {
            return Ok(Vec::new());
        };

        let due = u32::try_from(elapsed / interval)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let mut advanced = false;
        while self.state.current_round < due && self.next_round() {
            advanced = true;
        }
        self.publish(ctx.memory)?;

        if self.state.is_exhausted() {
            debug!(block = %ctx.key, "interval rounds exhausted");
            return Ok(Vec::new());
        }
        if !advanced {
            return Ok(Vec::new());
        }

        debug!(block = %ctx.key, round = self.state.current_round, "interval boundary");
        let mut actions = vec![Action::UnwindTo { key: ctx.key }];
        actions.extend(self.compile_current(ctx.key));
        Ok(actions)
    }
}

impl Behavior for LoopBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Loop
    }

    fn required_behaviors(&self) -> &'static [BehaviorKind] {
        if self.interval.is_some() {
            &[BehaviorKind::Timer]
        } else {
            &[]
        }
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        self.reference = Some(ctx.context.allocate(
            ctx.memory,
            LOOP_STATE,
            self.state.clone(),
            Visibility::Private,
        )?);
        let actions = if self.start_on_push {
            self.advance(ctx.key)
        } else {
            Vec::new()
        };
        self.publish(ctx.memory)?;
        Ok(actions)
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        let actions = self.advance(ctx.key);
        self.publish(ctx.memory)?;
        Ok(actions)
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> HookResult {
        match self.interval {
            Some(interval) if event.name == names::TIMER_TICK => self.on_tick(interval, ctx),
            _ => Ok(Vec::new()),
        }
    }

    fn as_round_source(&self) -> Option<&dyn RoundSource> {
        Some(self)
    }

    fn as_completion_source(&self) -> Option<&dyn CompletionSource> {
        Some(self)
    }

    fn as_child_index_source_mut(&mut self) -> Option<&mut dyn ChildIndexSource> {
        Some(self)
    }
}

impl CompletionSource for LoopBehavior {
    fn is_complete(&self) -> bool {
        self.state.is_exhausted()
    }
}

impl RoundSource for LoopBehavior {
    fn loop_state(&self) -> &LoopState {
        &self.state
    }
}

impl ChildIndexSource for LoopBehavior {
    fn current_child_index(&self) -> i64 {
        self.state.current_child_index
    }

    fn has_next_child(&self) -> bool {
        if self.state.is_exhausted() || self.groups.is_empty() {
            return false;
        }
        if self.state.current_round == 0 {
            return true;
        }
        let next = (self.state.current_child_index + 1) as usize;
        next < self.groups.len()
            || (self.interval.is_none() && self.state.remaining_rounds.is_none_or(|r| r > 1))
    }

    fn advance_to_next_child(&mut self) -> Option<usize> {
        if self.state.is_exhausted() {
            return None;
        }
        if self.groups.is_empty() && self.interval.is_none() {
            self.state.remaining_rounds = Some(0);
            return None;
        }
        if self.state.current_round == 0 {
            self.state.current_round = 1;
            if self.groups.is_empty() {
                return None;
            }
            self.state.current_child_index = 0;
            return Some(0);
        }

        let next = (self.state.current_child_index + 1) as usize;
        if next < self.groups.len() {
            self.state.current_child_index = next as i64;
            return Some(next);
        }
        // Interval rounds only turn over on the clock.
        if self.interval.is_some() {
            return None;
        }
        if self.next_round() { Some(0) } else { None }
    }
}
