use tracing::debug;
use wod::fragment::{Fragment, FragmentOrigin, FragmentValue, MetricBehavior};

use super::looping::LOOP_STATE;
use super::{Behavior, BehaviorContext, BehaviorKind, BehaviorPriority, HookResult, PriorityTier, RepSource};
use crate::error::RuntimeError;
use crate::event::{RuntimeEvent, names};
use crate::memory::{TypedMemoryReference, Visibility};
use crate::state::LoopState;

pub const REP_TARGET: &str = "fragment:rep-target";

/// Turns a scheme like 21-15-9 into a per-round rep target and publishes it
/// as a compiler-origin fragment for children to pick up.
#[derive(Debug)]
pub struct RepSchemeBehavior {
    scheme: Vec<u32>,
    promoted_round: Option<u32>,
    target: Option<TypedMemoryReference<Fragment>>,
}

impl RepSchemeBehavior {
    pub fn new(scheme: Vec<u32>) -> Self {
        RepSchemeBehavior {
            scheme,
            promoted_round: None,
            target: None,
        }
    }

    fn promote(&mut self, ctx: &mut BehaviorContext<'_>) -> Result<(), RuntimeError> {
        let round = ctx
            .context
            .find::<LoopState>(ctx.memory, LOOP_STATE)
            .and_then(|r| ctx.memory.get(&r))
            .map_or(1, |s| s.current_round.max(1));
        if self.promoted_round == Some(round) {
            return Ok(());
        }
        let Some(reps) = self.reps_for_round(round) else {
            return Ok(());
        };

        let fragment = Fragment::new(
            FragmentValue::Rep(reps),
            MetricBehavior::Defined,
            FragmentOrigin::Compiler,
        );
        match &self.target {
            Some(target) => ctx.memory.set(target, fragment)?,
            None => {
                self.target = Some(ctx.context.allocate(
                    ctx.memory,
                    REP_TARGET,
                    fragment,
                    Visibility::Public,
                )?)
            }
        }
        self.promoted_round = Some(round);
        debug!(block = %ctx.key, round, reps, "promoted rep target");
        Ok(())
    }
}

impl Behavior for RepSchemeBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::RepScheme
    }

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Post, 0)
    }

    fn required_behaviors(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::Loop]
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        self.promote(ctx)?;
        Ok(Vec::new())
    }

    fn on_next(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        self.promote(ctx)?;
        Ok(Vec::new())
    }

    fn on_event(&mut self, event: &RuntimeEvent, ctx: &mut BehaviorContext<'_>) -> HookResult {
        if event.name == names::TIMER_TICK {
            self.promote(ctx)?;
        }
        Ok(Vec::new())
    }

    fn as_rep_source(&self) -> Option<&dyn RepSource> {
        Some(self)
    }
}

impl RepSource for RepSchemeBehavior {
    fn scheme(&self) -> &[u32] {
        &self.scheme
    }
}
