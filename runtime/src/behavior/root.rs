use super::{Behavior, BehaviorContext, BehaviorKind, BehaviorPriority, HookResult, PriorityTier};
use crate::action::Action;
use crate::block::BlockKey;
use crate::bootstrap::{IdlePhase, idle_block};
use crate::event::{EndWorkoutHandler, HandlerId, HandlerRegistration, names};
use crate::memory::Owner;

/// Lifecycle of the workout as a whole: ends the workout on
/// `workout:complete` or `stop`, and hands over to the terminal idle block
/// once the root pops.
#[derive(Debug, Default)]
pub struct RootBehavior;

const END_EVENTS: [&str; 2] = [names::WORKOUT_COMPLETE, names::STOP];

fn handler_id(key: BlockKey, event: &str) -> HandlerId {
    HandlerId::scoped(Owner::Block(key), event)
}

impl Behavior for RootBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::Root
    }

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Post, 10)
    }

    fn conflicting_behaviors(&self) -> &'static [BehaviorKind] {
        &[BehaviorKind::RepScheme]
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        Ok(END_EVENTS
            .iter()
            .map(|event| {
                Action::RegisterHandler(HandlerRegistration::new(
                    handler_id(ctx.key, event),
                    Owner::Block(ctx.key),
                    event,
                    EndWorkoutHandler,
                ))
            })
            .collect())
    }

    fn on_pop(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        let mut actions: Vec<Action> = END_EVENTS
            .iter()
            .map(|event| Action::UnregisterHandler(handler_id(ctx.key, event)))
            .collect();
        let finished = idle_block(ctx.keys.next(), IdlePhase::Finished)?;
        actions.push(Action::PushBlock(Box::new(finished)));
        Ok(actions)
    }
}
