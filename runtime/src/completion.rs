//! Rules deciding when a block is finished.
//!
//! A block asks its strategies after `next` and after any event a strategy
//! watches. The first strategy that says yes supplies the completion
//! actions, and the block latches so it can only complete once.

use std::fmt;

use crate::action::Action;
use crate::block::RuntimeBlock;
use crate::event::{RuntimeEvent, names};
use crate::memory::Memory;

#[derive(Debug, Clone, Copy)]
pub enum CompletionTrigger<'a> {
    Next,
    Event(&'a RuntimeEvent),
}

impl CompletionTrigger<'_> {
    fn event_name(&self) -> Option<&str> {
        match self {
            CompletionTrigger::Next => None,
            CompletionTrigger::Event(event) => Some(&event.name),
        }
    }
}

pub struct CompletionView<'a> {
    pub block: &'a RuntimeBlock,
    pub memory: &'a Memory,
    pub now: i64,
    pub trigger: CompletionTrigger<'a>,
}

pub trait CompletionStrategy: fmt::Debug {
    /// Strategies with the same name replace each other in a builder.
    fn name(&self) -> &'static str;

    fn should_complete(&self, view: &CompletionView<'_>) -> bool;

    fn completion_actions(&self, view: &CompletionView<'_>) -> Vec<Action> {
        vec![Action::PopBlock {
            key: view.block.key(),
        }]
    }

    /// Events that trigger a check besides `next`.
    fn watched_events(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Complete when the block's timer runs out, or on an explicit
/// `timer:complete`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerExpiry;

impl CompletionStrategy for TimerExpiry {
    fn name(&self) -> &'static str {
        "timer-expiry"
    }

    fn should_complete(&self, view: &CompletionView<'_>) -> bool {
        if view.trigger.event_name() == Some(names::TIMER_COMPLETE) {
            return true;
        }
        view.block.timer().is_some_and(|t| t.is_expired(view.now))
    }

    fn watched_events(&self) -> Vec<&str> {
        vec![names::TIMER_TICK, names::TIMER_COMPLETE]
    }
}

/// Complete once the block's loop has no rounds left.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundsExhausted;

impl CompletionStrategy for RoundsExhausted {
    fn name(&self) -> &'static str {
        "rounds-exhausted"
    }

    fn should_complete(&self, view: &CompletionView<'_>) -> bool {
        view.block.completion_source().is_some_and(|c| c.is_complete())
    }

    fn watched_events(&self) -> Vec<&str> {
        vec![names::TIMER_TICK]
    }
}

type Predicate = Box<dyn Fn(&CompletionView<'_>) -> bool>;

/// Complete on `next` and/or on named events, optionally gated by a
/// predicate.
pub struct ConditionCompletion {
    name: &'static str,
    on_next: bool,
    events: Vec<String>,
    predicate: Option<Predicate>,
}

impl ConditionCompletion {
    /// Complete as soon as the user moves on.
    pub fn on_next() -> Self {
        ConditionCompletion {
            name: "on-next",
            on_next: true,
            events: Vec::new(),
            predicate: None,
        }
    }

    pub fn on_events(events: &[&str]) -> Self {
        ConditionCompletion {
            name: "on-event",
            on_next: false,
            events: events.iter().map(|e| e.to_string()).collect(),
            predicate: None,
        }
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn and_next(mut self) -> Self {
        self.on_next = true;
        self
    }

    pub fn when(mut self, predicate: impl Fn(&CompletionView<'_>) -> bool + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }
}

impl fmt::Debug for ConditionCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionCompletion")
            .field("name", &self.name)
            .field("on_next", &self.on_next)
            .field("events", &self.events)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl CompletionStrategy for ConditionCompletion {
    fn name(&self) -> &'static str {
        self.name
    }

    fn should_complete(&self, view: &CompletionView<'_>) -> bool {
        let triggered = match view.trigger.event_name() {
            None => self.on_next,
            Some(name) => self.events.iter().any(|e| e == name),
        };
        triggered && self.predicate.as_ref().is_none_or(|p| p(view))
    }

    fn watched_events(&self) -> Vec<&str> {
        self.events.iter().map(String::as_str).collect()
    }
}
