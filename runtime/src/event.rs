use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::action::Action;
use crate::block::BlockKey;
use crate::memory::Owner;

/// Well-known event names.
pub mod names {
    pub const NEXT: &str = "next";
    pub const STOP: &str = "stop";
    pub const TIMER_START: &str = "timer:start";
    pub const TIMER_TICK: &str = "timer:tick";
    pub const TIMER_PAUSE: &str = "timer:pause";
    pub const TIMER_RESUME: &str = "timer:resume";
    pub const TIMER_COMPLETE: &str = "timer:complete";
    pub const WORKOUT_COMPLETE: &str = "workout:complete";
}

/// Key in `data` that targets an event at one block.
pub const BLOCK_KEY_FIELD: &str = "blockKey";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeEvent {
    pub name: String,
    pub timestamp: i64,
    pub data: Option<Value>,
}

impl RuntimeEvent {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        RuntimeEvent {
            name: name.into(),
            timestamp,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Address the event to a single block.
    pub fn for_block(self, key: BlockKey) -> Self {
        self.with_data(serde_json::json!({ BLOCK_KEY_FIELD: key.0 }))
    }

    pub fn target(&self) -> Option<BlockKey> {
        self.data
            .as_ref()?
            .get(BLOCK_KEY_FIELD)?
            .as_u64()
            .map(BlockKey)
    }

    /// Clock events reach every block on the stack, bottom first. All others
    /// go to the current block only.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self.name.as_str(),
            names::TIMER_TICK | names::TIMER_PAUSE | names::TIMER_RESUME
        )
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub trait EventHandler: fmt::Debug {
    fn handle(&self, event: &RuntimeEvent) -> Vec<Action>;
}

/// Turns `next` into a `NextBlock` action.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextHandler;

impl EventHandler for NextHandler {
    fn handle(&self, _event: &RuntimeEvent) -> Vec<Action> {
        vec![Action::NextBlock]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EndWorkoutHandler;

impl EventHandler for EndWorkoutHandler {
    fn handle(&self, _event: &RuntimeEvent) -> Vec<Action> {
        vec![Action::EndWorkout]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        HandlerId(id.into())
    }

    /// Deterministic id so the registering block can unregister later.
    pub fn scoped(owner: Owner, event: &str) -> Self {
        HandlerId(format!("{}:{}", owner, event))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct HandlerRegistration {
    pub id: HandlerId,
    pub owner: Owner,
    pub event: String,
    pub handler: Box<dyn EventHandler>,
}

impl HandlerRegistration {
    pub fn new(
        id: HandlerId,
        owner: Owner,
        event: &str,
        handler: impl EventHandler + 'static,
    ) -> Self {
        HandlerRegistration {
            id,
            owner,
            event: event.to_string(),
            handler: Box::new(handler),
        }
    }
}

/// Named event handlers. Dispatch runs matching handlers in registration
/// order and collects their actions.
#[derive(Debug, Default)]
pub struct EventBus {
    handlers: Vec<HandlerRegistration>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register a handler, replacing any with the same id.
    pub fn register(&mut self, registration: HandlerRegistration) {
        trace!(id = %registration.id, event = %registration.event, "register handler");
        match self.handlers.iter_mut().find(|h| h.id == registration.id) {
            Some(existing) => *existing = registration,
            None => self.handlers.push(registration),
        }
    }

    pub fn unregister(&mut self, id: &HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| &h.id != id);
        before != self.handlers.len()
    }

    pub fn unregister_owner(&mut self, owner: Owner) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.owner != owner);
        before - self.handlers.len()
    }

    pub fn dispatch(&self, event: &RuntimeEvent) -> Vec<Action> {
        self.handlers
            .iter()
            .filter(|h| h.event == event.name)
            .flat_map(|h| h.handler.handle(event))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
