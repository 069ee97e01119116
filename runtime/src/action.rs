use crate::block::{BlockKey, RuntimeBlock};
use crate::event::{HandlerId, HandlerRegistration, RuntimeEvent};

/// A discrete side effect requested by a behavior, a handler or the
/// runtime itself. Actions are executed one at a time; an action may produce
/// further actions, which run before its remaining siblings.
#[derive(Debug)]
pub enum Action {
    /// Push and mount a block.
    PushBlock(Box<RuntimeBlock>),
    /// Pop the block with this key, unwinding anything above it first. Skipped
    /// if the block is no longer on the stack.
    PopBlock { key: BlockKey },
    /// Pop everything above the block with this key.
    UnwindTo { key: BlockKey },
    /// Advance the current block.
    NextBlock,
    /// Compile a child group of `parent` and push the result.
    CompileChildren {
        parent: BlockKey,
        statement_ids: Vec<usize>,
    },
    EmitEvent(RuntimeEvent),
    RegisterHandler(HandlerRegistration),
    UnregisterHandler(HandlerId),
    /// Unwind the whole stack down to the root and pop it.
    EndWorkout,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::PushBlock(_) => "push-block",
            Action::PopBlock { .. } => "pop-block",
            Action::UnwindTo { .. } => "unwind-to",
            Action::NextBlock => "next-block",
            Action::CompileChildren { .. } => "compile-children",
            Action::EmitEvent(_) => "emit-event",
            Action::RegisterHandler(_) => "register-handler",
            Action::UnregisterHandler(_) => "unregister-handler",
            Action::EndWorkout => "end-workout",
        }
    }
}
