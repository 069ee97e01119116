use crate::behavior::BehaviorKind;
use crate::block::BlockKey;
use crate::memory::MemoryId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("block {block} was built without a memory context")]
    MissingContext { block: BlockKey },
    #[error("block was built without a key")]
    MissingKey,
    #[error("block {block}: behavior {behavior} requires {required}")]
    MissingBehavior {
        block: BlockKey,
        behavior: BehaviorKind,
        required: BehaviorKind,
    },
    #[error("block {block}: behavior {behavior} conflicts with {conflicting}")]
    BehaviorConflict {
        block: BlockKey,
        behavior: BehaviorKind,
        conflicting: BehaviorKind,
    },
    #[error("memory reference {id} ({kind}) has been released")]
    InvalidReference { id: MemoryId, kind: String },
    #[error("memory context of {owner} has been released")]
    ContextReleased { owner: BlockKey },
    #[error("memory reference {id} holds {got}, expected {expected}")]
    TypeMismatch {
        id: MemoryId,
        expected: &'static str,
        got: &'static str,
    },
    #[error("no entry point: the script has no statements")]
    NoEntryPoint,
    #[error("unknown statement id {0}")]
    UnknownStatement(usize),
    #[error("more than {0} actions in a single dispatch")]
    ActionLimit(usize),
    #[error("{action} failed: {message}")]
    Action { action: &'static str, message: String },
}

impl RuntimeError {
    /// Errors that point at a defect in how a block was composed. These are
    /// never recorded and skipped; they propagate to the caller.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RuntimeError::MissingContext { .. }
                | RuntimeError::MissingKey
                | RuntimeError::MissingBehavior { .. }
                | RuntimeError::BehaviorConflict { .. }
        )
    }
}
