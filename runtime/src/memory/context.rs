use tracing::trace;

use crate::block::BlockKey;
use crate::error::RuntimeError;
use crate::memory::{Memory, MemoryReference, MemoryType, Owner, TypedMemoryReference, Visibility};

/// Per-block allocation scope. Everything allocated through it is owned by
/// the block and goes away when the context is released.
#[derive(Debug)]
pub struct BlockContext {
    owner: BlockKey,
    references: Vec<MemoryReference>,
    released: bool,
}

impl BlockContext {
    pub fn new(owner: BlockKey) -> Self {
        BlockContext {
            owner,
            references: Vec::new(),
            released: false,
        }
    }

    pub fn owner(&self) -> BlockKey {
        self.owner
    }

    pub fn references(&self) -> &[MemoryReference] {
        &self.references
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn allocate<T: MemoryType>(
        &mut self,
        memory: &mut Memory,
        kind: &str,
        value: T,
        visibility: Visibility,
    ) -> Result<TypedMemoryReference<T>, RuntimeError> {
        if self.released {
            return Err(RuntimeError::ContextReleased { owner: self.owner });
        }
        let reference = memory.allocate(kind, Owner::Block(self.owner), value, visibility);
        self.references.push(reference.reference().clone());
        Ok(reference)
    }

    /// First live reference of `kind` allocated through this context.
    pub fn find<T: MemoryType>(&self, memory: &Memory, kind: &str) -> Option<TypedMemoryReference<T>> {
        self.references
            .iter()
            .filter(|r| r.kind == kind)
            .find_map(|r| memory.typed::<T>(r))
    }

    /// Release every reference this block owns. Idempotent.
    pub fn release(&mut self, memory: &mut Memory) {
        if self.released {
            return;
        }
        for reference in self.references.drain(..) {
            memory.release(&reference);
        }
        let stray = memory.release_owner(Owner::Block(self.owner));
        trace!(block = %self.owner, stray, "released block context");
        self.released = true;
    }
}
