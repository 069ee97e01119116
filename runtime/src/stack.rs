use tracing::trace;

use crate::block::{BlockKey, RuntimeBlock};
use crate::event::EventBus;
use crate::memory::{Memory, Owner};

/// Push/pop contract shared by the plain stack and its cleanup decorator.
pub trait BlockStack {
    fn push(&mut self, block: RuntimeBlock);
    fn pop(&mut self) -> Option<RuntimeBlock>;
    fn current(&self) -> Option<&RuntimeBlock>;
    fn depth(&self) -> usize;
}

/// LIFO of active blocks. The top is the current block; an empty stack means
/// the workout is over.
#[derive(Debug, Default)]
pub struct RuntimeStack {
    /// Bottom first.
    blocks: Vec<RuntimeBlock>,
}

impl RuntimeStack {
    pub fn new() -> Self {
        RuntimeStack::default()
    }

    pub fn current_mut(&mut self) -> Option<&mut RuntimeBlock> {
        self.blocks.last_mut()
    }

    /// Blocks from the top down.
    pub fn blocks(&self) -> impl Iterator<Item = &RuntimeBlock> {
        self.blocks.iter().rev()
    }

    pub fn bottom_first(&self) -> impl Iterator<Item = &RuntimeBlock> {
        self.blocks.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, key: BlockKey) -> bool {
        self.position(key).is_some()
    }

    /// Index from the bottom.
    pub fn position(&self, key: BlockKey) -> Option<usize> {
        self.blocks.iter().position(|b| b.key() == key)
    }

    pub fn get(&self, index: usize) -> Option<&RuntimeBlock> {
        self.blocks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RuntimeBlock> {
        self.blocks.get_mut(index)
    }

    pub fn find(&self, key: BlockKey) -> Option<&RuntimeBlock> {
        self.blocks.iter().find(|b| b.key() == key)
    }

    pub fn keys(&self) -> Vec<BlockKey> {
        self.blocks().map(RuntimeBlock::key).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.blocks().map(RuntimeBlock::label).collect()
    }
}

impl BlockStack for RuntimeStack {
    fn push(&mut self, block: RuntimeBlock) {
        trace!(block = %block.key(), depth = self.blocks.len() + 1, "push");
        self.blocks.push(block);
    }

    fn pop(&mut self) -> Option<RuntimeBlock> {
        let block = self.blocks.pop()?;
        trace!(block = %block.key(), depth = self.blocks.len(), "pop");
        Some(block)
    }

    fn current(&self) -> Option<&RuntimeBlock> {
        self.blocks.last()
    }

    fn depth(&self) -> usize {
        self.blocks.len()
    }
}

/// Wraps a stack so that popping also disposes the block, releases its
/// memory and drops its event handlers.
pub struct ScopedStack<'a> {
    stack: &'a mut RuntimeStack,
    memory: &'a mut Memory,
    events: &'a mut EventBus,
}

impl<'a> ScopedStack<'a> {
    pub fn new(stack: &'a mut RuntimeStack, memory: &'a mut Memory, events: &'a mut EventBus) -> Self {
        ScopedStack {
            stack,
            memory,
            events,
        }
    }
}

impl BlockStack for ScopedStack<'_> {
    fn push(&mut self, block: RuntimeBlock) {
        self.stack.push(block);
    }

    fn pop(&mut self) -> Option<RuntimeBlock> {
        let mut block = self.stack.pop()?;
        block.dispose(self.memory);
        let handlers = self.events.unregister_owner(Owner::Block(block.key()));
        trace!(block = %block.key(), handlers, "disposed");
        Some(block)
    }

    fn current(&self) -> Option<&RuntimeBlock> {
        self.stack.current()
    }

    fn depth(&self) -> usize {
        self.stack.depth()
    }
}
