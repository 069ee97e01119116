use wod::fragment::Fragment;

use super::{BlockKey, BlockParts, BlockType, RuntimeBlock};
use crate::behavior::{Behavior, BehaviorKind};
use crate::completion::CompletionStrategy;
use crate::error::RuntimeError;
use crate::memory::BlockContext;

/// Accumulates a block from several strategies. Each strategy adds what it
/// knows about; later strategies fill gaps rather than overwrite.
#[derive(Debug)]
pub struct BlockBuilder {
    key: Option<BlockKey>,
    context: Option<BlockContext>,
    label: Option<String>,
    block_type: Option<BlockType>,
    fragments: Vec<Fragment>,
    source_ids: Vec<usize>,
    resume_parent: bool,
    behaviors: Vec<Box<dyn Behavior>>,
    completions: Vec<Box<dyn CompletionStrategy>>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        BlockBuilder {
            key: None,
            context: None,
            label: None,
            block_type: None,
            fragments: Vec::new(),
            source_ids: Vec::new(),
            resume_parent: true,
            behaviors: Vec::new(),
            completions: Vec::new(),
        }
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        BlockBuilder::default()
    }

    pub fn set_key(&mut self, key: BlockKey) -> &mut Self {
        self.key = Some(key);
        self
    }

    pub fn key(&self) -> Option<BlockKey> {
        self.key
    }

    pub fn set_context(&mut self, context: BlockContext) -> &mut Self {
        self.context = Some(context);
        self
    }

    pub fn set_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.label = Some(label.into());
        self
    }

    pub fn has_label(&self) -> bool {
        self.label.is_some()
    }

    pub fn set_block_type(&mut self, block_type: BlockType) -> &mut Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn block_type(&self) -> Option<BlockType> {
        self.block_type
    }

    pub fn set_fragments(&mut self, fragments: Vec<Fragment>) -> &mut Self {
        self.fragments = fragments;
        self
    }

    pub fn set_source_ids(&mut self, ids: Vec<usize>) -> &mut Self {
        self.source_ids = ids;
        self
    }

    pub fn set_resume_parent(&mut self, resume: bool) -> &mut Self {
        self.resume_parent = resume;
        self
    }

    /// Add a behavior, replacing one of the same kind in place.
    pub fn add_behavior<B: Behavior + 'static>(&mut self, behavior: B) -> &mut Self {
        let kind = behavior.kind();
        match self.behaviors.iter_mut().find(|b| b.kind() == kind) {
            Some(existing) => *existing = Box::new(behavior),
            None => self.behaviors.push(Box::new(behavior)),
        }
        self
    }

    pub fn add_behavior_if_missing<B: Behavior + 'static>(&mut self, behavior: B) -> &mut Self {
        if !self.has_behavior(behavior.kind()) {
            self.behaviors.push(Box::new(behavior));
        }
        self
    }

    pub fn has_behavior(&self, kind: BehaviorKind) -> bool {
        self.behaviors.iter().any(|b| b.kind() == kind)
    }

    /// Add a completion strategy, replacing one with the same name.
    pub fn add_completion<C: CompletionStrategy + 'static>(&mut self, completion: C) -> &mut Self {
        let name = completion.name();
        match self.completions.iter_mut().find(|c| c.name() == name) {
            Some(existing) => *existing = Box::new(completion),
            None => self.completions.push(Box::new(completion)),
        }
        self
    }

    pub fn has_completion(&self) -> bool {
        !self.completions.is_empty()
    }

    pub fn build(self) -> Result<RuntimeBlock, RuntimeError> {
        let key = self.key.ok_or(RuntimeError::MissingKey)?;
        let context = self
            .context
            .ok_or(RuntimeError::MissingContext { block: key })?;
        let block_type = self.block_type.unwrap_or(BlockType::Effort);

        RuntimeBlock::new(BlockParts {
            key,
            label: self.label.unwrap_or_else(|| block_type.to_string()),
            block_type,
            source_ids: self.source_ids,
            fragments: self.fragments,
            behaviors: self.behaviors,
            completions: self.completions,
            context,
            resume_parent: self.resume_parent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{LoopBehavior, RepSchemeBehavior, TimerBehavior, TimerSource};
    use crate::completion::{ConditionCompletion, TimerExpiry};

    #[test]
    fn build_requires_key_and_context() {
        assert_eq!(BlockBuilder::new().build().unwrap_err(), RuntimeError::MissingKey);

        let mut builder = BlockBuilder::new();
        builder.set_key(BlockKey(3));
        assert_eq!(
            builder.build().unwrap_err(),
            RuntimeError::MissingContext { block: BlockKey(3) }
        );
    }

    #[test]
    fn missing_dependency_is_a_configuration_error() {
        let mut builder = BlockBuilder::new();
        builder
            .set_key(BlockKey(1))
            .set_context(BlockContext::new(BlockKey(1)))
            .add_behavior(RepSchemeBehavior::new(vec![21, 15, 9]));
        let err = builder.build().unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            err,
            RuntimeError::MissingBehavior {
                required: BehaviorKind::Loop,
                ..
            }
        ));
    }

    #[test]
    fn same_kind_replaces_and_behaviors_sort_by_tier() {
        let mut builder = BlockBuilder::new();
        builder
            .set_key(BlockKey(1))
            .set_context(BlockContext::new(BlockKey(1)))
            .add_behavior(RepSchemeBehavior::new(vec![5]))
            .add_behavior(LoopBehavior::new(vec![vec![2]], Some(2)))
            .add_behavior(LoopBehavior::new(vec![vec![2]], Some(4)))
            .add_behavior_if_missing(TimerBehavior::count_up(None))
            .add_behavior_if_missing(TimerBehavior::count_down(1_000))
            .add_completion(TimerExpiry)
            .add_completion(ConditionCompletion::on_next())
            .add_completion(TimerExpiry);
        let block = builder.build().unwrap();

        assert_eq!(
            block.behavior_kinds(),
            vec![BehaviorKind::Timer, BehaviorKind::Loop, BehaviorKind::RepScheme]
        );
        assert_eq!(block.loop_state().unwrap().total_rounds, Some(4));
        assert_eq!(block.timer().unwrap().timer_state().duration, None);
        assert_eq!(block.completion_names(), vec!["timer-expiry", "on-next"]);
        assert_eq!(block.label(), "Effort");
    }
}
