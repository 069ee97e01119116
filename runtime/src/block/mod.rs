mod builder;

use std::cell::Cell;
use std::fmt;

use serde::Serialize;
use tracing::{debug, trace};
use wod::WodScript;
use wod::fragment::Fragment;

pub use builder::BlockBuilder;

use crate::action::Action;
use crate::behavior::{
    Behavior, BehaviorContext, BehaviorKind, ChildIndexSource, CompletionSource, HookResult,
    RepSource, RoundSource, TimerSource,
};
use crate::completion::{CompletionStrategy, CompletionTrigger, CompletionView};
use crate::error::RuntimeError;
use crate::event::RuntimeEvent;
use crate::memory::{BlockContext, Memory};
use crate::state::LoopState;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockKey(pub u64);

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// Hands out unique block keys.
#[derive(Debug, Default)]
pub struct KeySequence {
    last: Cell<u64>,
}

impl KeySequence {
    pub fn new() -> Self {
        KeySequence::default()
    }

    pub fn next(&self) -> BlockKey {
        let key = self.last.get() + 1;
        self.last.set(key);
        BlockKey(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockType {
    Root,
    Idle,
    Effort,
    Group,
    Timer,
    Countdown,
    Amrap,
    Rounds,
    Emom,
    Tabata,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Root => "Root",
            BlockType::Idle => "Idle",
            BlockType::Effort => "Effort",
            BlockType::Group => "Group",
            BlockType::Timer => "Timer",
            BlockType::Countdown => "Countdown",
            BlockType::Amrap => "AMRAP",
            BlockType::Rounds => "Rounds",
            BlockType::Emom => "EMOM",
            BlockType::Tabata => "Tabata",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// RuntimeBlock
// ---------------------------------------------------------------------------

/// What the runtime lends a block for one lifecycle call.
pub struct BlockEnv<'a> {
    pub memory: &'a mut Memory,
    pub script: &'a WodScript,
    pub keys: &'a KeySequence,
    /// Blocks below this one on the stack, nearest first.
    pub ancestors: &'a [BlockKey],
    pub now: i64,
    /// Set while the runtime is paused.
    pub paused: bool,
}

/// A unit of execution on the stack.
#[derive(Debug)]
pub struct RuntimeBlock {
    key: BlockKey,
    label: String,
    block_type: BlockType,
    source_ids: Vec<usize>,
    fragments: Vec<Fragment>,
    behaviors: Vec<Box<dyn Behavior>>,
    completions: Vec<Box<dyn CompletionStrategy>>,
    context: BlockContext,
    resume_parent: bool,
    completed: bool,
}

pub(crate) struct BlockParts {
    pub key: BlockKey,
    pub label: String,
    pub block_type: BlockType,
    pub source_ids: Vec<usize>,
    pub fragments: Vec<Fragment>,
    pub behaviors: Vec<Box<dyn Behavior>>,
    pub completions: Vec<Box<dyn CompletionStrategy>>,
    pub context: BlockContext,
    pub resume_parent: bool,
}

impl RuntimeBlock {
    /// Validate behavior dependencies and order behaviors by priority.
    pub(crate) fn new(parts: BlockParts) -> Result<Self, RuntimeError> {
        let BlockParts {
            key,
            label,
            block_type,
            source_ids,
            fragments,
            mut behaviors,
            completions,
            context,
            resume_parent,
        } = parts;

        let kinds: Vec<BehaviorKind> = behaviors.iter().map(|b| b.kind()).collect();
        for behavior in &behaviors {
            if let Some(&required) = behavior
                .required_behaviors()
                .iter()
                .find(|k| !kinds.contains(k))
            {
                return Err(RuntimeError::MissingBehavior {
                    block: key,
                    behavior: behavior.kind(),
                    required,
                });
            }
            if let Some(&conflicting) = behavior
                .conflicting_behaviors()
                .iter()
                .find(|k| kinds.contains(k))
            {
                return Err(RuntimeError::BehaviorConflict {
                    block: key,
                    behavior: behavior.kind(),
                    conflicting,
                });
            }
        }
        behaviors.sort_by_key(|b| b.priority());

        Ok(RuntimeBlock {
            key,
            label,
            block_type,
            source_ids,
            fragments,
            behaviors,
            completions,
            context,
            resume_parent,
            completed: false,
        })
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn source_ids(&self) -> &[usize] {
        &self.source_ids
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn context(&self) -> &BlockContext {
        &self.context
    }

    /// Whether popping this block should advance its parent.
    pub fn resumes_parent(&self) -> bool {
        self.resume_parent
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn behavior_kinds(&self) -> Vec<BehaviorKind> {
        self.behaviors.iter().map(|b| b.kind()).collect()
    }

    pub fn has_behavior(&self, kind: BehaviorKind) -> bool {
        self.behaviors.iter().any(|b| b.kind() == kind)
    }

    pub fn completion_names(&self) -> Vec<&'static str> {
        self.completions.iter().map(|c| c.name()).collect()
    }

    // -- capability queries --------------------------------------------------

    pub fn timer(&self) -> Option<&dyn TimerSource> {
        self.behaviors.iter().find_map(|b| b.as_timer_source())
    }

    pub fn rounds(&self) -> Option<&dyn RoundSource> {
        self.behaviors.iter().find_map(|b| b.as_round_source())
    }

    pub fn reps(&self) -> Option<&dyn RepSource> {
        self.behaviors.iter().find_map(|b| b.as_rep_source())
    }

    /// The first behavior able to report completion.
    pub fn completion_source(&self) -> Option<&dyn CompletionSource> {
        self.behaviors.iter().find_map(|b| b.as_completion_source())
    }

    pub fn loop_state(&self) -> Option<LoopState> {
        self.rounds().map(|r| r.loop_state().clone())
    }

    pub fn child_index_source_mut(&mut self) -> Option<&mut dyn ChildIndexSource> {
        self.behaviors
            .iter_mut()
            .find_map(|b| b.as_child_index_source_mut())
    }

    // -- lifecycle ------------------------------------------------------------

    pub fn mount(&mut self, env: &mut BlockEnv<'_>) -> HookResult {
        trace!(block = %self.key, label = %self.label, "mount");
        self.run_hook(env, |b, ctx| b.on_push(ctx))
    }

    pub fn next(&mut self, env: &mut BlockEnv<'_>) -> HookResult {
        if self.completed {
            return Ok(Vec::new());
        }
        let mut actions = self.run_hook(env, |b, ctx| b.on_next(ctx))?;
        actions.extend(self.evaluate_completion(CompletionTrigger::Next, env.memory, env.now));
        Ok(actions)
    }

    /// Deliver an event. Events targeted at another block are ignored.
    pub fn handle_event(&mut self, event: &RuntimeEvent, env: &mut BlockEnv<'_>) -> HookResult {
        if self.completed {
            return Ok(Vec::new());
        }
        if event.target().is_some_and(|target| target != self.key) {
            return Ok(Vec::new());
        }
        let mut actions = self.run_hook(env, |b, ctx| b.on_event(event, ctx))?;
        let watched = self
            .completions
            .iter()
            .any(|c| c.watched_events().contains(&event.name.as_str()));
        if watched {
            actions.extend(self.evaluate_completion(
                CompletionTrigger::Event(event),
                env.memory,
                env.now,
            ));
        }
        Ok(actions)
    }

    pub fn unmount(&mut self, env: &mut BlockEnv<'_>) -> HookResult {
        trace!(block = %self.key, "unmount");
        self.run_hook(env, |b, ctx| b.on_pop(ctx))
    }

    /// Final cleanup: behaviors dispose, then the memory context goes.
    pub fn dispose(&mut self, memory: &mut Memory) {
        for behavior in &mut self.behaviors {
            behavior.on_dispose(memory);
        }
        self.context.release(memory);
    }

    fn run_hook<F>(&mut self, env: &mut BlockEnv<'_>, mut hook: F) -> HookResult
    where
        F: FnMut(&mut Box<dyn Behavior>, &mut BehaviorContext<'_>) -> HookResult,
    {
        let mut actions = Vec::new();
        for behavior in self.behaviors.iter_mut() {
            let mut ctx = BehaviorContext {
                memory: &mut *env.memory,
                context: &mut self.context,
                key: self.key,
                label: &self.label,
                block_type: self.block_type,
                source_ids: &self.source_ids,
                ancestors: env.ancestors,
                script: env.script,
                keys: env.keys,
                now: env.now,
                paused: env.paused,
            };
            actions.extend(hook(behavior, &mut ctx)?);
        }
        Ok(actions)
    }

    fn evaluate_completion(
        &mut self,
        trigger: CompletionTrigger<'_>,
        memory: &Memory,
        now: i64,
    ) -> Vec<Action> {
        if self.completed {
            return Vec::new();
        }
        let view = CompletionView {
            block: self,
            memory,
            now,
            trigger,
        };
        let Some(strategy) = self.completions.iter().find(|c| c.should_complete(&view)) else {
            return Vec::new();
        };
        let name = strategy.name();
        let actions = strategy.completion_actions(&view);
        self.completed = true;
        debug!(block = %self.key, label = %self.label, strategy = name, "block complete");
        actions
    }
}
