//! Composable units of block functionality.
//!
//! A block is a key, a memory context and an ordered list of behaviors. Each
//! behavior hooks into the block lifecycle (push, next, event, pop, dispose)
//! and answers with actions for the runtime to execute. Behaviors talk to each
//! other only through memory and the capability traits below.

mod history;
mod looping;
mod metric;
mod rep_scheme;
mod root;
mod timer;

use std::fmt;

use serde::Serialize;
use wod::WodScript;

pub use history::{EXECUTION_RECORD, HistoryBehavior};
pub use looping::{LOOP_STATE, LoopBehavior};
pub use metric::{METRIC, METRICS_SNAPSHOT, MetricInheritanceBehavior, inherited_metrics};
pub use rep_scheme::{REP_TARGET, RepSchemeBehavior};
pub use root::RootBehavior;
pub use timer::{TIMER, TimerBehavior};

use crate::action::Action;
use crate::block::{BlockKey, BlockType, KeySequence};
use crate::error::RuntimeError;
use crate::event::RuntimeEvent;
use crate::memory::{BlockContext, Memory};
use crate::state::{LoopState, TimerState};

pub type HookResult = Result<Vec<Action>, RuntimeError>;

// ---------------------------------------------------------------------------
// Identity and ordering
// ---------------------------------------------------------------------------

/// Stable behavior identifiers, used for dependency checks and for replacing
/// a behavior of the same kind in a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BehaviorKind {
    Timer,
    Loop,
    RepScheme,
    MetricInheritance,
    History,
    Root,
    /// Behaviors defined outside this crate.
    Custom(&'static str),
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BehaviorKind::Timer => write!(f, "timer"),
            BehaviorKind::Loop => write!(f, "loop"),
            BehaviorKind::RepScheme => write!(f, "rep-scheme"),
            BehaviorKind::MetricInheritance => write!(f, "metric-inheritance"),
            BehaviorKind::History => write!(f, "history"),
            BehaviorKind::Root => write!(f, "root"),
            BehaviorKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Execution tiers, run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    Infrastructure,
    Pre,
    Core,
    Post,
    Cleanup,
}

/// Tier first, then `order` within the tier. Ties keep insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BehaviorPriority {
    pub tier: PriorityTier,
    pub order: u8,
}

impl BehaviorPriority {
    pub const fn new(tier: PriorityTier, order: u8) -> Self {
        BehaviorPriority { tier, order }
    }
}

// ---------------------------------------------------------------------------
// Hook context
// ---------------------------------------------------------------------------

/// What a behavior sees while one of its hooks runs.
pub struct BehaviorContext<'a> {
    pub memory: &'a mut Memory,
    pub context: &'a mut BlockContext,
    pub key: BlockKey,
    pub label: &'a str,
    pub block_type: BlockType,
    pub source_ids: &'a [usize],
    /// Enclosing blocks, nearest first.
    pub ancestors: &'a [BlockKey],
    pub script: &'a WodScript,
    pub keys: &'a KeySequence,
    pub now: i64,
    /// Blocks mounted while the runtime is paused start paused.
    pub paused: bool,
}

impl BehaviorContext<'_> {
    pub fn parent(&self) -> Option<BlockKey> {
        self.ancestors.first().copied()
    }
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

pub trait Behavior: fmt::Debug {
    fn kind(&self) -> BehaviorKind;

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Core, 0)
    }

    /// Kinds that must also be present on the block.
    fn required_behaviors(&self) -> &'static [BehaviorKind] {
        &[]
    }

    /// Kinds that must not be present on the block.
    fn conflicting_behaviors(&self) -> &'static [BehaviorKind] {
        &[]
    }

    fn on_push(&mut self, _ctx: &mut BehaviorContext<'_>) -> HookResult {
        Ok(Vec::new())
    }

    fn on_next(&mut self, _ctx: &mut BehaviorContext<'_>) -> HookResult {
        Ok(Vec::new())
    }

    fn on_event(&mut self, _event: &RuntimeEvent, _ctx: &mut BehaviorContext<'_>) -> HookResult {
        Ok(Vec::new())
    }

    fn on_pop(&mut self, _ctx: &mut BehaviorContext<'_>) -> HookResult {
        Ok(Vec::new())
    }

    /// Release anything held outside the block context.
    fn on_dispose(&mut self, _memory: &mut Memory) {}

    fn as_timer_source(&self) -> Option<&dyn TimerSource> {
        None
    }

    fn as_round_source(&self) -> Option<&dyn RoundSource> {
        None
    }

    fn as_rep_source(&self) -> Option<&dyn RepSource> {
        None
    }

    fn as_completion_source(&self) -> Option<&dyn CompletionSource> {
        None
    }

    fn as_child_index_source_mut(&mut self) -> Option<&mut dyn ChildIndexSource> {
        None
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub trait TimerSource {
    fn timer_state(&self) -> &TimerState;

    fn elapsed(&self, now: i64) -> i64 {
        self.timer_state().elapsed(now)
    }

    fn is_expired(&self, now: i64) -> bool {
        self.timer_state().is_expired(now)
    }
}

pub trait RoundSource {
    fn loop_state(&self) -> &LoopState;

    fn current_round(&self) -> u32 {
        self.loop_state().current_round
    }

    fn is_exhausted(&self) -> bool {
        self.loop_state().is_exhausted()
    }
}

/// Something that can tell the block its work is done.
pub trait CompletionSource {
    fn is_complete(&self) -> bool;
}

pub trait ChildIndexSource {
    fn current_child_index(&self) -> i64;

    fn has_next_child(&self) -> bool;

    /// Move to the next child group, wrapping into the next round when the
    /// groups run out. `None` when the loop is exhausted.
    fn advance_to_next_child(&mut self) -> Option<usize>;
}

pub trait RepSource {
    fn scheme(&self) -> &[u32];

    fn reps_for_round(&self, round: u32) -> Option<u32> {
        let scheme = self.scheme();
        if scheme.is_empty() || round == 0 {
            return None;
        }
        Some(scheme[(round as usize - 1) % scheme.len()])
    }
}
