//! Just-in-time compilation of statements into runtime blocks.
//!
//! Child groups are compiled only when their parent is ready to run them, so
//! whatever the parent has published by then (a rep target for this round,
//! say) flows into the compiled child.

mod strategies;
mod strategy;

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};
use wod::WodScript;
use wod::fragment::{Fragment, merge_by_origin};
use wod::statement::CodeStatement;

pub use strategies::{
    CountdownStrategy, EffortStrategy, RepeatingCountdownStrategy, RepeatingRepsStrategy,
    RepeatingTimedStrategy, RoundsStrategy, TimeBoundStrategy, TimerStrategy,
};
pub use strategy::{BlockStrategy, LegacyAdapter, LegacyStrategy};

use crate::block::{BlockBuilder, BlockKey, KeySequence, RuntimeBlock};
use crate::dialect::{CrossFitDialect, DialectRegistry};
use crate::error::RuntimeError;
use crate::memory::{Memory, Owner, SearchCriteria};

/// Memory kinds with this prefix are fragments a parent promotes to the
/// children it compiles.
pub const PROMOTED_FRAGMENT_PREFIX: &str = "fragment:";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Read-only view of the runtime during one compilation.
pub struct CompileContext<'a> {
    pub memory: &'a Memory,
    pub script: &'a WodScript,
    pub keys: &'a KeySequence,
    /// Keys on the stack, top first. The first is the parent of whatever is
    /// being compiled.
    pub stack: &'a [BlockKey],
    pub now: i64,
}

impl<'a> CompileContext<'a> {
    pub fn new(memory: &'a Memory, script: &'a WodScript, keys: &'a KeySequence) -> Self {
        CompileContext {
            memory,
            script,
            keys,
            stack: &[],
            now: 0,
        }
    }

    pub fn with_stack(mut self, stack: &'a [BlockKey]) -> Self {
        self.stack = stack;
        self
    }

    pub fn at(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn parent(&self) -> Option<BlockKey> {
        self.stack.first().copied()
    }

    /// Fragments the parent published for its children.
    pub fn promoted_fragments(&self) -> Vec<Fragment> {
        let Some(parent) = self.parent() else {
            return Vec::new();
        };
        self.memory
            .search(&SearchCriteria::new().owned_by(Owner::Block(parent)).public())
            .iter()
            .filter(|r| r.kind.starts_with(PROMOTED_FRAGMENT_PREFIX))
            .filter_map(|r| self.memory.typed::<Fragment>(r))
            .filter_map(|r| self.memory.get(&r))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters collected across compilations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileMetrics {
    pub compilations: usize,
    /// Compilations where no strategy matched.
    pub misses: usize,
    /// How often each strategy took part in a compilation.
    pub by_strategy: BTreeMap<&'static str, usize>,
    /// Total time spent compiling.
    pub total: Duration,
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct JitCompiler {
    strategies: Vec<Box<dyn BlockStrategy>>,
    dialects: DialectRegistry,
    metrics: CompileMetrics,
}

impl JitCompiler {
    /// A compiler with no strategies or dialects.
    pub fn new() -> Self {
        JitCompiler::default()
    }

    /// The standard strategy set and the CrossFit dialect.
    pub fn with_defaults() -> Self {
        let mut compiler = JitCompiler::new();
        compiler.register_strategy(RepeatingCountdownStrategy);
        compiler.register_strategy(RepeatingTimedStrategy);
        compiler.register_strategy(RepeatingRepsStrategy);
        compiler.register_strategy(TimeBoundStrategy);
        compiler.register_strategy(TimerStrategy);
        compiler.register_strategy(RoundsStrategy);
        compiler.register_strategy(CountdownStrategy);
        compiler.register_strategy(EffortStrategy);
        compiler.dialects.register(CrossFitDialect);
        compiler
    }

    pub fn register_strategy(&mut self, strategy: impl BlockStrategy + 'static) {
        self.strategies.push(Box::new(strategy));
    }

    pub fn register_legacy(&mut self, strategy: impl LegacyStrategy + 'static) {
        self.register_strategy(LegacyAdapter(strategy));
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn dialects_mut(&mut self) -> &mut DialectRegistry {
        &mut self.dialects
    }

    pub fn metrics(&self) -> &CompileMetrics {
        &self.metrics
    }

    /// Copies of `statements` with dialect hints and the parent's promoted
    /// fragments applied.
    pub fn prepare(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> Vec<CodeStatement> {
        let mut prepared = statements.to_vec();
        self.dialects.process(&mut prepared);
        let promoted = ctx.promoted_fragments();
        if !promoted.is_empty() {
            for statement in &mut prepared {
                merge_by_origin(&mut statement.fragments, &promoted);
            }
        }
        prepared
    }

    /// Matching strategies, highest priority first. Equal priorities keep
    /// registration order.
    pub fn select(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> Vec<&dyn BlockStrategy> {
        let mut matched: Vec<&dyn BlockStrategy> = self
            .strategies
            .iter()
            .filter(|s| s.matches(statements, ctx))
            .map(|s| s.as_ref())
            .collect();
        matched.sort_by_key(|s| Reverse(s.priority()));
        matched
    }

    /// Names of the strategies that would build `statements`, in order.
    pub fn plan(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> Vec<&'static str> {
        let prepared = self.prepare(statements, ctx);
        self.select(&prepared, ctx).iter().map(|s| s.name()).collect()
    }

    /// Compile a group of statements. `Ok(None)` when nothing matches.
    pub fn compile(
        &mut self,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<Option<RuntimeBlock>, RuntimeError> {
        let started = Instant::now();
        let ids: Vec<usize> = statements.iter().map(|s| s.id).collect();
        self.metrics.compilations += 1;

        let prepared = self.prepare(statements, ctx);
        let selected = self.select(&prepared, ctx);
        let names: Vec<&'static str> = selected.iter().map(|s| s.name()).collect();

        let block = match selected.first() {
            None => None,
            Some(top) => match top.as_legacy() {
                Some(legacy) => Some(legacy.compile(&prepared, ctx)?),
                None => {
                    let mut builder = BlockBuilder::new();
                    for strategy in &selected {
                        strategy.apply(&mut builder, &prepared, ctx)?;
                    }
                    Some(builder.build()?)
                }
            },
        };

        self.metrics.total += started.elapsed();
        match &block {
            Some(block) => {
                for name in &names {
                    *self.metrics.by_strategy.entry(*name).or_default() += 1;
                }
                debug!(
                    statements = ?ids,
                    block = %block.key(),
                    label = block.label(),
                    strategies = ?names,
                    "compiled"
                );
            }
            None => {
                self.metrics.misses += 1;
                warn!(statements = ?ids, "no strategy matched");
            }
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use wod::fragment::{FragmentValue, LapKind};

    use super::*;
    use crate::block::BlockType;
    use crate::memory::{BlockContext, Visibility};

    #[derive(Debug)]
    struct Whole;

    impl LegacyStrategy for Whole {
        fn name(&self) -> &'static str {
            "whole"
        }

        fn priority(&self) -> i32 {
            1_000
        }

        fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
            statements.iter().any(|s| s.effort() == Some("Legacy"))
        }

        fn compile(
            &self,
            statements: &[CodeStatement],
            ctx: &CompileContext<'_>,
        ) -> Result<RuntimeBlock, RuntimeError> {
            let key = ctx.keys.next();
            let mut builder = BlockBuilder::new();
            builder
                .set_key(key)
                .set_context(BlockContext::new(key))
                .set_label("legacy")
                .set_source_ids(statements.iter().map(|s| s.id).collect());
            builder.build()
        }
    }

    fn effort(id: usize, name: &str) -> CodeStatement {
        CodeStatement::new(id, vec![Fragment::parsed(FragmentValue::Effort(name.into()))])
    }

    #[test]
    fn empty_compiler_misses() {
        let (memory, script, keys) = (Memory::new(), WodScript::default(), KeySequence::new());
        let ctx = CompileContext::new(&memory, &script, &keys);
        let mut compiler = JitCompiler::new();
        assert!(compiler.compile(&[effort(1, "Run")], &ctx).unwrap().is_none());
        assert_eq!(compiler.metrics().misses, 1);
    }

    #[test]
    fn legacy_top_match_builds_the_whole_block() {
        let (memory, script, keys) = (Memory::new(), WodScript::default(), KeySequence::new());
        let ctx = CompileContext::new(&memory, &script, &keys);
        let mut compiler = JitCompiler::with_defaults();
        compiler.register_legacy(Whole);

        let block = compiler.compile(&[effort(1, "Legacy")], &ctx).unwrap().unwrap();
        assert_eq!(block.label(), "legacy");
        assert!(block.behavior_kinds().is_empty());

        let block = compiler.compile(&[effort(2, "Run")], &ctx).unwrap().unwrap();
        assert_eq!(block.block_type(), BlockType::Effort);
        assert_eq!(compiler.metrics().by_strategy.get("whole"), Some(&1));
        assert_eq!(compiler.metrics().by_strategy.get("effort"), Some(&2));
    }

    #[test]
    fn parent_fragments_are_merged_by_origin() {
        let mut memory = Memory::new();
        let parent = BlockKey(1);
        memory.allocate(
            "fragment:rep-target",
            Owner::Block(parent),
            Fragment::new(
                FragmentValue::Rep(15),
                wod::fragment::MetricBehavior::Defined,
                wod::fragment::FragmentOrigin::Compiler,
            ),
            Visibility::Public,
        );
        memory.allocate(
            "fragment:lap",
            Owner::Block(parent),
            Fragment::parsed(FragmentValue::Lap(LapKind::RoundRobin)),
            Visibility::Private,
        );
        let (script, keys) = (WodScript::default(), KeySequence::new());
        let stack = [parent];
        let ctx = CompileContext::new(&memory, &script, &keys).with_stack(&stack);

        let mut pullups = effort(2, "Pullups");
        pullups.fragments.push(Fragment::parsed(FragmentValue::Rep(5)));
        let prepared = JitCompiler::new().prepare(&[pullups], &ctx);
        assert_eq!(prepared[0].reps(), vec![15]);
        assert!(prepared[0].fragments.iter().all(|f| f.value != FragmentValue::Lap(LapKind::RoundRobin)));
    }
}
