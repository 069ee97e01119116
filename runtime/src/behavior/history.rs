use tracing::debug;

use super::metric::METRIC;
use super::{Behavior, BehaviorContext, BehaviorKind, BehaviorPriority, HookResult, PriorityTier};
use crate::memory::{Owner, SearchCriteria, TypedMemoryReference, Visibility};
use crate::state::{ExecutionRecord, RuntimeMetric};

pub const EXECUTION_RECORD: &str = "execution-record";

/// Records when a block was on the stack and what it measured. The record is
/// runtime-owned so it outlives the block.
#[derive(Debug, Default)]
pub struct HistoryBehavior {
    record: Option<TypedMemoryReference<ExecutionRecord>>,
}

impl HistoryBehavior {
    pub fn new() -> Self {
        HistoryBehavior::default()
    }
}

impl Behavior for HistoryBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::History
    }

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Infrastructure, 0)
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        let record = ExecutionRecord {
            block_key: ctx.key,
            parent_key: ctx.parent(),
            block_type: ctx.block_type,
            label: ctx.label.to_string(),
            source_ids: ctx.source_ids.to_vec(),
            start_time: ctx.now,
            end_time: None,
            metrics: Vec::new(),
        };
        self.record = Some(ctx.memory.allocate(
            EXECUTION_RECORD,
            Owner::Runtime,
            record,
            Visibility::Public,
        ));
        Ok(Vec::new())
    }

    fn on_pop(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        let Some(record) = &self.record else {
            return Ok(Vec::new());
        };
        let metrics: Vec<RuntimeMetric> = ctx.memory.search_values(
            &SearchCriteria::new()
                .owned_by(Owner::Block(ctx.key))
                .of_kind(METRIC),
        );
        let now = ctx.now;
        ctx.memory.update(record, |r| {
            r.end_time = Some(now);
            r.metrics = metrics;
        })?;
        debug!(block = %ctx.key, label = ctx.label, "execution record closed");
        Ok(Vec::new())
    }
}
