use super::{Behavior, BehaviorContext, BehaviorKind, BehaviorPriority, HookResult, PriorityTier};
use crate::block::BlockKey;
use crate::memory::{Memory, Owner, SearchCriteria, Visibility};
use crate::state::RuntimeMetric;

pub const METRIC: &str = "metric";
/// Older single-cell form: one `Vec<RuntimeMetric>` per block.
pub const METRICS_SNAPSHOT: &str = "metrics-snapshot";

/// Publishes the metrics a block's children inherit. The inherited base is
/// the nearest ancestor's public `metric` entries, else its
/// `metrics-snapshot`, else nothing; the block's own metrics are then laid
/// over that base by source id, so a leaf always carries its own numbers.
#[derive(Debug, Default)]
pub struct MetricInheritanceBehavior {
    initial: Vec<RuntimeMetric>,
    composed: Vec<RuntimeMetric>,
}

impl MetricInheritanceBehavior {
    pub fn new(initial: Vec<RuntimeMetric>) -> Self {
        MetricInheritanceBehavior {
            initial,
            composed: Vec::new(),
        }
    }

    /// Metrics after composition. Empty until the block is pushed.
    pub fn metrics(&self) -> &[RuntimeMetric] {
        &self.composed
    }
}

/// Metrics published by the nearest ancestor that published any.
pub fn inherited_metrics(memory: &Memory, ancestors: &[BlockKey]) -> Vec<RuntimeMetric> {
    for &ancestor in ancestors {
        let owner = Owner::Block(ancestor);
        let entries: Vec<RuntimeMetric> = memory.search_values(
            &SearchCriteria::new().owned_by(owner).of_kind(METRIC).public(),
        );
        if !entries.is_empty() {
            return group_by_source(entries);
        }
        let snapshots: Vec<Vec<RuntimeMetric>> = memory.search_values(
            &SearchCriteria::new()
                .owned_by(owner)
                .of_kind(METRICS_SNAPSHOT)
                .public(),
        );
        if let Some(snapshot) = snapshots.into_iter().last() {
            return snapshot;
        }
    }
    Vec::new()
}

fn group_by_source(entries: Vec<RuntimeMetric>) -> Vec<RuntimeMetric> {
    let mut grouped: Vec<RuntimeMetric> = Vec::new();
    for entry in entries {
        match grouped.iter_mut().find(|m| m.source_id == entry.source_id) {
            Some(existing) => existing.values.extend(entry.values),
            None => grouped.push(entry),
        }
    }
    grouped
}

fn overlay(mut base: Vec<RuntimeMetric>, own: &[RuntimeMetric]) -> Vec<RuntimeMetric> {
    for metric in own {
        match base.iter_mut().find(|m| m.source_id == metric.source_id) {
            Some(existing) => *existing = metric.clone(),
            None => base.push(metric.clone()),
        }
    }
    base
}

impl Behavior for MetricInheritanceBehavior {
    fn kind(&self) -> BehaviorKind {
        BehaviorKind::MetricInheritance
    }

    fn priority(&self) -> BehaviorPriority {
        BehaviorPriority::new(PriorityTier::Pre, 10)
    }

    fn on_push(&mut self, ctx: &mut BehaviorContext<'_>) -> HookResult {
        let inherited = inherited_metrics(ctx.memory, ctx.ancestors);
        self.composed = overlay(inherited, &self.initial);
        for metric in &self.composed {
            ctx.context
                .allocate(ctx.memory, METRIC, metric.clone(), Visibility::Public)?;
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use wod::WodScript;

    use super::*;
    use crate::block::{BlockType, KeySequence};
    use crate::memory::BlockContext;
    use crate::state::{MetricKind, MetricValue};

    fn metric(source_id: usize, exercise: &str, reps: f64) -> RuntimeMetric {
        RuntimeMetric {
            source_id,
            exercise: exercise.to_string(),
            values: vec![MetricValue {
                kind: MetricKind::Repetitions,
                value: reps,
                unit: None,
            }],
        }
    }

    #[test]
    fn nearest_public_entries_win() {
        let mut memory = Memory::new();
        let (near, far) = (BlockKey(2), BlockKey(1));
        memory.allocate(METRIC, Owner::Block(far), metric(1, "Far", 1.0), Visibility::Public);
        memory.allocate(METRIC, Owner::Block(near), metric(2, "Near", 2.0), Visibility::Public);
        memory.allocate(METRIC, Owner::Block(near), metric(2, "Near", 3.0), Visibility::Public);
        memory.allocate(METRIC, Owner::Block(near), metric(9, "Hidden", 3.0), Visibility::Private);

        let inherited = inherited_metrics(&memory, &[near, far]);
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].exercise, "Near");
        assert_eq!(inherited[0].values.len(), 2);
    }

    #[test]
    fn falls_back_to_snapshot() {
        let mut memory = Memory::new();
        let parent = BlockKey(4);
        memory.allocate(
            METRICS_SNAPSHOT,
            Owner::Block(parent),
            vec![metric(1, "Row", 0.0), metric(2, "Bike", 0.0)],
            Visibility::Public,
        );
        let inherited = inherited_metrics(&memory, &[parent]);
        assert_eq!(inherited.len(), 2);
        assert!(inherited_metrics(&memory, &[BlockKey(99)]).is_empty());
    }

    #[test]
    fn own_metrics_replace_inherited_ones_for_the_same_source() {
        let composed = overlay(
            vec![metric(1, "Thrusters", 21.0), metric(2, "Pullups", 21.0)],
            &[metric(2, "Pullups", 15.0), metric(3, "Run", 0.0)],
        );
        let reps: Vec<_> = composed
            .iter()
            .map(|m| m.value(MetricKind::Repetitions))
            .collect();
        assert_eq!(reps, vec![Some(21.0), Some(15.0), Some(0.0)]);
    }

    #[test]
    fn push_lays_own_metrics_over_the_inherited_snapshot() {
        let mut memory = Memory::new();
        let parent = BlockKey(1);
        memory.allocate(
            METRICS_SNAPSHOT,
            Owner::Block(parent),
            vec![metric(1, "Row", 0.0)],
            Visibility::Public,
        );

        let key = BlockKey(2);
        let mut context = BlockContext::new(key);
        let (script, keys) = (WodScript::default(), KeySequence::new());
        let ancestors = [parent];
        let source_ids = [2];
        let mut ctx = BehaviorContext {
            memory: &mut memory,
            context: &mut context,
            key,
            label: "21 Thrusters",
            block_type: BlockType::Effort,
            source_ids: &source_ids,
            ancestors: &ancestors,
            script: &script,
            keys: &keys,
            now: 0,
            paused: false,
        };
        let mut behavior = MetricInheritanceBehavior::new(vec![metric(2, "Thrusters", 21.0)]);
        behavior.on_push(&mut ctx).unwrap();

        let exercises: Vec<&str> = behavior.metrics().iter().map(|m| m.exercise.as_str()).collect();
        assert_eq!(exercises, vec!["Row", "Thrusters"]);
        let published: Vec<RuntimeMetric> = memory.search_values(
            &SearchCriteria::new().owned_by(Owner::Block(key)).of_kind(METRIC),
        );
        assert_eq!(published.len(), 2);
    }
}
