//! The standard strategy set.
//!
//! | strategy             | priority | matches                               |
//! |----------------------|----------|---------------------------------------|
//! | repeating-countdown  | 90       | rounds > 1 and a countdown timer      |
//! | repeating-timed      | 80       | rounds > 1 and a count-up timer       |
//! | repeating-reps       | 70       | rounds > 1, reps, no timer            |
//! | time-bound           | 60       | time-bound hint and a timer           |
//! | timer                | 50       | count-up timer, at most one round     |
//! | rounds               | 40       | rounds > 1, no countdown              |
//! | countdown            | 30       | countdown timer                       |
//! | effort               | 0        | anything                              |

use wod::loader::clock::format_clock;
use wod::statement::CodeStatement;

use super::{BlockStrategy, CompileContext};
use crate::behavior::{
    BehaviorKind, HistoryBehavior, LoopBehavior, MetricInheritanceBehavior, RepSchemeBehavior,
    TimerBehavior,
};
use crate::block::{BlockBuilder, BlockType};
use crate::completion::{ConditionCompletion, RoundsExhausted, TimerExpiry};
use crate::dialect::crossfit::TIME_BOUND;
use crate::error::RuntimeError;
use crate::memory::BlockContext;
use crate::state::RuntimeMetric;

// ---------------------------------------------------------------------------
// Statement shape
// ---------------------------------------------------------------------------

fn rounds(statements: &[CodeStatement]) -> Option<u32> {
    statements.iter().find_map(CodeStatement::rounds)
}

fn timer(statements: &[CodeStatement]) -> Option<i64> {
    statements.iter().find_map(CodeStatement::timer)
}

fn reps(statements: &[CodeStatement]) -> Vec<u32> {
    statements
        .iter()
        .map(CodeStatement::reps)
        .find(|r| !r.is_empty())
        .unwrap_or_default()
}

fn groups(statements: &[CodeStatement]) -> Vec<Vec<usize>> {
    statements
        .iter()
        .flat_map(|s| s.children.iter().cloned())
        .filter(|g| !g.is_empty())
        .collect()
}

fn is_repeating(statements: &[CodeStatement]) -> bool {
    rounds(statements).is_some_and(|r| r > 1)
}

fn has_hint(statements: &[CodeStatement], hint: &str) -> bool {
    statements.iter().any(|s| s.has_hint(hint))
}

/// "21 Thrusters 95lb + Pullups"
fn describe(statements: &[CodeStatement]) -> String {
    let parts: Vec<String> = statements
        .iter()
        .map(|s| {
            let rep = s.reps().first().map(|r| r.to_string());
            let distance = s.distance().map(|d| d.to_string());
            let name = s.keyword_texts().next().map(str::to_string);
            let resistance = s.resistance().map(|r| r.to_string());
            [rep, distance, name, resistance]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(" + ")
}

/// Key, context, sources, type and label, each only if no earlier strategy
/// set it. Every compiled block also records history and publishes metrics.
fn establish(
    builder: &mut BlockBuilder,
    statements: &[CodeStatement],
    ctx: &CompileContext<'_>,
    block_type: BlockType,
    label: impl FnOnce() -> String,
) {
    if builder.key().is_none() {
        let key = ctx.keys.next();
        builder
            .set_key(key)
            .set_context(BlockContext::new(key))
            .set_source_ids(statements.iter().map(|s| s.id).collect())
            .set_fragments(statements.iter().flat_map(|s| s.fragments.clone()).collect());
    }
    if builder.block_type().is_none() {
        builder.set_block_type(block_type);
    }
    if !builder.has_label() {
        let label = label();
        let label = if label.is_empty() { block_type.to_string() } else { label };
        builder.set_label(label);
    }
    builder
        .add_behavior_if_missing(HistoryBehavior::new())
        .add_behavior_if_missing(MetricInheritanceBehavior::new(
            statements.iter().map(RuntimeMetric::from_statement).collect(),
        ));
}

/// Interval times rounds, pinned to `i64::MAX` for absurd inputs.
fn total_time(interval: i64, rounds: u32) -> i64 {
    interval.saturating_mul(i64::from(rounds))
}

fn add_rep_scheme(builder: &mut BlockBuilder, statements: &[CodeStatement]) {
    let scheme = reps(statements);
    if !scheme.is_empty() && !builder.has_behavior(BehaviorKind::RepScheme) {
        builder.add_behavior(RepSchemeBehavior::new(scheme));
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Tabata style: N rounds of a fixed countdown interval.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatingCountdownStrategy;

impl BlockStrategy for RepeatingCountdownStrategy {
    fn name(&self) -> &'static str {
        "repeating-countdown"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        is_repeating(statements) && timer(statements).is_some_and(|t| t < 0)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let rounds = rounds(statements).unwrap_or(1);
        let interval = timer(statements).unwrap_or_default().saturating_abs();
        establish(builder, statements, ctx, BlockType::Tabata, || {
            format!("{} x {}", rounds, format_clock(interval))
        });
        builder
            .add_behavior(TimerBehavior::count_down(total_time(interval, rounds)))
            .add_behavior(LoopBehavior::new(groups(statements), Some(rounds)).with_interval(interval))
            .add_completion(RoundsExhausted)
            .add_completion(TimerExpiry);
        add_rep_scheme(builder, statements);
        Ok(())
    }
}

/// EMOM style: a new round starts every interval.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatingTimedStrategy;

impl BlockStrategy for RepeatingTimedStrategy {
    fn name(&self) -> &'static str {
        "repeating-timed"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        is_repeating(statements) && timer(statements).is_some_and(|t| t > 0)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let rounds = rounds(statements).unwrap_or(1);
        let interval = timer(statements).unwrap_or_default();
        establish(builder, statements, ctx, BlockType::Emom, || {
            format!("EMOM {} x {}", rounds, format_clock(interval))
        });
        builder
            .add_behavior(TimerBehavior::count_up(Some(total_time(interval, rounds))))
            .add_behavior(LoopBehavior::new(groups(statements), Some(rounds)).with_interval(interval))
            .add_completion(RoundsExhausted)
            .add_completion(TimerExpiry);
        add_rep_scheme(builder, statements);
        Ok(())
    }
}

/// Fixed rounds with a rep scheme, e.g. 21-15-9.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepeatingRepsStrategy;

impl BlockStrategy for RepeatingRepsStrategy {
    fn name(&self) -> &'static str {
        "repeating-reps"
    }

    fn priority(&self) -> i32 {
        70
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        is_repeating(statements) && !reps(statements).is_empty() && timer(statements).is_none()
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let scheme = reps(statements);
        establish(builder, statements, ctx, BlockType::Rounds, || {
            scheme
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("-")
        });
        builder
            .add_behavior(LoopBehavior::new(groups(statements), rounds(statements)))
            .add_behavior(RepSchemeBehavior::new(scheme))
            .add_completion(RoundsExhausted);
        Ok(())
    }
}

/// AMRAP: loop the children as often as the clock allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeBoundStrategy;

impl BlockStrategy for TimeBoundStrategy {
    fn name(&self) -> &'static str {
        "time-bound"
    }

    fn priority(&self) -> i32 {
        60
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        has_hint(statements, TIME_BOUND) && timer(statements).is_some() && !is_repeating(statements)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let duration = timer(statements).unwrap_or_default().saturating_abs();
        establish(builder, statements, ctx, BlockType::Amrap, || {
            format!("AMRAP {}", format_clock(duration))
        });
        builder.add_behavior(TimerBehavior::count_down(duration));
        let groups = groups(statements);
        if !groups.is_empty() {
            builder.add_behavior(LoopBehavior::new(groups, None));
        }
        builder.add_completion(TimerExpiry);
        Ok(())
    }
}

/// Count-up timer with a cap. Children run once.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerStrategy;

impl BlockStrategy for TimerStrategy {
    fn name(&self) -> &'static str {
        "timer"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        timer(statements).is_some_and(|t| t > 0) && !is_repeating(statements)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let cap = timer(statements).unwrap_or_default();
        establish(builder, statements, ctx, BlockType::Timer, || {
            let text = describe(statements);
            if text.is_empty() {
                format_clock(cap)
            } else {
                format!("{} {}", format_clock(cap), text)
            }
        });
        builder.add_behavior_if_missing(TimerBehavior::count_up(Some(cap)));
        let groups = groups(statements);
        if groups.is_empty() {
            builder.add_completion(ConditionCompletion::on_next());
        } else if !builder.has_behavior(BehaviorKind::Loop) {
            builder
                .add_behavior(LoopBehavior::new(groups, Some(1)))
                .add_completion(RoundsExhausted);
        }
        builder.add_completion(TimerExpiry);
        Ok(())
    }
}

/// Fixed number of rounds over the children.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundsStrategy;

impl BlockStrategy for RoundsStrategy {
    fn name(&self) -> &'static str {
        "rounds"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        is_repeating(statements) && timer(statements).is_none_or(|t| t > 0)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let rounds = rounds(statements);
        establish(builder, statements, ctx, BlockType::Rounds, || {
            format!("{} Rounds", rounds.unwrap_or(1))
        });
        builder
            .add_behavior_if_missing(LoopBehavior::new(groups(statements), rounds))
            .add_completion(RoundsExhausted);
        Ok(())
    }
}

/// A countdown. With children it loops them until time runs out; alone it
/// is a rest period.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountdownStrategy;

impl BlockStrategy for CountdownStrategy {
    fn name(&self) -> &'static str {
        "countdown"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn matches(&self, statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        timer(statements).is_some_and(|t| t < 0)
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let duration = timer(statements).unwrap_or_default().saturating_abs();
        establish(builder, statements, ctx, BlockType::Countdown, || {
            let text = describe(statements);
            if text.is_empty() {
                format_clock(-duration)
            } else {
                format!("{} {}", format_clock(-duration), text)
            }
        });
        builder.add_behavior_if_missing(TimerBehavior::count_down(duration));
        let groups = groups(statements);
        if !groups.is_empty() {
            builder.add_behavior_if_missing(LoopBehavior::new(groups, None));
        }
        builder.add_completion(TimerExpiry);
        Ok(())
    }
}

/// Fallback for everything: a leaf completes on `next`, a group runs its
/// children once.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffortStrategy;

impl BlockStrategy for EffortStrategy {
    fn name(&self) -> &'static str {
        "effort"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn matches(&self, _statements: &[CodeStatement], _ctx: &CompileContext<'_>) -> bool {
        true
    }

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        let groups = groups(statements);
        let block_type = if groups.is_empty() {
            BlockType::Effort
        } else {
            BlockType::Group
        };
        establish(builder, statements, ctx, block_type, || describe(statements));
        if !groups.is_empty() && !builder.has_behavior(BehaviorKind::Loop) {
            builder
                .add_behavior(LoopBehavior::new(groups, Some(1)))
                .add_completion(RoundsExhausted);
        }
        if !builder.has_completion() {
            builder.add_completion(ConditionCompletion::on_next());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wod::WodScript;
    use wod::fragment::{Fragment, FragmentValue};

    use super::*;
    use crate::behavior::{RepSource, TimerSource};
    use crate::block::KeySequence;
    use crate::compiler::JitCompiler;
    use crate::memory::Memory;

    fn statement(id: usize, values: Vec<FragmentValue>) -> CodeStatement {
        CodeStatement::new(id, values.into_iter().map(Fragment::parsed).collect())
    }

    fn with_child(statement: CodeStatement) -> CodeStatement {
        statement.with_children(vec![vec![99]])
    }

    fn plan(statement: CodeStatement) -> Vec<&'static str> {
        let (memory, script, keys) = (Memory::new(), WodScript::default(), KeySequence::new());
        let ctx = CompileContext::new(&memory, &script, &keys);
        JitCompiler::with_defaults().plan(&[statement], &ctx)
    }

    fn compile(statement: CodeStatement) -> crate::block::RuntimeBlock {
        let (memory, script, keys) = (Memory::new(), WodScript::default(), KeySequence::new());
        let ctx = CompileContext::new(&memory, &script, &keys);
        JitCompiler::with_defaults()
            .compile(&[statement], &ctx)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn strategy_matrix() {
        use FragmentValue::*;
        let effort = || Effort("Burpees".into());

        let cases: Vec<(Vec<FragmentValue>, &str)> = vec![
            (vec![Rounds(8), Timer(-20_000)], "repeating-countdown"),
            (vec![Rounds(10), Timer(60_000)], "repeating-timed"),
            (vec![Rounds(3), Rep(21), Rep(15), Rep(9)], "repeating-reps"),
            (vec![Rounds(3), Rep(10)], "repeating-reps"),
            (vec![Timer(1_200_000), Action("AMRAP".into())], "time-bound"),
            (vec![Timer(600_000)], "timer"),
            (vec![Rounds(5)], "rounds"),
            (vec![Timer(-60_000), Text("Rest".into())], "countdown"),
            (vec![effort()], "effort"),
            (vec![Rep(10), effort()], "effort"),
            (vec![Rounds(1), effort()], "effort"),
            (vec![Rounds(1), Rep(10)], "effort"),
        ];
        for (values, expected) in cases {
            let selected = plan(with_child(statement(1, values.clone())));
            assert_eq!(selected[0], expected, "{:?}", values);
            assert_eq!(*selected.last().unwrap(), "effort");
        }
    }

    #[test]
    fn single_round_reps_skip_repeating_reps() {
        let selected = plan(with_child(statement(
            1,
            vec![FragmentValue::Rounds(1), FragmentValue::Rep(10)],
        )));
        assert!(!selected.contains(&"repeating-reps"), "{:?}", selected);
    }

    #[test]
    fn huge_intervals_saturate_instead_of_overflowing() {
        let block = compile(with_child(statement(
            1,
            vec![FragmentValue::Rounds(4), FragmentValue::Timer(i64::MAX / 2)],
        )));
        assert_eq!(block.block_type(), BlockType::Emom);
        assert_eq!(block.timer().unwrap().timer_state().duration, Some(i64::MAX));

        let block = compile(with_child(statement(
            1,
            vec![FragmentValue::Rounds(4), FragmentValue::Timer(i64::MIN)],
        )));
        assert_eq!(block.block_type(), BlockType::Tabata);
        assert_eq!(block.timer().unwrap().timer_state().duration, Some(i64::MAX));
    }

    #[test]
    fn emom_also_collects_rounds_and_effort() {
        let selected = plan(statement(1, vec![FragmentValue::Rounds(10), FragmentValue::Timer(60_000)]));
        assert_eq!(selected, vec!["repeating-timed", "rounds", "effort"]);
    }

    #[test]
    fn rep_scheme_block() {
        let block = compile(with_child(statement(
            1,
            vec![
                FragmentValue::Rounds(3),
                FragmentValue::Rep(21),
                FragmentValue::Rep(15),
                FragmentValue::Rep(9),
            ],
        )));
        assert_eq!(block.block_type(), BlockType::Rounds);
        assert_eq!(block.label(), "21-15-9");
        assert_eq!(block.reps().unwrap().reps_for_round(4), Some(21));
        assert_eq!(block.loop_state().unwrap().total_rounds, Some(3));
        assert_eq!(block.completion_names(), vec!["rounds-exhausted"]);
    }

    #[test]
    fn amrap_loops_until_time_runs_out() {
        let block = compile(with_child(statement(
            1,
            vec![FragmentValue::Timer(1_200_000), FragmentValue::Effort("amrap".into())],
        )));
        assert_eq!(block.block_type(), BlockType::Amrap);
        assert_eq!(block.label(), "AMRAP 20:00");
        assert_eq!(block.loop_state().unwrap().remaining_rounds, None);
        assert_eq!(block.timer().unwrap().timer_state().duration, Some(1_200_000));
        assert!(block.completion_names().contains(&"timer-expiry"));
    }

    #[test]
    fn leaf_effort_completes_on_next() {
        let block = compile(statement(
            2,
            vec![FragmentValue::Rep(21), FragmentValue::Effort("Thrusters".into())],
        ));
        assert_eq!(block.label(), "21 Thrusters");
        assert_eq!(block.completion_names(), vec!["on-next"]);
        assert!(block.has_behavior(BehaviorKind::History));
        assert!(block.has_behavior(BehaviorKind::MetricInheritance));
        assert!(!block.has_behavior(BehaviorKind::Loop));
    }

    #[test]
    fn tabata_block_shape() {
        let block = compile(with_child(statement(
            1,
            vec![FragmentValue::Rounds(8), FragmentValue::Timer(-20_000)],
        )));
        assert_eq!(block.block_type(), BlockType::Tabata);
        assert_eq!(block.label(), "8 x 0:20");
        assert_eq!(block.timer().unwrap().timer_state().duration, Some(160_000));
    }
}
