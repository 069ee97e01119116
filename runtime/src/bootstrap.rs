//! The two blocks every workout starts with and the one it ends on.

use wod::WodScript;
use wod::fragment::{FragmentKind, FragmentValue, LapKind};

use crate::behavior::{HistoryBehavior, LoopBehavior, RootBehavior, TimerBehavior};
use crate::block::{BlockBuilder, BlockKey, BlockType, RuntimeBlock};
use crate::completion::{ConditionCompletion, RoundsExhausted};
use crate::error::RuntimeError;
use crate::event::names;
use crate::memory::BlockContext;

pub const ROOT_LABEL: &str = "Workout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    /// Before the workout starts. Ends on `next` or `timer:start`.
    Ready,
    /// After the workout ends. Ends on `stop`.
    Finished,
}

impl IdlePhase {
    pub fn label(self) -> &'static str {
        match self {
            IdlePhase::Ready => "Ready",
            IdlePhase::Finished => "Finished",
        }
    }
}

pub fn idle_block(key: BlockKey, phase: IdlePhase) -> Result<RuntimeBlock, RuntimeError> {
    let mut builder = BlockBuilder::new();
    builder
        .set_key(key)
        .set_context(BlockContext::new(key))
        .set_label(phase.label())
        .set_block_type(BlockType::Idle)
        .set_resume_parent(false);
    match phase {
        IdlePhase::Ready => builder.add_completion(
            ConditionCompletion::on_events(&[names::TIMER_START])
                .and_next()
                .named("start"),
        ),
        IdlePhase::Finished => {
            builder.add_completion(ConditionCompletion::on_events(&[names::STOP]).named("dismiss"))
        }
    };
    builder.build()
}

/// Top-level statements grouped for execution. A statement carrying a
/// compose lap joins the group before it.
pub fn root_groups(script: &WodScript) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for statement in script.roots() {
        let composes = statement
            .fragments_of(FragmentKind::Lap)
            .any(|f| f.value == FragmentValue::Lap(LapKind::Compose));
        match groups.last_mut() {
            Some(group) if composes => group.push(statement.id),
            _ => groups.push(vec![statement.id]),
        }
    }
    groups
}

/// The block that runs the whole script: one pass over the top-level groups,
/// started by the first `next` after the ready block.
pub fn root_block(key: BlockKey, script: &WodScript) -> Result<RuntimeBlock, RuntimeError> {
    let groups = root_groups(script);
    if groups.is_empty() {
        return Err(RuntimeError::NoEntryPoint);
    }

    let mut builder = BlockBuilder::new();
    builder
        .set_key(key)
        .set_context(BlockContext::new(key))
        .set_label(ROOT_LABEL)
        .set_block_type(BlockType::Root)
        .set_source_ids(groups.iter().flatten().copied().collect())
        .set_resume_parent(false)
        .add_behavior(HistoryBehavior::new())
        .add_behavior(TimerBehavior::count_up(None))
        .add_behavior(LoopBehavior::new(groups, Some(1)).deferred())
        .add_behavior(RootBehavior)
        .add_completion(RoundsExhausted);
    builder.build()
}

#[cfg(test)]
mod tests {
    use wod::fragment::Fragment;
    use wod::statement::CodeStatement;

    use super::*;

    fn effort(id: usize, name: &str) -> CodeStatement {
        CodeStatement::new(id, vec![Fragment::parsed(FragmentValue::Effort(name.into()))])
    }

    #[test]
    fn composed_roots_share_a_group() {
        let mut second = effort(2, "Burpees");
        second
            .fragments
            .push(Fragment::parsed(FragmentValue::Lap(LapKind::Compose)));
        let script = WodScript::new(vec![effort(1, "Run"), second, effort(3, "Row")], 0);
        assert_eq!(root_groups(&script), vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn empty_script_has_no_root() {
        let script = WodScript::new(Vec::new(), 0);
        assert_eq!(
            root_block(BlockKey(1), &script).unwrap_err(),
            RuntimeError::NoEntryPoint
        );
    }

    #[test]
    fn idle_blocks_do_not_resume_their_parent() {
        let ready = idle_block(BlockKey(1), IdlePhase::Ready).unwrap();
        assert!(!ready.resumes_parent());
        assert_eq!(ready.label(), "Ready");
        assert_eq!(ready.block_type(), BlockType::Idle);
    }
}
