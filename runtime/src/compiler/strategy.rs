use std::fmt;

use tracing::trace;
use wod::statement::CodeStatement;

use super::CompileContext;
use crate::block::{BlockBuilder, RuntimeBlock};
use crate::error::RuntimeError;

/// One rule for turning statements into (part of) a block.
///
/// Every matching strategy gets to contribute, highest priority first, so a
/// strategy should only fill what is still missing unless it owns the
/// concern outright.
pub trait BlockStrategy: fmt::Debug {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    fn matches(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> bool;

    fn apply(
        &self,
        builder: &mut BlockBuilder,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError>;

    /// Set for strategies that build whole blocks on their own.
    fn as_legacy(&self) -> Option<&dyn LegacyStrategy> {
        None
    }
}

/// A strategy that compiles a complete block in one go instead of
/// contributing to a builder.
pub trait LegacyStrategy: fmt::Debug {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32 {
        0
    }

    fn matches(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> bool;

    fn compile(
        &self,
        statements: &[CodeStatement],
        ctx: &CompileContext<'_>,
    ) -> Result<RuntimeBlock, RuntimeError>;
}

/// Lets a [`LegacyStrategy`] sit in the compiler's strategy list. When it is
/// the top match its block is used as is; otherwise it contributes nothing.
#[derive(Debug)]
pub struct LegacyAdapter<S>(pub S);

impl<S: LegacyStrategy> BlockStrategy for LegacyAdapter<S> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn priority(&self) -> i32 {
        self.0.priority()
    }

    fn matches(&self, statements: &[CodeStatement], ctx: &CompileContext<'_>) -> bool {
        self.0.matches(statements, ctx)
    }

    fn apply(
        &self,
        _builder: &mut BlockBuilder,
        _statements: &[CodeStatement],
        _ctx: &CompileContext<'_>,
    ) -> Result<(), RuntimeError> {
        trace!(strategy = self.0.name(), "legacy strategy skipped: not the top match");
        Ok(())
    }

    fn as_legacy(&self) -> Option<&dyn LegacyStrategy> {
        Some(&self.0)
    }
}
