//! Domain vocabularies that annotate statements with semantic hints before
//! compilation, so strategies can match on meaning instead of raw text.

pub mod crossfit;

use std::fmt;

use tracing::trace;
use wod::statement::CodeStatement;

pub use crossfit::CrossFitDialect;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialectAnalysis {
    pub hints: Vec<String>,
}

pub trait Dialect: fmt::Debug {
    fn id(&self) -> &'static str;
    fn analyze(&self, statement: &CodeStatement) -> DialectAnalysis;
}

#[derive(Debug, Default)]
pub struct DialectRegistry {
    dialects: Vec<Box<dyn Dialect>>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        DialectRegistry::default()
    }

    /// Register a dialect. A second dialect with the same id replaces the first.
    pub fn register(&mut self, dialect: impl Dialect + 'static) {
        let id = dialect.id();
        self.dialects.retain(|d| d.id() != id);
        self.dialects.push(Box::new(dialect));
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.dialects.iter().map(|d| d.id()).collect()
    }

    /// Run every dialect over every statement. Hints only accumulate.
    pub fn process(&self, statements: &mut [CodeStatement]) {
        for statement in statements.iter_mut() {
            for dialect in &self.dialects {
                let analysis = dialect.analyze(statement);
                if !analysis.hints.is_empty() {
                    trace!(dialect = dialect.id(), statement = statement.id, hints = ?analysis.hints, "hints");
                }
                statement.hints.extend(analysis.hints);
            }
        }
    }
}
