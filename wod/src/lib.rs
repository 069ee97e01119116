pub mod fragment;
pub mod loader;
pub mod statement;

use crate::statement::CodeStatement;

/// A loaded workout script: every statement in document order.
#[derive(Debug, Clone, Default)]
pub struct WodScript {
    /// All statements, parents before their children.
    pub statements: Vec<CodeStatement>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl WodScript {
    pub fn new(statements: Vec<CodeStatement>, source_id: usize) -> Self {
        WodScript {
            statements,
            source_id,
        }
    }

    pub fn get(&self, id: usize) -> Option<&CodeStatement> {
        self.statements.iter().find(|s| s.id == id)
    }

    /// Resolve a list of ids, skipping any that are not part of the script.
    pub fn get_many(&self, ids: &[usize]) -> Vec<&CodeStatement> {
        ids.iter().filter_map(|id| self.get(*id)).collect()
    }

    /// Statements without a parent, in document order.
    pub fn roots(&self) -> impl Iterator<Item = &CodeStatement> {
        self.statements.iter().filter(|s| s.parent.is_none())
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
