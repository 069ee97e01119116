use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use serde::Serialize;

use crate::fragment::{Fragment, FragmentKind, FragmentValue, Quantity};

/// Where a statement came from in its source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeMetadata {
    /// Byte span in source for error reporting.
    pub span: Range<usize>,
    /// 1-based line of the span start.
    pub line: usize,
}

/// One workout statement: a line such as `(21-15-9) Thrusters 95lb`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeStatement {
    pub id: usize,
    pub parent: Option<usize>,
    /// Child statement ids grouped for execution. Each group is compiled
    /// into a single block; groups run in order.
    pub children: Vec<Vec<usize>>,
    pub fragments: Vec<Fragment>,
    /// Semantic hints attached by dialects. Only ever grows.
    pub hints: BTreeSet<String>,
    pub meta: CodeMetadata,
}

impl CodeStatement {
    pub fn new(id: usize, fragments: Vec<Fragment>) -> Self {
        CodeStatement {
            id,
            parent: None,
            children: Vec::new(),
            fragments,
            hints: BTreeSet::new(),
            meta: CodeMetadata::default(),
        }
    }

    pub fn with_children(mut self, children: Vec<Vec<usize>>) -> Self {
        self.children = children;
        self
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn fragments_of(&self, kind: FragmentKind) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(move |f| f.kind() == kind)
    }

    pub fn has_fragment(&self, kind: FragmentKind) -> bool {
        self.fragments_of(kind).next().is_some()
    }

    /// Timer duration in milliseconds; negative for a countdown.
    pub fn timer(&self) -> Option<i64> {
        self.fragments.iter().find_map(|f| match f.value {
            FragmentValue::Timer(ms) => Some(ms),
            _ => None,
        })
    }

    pub fn rounds(&self) -> Option<u32> {
        self.fragments.iter().find_map(|f| match f.value {
            FragmentValue::Rounds(n) => Some(n),
            _ => None,
        })
    }

    /// All rep fragments in order. More than one forms a rep scheme.
    pub fn reps(&self) -> Vec<u32> {
        self.fragments
            .iter()
            .filter_map(|f| match f.value {
                FragmentValue::Rep(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn effort(&self) -> Option<&str> {
        self.fragments.iter().find_map(|f| match &f.value {
            FragmentValue::Effort(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn resistance(&self) -> Option<&Quantity> {
        self.fragments.iter().find_map(|f| match &f.value {
            FragmentValue::Resistance(q) => Some(q),
            _ => None,
        })
    }

    pub fn distance(&self) -> Option<&Quantity> {
        self.fragments.iter().find_map(|f| match &f.value {
            FragmentValue::Distance(q) => Some(q),
            _ => None,
        })
    }

    /// Effort and action texts, the input dialects match keywords against.
    pub fn keyword_texts(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().filter_map(|f| match &f.value {
            FragmentValue::Effort(s) | FragmentValue::Action(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn has_hint(&self, hint: &str) -> bool {
        self.hints.contains(hint)
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(|g| !g.is_empty())
    }
}

impl fmt::Display for CodeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.fragments.iter().map(|f| f.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thrusters() -> CodeStatement {
        CodeStatement::new(
            1,
            vec![
                Fragment::parsed(FragmentValue::Rounds(3)),
                Fragment::parsed(FragmentValue::Rep(21)),
                Fragment::parsed(FragmentValue::Rep(15)),
                Fragment::parsed(FragmentValue::Rep(9)),
                Fragment::parsed(FragmentValue::Effort("Thrusters".into())),
            ],
        )
    }

    #[test]
    fn accessors() {
        let stmt = thrusters();
        assert_eq!(stmt.rounds(), Some(3));
        assert_eq!(stmt.reps(), vec![21, 15, 9]);
        assert_eq!(stmt.effort(), Some("Thrusters"));
        assert_eq!(stmt.timer(), None);
        assert!(!stmt.has_children());
    }

    #[test]
    fn display_joins_fragments() {
        assert_eq!(thrusters().to_string(), "(3) 21 15 9 Thrusters");
    }
}
