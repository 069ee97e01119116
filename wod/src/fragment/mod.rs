pub mod quantity;

use std::fmt;

use serde::Serialize;

pub use quantity::Quantity;

use crate::loader::clock::format_clock;

/// How a fragment's value came to be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricBehavior {
    /// Written in the script as a target ("21 Thrusters").
    Defined,
    /// Suggested but not binding ("~400m").
    Hint,
    /// Captured while the workout ran.
    Recorded,
    /// Derived from other values.
    Calculated,
}

/// Where a fragment was produced. Used to resolve conflicts when fragments of
/// the same kind meet, e.g. when a parent promotes a rep target onto a child.
///
/// Precedence is a total order: `Runtime` beats `Compiler` beats `Parser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FragmentOrigin {
    Parser,
    Runtime,
    Compiler,
}

impl FragmentOrigin {
    /// Lower rank wins.
    pub fn rank(self) -> u8 {
        match self {
            FragmentOrigin::Runtime => 0,
            FragmentOrigin::Compiler => 1,
            FragmentOrigin::Parser => 2,
        }
    }

    /// True if a fragment from `self` should replace one from `other`.
    pub fn overrides(self, other: FragmentOrigin) -> bool {
        self.rank() < other.rank()
    }
}

/// Whether a lap fragment composes with the previous statement or starts a
/// new round-robin entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LapKind {
    Compose,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FragmentKind {
    Timer,
    Rep,
    Rounds,
    Effort,
    Action,
    Distance,
    Resistance,
    Increment,
    Lap,
    Text,
    Sound,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::Timer => "timer",
            FragmentKind::Rep => "rep",
            FragmentKind::Rounds => "rounds",
            FragmentKind::Effort => "effort",
            FragmentKind::Action => "action",
            FragmentKind::Distance => "distance",
            FragmentKind::Resistance => "resistance",
            FragmentKind::Increment => "increment",
            FragmentKind::Lap => "lap",
            FragmentKind::Text => "text",
            FragmentKind::Sound => "sound",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of a fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FragmentValue {
    /// Duration in milliseconds. Negative values mark a countdown.
    Timer(i64),
    Rep(u32),
    Rounds(u32),
    Effort(String),
    Action(String),
    Distance(Quantity),
    Resistance(Quantity),
    /// +1 counts up, -1 counts down.
    Increment(i8),
    Lap(LapKind),
    Text(String),
    Sound(String),
}

impl FragmentValue {
    pub fn kind(&self) -> FragmentKind {
        match self {
            FragmentValue::Timer(_) => FragmentKind::Timer,
            FragmentValue::Rep(_) => FragmentKind::Rep,
            FragmentValue::Rounds(_) => FragmentKind::Rounds,
            FragmentValue::Effort(_) => FragmentKind::Effort,
            FragmentValue::Action(_) => FragmentKind::Action,
            FragmentValue::Distance(_) => FragmentKind::Distance,
            FragmentValue::Resistance(_) => FragmentKind::Resistance,
            FragmentValue::Increment(_) => FragmentKind::Increment,
            FragmentValue::Lap(_) => FragmentKind::Lap,
            FragmentValue::Text(_) => FragmentKind::Text,
            FragmentValue::Sound(_) => FragmentKind::Sound,
        }
    }

    /// Text carried by effort/action/text fragments.
    pub fn text(&self) -> Option<&str> {
        match self {
            FragmentValue::Effort(s) | FragmentValue::Action(s) | FragmentValue::Text(s) => {
                Some(s)
            }
            _ => None,
        }
    }
}

/// An atomic token of a workout statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub value: FragmentValue,
    pub behavior: MetricBehavior,
    pub origin: FragmentOrigin,
    /// The text the fragment was read from, if any.
    pub image: Option<String>,
}

impl Fragment {
    /// A fragment written directly in the script.
    pub fn parsed(value: FragmentValue) -> Self {
        Fragment {
            value,
            behavior: MetricBehavior::Defined,
            origin: FragmentOrigin::Parser,
            image: None,
        }
    }

    pub fn new(value: FragmentValue, behavior: MetricBehavior, origin: FragmentOrigin) -> Self {
        Fragment {
            value,
            behavior,
            origin,
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn kind(&self) -> FragmentKind {
        self.value.kind()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(image) = &self.image {
            return write!(f, "{}", image);
        }
        match &self.value {
            FragmentValue::Timer(ms) => write!(f, "{}", format_clock(*ms)),
            FragmentValue::Rep(n) => write!(f, "{}", n),
            FragmentValue::Rounds(n) => write!(f, "({})", n),
            FragmentValue::Effort(s) | FragmentValue::Action(s) | FragmentValue::Text(s) => {
                write!(f, "{}", s)
            }
            FragmentValue::Distance(q) | FragmentValue::Resistance(q) => write!(f, "{}", q),
            FragmentValue::Increment(d) => write!(f, "{}", if *d < 0 { "v" } else { "^" }),
            FragmentValue::Lap(LapKind::Compose) => write!(f, "+"),
            FragmentValue::Lap(LapKind::RoundRobin) => write!(f, "-"),
            FragmentValue::Sound(s) => write!(f, "[{}]", s),
        }
    }
}

/// Merge `incoming` fragments into `target`: a fragment whose kind is absent
/// is appended; one whose kind is present replaces the existing fragments of
/// that kind only when its origin outranks all of them.
pub fn merge_by_origin(target: &mut Vec<Fragment>, incoming: &[Fragment]) {
    for fragment in incoming {
        let kind = fragment.kind();
        let existing: Vec<FragmentOrigin> = target
            .iter()
            .filter(|f| f.kind() == kind)
            .map(|f| f.origin)
            .collect();

        if existing.is_empty() {
            target.push(fragment.clone());
        } else if existing.iter().all(|o| fragment.origin.overrides(*o)) {
            target.retain(|f| f.kind() != kind);
            target.push(fragment.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_precedence_is_total() {
        assert!(FragmentOrigin::Runtime.overrides(FragmentOrigin::Compiler));
        assert!(FragmentOrigin::Compiler.overrides(FragmentOrigin::Parser));
        assert!(FragmentOrigin::Runtime.overrides(FragmentOrigin::Parser));
        assert!(!FragmentOrigin::Parser.overrides(FragmentOrigin::Parser));
        assert!(!FragmentOrigin::Parser.overrides(FragmentOrigin::Compiler));
    }

    #[test]
    fn compiler_rep_replaces_parsed_rep() {
        let mut fragments = vec![
            Fragment::parsed(FragmentValue::Rep(5)),
            Fragment::parsed(FragmentValue::Effort("Pullups".into())),
        ];
        let promoted = Fragment::new(
            FragmentValue::Rep(21),
            MetricBehavior::Defined,
            FragmentOrigin::Compiler,
        );
        merge_by_origin(&mut fragments, &[promoted]);

        let reps: Vec<_> = fragments
            .iter()
            .filter(|f| f.kind() == FragmentKind::Rep)
            .collect();
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].value, FragmentValue::Rep(21));
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn parsed_fragment_does_not_replace_runtime_value() {
        let mut fragments = vec![Fragment::new(
            FragmentValue::Rep(12),
            MetricBehavior::Recorded,
            FragmentOrigin::Runtime,
        )];
        merge_by_origin(&mut fragments, &[Fragment::parsed(FragmentValue::Rep(10))]);
        assert_eq!(fragments[0].value, FragmentValue::Rep(12));
    }

    #[test]
    fn missing_kind_is_appended() {
        let mut fragments = vec![Fragment::parsed(FragmentValue::Effort("Row".into()))];
        merge_by_origin(&mut fragments, &[Fragment::parsed(FragmentValue::Timer(-30_000))]);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].to_string(), "-0:30");
    }
}
