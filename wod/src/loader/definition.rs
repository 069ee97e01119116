use std::collections::BTreeSet;
use std::ops::Range;

use serde::Deserialize;
use toml::Spanned;

use crate::fragment::{Fragment, FragmentValue, LapKind, Quantity};
use crate::loader::clock::parse_clock;
use crate::loader::error::LoadError;
use crate::statement::{CodeMetadata, CodeStatement};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Deserialize TOML source and flatten it into statements with ids assigned in
/// document order (parents before children, 1-based).
pub fn load_statements(source: &str, file_id: usize) -> Result<Vec<CodeStatement>, Vec<LoadError>> {
    let workout: WorkoutDef = toml::from_str(source).map_err(|e| {
        let span = e.span().unwrap_or(0..0);
        vec![LoadError::error(e.message().to_string(), span, file_id)]
    })?;

    let mut state = LoadState::new(source, file_id);
    for def in &workout.statements {
        state.flatten(def, None);
    }
    state.finalize()
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkoutDef {
    #[serde(default, rename = "statement")]
    statements: Vec<StatementDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatementDef {
    effort: Option<Spanned<String>>,
    action: Option<Spanned<String>>,
    text: Option<Spanned<String>>,
    sound: Option<Spanned<String>>,
    reps: Option<Spanned<RepsDef>>,
    rounds: Option<Spanned<u32>>,
    time: Option<Spanned<TimeDef>>,
    /// Marks `time` as a countdown.
    #[serde(default)]
    countdown: bool,
    distance: Option<Spanned<String>>,
    resistance: Option<Spanned<String>>,
    /// `"up"` or `"down"`.
    increment: Option<Spanned<String>>,
    /// Join the previous sibling's group instead of starting a new one.
    #[serde(default)]
    compose: bool,
    #[serde(default, rename = "child")]
    children: Vec<StatementDef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepsDef {
    Single(u32),
    Scheme(Vec<u32>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeDef {
    Clock(String),
    Millis(i64),
}

// ---------------------------------------------------------------------------
// Load state
// ---------------------------------------------------------------------------

struct LoadState<'a> {
    source: &'a str,
    file_id: usize,
    next_id: usize,
    statements: Vec<CodeStatement>,
    errors: Vec<LoadError>,
}

impl<'a> LoadState<'a> {
    fn new(source: &'a str, file_id: usize) -> Self {
        LoadState {
            source,
            file_id,
            next_id: 1,
            statements: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Flatten one definition and its descendants. Returns the assigned id.
    fn flatten(&mut self, def: &StatementDef, parent: Option<usize>) -> usize {
        let id = self.next_id;
        self.next_id += 1;

        let span = statement_span(def);
        let fragments = self.collect_fragments(def, &span);
        if span.is_empty() && def.children.is_empty() && !def.compose {
            self.errors.push(
                LoadError::error("statement has no content", span.clone(), self.file_id)
                    .with_note("give it an effort, reps, rounds, time or children"),
            );
        }

        let index = self.statements.len();
        self.statements.push(CodeStatement {
            id,
            parent,
            children: Vec::new(),
            fragments,
            hints: BTreeSet::new(),
            meta: CodeMetadata {
                line: byte_offset_to_line(self.source, span.start),
                span,
            },
        });

        let mut groups: Vec<Vec<usize>> = Vec::new();
        for child in &def.children {
            let child_id = self.flatten(child, Some(id));
            match groups.last_mut() {
                Some(group) if child.compose => group.push(child_id),
                None if child.compose => {
                    self.errors.push(LoadError::error(
                        "`compose` on the first child has no previous sibling to join",
                        statement_span(child),
                        self.file_id,
                    ));
                    groups.push(vec![child_id]);
                }
                _ => groups.push(vec![child_id]),
            }
        }
        self.statements[index].children = groups;

        id
    }

    fn collect_fragments(&mut self, def: &StatementDef, span: &Range<usize>) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        if def.compose {
            fragments.push(Fragment::parsed(FragmentValue::Lap(LapKind::Compose)));
        }

        if let Some(rounds) = &def.rounds {
            if *rounds.get_ref() == 0 {
                self.errors.push(LoadError::error(
                    "rounds must be at least 1",
                    rounds.span(),
                    self.file_id,
                ));
            } else {
                fragments.push(Fragment::parsed(FragmentValue::Rounds(*rounds.get_ref())));
            }
        }

        if let Some(time) = &def.time {
            let ms = match time.get_ref() {
                TimeDef::Clock(text) => parse_clock(text)
                    .map(|ms| (ms, Some(text.clone())))
                    .map_err(|msg| LoadError::error(msg, time.span(), self.file_id)),
                TimeDef::Millis(ms) => Ok((*ms, None)),
            };
            match ms {
                Ok((0, _)) => self.errors.push(LoadError::error(
                    "time must not be zero",
                    time.span(),
                    self.file_id,
                )),
                Ok((i64::MIN, _)) => self.errors.push(LoadError::error(
                    "time is out of range",
                    time.span(),
                    self.file_id,
                )),
                Ok((ms, image)) => {
                    let ms = if def.countdown { -ms.abs() } else { ms };
                    let fragment = Fragment::parsed(FragmentValue::Timer(ms));
                    fragments.push(match image {
                        Some(text) if !def.countdown => fragment.with_image(text),
                        _ => fragment,
                    });
                }
                Err(e) => self.errors.push(e),
            }
        } else if def.countdown {
            self.errors.push(LoadError::error(
                "`countdown` requires a `time`",
                span.clone(),
                self.file_id,
            ));
        }

        if let Some(reps) = &def.reps {
            let scheme = match reps.get_ref() {
                RepsDef::Single(n) => vec![*n],
                RepsDef::Scheme(ns) => ns.clone(),
            };
            if scheme.is_empty() || scheme.contains(&0) {
                self.errors.push(LoadError::error(
                    "reps must be positive",
                    reps.span(),
                    self.file_id,
                ));
            } else {
                for n in scheme {
                    fragments.push(Fragment::parsed(FragmentValue::Rep(n)));
                }
            }
        }

        if let Some(effort) = &def.effort {
            fragments.push(Fragment::parsed(FragmentValue::Effort(effort.get_ref().clone())));
        }
        if let Some(action) = &def.action {
            fragments.push(Fragment::parsed(FragmentValue::Action(action.get_ref().clone())));
        }

        if let Some(text) = &def.distance {
            self.push_quantity(&mut fragments, text, FragmentValue::Distance);
        }
        if let Some(text) = &def.resistance {
            self.push_quantity(&mut fragments, text, FragmentValue::Resistance);
        }

        if let Some(direction) = &def.increment {
            match direction.get_ref().as_str() {
                "up" => fragments.push(Fragment::parsed(FragmentValue::Increment(1))),
                "down" => fragments.push(Fragment::parsed(FragmentValue::Increment(-1))),
                other => self.errors.push(LoadError::error(
                    format!("increment must be \"up\" or \"down\", got \"{}\"", other),
                    direction.span(),
                    self.file_id,
                )),
            }
        }

        if let Some(text) = &def.text {
            fragments.push(Fragment::parsed(FragmentValue::Text(text.get_ref().clone())));
        }
        if let Some(sound) = &def.sound {
            fragments.push(Fragment::parsed(FragmentValue::Sound(sound.get_ref().clone())));
        }

        fragments
    }

    fn push_quantity(
        &mut self,
        fragments: &mut Vec<Fragment>,
        text: &Spanned<String>,
        make: fn(Quantity) -> FragmentValue,
    ) {
        match text.get_ref().parse::<Quantity>() {
            Ok(q) => fragments.push(Fragment::parsed(make(q)).with_image(text.get_ref().clone())),
            Err(msg) => self
                .errors
                .push(LoadError::error(msg, text.span(), self.file_id)),
        }
    }

    fn finalize(self) -> Result<Vec<CodeStatement>, Vec<LoadError>> {
        if self.errors.is_empty() {
            Ok(self.statements)
        } else {
            Err(self.errors)
        }
    }
}

/// Cover every spanned field of a definition (children excluded).
fn statement_span(def: &StatementDef) -> Range<usize> {
    let spans = [
        def.effort.as_ref().map(Spanned::span),
        def.action.as_ref().map(Spanned::span),
        def.text.as_ref().map(Spanned::span),
        def.sound.as_ref().map(Spanned::span),
        def.reps.as_ref().map(Spanned::span),
        def.rounds.as_ref().map(Spanned::span),
        def.time.as_ref().map(Spanned::span),
        def.distance.as_ref().map(Spanned::span),
        def.resistance.as_ref().map(Spanned::span),
        def.increment.as_ref().map(Spanned::span),
    ];
    let start = spans.iter().flatten().map(|s| s.start).min();
    let end = spans.iter().flatten().map(|s| s.end).max();
    match (start, end) {
        (Some(start), Some(end)) => start..end,
        _ => 0..0,
    }
}

/// Convert a byte offset in `source` to a 1-based line number.
fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FragmentKind;

    const FRAN: &str = r#"
[[statement]]
rounds = 3
reps = [21, 15, 9]

[[statement.child]]
effort = "Thrusters"
resistance = "95lb"

[[statement.child]]
effort = "Pullups"
"#;

    #[test]
    fn assigns_ids_and_groups() {
        let statements = load_statements(FRAN, 0).unwrap();
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0].id, 1);
        assert_eq!(statements[0].children, vec![vec![2], vec![3]]);
        assert_eq!(statements[1].parent, Some(1));
        assert_eq!(statements[0].reps(), vec![21, 15, 9]);
        assert_eq!(statements[1].resistance().map(|q| q.unit.as_str()), Some("lb"));
    }

    #[test]
    fn records_source_lines() {
        let statements = load_statements(FRAN, 0).unwrap();
        assert_eq!(statements[0].meta.line, 3);
        assert_eq!(statements[2].meta.line, 11);
    }

    #[test]
    fn compose_joins_previous_group() {
        let src = r#"
[[statement]]
rounds = 5

[[statement.child]]
effort = "Run"
distance = "400m"

[[statement.child]]
effort = "Burpees"
reps = 10
compose = true
"#;
        let statements = load_statements(src, 0).unwrap();
        assert_eq!(statements[0].children, vec![vec![2, 3]]);
        assert!(statements[2].has_fragment(FragmentKind::Lap));
    }

    #[test]
    fn countdown_is_negative() {
        let src = "[[statement]]\ntime = \"1:00\"\ncountdown = true\neffort = \"Rest\"\n";
        let statements = load_statements(src, 0).unwrap();
        assert_eq!(statements[0].timer(), Some(-60_000));
    }

    #[test]
    fn rejects_out_of_range_time() {
        let src = "[[statement]]\ntime = -9223372036854775808\ncountdown = true\n";
        let errors = load_statements(src, 0).unwrap_err();
        assert!(errors[0].message.contains("out of range"));

        let src = "[[statement]]\ntime = \"9223372036854775:00\"\n";
        let errors = load_statements(src, 0).unwrap_err();
        assert!(errors[0].message.contains("out of range"));
    }

    #[test]
    fn reports_bad_values_with_spans() {
        let src = "[[statement]]\ntime = \"soon\"\nrounds = 0\n";
        let errors = load_statements(src, 0).unwrap_err();
        assert_eq!(errors.len(), 2);
        let line_of = |e: &LoadError| byte_offset_to_line(src, e.span.start);
        assert_eq!(line_of(&errors[0]), 3);
        assert!(errors[0].message.contains("rounds"));
        assert_eq!(line_of(&errors[1]), 2);
    }

    #[test]
    fn rejects_empty_statement() {
        let errors = load_statements("[[statement]]\n", 0).unwrap_err();
        assert!(errors[0].message.contains("no content"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let errors = load_statements("[[statement]]\nweight = 3\n", 0).unwrap_err();
        assert!(errors[0].message.contains("unknown field"));
    }
}
