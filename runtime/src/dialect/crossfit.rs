use wod::statement::CodeStatement;

use super::{Dialect, DialectAnalysis};

pub const TIME_BOUND: &str = "behavior.time_bound";
pub const REPEATING_INTERVAL: &str = "behavior.repeating_interval";
pub const AMRAP: &str = "workout.amrap";
pub const EMOM: &str = "workout.emom";
pub const FOR_TIME: &str = "workout.for_time";
pub const TABATA: &str = "workout.tabata";

/// Keyword, then the hints it implies.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("amrap", &[TIME_BOUND, AMRAP]),
    ("emom", &[REPEATING_INTERVAL, EMOM]),
    ("for time", &[FOR_TIME]),
    ("tabata", &[REPEATING_INTERVAL, TABATA]),
];

/// Recognises CrossFit workout formats in effort and action text.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossFitDialect;

impl Dialect for CrossFitDialect {
    fn id(&self) -> &'static str {
        "crossfit"
    }

    fn analyze(&self, statement: &CodeStatement) -> DialectAnalysis {
        let text: Vec<String> = statement
            .keyword_texts()
            .map(str::to_ascii_lowercase)
            .collect();

        let mut hints: Vec<String> = Vec::new();
        for (keyword, implied) in KEYWORDS {
            if text.iter().any(|t| t.contains(keyword)) {
                for hint in *implied {
                    if !hints.iter().any(|h| h == hint) {
                        hints.push(hint.to_string());
                    }
                }
            }
        }
        DialectAnalysis { hints }
    }
}
