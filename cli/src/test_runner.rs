use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use wod::loader::{LoadError, Loader};
use wod_runtime::BlockStack;

use crate::simulation::{Simulation, Step};

#[derive(Debug, Deserialize)]
pub struct ExpectedLoadError {
    /// Substring that must appear in one of the load errors.
    pub contains: String,

    /// If set, that error's span must start on this 1-based source line.
    #[serde(default)]
    pub line: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Human-readable test description.
    #[serde(default)]
    pub description: Option<String>,

    /// Interactions to apply in order. Defaults to simulating the whole
    /// workout.
    #[serde(default = "default_steps")]
    pub steps: Vec<String>,

    /// Step budget for `run`.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Block labels on the stack after the steps, top first.
    #[serde(default)]
    pub expect_stack: Option<Vec<String>>,

    /// Whether the stack must be empty after the steps.
    #[serde(default)]
    pub expect_complete: Option<bool>,

    /// Labels of the execution records, in the order blocks were pushed.
    #[serde(default)]
    pub expect_records: Option<Vec<String>>,

    /// The workout must fail to load with a matching error.
    #[serde(default)]
    pub expect_load_error: Option<ExpectedLoadError>,

    /// A runtime error whose Display string contains this substring must
    /// have been raised or recorded.
    #[serde(default)]
    pub expect_error: Option<String>,
}

fn default_steps() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_max_steps() -> usize {
    10_000
}

/// Parse a `.test.wod` file into its TOML config and workout source.
fn parse_test_file(content: &str) -> Result<(TestConfig, &str), String> {
    let content = content.trim_start_matches('\u{feff}'); // strip BOM

    if !content.starts_with("---") {
        return Err("missing opening --- frontmatter delimiter".into());
    }

    let after_open = &content[3..];
    let after_open = after_open
        .strip_prefix('\n')
        .or_else(|| after_open.strip_prefix("\r\n"))
        .unwrap_or(after_open);

    let close_pos = after_open
        .find("\n---")
        .ok_or("missing closing --- frontmatter delimiter")?;

    let toml_str = after_open[..close_pos].trim_end_matches('\r');
    let rest_start = close_pos + 4; // skip \n---
    let source = after_open[rest_start..]
        .strip_prefix("\r\n")
        .or_else(|| after_open[rest_start..].strip_prefix('\n'))
        .unwrap_or(&after_open[rest_start..]);

    let config: TestConfig =
        toml::from_str(toml_str).map_err(|e| format!("TOML parse error: {}", e))?;

    Ok((config, source))
}

pub enum TestOutcome {
    Pass,
    Fail(String),
}

pub struct TestResult {
    pub path: PathBuf,
    pub description: Option<String>,
    pub outcome: TestOutcome,
}

fn run_single_test(path: &Path) -> TestResult {
    let fail = |description: Option<String>, reason: String| TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(reason),
    };

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => return fail(None, format!("cannot read file: {}", e)),
    };

    let (config, source) = match parse_test_file(&content) {
        Ok(pair) => pair,
        Err(e) => return fail(None, format!("frontmatter error: {}", e)),
    };
    let description = config.description.clone();

    let load_result = Loader::new(source.to_string(), 0).load();

    if let Some(expected) = &config.expect_load_error {
        let outcome = match load_result {
            Err(errors) => match check_load_errors(source, &errors, expected) {
                None => TestOutcome::Pass,
                Some(reason) => TestOutcome::Fail(reason),
            },
            Ok(_) => TestOutcome::Fail("expected load error, but loading succeeded".into()),
        };
        return TestResult {
            path: path.to_path_buf(),
            description,
            outcome,
        };
    }

    let script = match load_result {
        Ok(script) => script,
        Err(errs) => {
            let msgs: Vec<String> = errs.iter().map(|e| e.message.clone()).collect();
            return fail(
                description,
                format!("unexpected load error: {}", msgs.join("; ")),
            );
        }
    };

    let mut steps = Vec::new();
    for text in &config.steps {
        match text.parse::<Step>() {
            Ok(step) => steps.push(step),
            Err(e) => return fail(description, format!("bad step \"{}\": {}", text, e)),
        }
    }

    let mut sim = Simulation::new(script, config.max_steps);
    let mut raised = None;
    for step in &steps {
        if let Err(error) = sim.apply(step) {
            raised = Some(format!("{} (during `{}`)", error, step));
            break;
        }
    }

    match (&config.expect_error, &raised) {
        (Some(expected), _) => {
            let recorded = sim.runtime().errors().iter().map(|e| e.to_string());
            let all: Vec<String> = raised.iter().cloned().chain(recorded).collect();
            if !all.iter().any(|e| e.contains(expected.as_str())) {
                return fail(
                    description,
                    format!(
                        "expected error containing \"{}\", got: {}",
                        expected,
                        if all.is_empty() {
                            "(none)".to_string()
                        } else {
                            all.join("; ")
                        }
                    ),
                );
            }
        }
        (None, Some(error)) => {
            return fail(description, format!("unexpected runtime error: {}", error));
        }
        (None, None) => {}
    }

    if let Some(reason) = check_expectations(&config, &sim) {
        return fail(description, reason);
    }

    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Pass,
    }
}

fn check_expectations(config: &TestConfig, sim: &Simulation) -> Option<String> {
    let runtime = sim.runtime();

    if let Some(expected) = &config.expect_stack {
        let actual: Vec<&str> = runtime.stack().labels();
        if actual != *expected {
            return Some(format!(
                "stack mismatch\n  expected: {:?}\n  actual:   {:?}",
                expected, actual
            ));
        }
    }

    if let Some(expected) = config.expect_complete {
        if runtime.is_complete() != expected {
            return Some(format!(
                "expected complete = {}, but stack has depth {}",
                expected,
                runtime.stack().depth()
            ));
        }
    }

    if let Some(expected) = &config.expect_records {
        let actual: Vec<String> = runtime.records().into_iter().map(|r| r.label).collect();
        if actual != *expected {
            return Some(format!(
                "records mismatch\n  expected: {:?}\n  actual:   {:?}",
                expected, actual
            ));
        }
    }

    None
}

/// Convert a byte offset in `source` to a 1-based line number.
fn byte_offset_to_line(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .bytes()
        .filter(|&b| b == b'\n')
        .count()
        + 1
}

/// Check that some load error matches. Returns `Some(reason)` on mismatch.
fn check_load_errors(
    source: &str,
    errors: &[LoadError],
    expected: &ExpectedLoadError,
) -> Option<String> {
    let matching: Vec<&LoadError> = errors
        .iter()
        .filter(|e| e.message.contains(&expected.contains))
        .collect();

    if matching.is_empty() {
        let actual: Vec<String> = errors.iter().map(|e| format!("  - {}", e.message)).collect();
        return Some(format!(
            "expected a load error containing \"{}\"\n  actual errors:\n{}",
            expected.contains,
            actual.join("\n")
        ));
    }

    if let Some(expected_line) = expected.line {
        let lines: Vec<usize> = matching
            .iter()
            .map(|e| byte_offset_to_line(source, e.span.start))
            .collect();
        if !lines.contains(&expected_line) {
            return Some(format!(
                "expected \"{}\" on line {}, but found it on line(s) {:?}",
                expected.contains, expected_line, lines
            ));
        }
    }

    None
}

/// Discover `.test.wod` files grouped by category (subfolder relative to root).
/// Files directly in `root` get category "" (uncategorized).
fn discover_categorized(root: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect_tests(root, root, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect_tests(dir: &Path, root: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_tests(&path, root, out);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(".test.wod") {
                let category = path
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.entry(category).or_default().push(path);
            }
        }
    }
}

/// List available categories for the given test path.
pub fn list_categories(path: &Path) {
    if path.is_file() {
        eprintln!("(single file, no categories)");
        return;
    }

    let categories = discover_categorized(path);
    if categories.is_empty() {
        eprintln!("no .test.wod files found in {}", path.display());
        return;
    }

    eprintln!("available categories:");
    for (cat, files) in &categories {
        let label = if cat.is_empty() { "(root)" } else { cat.as_str() };
        eprintln!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(s: &str, no_color: bool) -> String {
    if no_color {
        s.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", s)
    }
}

fn test_label(result: &TestResult) -> &str {
    result.description.as_deref().unwrap_or_else(|| {
        result
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_suffix(".test.wod"))
            .unwrap_or("?")
    })
}

fn print_failures(failures: &[TestResult]) {
    if failures.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("failures:");
    for f in failures {
        eprintln!();
        eprintln!("  --- {} ---", f.path.display());
        if let TestOutcome::Fail(reason) = &f.outcome {
            for line in reason.lines() {
                eprintln!("  {}", line);
            }
        }
    }
}

fn print_summary(passed: usize, failed: usize, no_color: bool) -> i32 {
    eprintln!();
    if failed == 0 {
        let ok = if no_color { "ok" } else { "\x1b[32mok\x1b[0m" };
        eprintln!("test result: {}. {} passed, 0 failed", ok, passed);
        0
    } else {
        let status = if no_color {
            "FAILED"
        } else {
            "\x1b[31mFAILED\x1b[0m"
        };
        eprintln!(
            "test result: {}. {} passed, {} failed (of {})",
            status,
            passed,
            failed,
            passed + failed
        );
        1
    }
}

/// Run all `.test.wod` files under `path` (or a single file).
/// If `categories` is non-empty, only run tests in those categories.
/// Returns exit code: 0 = all pass, 1 = any failure.
pub fn run_tests(path: &Path, no_color: bool, categories: &[String]) -> i32 {
    if path.is_file() {
        let result = run_single_test(path);
        let passed = matches!(result.outcome, TestOutcome::Pass);
        if passed {
            eprintln!("  {}  {}", pass_label(no_color), test_label(&result));
            return print_summary(1, 0, no_color);
        }
        eprintln!("  {}  {}", fail_label(no_color), test_label(&result));
        print_failures(&[result]);
        return print_summary(0, 1, no_color);
    }

    let all_categories = discover_categorized(path);

    if all_categories.is_empty() {
        eprintln!("no .test.wod files found in {}", path.display());
        return 1;
    }

    let run_categories: BTreeMap<&str, &Vec<PathBuf>> = if categories.is_empty() {
        all_categories.iter().map(|(k, v)| (k.as_str(), v)).collect()
    } else {
        let mut filtered = BTreeMap::new();
        for requested in categories {
            let req = requested.trim_matches('/');
            let mut found = false;
            for (cat, files) in &all_categories {
                if cat == req || cat.starts_with(&format!("{}/", req)) {
                    filtered.insert(cat.as_str(), files);
                    found = true;
                }
            }
            if !found {
                eprintln!(
                    "warning: category '{}' not found (available: {})",
                    req,
                    all_categories
                        .keys()
                        .map(|k| if k.is_empty() { "(root)" } else { k.as_str() })
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
        filtered
    };

    if run_categories.is_empty() {
        eprintln!("no matching categories found");
        return 1;
    }

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut failures: Vec<TestResult> = Vec::new();

    for (cat, files) in &run_categories {
        let header = if cat.is_empty() {
            "(root)".to_string()
        } else {
            cat.to_string()
        };
        eprintln!();
        eprintln!("{}", bold(&header, no_color));

        for file in *files {
            let result = run_single_test(file);
            match &result.outcome {
                TestOutcome::Pass => {
                    passed += 1;
                    eprintln!("  {}  {}", pass_label(no_color), test_label(&result));
                }
                TestOutcome::Fail(_) => {
                    failed += 1;
                    eprintln!("  {}  {}", fail_label(no_color), test_label(&result));
                    failures.push(result);
                }
            }
        }
    }

    print_failures(&failures);
    print_summary(passed, failed, no_color)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_test(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    #[test]
    fn parses_frontmatter_and_body() {
        let (config, body) =
            parse_test_file("---\ndescription = \"rest\"\nsteps = [\"start\"]\n---\n[[statement]]\n")
                .unwrap();
        assert_eq!(config.description.as_deref(), Some("rest"));
        assert_eq!(config.steps, vec!["start"]);
        assert_eq!(body, "[[statement]]\n");
    }

    #[test]
    fn missing_delimiter_is_reported() {
        assert!(parse_test_file("[[statement]]\n").is_err());
    }

    #[test]
    fn scenario_passes_and_fails() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let good = write_test(
            dir.path(),
            "ready.test.wod",
            "---\nsteps = [\"start\"]\nexpect_stack = [\"Ready\", \"Workout\"]\n---\n[[statement]]\neffort = \"Row\"\n",
        );
        let bad = write_test(
            dir.path(),
            "wrong.test.wod",
            "---\nsteps = [\"start\"]\nexpect_complete = true\n---\n[[statement]]\neffort = \"Row\"\n",
        );

        assert!(matches!(run_single_test(&good).outcome, TestOutcome::Pass));
        assert!(matches!(run_single_test(&bad).outcome, TestOutcome::Fail(_)));
        assert_eq!(run_tests(dir.path(), true, &[]), 1);
    }

    #[test]
    fn load_error_expectation_checks_line() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = write_test(
            dir.path(),
            "zero.test.wod",
            "---\n[expect_load_error]\ncontains = \"rounds\"\nline = 2\n---\n[[statement]]\nrounds = 0\n",
        );
        assert!(matches!(run_single_test(&path).outcome, TestOutcome::Pass));
    }
}
