use std::fmt;
use std::str::FromStr;

use tracing::debug;
use wod::WodScript;
use wod::loader::clock::{format_clock, parse_clock};
use wod_runtime::state::MetricKind;
use wod_runtime::{
    BlockStack, BlockType, ExecutionRecord, JitCompiler, ManualClock, RuntimeConfig, RuntimeError,
    ScriptRuntime, names,
};

/// Default time an effort takes when the workout is simulated.
pub const DEFAULT_PACE: i64 = 15_000;

/// One scripted interaction with a running workout.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Start,
    Next,
    Tick,
    /// Move the clock forward without dispatching anything.
    Advance(i64),
    /// Simulate until the workout completes or the step budget runs out.
    Run,
    /// Dispatch a named event, e.g. `timer:pause`.
    Dispatch(String),
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(amount) = s.strip_prefix("advance") {
            let amount = amount.trim();
            if amount.is_empty() {
                return Err("`advance` needs a duration such as `advance 1:00`".into());
            }
            return parse_clock(amount).map(|ms| Step::Advance(ms.abs()));
        }
        match s {
            "" => Err("empty step".into()),
            "start" => Ok(Step::Start),
            "next" => Ok(Step::Next),
            "tick" => Ok(Step::Tick),
            "run" => Ok(Step::Run),
            name => Ok(Step::Dispatch(name.to_string())),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Start => write!(f, "start"),
            Step::Next => write!(f, "next"),
            Step::Tick => write!(f, "tick"),
            Step::Advance(ms) => write!(f, "advance {}", format_clock(*ms)),
            Step::Run => write!(f, "run"),
            Step::Dispatch(name) => write!(f, "{}", name),
        }
    }
}

/// A runtime on a manual clock plus the bookkeeping the CLI prints.
pub struct Simulation {
    runtime: ScriptRuntime,
    clock: ManualClock,
    pace: i64,
    max_steps: usize,
    steps: usize,
    transitions: Vec<Transition>,
}

/// The stack as it looked after a step, bottom first.
#[derive(Debug, Clone)]
pub struct Transition {
    pub at: i64,
    pub step: String,
    pub stack: Vec<String>,
}

impl Simulation {
    pub fn new(script: WodScript, max_steps: usize) -> Self {
        let clock = ManualClock::new(0);
        let runtime = ScriptRuntime::new(script, JitCompiler::with_defaults(), clock.clone())
            .with_config(RuntimeConfig::default());
        Simulation {
            runtime,
            clock,
            pace: DEFAULT_PACE,
            max_steps,
            steps: 0,
            transitions: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ScriptRuntime {
        &mut self.runtime
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn apply(&mut self, step: &Step) -> Result<(), RuntimeError> {
        match step {
            Step::Start => self.observe("start", |rt, _| rt.start()),
            Step::Next => self.observe("next", |rt, _| rt.next()),
            Step::Tick => self.observe("tick", |rt, _| rt.tick()),
            Step::Advance(ms) => {
                self.clock.advance(*ms);
                Ok(())
            }
            Step::Run => self.run_to_completion(),
            Step::Dispatch(name) => self.observe(name, |rt, _| rt.dispatch(name)),
        }
    }

    /// Drive the workout the way an athlete would: every step lets `pace`
    /// pass and ticks the clocks; if that changed nothing the athlete
    /// presses next. The final screen is dismissed.
    pub fn run_to_completion(&mut self) -> Result<(), RuntimeError> {
        self.observe("start", |rt, _| rt.start())?;
        while !self.runtime.is_complete() {
            if self.steps >= self.max_steps {
                debug!(steps = self.steps, "step budget exhausted");
                break;
            }
            self.auto_step()?;
        }
        Ok(())
    }

    fn auto_step(&mut self) -> Result<(), RuntimeError> {
        let Some(top) = self.runtime.stack().current() else {
            return Ok(());
        };
        let key = top.key();
        if top.block_type() == BlockType::Idle {
            return if self.runtime.stack().depth() == 1 {
                self.observe(names::STOP, |rt, _| rt.dispatch(names::STOP))
            } else {
                self.observe("next", |rt, _| rt.next())
            };
        }

        let pace = self.pace;
        self.observe("tick", |rt, clock| {
            clock.advance(pace);
            rt.tick()
        })?;

        // Nothing moved on the clock: the athlete moves on.
        if self.runtime.stack().current().is_some_and(|b| b.key() == key) {
            self.observe("next", |rt, _| rt.next())?;
        }
        Ok(())
    }

    fn observe<F>(&mut self, step: &str, action: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut ScriptRuntime, &ManualClock) -> Result<(), RuntimeError>,
    {
        self.steps += 1;
        let before = self.stack_labels();
        let result = action(&mut self.runtime, &self.clock);
        let after = self.stack_labels();
        if before != after {
            self.transitions.push(Transition {
                at: self.clock_now(),
                step: step.to_string(),
                stack: after,
            });
        }
        result
    }

    fn stack_labels(&self) -> Vec<String> {
        self.runtime
            .stack()
            .bottom_first()
            .map(|b| b.label().to_string())
            .collect()
    }

    fn clock_now(&self) -> i64 {
        self.runtime.now()
    }
}

/// Repetitions a record's own statement measured.
pub fn record_reps(record: &ExecutionRecord) -> Option<f64> {
    let source = *record.source_ids.first()?;
    record
        .metrics
        .iter()
        .find(|m| m.source_id == source)
        .and_then(|m| m.value(MetricKind::Repetitions))
}

/// Render execution records as an aligned table.
pub fn format_records(records: &[ExecutionRecord]) -> String {
    let width = records
        .iter()
        .map(|r| r.label.len())
        .max()
        .unwrap_or(0)
        .max("block".len());

    let mut out = format!(
        "{:<width$}  {:<9}  {:>7}  {:>8}  {:>4}\n",
        "block",
        "type",
        "start",
        "duration",
        "reps",
        width = width
    );
    for record in records {
        let duration = record
            .duration()
            .map(format_clock)
            .unwrap_or_else(|| "-".to_string());
        let reps = record_reps(record)
            .map(|r| r.to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<width$}  {:<9}  {:>7}  {:>8}  {:>4}\n",
            record.label,
            record.block_type.to_string(),
            format_clock(record.start_time),
            duration,
            reps,
            width = width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wod::loader::Loader;

    const FRAN: &str = r#"
[[statement]]
rounds = 3
reps = [21, 15, 9]

[[statement.child]]
effort = "Thrusters"

[[statement.child]]
effort = "Pullups"
"#;

    fn simulation(source: &str) -> Simulation {
        let script = Loader::new(source.to_string(), 0).load().unwrap();
        Simulation::new(script, 1_000)
    }

    #[test]
    fn parses_steps() {
        assert_eq!("next".parse::<Step>(), Ok(Step::Next));
        assert_eq!("advance 1:00".parse::<Step>(), Ok(Step::Advance(60_000)));
        assert_eq!(
            "timer:pause".parse::<Step>(),
            Ok(Step::Dispatch("timer:pause".into()))
        );
        assert!("advance".parse::<Step>().is_err());
        assert!("advance soon".parse::<Step>().is_err());
    }

    #[test]
    fn runs_fran_to_completion() {
        let mut sim = simulation(FRAN);
        sim.apply(&Step::Run).unwrap();
        assert!(sim.runtime().is_complete());

        let records = sim.runtime().records();
        let reps: Vec<f64> = records.iter().filter_map(record_reps).collect();
        assert_eq!(reps, vec![21.0, 21.0, 21.0, 15.0, 15.0, 9.0, 9.0]);
        assert_eq!(records.last().and_then(|r| r.duration()), Some(DEFAULT_PACE));
    }

    #[test]
    fn step_budget_stops_the_loop() {
        let src = "[[statement]]\ntime = \"20:00\"\naction = \"AMRAP\"\n\n[[statement.child]]\neffort = \"Burpees\"\n";
        let script = Loader::new(src.to_string(), 0).load().unwrap();
        let mut sim = Simulation::new(script, 10);
        sim.apply(&Step::Run).unwrap();
        assert!(!sim.runtime().is_complete());
    }

    #[test]
    fn records_table_lists_every_block() {
        let mut sim = simulation(FRAN);
        sim.apply(&Step::Run).unwrap();
        let table = format_records(&sim.runtime().records());
        assert_eq!(table.lines().count(), 9);
        assert!(table.lines().nth(1).unwrap().starts_with("Workout"));
    }
}
