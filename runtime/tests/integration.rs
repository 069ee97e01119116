use std::io::Write;

use wod::loader::Loader;
use wod_runtime::block::KeySequence;
use wod_runtime::compiler::CompileContext;
use wod_runtime::memory::{Memory, Owner, SearchCriteria};
use wod_runtime::state::MetricKind;
use wod_runtime::{
    BlockStack, JitCompiler, LifecycleState, ManualClock, RuntimeConfig, RuntimeError,
    RuntimeEvent, ScriptRuntime, names,
};

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

const AMRAP: &str = r#"
[[statement]]
time = "20:00"
action = "AMRAP"

[[statement.child]]
effort = "Burpees"
reps = 10
"#;

const EMOM: &str = r#"
[[statement]]
rounds = 3
time = "1:00"
action = "EMOM"

[[statement.child]]
effort = "Burpees"
reps = 10
"#;

fn runtime(source: &str) -> (ScriptRuntime, ManualClock) {
    let script = Loader::new(source.to_string(), 0)
        .load()
        .expect("load failed");
    let clock = ManualClock::new(0);
    let runtime = ScriptRuntime::new(script, JitCompiler::with_defaults(), clock.clone());
    (runtime, clock)
}

/// Start and step past the ready block and into the first top-level group.
fn started(source: &str) -> (ScriptRuntime, ManualClock) {
    let (mut runtime, clock) = runtime(source);
    runtime.start().expect("start failed");
    runtime.next().expect("ready");
    runtime.next().expect("first group");
    (runtime, clock)
}

fn find_key(runtime: &ScriptRuntime, label_prefix: &str) -> wod_runtime::BlockKey {
    runtime
        .stack()
        .blocks()
        .find(|b| b.label().starts_with(label_prefix))
        .map(|b| b.key())
        .unwrap_or_else(|| panic!("no block labelled {:?}", label_prefix))
}

#[test]
fn bootstrap_wraps_script_in_idle_blocks() {
    let (mut runtime, _clock) = runtime(FRAN);
    assert!(!runtime.is_complete());

    runtime.start().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Ready", "Workout"]);
    assert_eq!(runtime.lifecycle(), LifecycleState::Idle);
    assert_eq!(runtime.controls().button_ids(), vec!["btn-start"]);

    runtime.next().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Workout"]);
    assert_eq!(runtime.lifecycle(), LifecycleState::Executing);

    runtime.next().unwrap();
    assert_eq!(
        runtime.stack().labels(),
        vec!["21 Thrusters 95lb", "21-15-9", "Workout"]
    );
}

#[test]
fn start_is_idempotent() {
    let (mut runtime, _clock) = runtime(FRAN);
    runtime.start().unwrap();
    runtime.start().unwrap();
    assert_eq!(runtime.stack().depth(), 2);
}

#[test]
fn auto_start_skips_ready_block() {
    let (runtime, _clock) = runtime(FRAN);
    let mut runtime = runtime.with_config(RuntimeConfig {
        auto_start: true,
        ..RuntimeConfig::default()
    });
    runtime.start().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Workout"]);
}

#[test]
fn timer_start_leaves_ready_block() {
    let (mut runtime, _clock) = runtime(FRAN);
    runtime.start().unwrap();
    runtime.dispatch(names::TIMER_START).unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Workout"]);
}

#[test]
fn fran_runs_rep_scheme_to_completion() {
    let (mut runtime, _clock) = started(FRAN);

    let mut seen = Vec::new();
    while runtime.stack().depth() == 3 {
        seen.push(runtime.stack().labels()[0].to_string());
        runtime.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            "21 Thrusters 95lb",
            "21 Pullups",
            "15 Thrusters 95lb",
            "15 Pullups",
            "9 Thrusters 95lb",
            "9 Pullups",
        ]
    );

    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
    assert_eq!(runtime.lifecycle(), LifecycleState::Complete);
    assert_eq!(runtime.controls().button_ids(), vec!["btn-analytics"]);
    assert!(!runtime.is_complete());

    runtime.dispatch(names::STOP).unwrap();
    assert!(runtime.is_complete());
    assert!(runtime.errors().is_empty(), "{:?}", runtime.errors());
}

#[test]
fn fresh_rounds_block_has_not_started_looping() {
    let script = Loader::new(FRAN.to_string(), 0).load().unwrap();
    let (memory, keys) = (Memory::new(), KeySequence::new());
    let ctx = CompileContext::new(&memory, &script, &keys);
    let statements: Vec<_> = script.get_many(&[1]).into_iter().cloned().collect();
    let block = JitCompiler::with_defaults()
        .compile(&statements, &ctx)
        .unwrap()
        .expect("rounds block");

    let state = block.loop_state().expect("loop state");
    assert_eq!(state.remaining_rounds, Some(3));
    assert_eq!(state.total_rounds, Some(3));
    assert_eq!(state.current_round, 0);
    assert_eq!(state.current_child_index, -1);

    let (runtime, _clock) = started(FRAN);
    let fran = find_key(&runtime, "21-15-9");
    let state = runtime.stack().find(fran).and_then(|b| b.loop_state()).unwrap();
    assert_eq!(state.current_round, 1);
    assert_eq!(state.current_child_index, 0);
    assert_eq!(state.remaining_rounds, Some(3));
}

#[test]
fn records_capture_per_round_reps() {
    let (mut runtime, clock) = started(FRAN);
    while runtime.stack().depth() > 1 {
        clock.advance(30_000);
        runtime.next().unwrap();
    }

    let records = runtime.records();
    assert_eq!(records.len(), 8);
    assert_eq!(records[0].label, "Workout");
    assert_eq!(records[1].label, "21-15-9");
    assert_eq!(records[1].parent_key, Some(records[0].block_key));
    assert!(records.iter().all(|r| !r.is_active()));
    assert_eq!(records[2].duration(), Some(30_000));

    let reps: Vec<f64> = records[2..]
        .iter()
        .map(|r| {
            let source = r.source_ids[0];
            r.metrics
                .iter()
                .find(|m| m.source_id == source)
                .and_then(|m| m.value(MetricKind::Repetitions))
                .expect("leaf reps")
        })
        .collect();
    assert_eq!(reps, vec![21.0, 21.0, 15.0, 15.0, 9.0, 9.0]);
}

#[test]
fn popped_blocks_release_their_memory() {
    let (mut runtime, _clock) = started(FRAN);
    let fran = find_key(&runtime, "21-15-9");
    assert!(
        !runtime
            .memory()
            .search(&SearchCriteria::new().owned_by(Owner::Block(fran)))
            .is_empty()
    );

    while !runtime.is_complete() {
        match runtime.stack().depth() {
            1 => runtime.dispatch(names::STOP).unwrap(),
            _ => runtime.next().unwrap(),
        }
    }

    let leftovers = runtime.memory().search(&SearchCriteria::new());
    assert!(leftovers.iter().all(|r| r.owner == Owner::Runtime));
}

#[test]
fn repeated_timer_complete_pops_once() {
    let (mut runtime, _clock) = started(AMRAP);
    assert_eq!(
        runtime.stack().labels(),
        vec!["10 Burpees", "AMRAP 20:00", "Workout"]
    );
    let amrap = find_key(&runtime, "AMRAP");
    let compiled = runtime.compiler().metrics().compilations;

    let event = RuntimeEvent::new(names::TIMER_COMPLETE, runtime.now()).for_block(amrap);
    runtime.handle(event.clone()).unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);

    runtime.handle(event).unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
    assert_eq!(runtime.compiler().metrics().compilations, compiled);
    assert!(runtime.errors().is_empty());
}

#[test]
fn amrap_loops_until_time_runs_out() {
    let (mut runtime, clock) = started(AMRAP);
    for _ in 0..4 {
        clock.advance(60_000);
        runtime.next().unwrap();
    }
    let amrap = find_key(&runtime, "AMRAP");
    let round = runtime
        .stack()
        .find(amrap)
        .and_then(|b| b.loop_state())
        .map(|s| s.current_round);
    assert_eq!(round, Some(5));

    clock.advance(16 * 60_000);
    runtime.tick().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
}

#[test]
fn emom_advances_on_the_clock() {
    let (mut runtime, clock) = started(EMOM);
    let emom = find_key(&runtime, "EMOM");
    let first_child = runtime.stack().current().map(|b| b.key());
    let round = |runtime: &ScriptRuntime| {
        runtime
            .stack()
            .find(emom)
            .and_then(|b| b.loop_state())
            .map(|s| s.current_round)
    };

    clock.set(30_000);
    runtime.tick().unwrap();
    assert_eq!(round(&runtime), Some(1));

    clock.set(60_000);
    runtime.tick().unwrap();
    assert_eq!(round(&runtime), Some(2));
    assert_eq!(runtime.stack().depth(), 3);
    assert_ne!(runtime.stack().current().map(|b| b.key()), first_child);

    // Finishing early waits for the next minute.
    runtime.next().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["EMOM 3 x 1:00", "Workout"]);

    clock.set(120_000);
    runtime.tick().unwrap();
    assert_eq!(round(&runtime), Some(3));
    assert_eq!(runtime.stack().labels()[0], "10 Burpees");

    clock.set(180_000);
    runtime.tick().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
}

#[test]
fn pause_freezes_timers_and_controls() {
    let (mut runtime, clock) = started(EMOM);
    let emom = find_key(&runtime, "EMOM");

    clock.set(10_000);
    runtime.dispatch(names::TIMER_PAUSE).unwrap();
    assert!(runtime.is_paused());
    assert_eq!(runtime.lifecycle(), LifecycleState::Paused);
    assert_eq!(
        runtime.controls().button_ids(),
        vec!["btn-resume", "btn-next", "btn-complete"]
    );

    clock.set(70_000);
    runtime.tick().unwrap();
    let elapsed = runtime
        .stack()
        .find(emom)
        .and_then(|b| b.timer())
        .map(|t| t.elapsed(runtime.now()));
    assert_eq!(elapsed, Some(10_000));

    runtime.dispatch(names::TIMER_RESUME).unwrap();
    assert_eq!(runtime.lifecycle(), LifecycleState::Executing);
    assert_eq!(
        runtime.controls().button_ids(),
        vec!["btn-pause", "btn-next", "btn-complete"]
    );

    clock.set(120_000);
    runtime.tick().unwrap();
    let round = runtime
        .stack()
        .find(emom)
        .and_then(|b| b.loop_state())
        .map(|s| s.current_round);
    assert_eq!(round, Some(2));
}

#[test]
fn blocks_pushed_while_paused_start_paused() {
    let source = "[[statement]]\neffort = \"Row\"\n\n[[statement]]\ntime = \"1:00\"\ncountdown = true\neffort = \"Rest\"\n";
    let (mut runtime, clock) = started(source);
    assert_eq!(runtime.stack().labels(), vec!["Row", "Workout"]);

    runtime.dispatch(names::TIMER_PAUSE).unwrap();
    runtime.next().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["-1:00 Rest", "Workout"]);
    let rest = find_key(&runtime, "-1:00 Rest");

    clock.advance(120_000);
    runtime.tick().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["-1:00 Rest", "Workout"]);
    let elapsed = runtime
        .stack()
        .find(rest)
        .and_then(|b| b.timer())
        .map(|t| t.elapsed(runtime.now()));
    assert_eq!(elapsed, Some(0));

    runtime.dispatch(names::TIMER_RESUME).unwrap();
    clock.advance(60_000);
    runtime.tick().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
}

#[test]
fn workout_complete_ends_from_any_depth() {
    let (mut runtime, _clock) = started(FRAN);
    assert_eq!(runtime.stack().depth(), 3);

    runtime.dispatch(names::WORKOUT_COMPLETE).unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
    assert!(runtime.records().iter().all(|r| r.end_time.is_some()));
}

#[test]
fn compile_miss_is_recorded_and_skipped() {
    let script = Loader::new(FRAN.to_string(), 0).load().unwrap();
    let mut runtime = ScriptRuntime::new(script, JitCompiler::new(), ManualClock::new(0));
    runtime.start().unwrap();
    runtime.next().unwrap();
    runtime.next().unwrap();

    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
    assert_eq!(runtime.compiler().metrics().misses, 1);
    assert!(matches!(
        runtime.errors(),
        [RuntimeError::Action { action: "compile-children", .. }]
    ));
}

#[test]
fn action_budget_aborts_dispatch() {
    let (runtime, _clock) = runtime(FRAN);
    let mut runtime = runtime.with_config(RuntimeConfig {
        max_actions_per_dispatch: 1,
        ..RuntimeConfig::default()
    });
    assert_eq!(runtime.start(), Err(RuntimeError::ActionLimit(1)));
    assert_eq!(runtime.errors(), &[RuntimeError::ActionLimit(1)]);
}

#[test]
fn empty_script_has_no_entry_point() {
    let script = wod::WodScript::default();
    let mut runtime = ScriptRuntime::new(script, JitCompiler::with_defaults(), ManualClock::new(0));
    assert_eq!(runtime.start(), Err(RuntimeError::NoEntryPoint));
    assert!(runtime.stack().is_empty());
    assert!(!runtime.is_complete());
}

#[test]
fn runs_script_from_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("rest.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        "[[statement]]\ntime = \"1:00\"\ncountdown = true\neffort = \"Rest\"\n"
    )
    .unwrap();

    let source = std::fs::read_to_string(&path).unwrap();
    let (mut runtime, clock) = started(&source);
    assert_eq!(runtime.stack().labels(), vec!["-1:00 Rest", "Workout"]);

    clock.advance(60_000);
    runtime.tick().unwrap();
    assert_eq!(runtime.stack().labels(), vec!["Finished"]);
}
