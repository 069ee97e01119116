mod simulation;
mod test_runner;

use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::EnvFilter;

use wod::WodScript;
use wod::loader::clock::format_clock;
use wod::loader::{LoadError, Loader};
use wod_runtime::JitCompiler;
use wod_runtime::block::KeySequence;
use wod_runtime::bootstrap::root_groups;
use wod_runtime::compiler::CompileContext;
use wod_runtime::memory::{Memory, MemoryEvent};

use crate::simulation::{Simulation, Step, format_records};

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

#[derive(Parser)]
#[command(name = "wod", version, about = "Workout script runtime")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a workout definition
    Run(RunArgs),

    /// Run .test.wod scenario files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// TOML workout definition
    file: String,

    /// Load only, don't execute (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Dump the loaded statements
    #[arg(long)]
    statements: bool,

    /// Show which strategies each top-level group compiles with
    #[arg(long)]
    plan: bool,

    /// Log every memory change to stderr
    #[arg(long)]
    trace: bool,

    /// Stop simulating after this many steps
    #[arg(long, default_value_t = 10_000)]
    max_steps: usize,

    /// Suppress the transition log and record table
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.wod file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("WOD_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // `wod fran.toml` works like `wod run fran.toml`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|i| i + 1)
    {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);

    match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn do_run(args: RunArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    let script = match Loader::new(source, file_id).load() {
        Ok(script) => script,
        Err(errors) => {
            emit_load_errors(color_choice, &files, &errors);
            process::exit(1);
        }
    };

    if args.check {
        eprintln!(
            "ok: {} loaded {} statement(s)",
            args.file,
            script.statements.len()
        );
        return;
    }

    if args.statements {
        print_statements(&script);
        return;
    }

    if args.plan {
        print_plan(&script);
        return;
    }

    let mut sim = Simulation::new(script, args.max_steps);
    if args.trace {
        sim.runtime_mut().memory_mut().subscribe(|event| {
            let reference = event.reference();
            let verb = match event {
                MemoryEvent::Allocated { .. } => "alloc",
                MemoryEvent::Updated { .. } => "set",
                MemoryEvent::Released { .. } => "free",
            };
            eprintln!(
                "trace: {:<5} #{:<4} {:<20} {}",
                verb, reference.id, reference.kind, reference.owner
            );
        });
    }

    let result = sim.apply(&Step::Run);

    if !args.quiet {
        for transition in sim.transitions() {
            println!(
                "{:>7}  {:<8}  {}",
                format_clock(transition.at),
                transition.step,
                transition.stack.join(" > ")
            );
        }
        println!();
        print!("{}", format_records(&sim.runtime().records()));
    }

    for error in sim.runtime().errors() {
        eprintln!("runtime error: {}", error);
    }
    if let Err(error) = result {
        eprintln!("error: {}", error);
        process::exit(1);
    }
    if !sim.runtime().is_complete() {
        eprintln!(
            "warning: workout did not complete within {} steps",
            args.max_steps
        );
        process::exit(2);
    }
}

fn emit_load_errors(
    color_choice: ColorChoice,
    files: &SimpleFiles<String, String>,
    errors: &[LoadError],
) {
    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();
    for error in errors {
        let diagnostic = error.to_diagnostic();
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic);
    }
}

/// Statements in document order, with the hints dialects would attach.
fn print_statements(script: &WodScript) {
    let mut statements = script.statements.clone();
    JitCompiler::with_defaults().dialects().process(&mut statements);
    for statement in &statements {
        let depth = ancestors(script, statement.parent);
        let hints = if statement.hints.is_empty() {
            String::new()
        } else {
            format!(
                "  [{}]",
                statement.hints.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        };
        println!(
            "{}#{} {}  (line {}){}",
            "  ".repeat(depth),
            statement.id,
            statement,
            statement.meta.line,
            hints
        );
    }
}

fn ancestors(script: &WodScript, mut parent: Option<usize>) -> usize {
    let mut depth = 0;
    while let Some(id) = parent {
        depth += 1;
        parent = script.get(id).and_then(|s| s.parent);
    }
    depth
}

fn print_plan(script: &WodScript) {
    let compiler = JitCompiler::with_defaults();
    let (memory, keys) = (Memory::new(), KeySequence::new());
    let ctx = CompileContext::new(&memory, script, &keys);
    for group in root_groups(script) {
        let statements: Vec<_> = script.get_many(&group).into_iter().cloned().collect();
        let labels: Vec<String> = statements.iter().map(|s| s.to_string()).collect();
        println!(
            "{:<40} {}",
            labels.join(" + "),
            compiler.plan(&statements, &ctx).join(", ")
        );
    }
}
