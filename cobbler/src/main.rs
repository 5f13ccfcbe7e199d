//! `cobbler` command line.
//!
//! Every command runs against the repository in the current directory with
//! the `bd` tracker and the agent command from config.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use cobbler::cycle::{CycleReport, CycleSummary};
use cobbler::error::{CobblerError, find_cobbler_error};
use cobbler::exit_codes;
use cobbler::generation;
use cobbler::io::agent::CommandAgent;
use cobbler::io::config::{DEFAULT_CONFIG_PATH, load_config};
use cobbler::io::tracker::BdTracker;
use cobbler::measure::measure;
use cobbler::recovery::{RecoveryReport, recover_current};
use cobbler::session::Session;
use cobbler::stitch::{StitchReport, stitch};

#[derive(Parser)]
#[command(
    name = "cobbler",
    version,
    about = "Generation lifecycle manager and task execution engine"
)]
struct Cli {
    /// Config file, relative to the repository root.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute ready tasks, one worktree each, merging successes.
    Stitch {
        /// Maximum tasks to attempt (0 = until none are ready).
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Ask the agent to propose new tasks.
    Measure {
        /// Maximum tasks to file (0 = `cycle.measure_batch`).
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Repair stale task branches and orphaned in-progress tasks.
    Recover,
    /// Generation lifecycle commands.
    #[command(subcommand)]
    Generation(GenerationCommand),
}

#[derive(Subcommand)]
enum GenerationCommand {
    /// Create a generation branch from the current branch.
    Start {
        /// Explicit generation name instead of a timestamp.
        #[arg(long)]
        name: Option<String>,
    },
    /// Run stitch/measure cycles on the checked-out generation.
    Run,
    /// Switch to the generation, recover and keep working.
    Resume,
    /// Merge the generation into its base and tag the result.
    Stop {
        /// Generation to stop (default: the only generation branch).
        #[arg(long)]
        name: Option<String>,
    },
    /// Drop all generation and task branches and wipe generated source.
    Reset,
    /// List generations with their lifecycle state.
    List,
}

fn main() {
    cobbler::logging::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match find_cobbler_error(err) {
        Some(CobblerError::DirtyWorktree { .. }) => exit_codes::DIRTY,
        Some(CobblerError::AmbiguousGeneration { .. }) => exit_codes::AMBIGUOUS,
        _ => exit_codes::FAILED,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    let config = load_config(&config_path(&root, &cli.config))?;
    let tracker = BdTracker::new(&root);
    let agent = CommandAgent::from_config(&config.agent);
    let mut session = Session::new(&root, config, &tracker, &agent);

    match cli.command {
        Command::Stitch { limit } => {
            print_stitch(&stitch(&session, limit)?);
        }
        Command::Measure { limit } => {
            let report = measure(&session, limit)?;
            println!(
                "measure: proposed={} created={}",
                report.proposed,
                report.created.len()
            );
            for id in &report.created {
                println!("measure: task {id}");
            }
            if let Some(failure) = &report.failure {
                println!("measure: failed {failure}");
            }
            print_degraded(report.degraded.iter().map(|d| d.to_string()));
        }
        Command::Recover => print_recovery(&recover_current(&session)?),
        Command::Generation(command) => run_generation_command(&mut session, command)?,
    }
    Ok(())
}

fn run_generation_command(session: &mut Session<'_>, command: GenerationCommand) -> Result<()> {
    match command {
        GenerationCommand::Start { name } => {
            let report = match name {
                Some(name) => generation::start_generation_named(session, &name)?,
                None => generation::start_generation(session)?,
            };
            println!(
                "generation: started {} from {} (tag {})",
                report.generation, report.base, report.start_tag
            );
        }
        GenerationCommand::Run => {
            let report = generation::run_generation(session, print_cycle)?;
            print_cycles(&report);
        }
        GenerationCommand::Resume => {
            let report = generation::resume_generation(session, print_cycle)?;
            println!(
                "generation: resumed {} saved={:?}",
                report.generation, report.saved
            );
            print_recovery(&report.recovery);
            print_stitch(&report.drain);
            print_cycles(&report.cycles);
        }
        GenerationCommand::Stop { name } => {
            let report = generation::stop_generation(session, name.as_deref())?;
            println!(
                "generation: merged {} into {} as {} (revision {})",
                report.generation, report.base, report.version_tag, report.revision
            );
            for file in &report.restored {
                println!("generation: restored {file}");
            }
        }
        GenerationCommand::Reset => {
            let report = generation::reset_generations(session)?;
            println!(
                "generation: reset to {} removed={} abandoned={}",
                report.base,
                report.removed_branches.len(),
                report.abandoned.len()
            );
            print_degraded(report.degraded.iter().map(|d| d.to_string()));
        }
        GenerationCommand::List => {
            for info in generation::list_generations(session)? {
                println!(
                    "{} {} revision={} branch={}",
                    info.name, info.state, info.revision, info.branch
                );
            }
        }
    }
    Ok(())
}

fn config_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn print_stitch(report: &StitchReport) {
    println!(
        "stitch: base={} attempted={} closed={} reset={}",
        report.base,
        report.attempted(),
        report.closed(),
        report.reset()
    );
    for task in &report.tasks {
        match &task.reset {
            Some(reason) => println!("stitch: reset {} ({reason})", task.task_id),
            None => println!("stitch: closed {}", task.task_id),
        }
    }
    print_degraded(report.degraded.iter().map(|d| d.to_string()));
}

fn print_recovery(report: &RecoveryReport) {
    println!(
        "recover: base={} removed_branches={} reset_tasks={}",
        report.base,
        report.removed_branches.len(),
        report.reset_tasks.len()
    );
    print_degraded(report.degraded.iter().map(|d| d.to_string()));
}

fn print_cycle(summary: &CycleSummary) {
    println!(
        "cycle {}: attempted={} closed={} created={}",
        summary.cycle,
        summary.stitch.attempted(),
        summary.stitch.closed(),
        summary.measure.created.len()
    );
}

fn print_cycles(report: &CycleReport) {
    println!(
        "cycles: ran={} attempted={} closed={} created={} stop={:?}",
        report.cycles, report.attempted, report.closed, report.created, report.stop
    );
}

fn print_degraded(lines: impl Iterator<Item = String>) {
    for line in lines {
        eprintln!("warning: {line}");
    }
}
