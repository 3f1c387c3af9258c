/// Command line surface.
///
/// With no subcommand the interactive terminal session starts. `list` and
/// `run` work without a terminal, for scripting and for trying program files.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;

use crate::sim::interpreter::{ControlError, HaltReason, Interpreter, Progress, RunOutcome};
use crate::sim::program::{Program, ProgramParseError};
use crate::sim::stages::StageSet;
use crate::ui::renderer::board_lines;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the available stages
    List,

    /// Run a program file against a stage and print every step
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stage number (1-based) or name
    #[arg(short, long)]
    pub stage: String,

    /// Program file
    #[arg(short, long)]
    pub program: PathBuf,

    /// Pause after each action, overriding config.toml
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no stage matches '{0}' (try `list`)")]
    UnknownStage(String),
    #[error("could not read {}: {source}", path.display())]
    ProgramIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", path.display())]
    ProgramParse {
        path: PathBuf,
        #[source]
        source: ProgramParseError,
    },
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn list_stages(stages: &StageSet, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "stages from {}:", stages.source())?;
    for (i, stage) in stages.stages().iter().enumerate() {
        writeln!(
            out,
            "{:>3}. {:<20} {}x{}  coins {}  monsters {}  doors {}",
            i + 1,
            stage.name,
            stage.grid_size,
            stage.grid_size,
            stage.coins.len(),
            stage.monsters.len(),
            stage.doors.len()
        )?;
    }
    Ok(())
}

/// Run `args.program` to completion, printing a snapshot after each action.
pub fn run_headless(
    stages: &StageSet,
    args: &RunArgs,
    default_delay: Duration,
    out: &mut impl Write,
) -> Result<RunOutcome, CliError> {
    let (_, stage) = stages
        .find(&args.stage)
        .ok_or_else(|| CliError::UnknownStage(args.stage.clone()))?;
    let text = std::fs::read_to_string(&args.program).map_err(|source| CliError::ProgramIo {
        path: args.program.clone(),
        source,
    })?;
    let program = Program::parse(&text).map_err(|source| CliError::ProgramParse {
        path: args.program.clone(),
        source,
    })?;
    let delay = args.delay_ms.map(Duration::from_millis).unwrap_or(default_delay);
    info!(stage = %stage.name, items = program.len(), ?delay, "headless run");

    let mut interp = Interpreter::new(stage.clone());
    interp.load_program(program)?;

    writeln!(out, "{}", stage.name)?;
    write_snapshot(&interp, out)?;

    // One advance() per action, so its events print next to its snapshot.
    interp.start_run()?;
    let outcome = loop {
        let progress = interp.advance();
        if matches!(progress, Progress::Acted { .. } | Progress::Halted(_)) {
            write_step(&interp, out)?;
            write_events(&mut interp, out)?;
        }
        match progress {
            Progress::Acted { .. } => {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Progress::Halted(reason) => break RunOutcome::Halted(reason),
            Progress::Finished | Progress::NotRunning => break RunOutcome::Finished,
        }
    };

    write_events(&mut interp, out)?;
    let verdict = match outcome {
        RunOutcome::Halted(HaltReason::Won) => "stage cleared",
        RunOutcome::Halted(HaltReason::Incapacitated) => "incapacitated",
        RunOutcome::Finished => "program finished without clearing the stage",
    };
    let world = interp.world();
    writeln!(
        out,
        "result: {verdict} after {} action(s), coins {}/{}",
        interp.actions_executed(),
        world.coins_collected(),
        world.coins_total()
    )?;
    Ok(outcome)
}

fn write_step(interp: &Interpreter, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "-- action {}", interp.actions_executed())?;
    write_snapshot(interp, out)
}

fn write_events(interp: &mut Interpreter, out: &mut impl Write) -> io::Result<()> {
    for event in interp.take_events() {
        writeln!(out, "  {}", event.describe())?;
    }
    Ok(())
}

fn write_snapshot(interp: &Interpreter, out: &mut impl Write) -> io::Result<()> {
    for line in board_lines(interp.world()) {
        writeln!(out, "{line}")?;
    }
    let ch = interp.world().character();
    writeln!(out, "at {} facing {}  [{}]", ch.cell, ch.facing, interp.state().name())
}
