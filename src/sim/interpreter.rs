/// The program interpreter: walks a [`Program`] against the single mutable
/// [`World`] and drives the run/step state machine.
///
/// ## State machine
///
/// ```text
///            run                      list exhausted
///   Idle ───────────► Running ─────────────────────────► Idle
///    │  ▲               │ win / incapacitated
///    │  │ item done     ▼
///    │  └── Stepping   Halted(Won | Incapacitated) ──reset──► Idle
///    └─step──┘
/// ```
///
/// Running yields after every executed action (`advance()` returns); the
/// driver renders, waits the inter-step delay, then calls `advance()` again.
/// Stepping executes exactly one top-level item without yielding.
///
/// ## Conditional chains
///
/// `if` opens a chain, `elif` / `else` continue it, anything else closes it.
/// An `elif` or `else` with no open chain is orphaned and does nothing.
/// Each repeat pass starts with its own closed chain.
///
/// ## Termination
///
/// Checked after every executed action. Incapacitation is checked first, so
/// walking into a monster that stands on the end point is a loss.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::stage::Stage;
use crate::domain::world::World;
use super::commands::Command;
use super::event::GameEvent;
use super::program::{Item, Program};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HaltReason {
    Won,
    Incapacitated,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MachineState {
    Idle,
    Running,
    Stepping,
    Halted(HaltReason),
}

impl MachineState {
    pub fn name(self) -> &'static str {
        match self {
            MachineState::Idle => "idle",
            MachineState::Running => "running",
            MachineState::Stepping => "stepping",
            MachineState::Halted(HaltReason::Won) => "won",
            MachineState::Halted(HaltReason::Incapacitated) => "incapacitated",
        }
    }
}

/// Evaluation state of the current conditional chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Chain {
    #[default]
    Closed,
    Open { satisfied: bool },
}

/// A request the machine refused in its current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("cannot {request} while {}", state.name())]
    Busy { request: &'static str, state: MachineState },
    #[error("the program is empty")]
    EmptyProgram,
    #[error("no item at position {index} (program has {len})")]
    NoSuchItem { index: usize, len: usize },
}

/// Result of one `advance()` call while running.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Progress {
    /// One action executed; more may follow.
    Acted { command: Command, ok: bool },
    /// The action just executed ended the stage.
    Halted(HaltReason),
    /// The list ran out; the machine is idle again.
    Finished,
    NotRunning,
}

/// What a single `step()` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub actions: Vec<(Command, bool)>,
    pub halted: Option<HaltReason>,
}

/// How a full run ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunOutcome {
    Finished,
    Halted(HaltReason),
}

/// One pass through a repeat body.
#[derive(Clone, Copy, Debug)]
struct RepeatFrame {
    /// Position of the repeat item in its parent list.
    index: usize,
    times: u32,
    pass: u32,
    pos: usize,
    chain: Chain,
}

/// Result of processing one item (or one repeat boundary).
enum Pump {
    Action { command: Command, ok: bool },
    Nothing,
    End,
}

pub struct Interpreter {
    stage: Stage,
    world: World,
    program: Program,
    state: MachineState,
    cursor: usize,
    chain: Chain,
    frames: Vec<RepeatFrame>,
    events: Vec<GameEvent>,
    actions: u64,
}

// ══════════════════════════════════════════════════════════════
// Construction / accessors
// ══════════════════════════════════════════════════════════════

impl Interpreter {
    pub fn new(stage: Stage) -> Self {
        let world = World::from_stage(&stage);
        Interpreter {
            stage,
            world,
            program: Program::new(),
            state: MachineState::Idle,
            cursor: 0,
            chain: Chain::Closed,
            frames: vec![],
            events: vec![],
            actions: 0,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Index of the next top-level item to execute.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Actions executed since the last reset.
    pub fn actions_executed(&self) -> u64 {
        self.actions
    }

    /// Drain events produced since the last call.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    /// Editing is open while idle and after a win. Incapacitation locks the
    /// program until reset, and so does anything in flight.
    pub fn can_edit(&self) -> bool {
        matches!(self.state, MachineState::Idle | MachineState::Halted(HaltReason::Won))
    }
}

// ══════════════════════════════════════════════════════════════
// Editing
// ══════════════════════════════════════════════════════════════

impl Interpreter {
    fn ensure_editable(&self, request: &'static str) -> Result<(), ControlError> {
        if self.can_edit() {
            Ok(())
        } else {
            Err(ControlError::Busy { request, state: self.state })
        }
    }

    /// Editing changes what the cursor points at, so start over.
    fn rewind(&mut self) {
        self.cursor = 0;
        self.chain = Chain::Closed;
        self.frames.clear();
    }

    pub fn push_item(&mut self, item: Item) -> Result<(), ControlError> {
        self.ensure_editable("edit the program")?;
        debug!(%item, "item added");
        self.program.push(item);
        self.rewind();
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> Result<Item, ControlError> {
        self.ensure_editable("edit the program")?;
        let len = self.program.len();
        let item = self
            .program
            .remove(index)
            .ok_or(ControlError::NoSuchItem { index, len })?;
        debug!(%item, index, "item removed");
        self.rewind();
        Ok(item)
    }

    pub fn clear_program(&mut self) -> Result<(), ControlError> {
        self.ensure_editable("clear the program")?;
        self.program.clear();
        self.rewind();
        Ok(())
    }

    /// Replace the whole program at once (loading a program file).
    pub fn load_program(&mut self, program: Program) -> Result<(), ControlError> {
        self.ensure_editable("load a program")?;
        self.program = program;
        self.rewind();
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════
// Reset / stage switch
// ══════════════════════════════════════════════════════════════

impl Interpreter {
    /// Re-clone the world from the canonical stage, clear the program and
    /// every flag. The only way out of `Halted`.
    pub fn reset(&mut self) -> Result<(), ControlError> {
        if matches!(self.state, MachineState::Running | MachineState::Stepping) {
            return Err(ControlError::Busy { request: "reset", state: self.state });
        }
        self.world = World::from_stage(&self.stage);
        self.program.clear();
        self.rewind();
        self.events.clear();
        self.actions = 0;
        self.state = MachineState::Idle;
        info!(stage = %self.stage.name, "stage reset");
        Ok(())
    }

    pub fn switch_stage(&mut self, stage: Stage) -> Result<(), ControlError> {
        if matches!(self.state, MachineState::Running | MachineState::Stepping) {
            return Err(ControlError::Busy { request: "switch stage", state: self.state });
        }
        self.stage = stage;
        self.reset()
    }
}

// ══════════════════════════════════════════════════════════════
// Execution
// ══════════════════════════════════════════════════════════════

impl Interpreter {
    fn ensure_executable(&self, request: &'static str) -> Result<(), ControlError> {
        if self.state != MachineState::Idle {
            return Err(ControlError::Busy { request, state: self.state });
        }
        if self.program.is_empty() {
            return Err(ControlError::EmptyProgram);
        }
        Ok(())
    }

    /// Idle → Running. Items are then consumed by `advance()`.
    pub fn start_run(&mut self) -> Result<(), ControlError> {
        self.ensure_executable("run")?;
        if self.cursor >= self.program.len() {
            self.rewind();
        }
        self.state = MachineState::Running;
        info!(stage = %self.stage.name, from = self.cursor, items = self.program.len(), "run started");
        Ok(())
    }

    /// Consume items until one action executes or the list runs out.
    /// Each `Acted` return is a suspension point for the driver.
    pub fn advance(&mut self) -> Progress {
        if self.state != MachineState::Running {
            return Progress::NotRunning;
        }
        loop {
            match self.pump() {
                Pump::Action { command, ok } => {
                    if let Some(reason) = self.check_halt() {
                        self.halt(reason);
                        return Progress::Halted(reason);
                    }
                    return Progress::Acted { command, ok };
                }
                Pump::Nothing => {}
                Pump::End => {
                    self.rewind();
                    self.state = MachineState::Idle;
                    info!(actions = self.actions, "run finished");
                    return Progress::Finished;
                }
            }
        }
    }

    /// Execute exactly one top-level item (a whole repeat block counts as
    /// one item), then return to Idle.
    pub fn step(&mut self) -> Result<StepReport, ControlError> {
        self.ensure_executable("step")?;
        if self.cursor >= self.program.len() {
            self.rewind();
        }
        self.state = MachineState::Stepping;
        let index = self.cursor;
        let mut report = StepReport { index, actions: vec![], halted: None };

        loop {
            match self.pump() {
                Pump::Action { command, ok } => {
                    report.actions.push((command, ok));
                    if let Some(reason) = self.check_halt() {
                        self.halt(reason);
                        report.halted = Some(reason);
                        return Ok(report);
                    }
                }
                Pump::Nothing => {}
                Pump::End => break,
            }
            if self.frames.is_empty() && self.cursor != index {
                break;
            }
        }

        if self.cursor >= self.program.len() {
            self.rewind();
        }
        self.state = MachineState::Idle;
        debug!(index, actions = report.actions.len(), "step done");
        Ok(report)
    }

    fn check_halt(&self) -> Option<HaltReason> {
        if self.world.is_incapacitated() {
            Some(HaltReason::Incapacitated)
        } else if self.world.is_cleared() {
            Some(HaltReason::Won)
        } else {
            None
        }
    }

    fn halt(&mut self, reason: HaltReason) {
        self.frames.clear();
        self.state = MachineState::Halted(reason);
        if reason == HaltReason::Won {
            self.events.push(GameEvent::StageCleared);
        }
        info!(stage = %self.stage.name, ?reason, actions = self.actions, "execution halted");
    }
}

// ══════════════════════════════════════════════════════════════
// Item processing
// ══════════════════════════════════════════════════════════════

impl Interpreter {
    /// The list the innermost frame is walking.
    fn current_list(&self) -> &[Item] {
        let mut list = self.program.items();
        for frame in &self.frames {
            list = match list.get(frame.index) {
                Some(Item::Repeat { body, .. }) => body.as_slice(),
                _ => &[],
            };
        }
        list
    }

    fn position(&self) -> usize {
        self.frames.last().map_or(self.cursor, |f| f.pos)
    }

    fn current_chain(&self) -> Chain {
        self.frames.last().map_or(self.chain, |f| f.chain)
    }

    fn chain_mut(&mut self) -> &mut Chain {
        match self.frames.last_mut() {
            Some(f) => &mut f.chain,
            None => &mut self.chain,
        }
    }

    /// Move past the current item in the innermost list.
    fn finish_item(&mut self) {
        match self.frames.last_mut() {
            Some(f) => f.pos += 1,
            None => self.cursor += 1,
        }
    }

    fn execute(&mut self, command: Command) -> Pump {
        let ok = command.execute(&mut self.world, &mut self.events);
        self.actions += 1;
        Pump::Action { command, ok }
    }

    fn pump(&mut self) -> Pump {
        let pos = self.position();
        let item = match self.current_list().get(pos) {
            Some(item) => item.clone(),
            None => return self.end_of_list(),
        };

        match item {
            Item::Command(command) => {
                *self.chain_mut() = Chain::Closed;
                self.finish_item();
                self.execute(command)
            }
            Item::Unknown(name) => {
                warn!(command = %name, "unknown command ignored");
                self.events.push(GameEvent::UnknownCommand { name });
                *self.chain_mut() = Chain::Closed;
                self.finish_item();
                Pump::Nothing
            }
            Item::If { condition, action } => {
                self.finish_item();
                let holds = condition.evaluate(&self.world);
                *self.chain_mut() = Chain::Open { satisfied: holds };
                if holds { self.execute(action) } else { Pump::Nothing }
            }
            Item::ElseIf { condition, action } => {
                self.finish_item();
                match self.current_chain() {
                    Chain::Closed => self.orphaned(pos),
                    Chain::Open { satisfied: true } => Pump::Nothing,
                    Chain::Open { satisfied: false } => {
                        if condition.evaluate(&self.world) {
                            *self.chain_mut() = Chain::Open { satisfied: true };
                            self.execute(action)
                        } else {
                            Pump::Nothing
                        }
                    }
                }
            }
            Item::Else { action } => {
                self.finish_item();
                match self.current_chain() {
                    Chain::Closed => self.orphaned(pos),
                    Chain::Open { satisfied: true } => Pump::Nothing,
                    Chain::Open { satisfied: false } => {
                        *self.chain_mut() = Chain::Open { satisfied: true };
                        self.execute(action)
                    }
                }
            }
            Item::Repeat { times, .. } => {
                *self.chain_mut() = Chain::Closed;
                if times == 0 {
                    self.finish_item();
                } else {
                    self.frames.push(RepeatFrame { index: pos, times, pass: 0, pos: 0, chain: Chain::Closed });
                }
                Pump::Nothing
            }
        }
    }

    fn orphaned(&mut self, index: usize) -> Pump {
        warn!(index, "branch without an open if skipped");
        self.events.push(GameEvent::OrphanedBranch { index });
        Pump::Nothing
    }

    /// The innermost list ran out: next repeat pass, leave the repeat, or
    /// report the end of the program.
    fn end_of_list(&mut self) -> Pump {
        let Some(frame) = self.frames.last_mut() else {
            return Pump::End;
        };
        frame.pass += 1;
        if frame.pass < frame.times {
            frame.pos = 0;
            frame.chain = Chain::Closed;
        } else {
            self.frames.pop();
            self.finish_item();
        }
        Pump::Nothing
    }
}

// ══════════════════════════════════════════════════════════════
// Unit tests
// ══════════════════════════════════════════════════════════════

/// Run to completion, calling `pause` after every executed action.
#[cfg(test)]
impl Interpreter {
    pub fn run_to_end(&mut self, mut pause: impl FnMut(&Interpreter)) -> Result<RunOutcome, ControlError> {
        self.start_run()?;
        loop {
            match self.advance() {
                Progress::Acted { .. } => pause(self),
                Progress::Halted(reason) => return Ok(RunOutcome::Halted(reason)),
                Progress::Finished | Progress::NotRunning => return Ok(RunOutcome::Finished),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conditions::Condition;
    use crate::domain::direction::{Cell, Facing};
    use crate::domain::stage::StartPose;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn stage_from(rows: &[&str]) -> Stage {
        let mut s = Stage {
            name: "test".into(),
            grid_size: rows.len(),
            character: StartPose { x: 0, y: 0, direction: Facing::Right },
            obstacles: vec![],
            doors: vec![],
            monsters: vec![],
            coins: vec![],
            end_point: Cell::new(rows.len() - 1, rows.len() - 1),
        };
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                let c = Cell::new(x, y);
                match ch {
                    '#' => s.obstacles.push(c),
                    'D' => s.doors.push(c),
                    'M' => s.monsters.push(c),
                    '$' => s.coins.push(c),
                    'E' => s.end_point = c,
                    '>' => s.character = StartPose { x, y, direction: Facing::Right },
                    'v' => s.character = StartPose { x, y, direction: Facing::Down },
                    _ => {}
                }
            }
        }
        s
    }

    fn interp(rows: &[&str], program: &str) -> Interpreter {
        let mut it = Interpreter::new(stage_from(rows));
        it.load_program(Program::parse(program).unwrap()).unwrap();
        it
    }

    fn run(it: &mut Interpreter) -> RunOutcome {
        it.run_to_end(|_| {}).unwrap()
    }

    /// The 4x4 stage: character (0,2) facing right, obstacle (2,2),
    /// door (1,1), monster (2,3), coins (1,0) and (3,0), end (3,3).
    fn scenario_stage() -> Stage {
        Stage {
            name: "scenario".into(),
            grid_size: 4,
            character: StartPose { x: 0, y: 2, direction: Facing::Right },
            obstacles: vec![Cell::new(2, 2)],
            doors: vec![Cell::new(1, 1)],
            monsters: vec![Cell::new(2, 3)],
            coins: vec![Cell::new(1, 0), Cell::new(3, 0)],
            end_point: Cell::new(3, 3),
        }
    }

    // ── Scenario trace ──

    #[test]
    fn scenario_program_trace() {
        let mut it = Interpreter::new(scenario_stage());
        it.load_program(Program::parse("turn; move; move; turn; move").unwrap()).unwrap();

        // turn: right -> down
        let r = it.step().unwrap();
        assert_eq!(r.actions, vec![(Command::Turn, true)]);
        assert_eq!(it.world().character().facing, Facing::Down);

        // move: (0,2) -> (0,3)
        let r = it.step().unwrap();
        assert_eq!(r.actions, vec![(Command::Move, true)]);
        assert_eq!(it.world().character().cell, Cell::new(0, 3));

        // move: (0,4) is off the grid
        let r = it.step().unwrap();
        assert_eq!(r.actions, vec![(Command::Move, false)]);
        assert_eq!(it.world().character().cell, Cell::new(0, 3));

        // turn: down -> left
        it.step().unwrap();
        assert_eq!(it.world().character().facing, Facing::Left);

        // move: (-1,3) is off the grid
        let r = it.step().unwrap();
        assert_eq!(r.actions, vec![(Command::Move, false)]);
        assert_eq!(it.world().character().cell, Cell::new(0, 3));
        assert_eq!(it.state(), MachineState::Idle);
        assert_eq!(it.world().coins_remaining(), 2);
        assert!(!it.world().is_incapacitated());
    }

    #[test]
    fn scenario_run_matches_stepping() {
        let program = Program::parse("turn; move; move; turn; move").unwrap();

        let mut stepped = Interpreter::new(scenario_stage());
        stepped.load_program(program.clone()).unwrap();
        for _ in 0..program.len() {
            stepped.step().unwrap();
        }

        let mut ran = Interpreter::new(scenario_stage());
        ran.load_program(program).unwrap();
        assert_eq!(run(&mut ran), RunOutcome::Finished);
        assert_eq!(ran.world(), stepped.world());
    }

    // ── Conditional chains ──

    const CHAIN: &str = "if monsterInFront: move\nelif doorInFront: open\nelse: move";

    #[test]
    fn chain_takes_if_branch_with_monster_ahead() {
        let mut it = interp(&[">M.", "...", "..E"], CHAIN);
        let out = run(&mut it);
        // The if-branch walked into the monster; nothing after it ran.
        assert_eq!(out, RunOutcome::Halted(HaltReason::Incapacitated));
        assert_eq!(it.world().character().cell, Cell::new(1, 0));
        assert_eq!(it.actions_executed(), 1);
    }

    #[test]
    fn chain_takes_elif_branch_with_door_ahead() {
        let mut it = interp(&[">D.", "...", "..E"], CHAIN);
        assert_eq!(run(&mut it), RunOutcome::Finished);
        assert!(!it.world().has_door(Cell::new(1, 0)));
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        assert_eq!(it.actions_executed(), 1);
    }

    #[test]
    fn chain_takes_else_branch_with_nothing_ahead() {
        let mut it = interp(&[">..", "...", "..E"], CHAIN);
        assert_eq!(run(&mut it), RunOutcome::Finished);
        assert_eq!(it.world().character().cell, Cell::new(1, 0));
        assert_eq!(it.actions_executed(), 1);
    }

    #[test]
    fn orphaned_elif_and_else_do_nothing() {
        let mut it = interp(&[">..", "...", "..E"], "elif canMoveForward: move\nelse: move");
        assert_eq!(run(&mut it), RunOutcome::Finished);
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        let events = it.take_events();
        assert_eq!(
            events,
            vec![GameEvent::OrphanedBranch { index: 0 }, GameEvent::OrphanedBranch { index: 1 }]
        );
    }

    #[test]
    fn primitive_closes_the_chain() {
        // if fails, `turn` closes the chain, so the else is orphaned.
        let mut it = interp(&[">..", "...", "..E"], "if doorInFront: open\nturn\nelse: move");
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        assert_eq!(it.world().character().facing, Facing::Down);
        assert!(it.take_events().contains(&GameEvent::OrphanedBranch { index: 2 }));
    }

    #[test]
    fn unknown_item_closes_the_chain() {
        let mut it = interp(&[">..", "...", "..E"], "if doorInFront: open\njump\nelse: move");
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        let events = it.take_events();
        assert!(events.contains(&GameEvent::UnknownCommand { name: "jump".into() }));
        assert!(events.contains(&GameEvent::OrphanedBranch { index: 2 }));
    }

    #[test]
    fn new_if_opens_a_fresh_chain() {
        // First chain is satisfied by its if; the second if re-evaluates.
        let mut it = interp(
            &[">..", "...", "..E"],
            "if canMoveForward: turn\nelse: move\nif doorInFront: open\nelse: move",
        );
        run(&mut it);
        assert_eq!(it.world().character().facing, Facing::Down);
        assert_eq!(it.world().character().cell, Cell::new(0, 1));
    }

    #[test]
    fn satisfied_chain_skips_remaining_branches() {
        let mut it = interp(
            &[">..", "...", "..E"],
            "if canMoveForward: move\nelif canMoveForward: move\nelse: move",
        );
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(1, 0));
        assert_eq!(it.actions_executed(), 1);
    }

    #[test]
    fn chain_state_survives_between_steps() {
        let mut it = interp(&[">D.", "...", "..E"], "if monsterInFront: attack\nelif doorInFront: open");
        let first = it.step().unwrap();
        assert!(first.actions.is_empty());
        assert_eq!(it.chain(), Chain::Open { satisfied: false });
        let second = it.step().unwrap();
        assert_eq!(second.actions, vec![(Command::Open, true)]);
    }

    // ── Repeat ──

    #[test]
    fn repeat_runs_body_n_times() {
        let mut it = interp(&["v...", "....", "....", "...E"], "repeat 3 { move }");
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(0, 3));
        assert_eq!(it.actions_executed(), 3);
    }

    #[test]
    fn nested_repeat() {
        let mut it = interp(&[">...", "....", "....", "...E"], "repeat 2 { repeat 2 { turn } }");
        run(&mut it);
        assert_eq!(it.actions_executed(), 4);
        assert_eq!(it.world().character().facing, Facing::Right);
    }

    #[test]
    fn repeat_body_chain_is_scoped_per_pass() {
        // Each pass starts closed, so the else is orphaned on every pass.
        let mut it = interp(&[">...", "....", "....", "...E"], "repeat 2 { else: move }");
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        let orphans = it
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, GameEvent::OrphanedBranch { .. }))
            .count();
        assert_eq!(orphans, 2);
    }

    #[test]
    fn repeat_zero_is_skipped() {
        let mut it = interp(&[">...", "....", "....", "...E"], "repeat 0 { move }\nturn");
        run(&mut it);
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
        assert_eq!(it.world().character().facing, Facing::Down);
    }

    #[test]
    fn step_executes_whole_repeat_as_one_item() {
        let mut it = interp(&[">...", "....", "....", "...E"], "repeat 3 { move }\nturn");
        let r = it.step().unwrap();
        assert_eq!(r.index, 0);
        assert_eq!(r.actions.len(), 3);
        assert_eq!(it.cursor(), 1);
        assert_eq!(it.world().character().facing, Facing::Right);
    }

    #[test]
    fn run_yields_inside_repeat() {
        let mut it = interp(&[">...", "....", "....", "...E"], "repeat 3 { move }");
        it.start_run().unwrap();
        assert_eq!(it.advance(), Progress::Acted { command: Command::Move, ok: true });
        assert_eq!(it.world().character().cell, Cell::new(1, 0));
        assert_eq!(it.state(), MachineState::Running);
        assert_eq!(it.advance(), Progress::Acted { command: Command::Move, ok: true });
        assert_eq!(it.advance(), Progress::Acted { command: Command::Move, ok: true });
        assert_eq!(it.advance(), Progress::Finished);
        assert_eq!(it.state(), MachineState::Idle);
    }

    // ── Termination ──

    #[test]
    fn win_halts_before_remaining_items() {
        let mut it = interp(&[">$E", "...", "..."], "move; move; turn; turn");
        assert_eq!(run(&mut it), RunOutcome::Halted(HaltReason::Won));
        assert_eq!(it.state(), MachineState::Halted(HaltReason::Won));
        assert_eq!(it.world().character().facing, Facing::Right);
        assert!(it.take_events().contains(&GameEvent::StageCleared));
    }

    #[test]
    fn end_point_with_coins_left_does_not_win() {
        let mut it = interp(&[">.E", "..$", "..."], "move; move");
        assert_eq!(run(&mut it), RunOutcome::Finished);
        assert!(it.world().at_end_point());
        assert_eq!(it.state(), MachineState::Idle);
    }

    #[test]
    fn monster_on_end_point_is_a_loss() {
        let mut s = stage_from(&[">..", "...", "..."]);
        s.end_point = Cell::new(1, 0);
        s.monsters.push(Cell::new(1, 0));
        let mut it = Interpreter::new(s);
        it.push_item(Item::Command(Command::Move)).unwrap();
        assert_eq!(run(&mut it), RunOutcome::Halted(HaltReason::Incapacitated));
    }

    #[test]
    fn incapacitation_blocks_everything_but_reset() {
        let mut it = interp(&[">M.", "...", "..E"], "move; turn; turn");
        assert_eq!(run(&mut it), RunOutcome::Halted(HaltReason::Incapacitated));
        let frozen = it.world().clone();

        assert!(matches!(it.step(), Err(ControlError::Busy { .. })));
        assert!(matches!(it.start_run(), Err(ControlError::Busy { .. })));
        assert!(matches!(it.push_item(Item::Command(Command::Move)), Err(ControlError::Busy { .. })));
        assert!(matches!(it.remove_item(0), Err(ControlError::Busy { .. })));
        assert!(matches!(it.clear_program(), Err(ControlError::Busy { .. })));
        assert_eq!(it.advance(), Progress::NotRunning);
        assert_eq!(it.world(), &frozen);

        it.reset().unwrap();
        assert_eq!(it.state(), MachineState::Idle);
        assert!(it.program().is_empty());
        assert!(!it.world().is_incapacitated());
        assert_eq!(it.world().character().cell, Cell::new(0, 0));
    }

    #[test]
    fn won_blocks_execution_but_not_editing() {
        let mut it = interp(&[">E.", "...", "..."], "move");
        assert_eq!(run(&mut it), RunOutcome::Halted(HaltReason::Won));
        let won = MachineState::Halted(HaltReason::Won);
        assert!(it.can_edit());

        it.push_item(Item::Command(Command::Turn)).unwrap();
        assert_eq!(it.remove_item(0), Ok(Item::Command(Command::Move)));
        assert_eq!(it.program().items(), &[Item::Command(Command::Turn)]);
        it.clear_program().unwrap();
        assert!(it.program().is_empty());
        assert_eq!(it.state(), won);
        assert_eq!(it.cursor(), 0);

        it.push_item(Item::Command(Command::Move)).unwrap();
        assert_eq!(it.step(), Err(ControlError::Busy { request: "step", state: won }));
        assert_eq!(it.start_run(), Err(ControlError::Busy { request: "run", state: won }));
        assert_eq!(it.world().character().cell, Cell::new(1, 0));

        it.reset().unwrap();
        assert_eq!(it.state(), MachineState::Idle);
    }

    #[test]
    fn step_that_wins_halts_mid_repeat() {
        let mut it = interp(&[">$E", "...", "..."], "repeat 3 { move }\nturn");
        let r = it.step().unwrap();
        assert_eq!(r.index, 0);
        assert_eq!(r.actions, vec![(Command::Move, true), (Command::Move, true)]);
        assert_eq!(r.halted, Some(HaltReason::Won));
        assert_eq!(it.state(), MachineState::Halted(HaltReason::Won));
        assert!(it.take_events().contains(&GameEvent::StageCleared));
        assert_eq!(it.world().character().facing, Facing::Right);

        assert!(matches!(
            it.step(),
            Err(ControlError::Busy { state: MachineState::Halted(HaltReason::Won), .. })
        ));
    }

    #[test]
    fn step_into_monster_halts() {
        let mut it = interp(&[">.M", "...", "..E"], "move; move; turn");
        let first = it.step().unwrap();
        assert_eq!(first.halted, None);
        assert_eq!(it.state(), MachineState::Idle);

        let second = it.step().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.actions, vec![(Command::Move, false)]);
        assert_eq!(second.halted, Some(HaltReason::Incapacitated));
        assert_eq!(it.state(), MachineState::Halted(HaltReason::Incapacitated));
        assert_eq!(it.world().character().cell, Cell::new(2, 0));

        assert!(matches!(it.step(), Err(ControlError::Busy { .. })));
        assert!(!it.can_edit());
    }

    #[test]
    fn step_into_monster_inside_repeat() {
        let mut it = interp(&[">.M", "...", "..E"], "repeat 5 { move }");
        let r = it.step().unwrap();
        assert_eq!(r.actions, vec![(Command::Move, true), (Command::Move, false)]);
        assert_eq!(r.halted, Some(HaltReason::Incapacitated));
        assert_eq!(it.state(), MachineState::Halted(HaltReason::Incapacitated));
        assert_eq!(it.world().character().cell, Cell::new(2, 0));
        assert!(matches!(
            it.step(),
            Err(ControlError::Busy { state: MachineState::Halted(HaltReason::Incapacitated), .. })
        ));
    }

    // ── Control requests ──

    #[test]
    fn empty_program_cannot_run_or_step() {
        let mut it = Interpreter::new(stage_from(&[">..", "...", "..E"]));
        assert_eq!(it.start_run(), Err(ControlError::EmptyProgram));
        assert_eq!(it.step(), Err(ControlError::EmptyProgram));
    }

    #[test]
    fn editing_blocked_while_running() {
        let mut it = interp(&[">...", "....", "....", "...E"], "move; move");
        it.start_run().unwrap();
        assert!(matches!(
            it.push_item(Item::Command(Command::Turn)),
            Err(ControlError::Busy { state: MachineState::Running, .. })
        ));
        assert!(it.reset().is_err());
        assert!(it.step().is_err());
    }

    #[test]
    fn remove_reports_bad_index() {
        let mut it = interp(&[">..", "...", "..E"], "move");
        assert_eq!(it.remove_item(3), Err(ControlError::NoSuchItem { index: 3, len: 1 }));
        assert_eq!(it.remove_item(0), Ok(Item::Command(Command::Move)));
    }

    #[test]
    fn cursor_wraps_after_last_step() {
        let mut it = interp(&[">...", "....", "....", "...E"], "move; turn");
        it.step().unwrap();
        assert_eq!(it.cursor(), 1);
        it.step().unwrap();
        assert_eq!(it.cursor(), 0);
        let r = it.step().unwrap();
        assert_eq!(r.index, 0);
        assert_eq!(r.actions, vec![(Command::Move, true)]);
    }

    #[test]
    fn run_continues_from_stepped_cursor() {
        let mut it = interp(&[">...", "....", "....", "...E"], "turn; move; move");
        it.step().unwrap();
        run(&mut it);
        assert_eq!(it.actions_executed(), 3);
        assert_eq!(it.world().character().cell, Cell::new(0, 2));
    }

    #[test]
    fn edit_rewinds_cursor() {
        let mut it = interp(&[">...", "....", "....", "...E"], "move; move");
        it.step().unwrap();
        it.push_item(Item::If { condition: Condition::CanMoveForward, action: Command::Move }).unwrap();
        assert_eq!(it.cursor(), 0);
    }

    #[test]
    fn pause_is_called_once_per_action() {
        let mut it = interp(&[">...", "....", "....", "...E"], "move; jump; if doorInFront: open; turn");
        let mut pauses = 0;
        it.run_to_end(|_| pauses += 1).unwrap();
        assert_eq!(pauses, 2);
    }

    #[test]
    fn reset_restores_canonical_stage() {
        let mut it = interp(&[">$.", "...", "..E"], "move; turn");
        run(&mut it);
        assert_eq!(it.world().coins_remaining(), 0);
        it.reset().unwrap();
        assert_eq!(it.world(), &World::from_stage(it.stage()));
        assert_eq!(it.actions_executed(), 0);
    }

    #[test]
    fn switch_stage_replaces_world() {
        let mut it = interp(&[">..", "...", "..E"], "move");
        it.switch_stage(stage_from(&["....", ".>..", "....", "...E"])).unwrap();
        assert_eq!(it.world().grid_size(), 4);
        assert_eq!(it.world().character().cell, Cell::new(1, 1));
        assert!(it.program().is_empty());
    }

    // ── Properties ──

    fn arb_stage() -> impl Strategy<Value = Stage> {
        (1usize..=6).prop_flat_map(|size| {
            let cell = (0..size, 0..size).prop_map(|(x, y)| Cell::new(x, y));
            let cells = prop::collection::vec(cell.clone(), 0..6);
            let facing = prop_oneof![
                Just(Facing::Up),
                Just(Facing::Right),
                Just(Facing::Down),
                Just(Facing::Left)
            ];
            (
                Just(size),
                cell.clone(),
                facing,
                cells.clone(),
                cells.clone(),
                cells.clone(),
                cells,
                cell,
            )
                .prop_map(|(size, start, direction, obstacles, doors, monsters, coins, end)| {
                    let obstacles = obstacles.into_iter().filter(|c| *c != start).collect();
                    let doors = doors.into_iter().filter(|c| *c != start).collect();
                    Stage {
                        name: "prop".into(),
                        grid_size: size,
                        character: StartPose { x: start.x, y: start.y, direction },
                        obstacles,
                        doors,
                        monsters,
                        coins,
                        end_point: end,
                    }
                })
        })
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        prop::sample::select(Command::ALL.to_vec())
    }

    fn arb_item() -> impl Strategy<Value = Item> {
        let cond = prop::sample::select(Condition::ALL.to_vec());
        let leaf = prop_oneof![
            4 => arb_command().prop_map(Item::Command),
            1 => Just(Item::Unknown("jump".into())),
            2 => (cond.clone(), arb_command()).prop_map(|(condition, action)| Item::If { condition, action }),
            2 => (cond, arb_command()).prop_map(|(condition, action)| Item::ElseIf { condition, action }),
            1 => arb_command().prop_map(|action| Item::Else { action }),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            (0u32..4, prop::collection::vec(inner, 0..4))
                .prop_map(|(times, body)| Item::Repeat { times, body })
        })
    }

    fn arb_program() -> impl Strategy<Value = Program> {
        prop::collection::vec(arb_item(), 1..12).prop_map(Program::from_items)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn character_never_leaves_walkable_cells(stage in arb_stage(), program in arb_program()) {
            let mut it = Interpreter::new(stage);
            it.load_program(program).unwrap();
            let mut bad = None;
            it.run_to_end(|it| {
                let w = it.world();
                let here = w.character().cell;
                if !w.is_enterable(here) {
                    bad = Some(here);
                }
            }).unwrap();
            prop_assert_eq!(bad, None);
            let w = it.world();
            prop_assert!(w.is_enterable(w.character().cell));
        }

        #[test]
        fn same_program_same_stage_same_result(stage in arb_stage(), program in arb_program()) {
            let mut a = Interpreter::new(stage.clone());
            a.load_program(program.clone()).unwrap();
            let out_a = a.run_to_end(|_| {}).unwrap();

            let mut b = Interpreter::new(stage);
            b.load_program(program).unwrap();
            let out_b = b.run_to_end(|_| {}).unwrap();

            prop_assert_eq!(out_a, out_b);
            prop_assert_eq!(a.world(), b.world());
            prop_assert_eq!(a.actions_executed(), b.actions_executed());
        }

        #[test]
        fn halted_world_stays_frozen(stage in arb_stage(), program in arb_program()) {
            let mut it = Interpreter::new(stage);
            it.load_program(program).unwrap();
            if let RunOutcome::Halted(_) = it.run_to_end(|_| {}).unwrap() {
                let frozen = it.world().clone();
                prop_assert!(it.step().is_err());
                prop_assert!(it.start_run().is_err());
                prop_assert_eq!(it.world(), &frozen);
            }
        }

        #[test]
        fn win_only_with_all_coins_at_end(stage in arb_stage(), program in arb_program()) {
            let mut it = Interpreter::new(stage);
            it.load_program(program).unwrap();
            let out = it.run_to_end(|_| {}).unwrap();
            let w = it.world();
            if out == RunOutcome::Halted(HaltReason::Won) {
                prop_assert_eq!(w.coins_remaining(), 0);
                prop_assert!(w.at_end_point());
            }
        }
    }
}
