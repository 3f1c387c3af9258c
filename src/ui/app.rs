/// Terminal session state: which screen is up, the program builder's
/// pending branch or repeat, the selected program item, the status message,
/// and the pacing of a running program.
///
/// Key handling lives here rather than in the loop so it can be driven from
/// tests without a terminal.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossterm::event::KeyCode;
use tracing::debug;

use crate::domain::conditions::Condition;
use crate::sim::commands::Command;
use crate::sim::interpreter::{HaltReason, Interpreter, MachineState, Progress};
use crate::sim::program::{Item, MAX_REPEAT};
use crate::sim::stages::StageSet;

/// Lines of event history kept for the side panel.
const EVENT_LOG_LEN: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    StageSelect,
    Stage,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BranchKind {
    If,
    ElseIf,
    Else,
}

impl BranchKind {
    pub fn keyword(self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::ElseIf => "elif",
            BranchKind::Else => "else",
        }
    }
}

/// Multi-key entry of a conditional or repeat item.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Builder {
    Ready,
    /// Waiting for the condition (1-4).
    Condition(BranchKind),
    /// Waiting for the action (1-5).
    Action(BranchKind, Option<Condition>),
    /// Typing the repeat count; `None` until the first digit.
    RepeatCount(Option<u32>),
    /// Collecting commands into `App::repeat_body` until Enter.
    RepeatBody(u32),
}

pub struct App {
    pub stages: StageSet,
    pub phase: Phase,
    pub select_cursor: usize,
    pub session: Option<Interpreter>,
    pub builder: Builder,
    pub repeat_body: Vec<Item>,
    /// Top-level program item picked with Up/Down, removed by Backspace.
    pub selected: Option<usize>,
    pub message: String,
    pub events: VecDeque<String>,
    pub quit: bool,
    step_delay: Duration,
    last_action: Option<Instant>,
}

// ── Key Constants ──

const KEYS_UP: &[KeyCode] = &[KeyCode::Up, KeyCode::Char('k')];
const KEYS_DOWN: &[KeyCode] = &[KeyCode::Down, KeyCode::Char('j')];
const KEYS_QUIT: &[KeyCode] = &[KeyCode::Char('q'), KeyCode::Char('Q')];

impl App {
    pub fn new(stages: StageSet, step_delay: Duration) -> Self {
        App {
            stages,
            phase: Phase::StageSelect,
            select_cursor: 0,
            session: None,
            builder: Builder::Ready,
            repeat_body: vec![],
            selected: None,
            message: String::new(),
            events: VecDeque::with_capacity(EVENT_LOG_LEN),
            quit: false,
            step_delay,
            last_action: None,
        }
    }

    pub fn set_message(&mut self, msg: impl Into<String>) {
        self.message = msg.into();
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state() == MachineState::Running)
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        match self.phase {
            Phase::StageSelect => self.handle_select(code),
            Phase::Stage => self.handle_stage(code),
        }
    }

    /// Drive a running program: one action per elapsed step delay.
    pub fn tick(&mut self, now: Instant) {
        if !self.is_running() {
            return;
        }
        if self.last_action.is_some_and(|t| now.duration_since(t) < self.step_delay) {
            return;
        }
        let Some(session) = self.session.as_mut() else { return };
        let progress = session.advance();
        self.last_action = Some(now);
        self.pull_events();
        match progress {
            Progress::Acted { .. } | Progress::NotRunning => {}
            Progress::Halted(reason) => self.announce_halt(reason),
            Progress::Finished => self.set_message("Program finished. Edit it, run again, or [r] reset."),
        }
    }

    // ── Stage select ──

    fn handle_select(&mut self, code: KeyCode) {
        let total = self.stages.len();
        if KEYS_UP.contains(&code) {
            self.select_cursor = self.select_cursor.saturating_sub(1);
        } else if KEYS_DOWN.contains(&code) {
            if self.select_cursor + 1 < total {
                self.select_cursor += 1;
            }
        } else if code == KeyCode::Enter {
            self.open_stage(self.select_cursor);
        } else if KEYS_QUIT.contains(&code) || code == KeyCode::Esc {
            self.quit = true;
        }
    }

    fn open_stage(&mut self, index: usize) {
        let Some(stage) = self.stages.get(index).cloned() else { return };
        let name = stage.name.clone();
        match self.session.as_mut() {
            Some(session) => {
                if let Err(e) = session.switch_stage(stage) {
                    self.set_message(e.to_string());
                    return;
                }
            }
            None => self.session = Some(Interpreter::new(stage)),
        }
        self.phase = Phase::Stage;
        self.builder = Builder::Ready;
        self.selected = None;
        self.events.clear();
        self.last_action = None;
        self.set_message(format!("Stage {}: {name}", index + 1));
    }

    // ── Stage view ──

    fn handle_stage(&mut self, code: KeyCode) {
        match self.builder {
            Builder::Ready => self.handle_stage_key(code),
            Builder::Condition(kind) => self.pick_condition(kind, code),
            Builder::Action(kind, condition) => self.pick_action(kind, condition, code),
            Builder::RepeatCount(count) => self.type_count(count, code),
            Builder::RepeatBody(times) => self.fill_body(times, code),
        }
    }

    fn handle_stage_key(&mut self, code: KeyCode) {
        if KEYS_QUIT.contains(&code) {
            self.quit = true;
            return;
        }
        if self.is_running() {
            self.set_message("Running... (reset is available once it stops)");
            return;
        }
        if KEYS_UP.contains(&code) {
            self.select_up();
            return;
        }
        if KEYS_DOWN.contains(&code) {
            self.select_down();
            return;
        }
        if let Some(command) = command_key(code) {
            self.add(Item::Command(command));
            return;
        }
        match code {
            KeyCode::Char('i') => self.begin_branch(BranchKind::If),
            KeyCode::Char('f') => self.begin_branch(BranchKind::ElseIf),
            KeyCode::Char('e') => self.begin_branch(BranchKind::Else),
            KeyCode::Char('p') => self.begin_repeat(),
            KeyCode::Backspace | KeyCode::Delete => self.remove_selected(),
            KeyCode::Char('c') => self.clear(),
            KeyCode::Enter => self.run(),
            KeyCode::Char('s') => self.step(),
            KeyCode::Char('r') => self.reset(),
            KeyCode::Esc => self.leave_stage(),
            _ => {}
        }
    }

    /// Builders only start when the program can take the finished item.
    fn editable(&mut self) -> bool {
        let Some(session) = self.session.as_ref() else { return false };
        if session.can_edit() {
            return true;
        }
        let state = session.state().name();
        self.set_message(format!("Cannot edit while {state}. Press [r] to reset."));
        false
    }

    fn begin_branch(&mut self, kind: BranchKind) {
        if !self.editable() {
            return;
        }
        if kind == BranchKind::Else {
            self.builder = Builder::Action(kind, None);
            self.set_message("else: choose action [1-5]");
        } else {
            self.builder = Builder::Condition(kind);
            self.set_message(format!("{}: choose condition [1-4]", kind.keyword()));
        }
    }

    fn pick_condition(&mut self, kind: BranchKind, code: KeyCode) {
        if code == KeyCode::Esc {
            self.cancel_branch();
            return;
        }
        if let Some(condition) = digit(code).and_then(|d| Condition::ALL.get(d)).copied() {
            self.builder = Builder::Action(kind, Some(condition));
            self.set_message(format!("{} {condition}: choose action [1-5]", kind.keyword()));
        }
    }

    fn pick_action(&mut self, kind: BranchKind, condition: Option<Condition>, code: KeyCode) {
        if code == KeyCode::Esc {
            self.cancel_branch();
            return;
        }
        let Some(action) = digit(code).and_then(|d| Command::ALL.get(d)).copied() else { return };
        let item = match (kind, condition) {
            (BranchKind::If, Some(condition)) => Item::If { condition, action },
            (BranchKind::ElseIf, Some(condition)) => Item::ElseIf { condition, action },
            (BranchKind::Else, _) => Item::Else { action },
            (_, None) => {
                self.cancel_branch();
                return;
            }
        };
        self.builder = Builder::Ready;
        self.add(item);
    }

    fn cancel_branch(&mut self) {
        self.builder = Builder::Ready;
        self.repeat_body.clear();
        self.set_message("Cancelled.");
    }

    // ── Repeat builder: p, count digits, Enter, body commands, Enter ──

    fn begin_repeat(&mut self) {
        if !self.editable() {
            return;
        }
        self.repeat_body.clear();
        self.builder = Builder::RepeatCount(None);
        self.set_message(format!("repeat: type a count [0-{MAX_REPEAT}], then Enter"));
    }

    fn type_count(&mut self, count: Option<u32>, code: KeyCode) {
        match code {
            KeyCode::Esc => self.cancel_branch(),
            KeyCode::Backspace => {
                let shorter = count.map(|n| n / 10).filter(|n| *n > 0);
                self.builder = Builder::RepeatCount(shorter);
            }
            KeyCode::Enter => {
                let Some(times) = count else {
                    self.set_message("repeat: type a count first");
                    return;
                };
                self.builder = Builder::RepeatBody(times);
                self.set_message(format!("repeat {times}: add commands (m t l o a), Enter to finish"));
            }
            KeyCode::Char(c) => {
                let Some(d) = c.to_digit(10) else { return };
                let typed = count.unwrap_or(0) * 10 + d;
                if typed > MAX_REPEAT {
                    self.set_message(format!("repeat count is at most {MAX_REPEAT}"));
                    return;
                }
                self.builder = Builder::RepeatCount(Some(typed));
            }
            _ => {}
        }
    }

    fn fill_body(&mut self, times: u32, code: KeyCode) {
        if let Some(command) = command_key(code) {
            self.repeat_body.push(Item::Command(command));
            return;
        }
        match code {
            KeyCode::Esc => self.cancel_branch(),
            KeyCode::Backspace => {
                self.repeat_body.pop();
            }
            KeyCode::Enter => {
                let body = std::mem::take(&mut self.repeat_body);
                self.builder = Builder::Ready;
                self.add(Item::Repeat { times, body });
            }
            _ => {}
        }
    }

    // ── Program selection ──

    fn program_len(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.program().len())
    }

    fn select_up(&mut self) {
        let len = self.program_len();
        self.selected = match self.selected {
            _ if len == 0 => None,
            None => Some(len - 1),
            Some(i) => Some(i.saturating_sub(1)),
        };
    }

    fn select_down(&mut self) {
        let len = self.program_len();
        self.selected = match self.selected {
            Some(i) if i + 1 < len => Some(i + 1),
            _ => None,
        };
    }

    fn add(&mut self, item: Item) {
        let Some(session) = self.session.as_mut() else { return };
        let text = item.to_string();
        match session.push_item(item) {
            Ok(()) => self.set_message(format!("Added: {text}")),
            Err(e) => self.set_message(format!("{e} (press [r] to reset)")),
        }
    }

    /// Remove the selected item, or the last one when nothing is selected.
    fn remove_selected(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        let len = session.program().len();
        let Some(index) = self.selected.or(len.checked_sub(1)) else {
            self.set_message("Program is empty.");
            return;
        };
        match session.remove_item(index) {
            Ok(item) => {
                let left = session.program().len();
                self.selected = self.selected.filter(|_| left > 0).map(|i| i.min(left - 1));
                self.set_message(format!("Removed {}: {item}", index + 1));
            }
            Err(e) => self.set_message(e.to_string()),
        }
    }

    fn clear(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        match session.clear_program() {
            Ok(()) => {
                self.selected = None;
                self.set_message("Program cleared.");
            }
            Err(e) => self.set_message(e.to_string()),
        }
    }

    fn run(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        match session.start_run() {
            Ok(()) => {
                self.last_action = None;
                self.set_message("Running...");
            }
            Err(e) => self.set_message(e.to_string()),
        }
    }

    fn step(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        match session.step() {
            Ok(report) => {
                let halted = report.halted;
                self.pull_events();
                match halted {
                    Some(reason) => self.announce_halt(reason),
                    None => self.set_message(format!(
                        "Stepped item {} ({} action(s))",
                        report.index + 1,
                        report.actions.len()
                    )),
                }
            }
            Err(e) => self.set_message(e.to_string()),
        }
    }

    fn reset(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        match session.reset() {
            Ok(()) => {
                self.events.clear();
                self.builder = Builder::Ready;
                self.repeat_body.clear();
                self.selected = None;
                self.set_message("Stage reset.");
            }
            Err(e) => self.set_message(e.to_string()),
        }
    }

    fn leave_stage(&mut self) {
        self.phase = Phase::StageSelect;
        self.builder = Builder::Ready;
        self.repeat_body.clear();
        self.message.clear();
    }

    fn announce_halt(&mut self, reason: HaltReason) {
        match reason {
            HaltReason::Won => self.set_message("Stage cleared! [Esc] stage select, [r] play again"),
            HaltReason::Incapacitated => self.set_message("Incapacitated! Press [r] to reset."),
        }
    }

    fn pull_events(&mut self) {
        let Some(session) = self.session.as_mut() else { return };
        for event in session.take_events() {
            debug!(?event, "event");
            if self.events.len() == EVENT_LOG_LEN {
                self.events.pop_front();
            }
            self.events.push_back(event.describe());
        }
    }
}

fn command_key(code: KeyCode) -> Option<Command> {
    match code {
        KeyCode::Char('m') => Some(Command::Move),
        KeyCode::Char('t') => Some(Command::Turn),
        KeyCode::Char('l') => Some(Command::TurnLeft),
        KeyCode::Char('o') => Some(Command::Open),
        KeyCode::Char('a') => Some(Command::Attack),
        _ => None,
    }
}

/// '1'..'9' → 0..8
fn digit(code: KeyCode) -> Option<usize> {
    match code {
        KeyCode::Char(c) => c.to_digit(10).and_then(|d| (d as usize).checked_sub(1)),
        _ => None,
    }
}
