/// Presentation layer: double-buffered, diff-based terminal renderer.
///
/// How it works:
///   1. Compose the next frame as plain text lines into `front`
///   2. Compare each line with `back` (previous frame)
///   3. Only rewrite lines that changed
///   4. All commands are batched with `queue!`, flushed once at the end
///   5. Swap front/back
///
/// Composition is a pure function of [`App`] so it can be tested without a
/// terminal.

use std::io::{self, BufWriter, Write};

use crossterm::{
    cursor::{self, MoveTo},
    execute, queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};

use crate::domain::direction::Cell;
use crate::domain::world::World;
use crate::sim::interpreter::{Chain, Interpreter, MachineState};
use crate::sim::program::Item;
use crate::ui::app::{App, Builder, Phase};

const SELECT_HELP: &str = "Up/Down: select   Enter: play   q: quit";
const STAGE_HELP: &[&str] = &[
    "m move  t turn  l turnLeft  o open  a attack",
    "i if  f elif  e else  p repeat   Up/Down select  Backspace remove  c clear",
    "Enter run  s step  r reset  Esc stages  q quit",
];

/// Column where the program listing starts, right of the board.
const PANEL_GAP: usize = 4;

pub struct Renderer {
    writer: BufWriter<io::Stdout>,
    front: Vec<String>,
    back: Vec<String>,
    term_w: usize,
    term_h: usize,
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            writer: BufWriter::with_capacity(8192, io::stdout()),
            front: vec![],
            back: vec![],
            term_w: 0,
            term_h: 0,
        }
    }

    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        execute!(
            self.writer,
            terminal::EnterAlternateScreen,
            cursor::Hide,
            Clear(ClearType::All)
        )?;

        let (tw, th) = terminal::size().unwrap_or((80, 24));
        self.term_w = tw as usize;
        self.term_h = th as usize;
        // Force full repaint on first frame.
        self.back.clear();
        Ok(())
    }

    pub fn cleanup(&mut self) -> io::Result<()> {
        execute!(self.writer, cursor::Show, terminal::LeaveAlternateScreen)?;
        terminal::disable_raw_mode()
    }

    pub fn render(&mut self, app: &App) -> io::Result<()> {
        // Detect terminal resize
        let (tw, th) = terminal::size().unwrap_or((80, 24));
        if tw as usize != self.term_w || th as usize != self.term_h {
            self.term_w = tw as usize;
            self.term_h = th as usize;
            self.back.clear();
            queue!(self.writer, Clear(ClearType::All))?;
        }

        self.front = compose(app);
        self.front.truncate(self.term_h);
        for line in &mut self.front {
            clip(line, self.term_w);
        }

        self.flush_diff()?;
        std::mem::swap(&mut self.front, &mut self.back);
        Ok(())
    }

    // ── Diff flush: only write changed lines ──

    fn flush_diff(&mut self) -> io::Result<()> {
        let rows = self.front.len().max(self.back.len());
        for y in 0..rows {
            let line = self.front.get(y).map(String::as_str).unwrap_or("");
            let prev = self.back.get(y).map(String::as_str);
            if prev == Some(line) {
                continue;
            }
            queue!(
                self.writer,
                MoveTo(0, y as u16),
                Print(line),
                Clear(ClearType::UntilNewLine)
            )?;
        }
        self.writer.flush()
    }
}

fn clip(line: &mut String, width: usize) {
    if let Some((idx, _)) = line.char_indices().nth(width) {
        line.truncate(idx);
    }
}

// ── Compose: build frame content ──

pub fn compose(app: &App) -> Vec<String> {
    match (app.phase, app.session.as_ref()) {
        (Phase::Stage, Some(session)) => compose_stage(app, session),
        _ => compose_stage_select(app),
    }
}

fn compose_stage_select(app: &App) -> Vec<String> {
    let mut out = vec![
        String::new(),
        "  CODE WALKER: STAGE SELECT".to_string(),
        format!("  ({})", app.stages.source()),
        String::new(),
    ];
    for (i, stage) in app.stages.stages().iter().enumerate() {
        let marker = if i == app.select_cursor { '>' } else { ' ' };
        out.push(format!(
            "  {marker} {:>2}. {:<20} {}x{}",
            i + 1,
            stage.name,
            stage.grid_size,
            stage.grid_size
        ));
    }
    if app.stages.is_empty() {
        out.push("  (no stages available)".to_string());
    }
    out.push(String::new());
    out.push(format!("  {SELECT_HELP}"));
    if !app.message.is_empty() {
        out.push(format!("  {}", app.message));
    }
    out
}

fn compose_stage(app: &App, session: &Interpreter) -> Vec<String> {
    let world = session.world();
    let board = board_lines(world);
    let status = status_lines(session);
    let program = program_lines(session, app);

    let mut out = vec![format!(" {}", session.stage().name), String::new()];

    // Board + status on the left, program listing on the right.
    let left: Vec<String> = board.into_iter().chain(std::iter::once(String::new())).chain(status).collect();
    let left_w = left.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let rows = left.len().max(program.len());
    for y in 0..rows {
        let l = left.get(y).map(String::as_str).unwrap_or("");
        let r = program.get(y).map(String::as_str).unwrap_or("");
        let pad = left_w - l.chars().count() + PANEL_GAP;
        let row = format!(" {l}{:pad$}{r}", "");
        out.push(row.trim_end().to_string());
    }

    out.push(String::new());
    out.extend(STAGE_HELP.iter().map(|h| format!(" {h}")));
    out.push(String::new());
    out.push(format!(" {}", app.message));
    for event in &app.events {
        out.push(format!("   . {event}"));
    }
    out
}

/// The grid, one row per line, two columns per cell. The character is
/// drawn as its facing arrow over whatever occupies its cell.
pub fn board_lines(world: &World) -> Vec<String> {
    let size = world.grid_size();
    let ch = world.character();
    let mut lines = Vec::with_capacity(size + 2);
    lines.push(format!("+{}+", "-".repeat(size * 2)));
    for y in 0..size {
        let mut row = String::with_capacity(size * 2 + 2);
        row.push('|');
        for x in 0..size {
            let cell = Cell::new(x, y);
            let glyph = if cell == ch.cell {
                if world.is_incapacitated() { 'X' } else { ch.facing.arrow() }
            } else {
                world.occupant_at(cell).glyph()
            };
            row.push(glyph);
            row.push(' ');
        }
        row.push('|');
        lines.push(row);
    }
    lines.push(format!("+{}+", "-".repeat(size * 2)));
    lines
}

fn status_lines(session: &Interpreter) -> Vec<String> {
    let world = session.world();
    let ch = world.character();
    let state = match session.state() {
        MachineState::Halted(_) => format!("{} (press r)", session.state().name()),
        other => other.name().to_string(),
    };
    vec![
        format!("coins {}/{}", world.coins_collected(), world.coins_total()),
        format!("at {} facing {}", ch.cell, ch.facing),
        format!("end {}", world.end_point()),
        format!("monsters {}  doors {}", world.monsters_remaining(), world.doors_remaining()),
        format!("state {state}"),
        format!("actions {}", session.actions_executed()),
    ]
}

fn program_lines(session: &Interpreter, app: &App) -> Vec<String> {
    let program = session.program();
    let mut out = vec!["PROGRAM".to_string()];
    if program.is_empty() {
        out.push("  (empty)".to_string());
    }
    let show_cursor = session.cursor() > 0 || session.state() == MachineState::Running;
    for (i, item) in program.items().iter().enumerate() {
        let marker = if show_cursor && i == session.cursor() { '>' } else { ' ' };
        let indent = if matches!(item, Item::ElseIf { .. } | Item::Else { .. }) { "  " } else { "" };
        let picked = if app.selected == Some(i) { "  <" } else { "" };
        out.push(format!("{marker}{:>2}. {indent}{item}{picked}", i + 1));
    }
    if let Chain::Open { satisfied } = session.chain() {
        out.push(format!("  chain open ({})", if satisfied { "taken" } else { "not taken" }));
    }
    match app.builder {
        Builder::Ready => {}
        Builder::Condition(kind) => {
            out.push(String::new());
            out.push(format!("{}: condition?", kind.keyword()));
            for (i, c) in crate::domain::conditions::Condition::ALL.iter().enumerate() {
                out.push(format!("  {} {c}", i + 1));
            }
        }
        Builder::Action(kind, condition) => {
            out.push(String::new());
            match condition {
                Some(c) => out.push(format!("{} {c}: action?", kind.keyword())),
                None => out.push(format!("{}: action?", kind.keyword())),
            }
            for (i, c) in crate::sim::commands::Command::ALL.iter().enumerate() {
                out.push(format!("  {} {}", i + 1, c.label()));
            }
        }
        Builder::RepeatCount(count) => {
            out.push(String::new());
            let typed = count.map_or_else(|| "_".to_string(), |n| n.to_string());
            out.push(format!("repeat {typed}: count? (digits, Enter)"));
        }
        Builder::RepeatBody(times) => {
            out.push(String::new());
            let draft = Item::Repeat { times, body: app.repeat_body.clone() };
            out.push(format!("{draft}"));
            out.push("  m t l o a add   Backspace undo   Enter done".to_string());
        }
    }
    out
}
