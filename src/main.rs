/// Entry point and game loop.

mod cli;
mod config;
mod domain;
mod logging;
mod sim;
mod ui;

use std::time::Instant;

use clap::Parser;
use tracing::{error, info, warn};

use cli::{Cli, Commands};
use config::GameConfig;
use logging::LogTarget;
use sim::stages::StageSet;
use ui::app::App;
use ui::input::InputState;
use ui::renderer::Renderer;

fn main() {
    let cli = Cli::parse();
    let config = GameConfig::load();

    let target = match cli.command {
        None => LogTarget::File,
        Some(_) => LogTarget::Stderr,
    };
    let log_note = logging::init(&config.log, target);
    for w in &config.warnings {
        warn!("{w}");
    }

    let stages = StageSet::load(&config);

    let code = match cli.command {
        Some(Commands::List) => match cli::list_stages(&stages, &mut std::io::stdout().lock()) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        Some(Commands::Run(args)) => {
            let delay = config.speed.step_delay();
            match cli::run_headless(&stages, &args, delay, &mut std::io::stdout().lock()) {
                Ok(_) => 0,
                Err(e) => {
                    error!("{e}");
                    eprintln!("Error: {e}");
                    1
                }
            }
        }
        None => run_session(stages, &config, log_note),
    };
    std::process::exit(code);
}

fn run_session(stages: StageSet, config: &GameConfig, log_note: Option<String>) -> i32 {
    let mut app = App::new(stages, config.speed.step_delay());
    if let Some(note) = log_note {
        app.set_message(note);
    }

    let mut renderer = Renderer::new();
    if let Err(e) = renderer.init() {
        eprintln!("Terminal init failed: {e}");
        return 1;
    }
    info!("session started");

    let result = game_loop(&mut app, &mut renderer, config);

    if let Err(e) = renderer.cleanup() {
        eprintln!("Terminal cleanup failed: {e}");
    }

    match result {
        Ok(()) => {
            info!("session ended");
            println!("Thanks for playing Code Walker!");
            0
        }
        Err(e) => {
            error!("game error: {e}");
            eprintln!("Game error: {e}");
            1
        }
    }
}

fn game_loop(
    app: &mut App,
    renderer: &mut Renderer,
    config: &GameConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut kb = InputState::new();
    let frame = config.speed.frame();

    while !app.quit {
        // Blocks up to one frame, so this doubles as the frame sleep.
        kb.drain_events(frame);
        if kb.ctrl_c_pressed() {
            break;
        }
        for code in kb.presses() {
            app.handle_key(code);
            if app.quit {
                break;
            }
        }

        app.tick(Instant::now());
        renderer.render(app)?;
    }

    Ok(())
}
