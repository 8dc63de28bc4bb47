//! Headless runner: load a data directory, drive the simulation at the
//! configured frame rate, and exit cleanly on Ctrl-C. Unrecoverable
//! configuration errors exit non-zero.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::LevelFilter;

use emberfall_engine::session::GameSession;

fn main() {
    if let Err(e) = run() {
        eprintln!("emberfall: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // .env settles data dir, seed, and log level for development setups
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("EMBERFALL_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let log_file = std::env::var("EMBERFALL_LOG_FILE").ok();
    emberfall_core::initialize_logger(log_level, log_file.as_deref())
        .context("logger init failed")?;

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var("EMBERFALL_DATA").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"));

    let seed = std::env::var("EMBERFALL_SEED")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0xE18E5);

    log::info!(
        "emberfall: starting with data '{}' seed {}",
        data_dir.display(),
        seed
    );

    let mut session = GameSession::load(&data_dir, seed)
        .with_context(|| format!("cannot load game data from '{}'", data_dir.display()))?;

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        ctrlc::set_handler(move || {
            quit.store(true, Ordering::SeqCst);
        })
        .context("cannot install signal handler")?;
    }

    let frame = Duration::from_secs(1) / session.settings.misc.max_frames_per_sec;
    let mut next_tick = Instant::now();

    while !quit.load(Ordering::SeqCst) {
        session.logic();

        // surface the narrative log on the console
        for msg in session.msgs.drain() {
            log::info!("[game] {}", msg.text);
        }
        session.combat_text.drain();
        session.campaign.drain_events();

        next_tick += frame;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else if now - next_tick > frame * 10 {
            // serious slowness; resynchronise rather than spiral
            log::warn!("emberfall: simulation running behind, resetting pacing");
            next_tick = now;
        }
    }

    log::info!(
        "emberfall: shutting down after {} ticks ({} entities live)",
        session.ticks,
        session.entities.len()
    );
    Ok(())
}
