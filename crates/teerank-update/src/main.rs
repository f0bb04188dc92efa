//! Entry point: a single long-running process, no arguments, that polls
//! servers and masters and keeps the ranking tables up to date.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use teerank_common::db;
use teerank_common::logging;
use teerank_common::Config;
use teerank_net::packet::Transport;
use teerank_update::engine::Engine;

fn main() -> ExitCode {
    if std::env::args().len() != 1 {
        eprintln!("usage: teerank-update (no arguments)");
        return ExitCode::FAILURE;
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.verbose);

    let conn = match db::open(&config.database_path()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to open database at {}: {e}", config.database_path().display());
            return ExitCode::FAILURE;
        }
    };

    let transport = match Transport::bind() {
        Ok(t) => t,
        Err(e) => {
            error!("failed to bind UDP sockets: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(conn, transport);
    if let Err(e) = engine.load() {
        error!("failed to load prior state: {e}");
        return ExitCode::FAILURE;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed)) {
        error!("failed to install signal handler: {e}");
        return ExitCode::FAILURE;
    }

    info!("teerank-update starting (root={})", config.root.display());
    engine.run(&stop);
    info!("teerank-update shutting down");

    ExitCode::SUCCESS
}
