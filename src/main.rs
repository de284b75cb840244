use std::time::Duration;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use tracing::{error, info, warn};

mod cli;
mod config;
mod db;
mod imaging;
mod llm;
mod prompt;
mod scenes;
mod state;
mod storage;
mod tags;
mod utils;

use cli::{parse_command, run_command};
use config::CONFIG;
use db::database::Database;
use state::AppState;
use utils::logging::init_logging;
use utils::timing::{complete_command_timer, start_command_timer};

const USAGE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let db = Database::init(&CONFIG.database_url).await?;
    let state = AppState::new(&CONFIG, db.clone())?;

    let mut timer = start_command_timer(command.name());
    let outcome = tokio::select! {
        result = run_command(&state, &CONFIG, command) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    match &outcome {
        Ok(_) => complete_command_timer(&mut timer, "success", None),
        Err(err) => {
            error!("Command failed: {err:#}");
            complete_command_timer(&mut timer, "error", Some(err.to_string()));
        }
    }

    if !db.flush_usage_events(USAGE_FLUSH_TIMEOUT).await {
        warn!(
            "Dropping {} pending usage event(s) on shutdown",
            db.pending_usage_events()
        );
    }
    db.close().await;

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!("Done");
    Ok(())
}
