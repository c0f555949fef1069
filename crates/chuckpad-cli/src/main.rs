//! chuckpad - developer tool for the ChuckPad social client.
//!
//! Shows and switches the backend environment the client talks to, and
//! inspects or clears the credentials stored for each environment.

mod command;

use std::io;

use anyhow::Result;
use chuckpad_core::{Config, Environment, LogoutKind, Session};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use command::{Command, USAGE};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let mut config = Config::load()?;
    let session = Session::from_config(&config);

    match command {
        Command::Help => println!("{}", USAGE),
        Command::ShowEnvironment => print_environment(&session),
        Command::SetEnvironment(environment) => {
            session.set_environment(environment);
            persist_environment(&mut config, session.environment())?;
            print_environment(&session);
        }
        Command::ToggleEnvironment => {
            let environment = session.toggle_environment();
            persist_environment(&mut config, environment)?;
            print_environment(&session);
        }
        Command::Status => print_status(&session),
        Command::Logout => {
            if !session.is_logged_in() {
                println!("Not logged in on {}", session.environment());
            } else {
                session.on_logout(LogoutKind::Local)?;
                println!("Logged out of {}", session.environment());
            }
        }
    }

    Ok(())
}

fn persist_environment(config: &mut Config, environment: Environment) -> Result<()> {
    config.environment = environment;
    config.save()?;
    info!(environment = %environment, "Saved active environment");
    Ok(())
}

fn print_environment(session: &Session) {
    println!("{} ({})", session.environment(), session.base_url());
}

fn print_status(session: &Session) {
    for line in status_lines(session) {
        println!("{}", line);
    }
}

/// One line per environment, using the same credential view as `logout`.
fn status_lines(session: &Session) -> Vec<String> {
    let active = session.environment();
    Environment::ALL
        .iter()
        .map(|&environment| {
            let marker = if environment == active { "*" } else { " " };
            match session.credential(environment) {
                Some(record) => format!(
                    "{} {:<10} {} (user id {})",
                    marker, environment, record.username, record.user_id
                ),
                None => format!("{} {:<10} not logged in", marker, environment),
            }
        })
        .collect()
}
