//! Command-line argument parsing.

use anyhow::{bail, Result};
use chuckpad_core::Environment;

pub const USAGE: &str = "\
Usage: chuckpad <command>

Commands:
  env                 Show the active environment and its base URL
  env set <name>      Switch to production, stage or local
  env toggle          Switch to the next environment (production -> stage -> local)
  status              Show who is logged in on each environment
  logout              Forget the credential for the active environment
  help                Show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowEnvironment,
    SetEnvironment(Environment),
    ToggleEnvironment,
    Status,
    Logout,
    Help,
}

impl Command {
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        match args.as_slice() {
            [] | ["help"] | ["--help"] | ["-h"] => Ok(Command::Help),
            ["env"] | ["env", "show"] => Ok(Command::ShowEnvironment),
            ["env", "set", name] => Ok(Command::SetEnvironment(name.parse()?)),
            ["env", "toggle"] => Ok(Command::ToggleEnvironment),
            ["status"] => Ok(Command::Status),
            ["logout"] => Ok(Command::Logout),
            _ => bail!("Unrecognized command: {}\n\n{}", args.join(" "), USAGE),
        }
    }
}
