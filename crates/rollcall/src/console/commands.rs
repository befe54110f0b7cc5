//! Console command definitions.

use clap::{Parser, Subcommand};

/// One line typed at the console prompt.
#[derive(Debug, Parser)]
#[command(
    name = "rollcall",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
pub struct ConsoleLine {
    /// The command to execute
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

/// Commands accepted at the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConsoleCommand {
    /// Register a student, taking their photo from the camera
    Register {
        /// Student id
        id: String,

        /// Full name
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },

    /// Start or resume monitoring
    Start,

    /// Stop monitoring
    Stop,

    /// Generate an attendance report
    Report,

    /// Clear the session
    Reset,

    /// Show the roster
    Roster,

    /// Show session and camera status
    Status,

    /// Camera controls
    #[command(subcommand)]
    Camera(CameraCommand),

    /// List commands
    Help,

    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

/// Camera subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum CameraCommand {
    /// Ask for camera access again
    Retry,

    /// Show the camera state
    Status,
}

impl ConsoleLine {
    /// Parse a raw input line.
    ///
    /// # Errors
    ///
    /// Returns the clap error for unknown commands or missing arguments.
    pub fn parse_line(line: &str) -> Result<ConsoleCommand, clap::Error> {
        Self::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
    }
}

impl ConsoleCommand {
    /// The name joined back into one string.
    #[must_use]
    pub fn joined_name(name: &[String]) -> String {
        name.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_console_verify() {
        ConsoleLine::command().debug_assert();
    }

    #[test]
    fn test_parse_register_with_multiword_name() {
        let command = ConsoleLine::parse_line("register 42 Ada  King Lovelace").unwrap();
        match command {
            ConsoleCommand::Register { id, name } => {
                assert_eq!(id, "42");
                assert_eq!(ConsoleCommand::joined_name(&name), "Ada King Lovelace");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_register_needs_a_name() {
        assert!(ConsoleLine::parse_line("register 42").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(ConsoleLine::parse_line("start").unwrap(), ConsoleCommand::Start);
        assert_eq!(ConsoleLine::parse_line(" stop ").unwrap(), ConsoleCommand::Stop);
        assert_eq!(ConsoleLine::parse_line("exit").unwrap(), ConsoleCommand::Quit);
        assert_eq!(
            ConsoleLine::parse_line("camera retry").unwrap(),
            ConsoleCommand::Camera(CameraCommand::Retry)
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(ConsoleLine::parse_line("dance").is_err());
    }
}
