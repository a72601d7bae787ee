// Library interface for studybuddy-cli so integration tests can reach the
// argument definitions and renderers. main.rs declares the same file, hence
// the path attribute.

#[path = "commands.rs"]
pub mod commands;

pub use commands::{Cli, Command, MeteredArgs};
