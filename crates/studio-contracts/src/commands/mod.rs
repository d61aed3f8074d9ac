mod parser;
mod registry;

pub use parser::{parse_command, Command};
pub use registry::SHELL_HELP_COMMANDS;
