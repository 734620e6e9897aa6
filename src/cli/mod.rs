//! CLI command handling
//!
//! Subcommand handlers and logging setup shared by the binary.

mod commands;
mod logging;
mod version;

pub use commands::{ConfigSubcommand, handle_config_command, print_crd};
pub use logging::init_logging;
pub use version::display_version;
