pub mod commands;
pub mod workspace;

pub use commands::{execute, Command};
pub use workspace::Workspace;
