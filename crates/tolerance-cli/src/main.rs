use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tolerance_cli::cli::{execute, Command, Workspace};
use tolerance_core::logging::init_logging_with_filter;
use tolerance_core::CoreConfig;

#[derive(Parser)]
#[command(name = "tolerance-cli")]
#[command(about = "Drive the tolerance core against a local simulated backend")]
struct Cli {
    /// Directory holding remote.json, settings.json and scheduled.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log saga stages and scheduler calls to stderr
    #[arg(long, short)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create records in the simulated backend
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },

    /// Join a room with an invitation code
    Join {
        /// Invitation code (case-sensitive)
        code: String,
        /// Display name for the new user
        name: String,
    },

    /// Show the restored session, if any
    Session,

    /// Cancel this room's reminders and forget the session
    SignOut,

    /// Manage reminders for the active room
    Reminders {
        #[command(subcommand)]
        action: ReminderAction,
    },

    /// List pending scheduled notifications
    Pending,
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Create a room
    Room {
        room_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Create an invitation for a room
    Invitation {
        code: String,
        #[arg(long)]
        room: String,
        #[arg(long)]
        admin: bool,
        #[arg(long, default_value = "invited")]
        status: String,
    },
}

#[derive(Subcommand)]
enum ReminderAction {
    /// Fetch room settings and reconcile the schedule
    Load,
    /// Turn a category's reminder on
    Enable { category: String },
    /// Turn a category's reminder off
    Disable { category: String },
    /// Set a category's time of day (HH:MM)
    Time { category: String, time: String },
    /// Re-apply the desired state to the scheduler
    Reconcile,
    /// Show the in-memory reminder state
    List,
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Seed {
                target: SeedTarget::Room { room_id, name },
            } => Command::SeedRoom { room_id, name },
            Commands::Seed {
                target:
                    SeedTarget::Invitation {
                        code,
                        room,
                        admin,
                        status,
                    },
            } => Command::SeedInvitation {
                code,
                room_id: room,
                admin,
                status,
            },
            Commands::Join { code, name } => Command::Join { code, name },
            Commands::Session => Command::Session,
            Commands::SignOut => Command::SignOut,
            Commands::Reminders { action } => match action {
                ReminderAction::Load => Command::RemindersLoad,
                ReminderAction::Enable { category } => Command::RemindersEnable { category },
                ReminderAction::Disable { category } => Command::RemindersDisable { category },
                ReminderAction::Time { category, time } => {
                    Command::RemindersTime { category, time }
                }
                ReminderAction::Reconcile => Command::RemindersReconcile,
                ReminderAction::List => Command::RemindersList,
            },
            Commands::Pending => Command::Pending,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.data_dir {
        Some(ref dir) => CoreConfig {
            data_dir: dir.clone(),
            ..CoreConfig::from_env()
        },
        None => CoreConfig::from_env(),
    };

    let filter = if cli.verbose {
        "tolerance_core=debug,tolerance_cli=debug"
    } else {
        "tolerance_core=warn,tolerance_cli=warn"
    };
    init_logging_with_filter("tolerance-cli", filter, None);

    let workspace = match Workspace::open(config) {
        Ok(workspace) => workspace,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    match execute(&workspace, cli.command.into()).await {
        Ok(output) => {
            let rendered = if cli.pretty {
                serde_json::to_string_pretty(&output)
            } else {
                serde_json::to_string(&output)
            };
            match rendered {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
