mod config;
mod event_cmds;
mod history_cmds;
mod log_cmd;
mod plan_cmds;
mod rule_cmds;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use hud_core::gateway::PlanGateway;
use hud_db::pool;

use config::HudConfig;

#[derive(Parser)]
#[command(name = "hud", about = "Versioned overlay plans driven by text-event rules")]
struct Cli {
    /// Database URL (overrides HUD_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Profile to operate on (overrides HUD_PROFILE env var)
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a hud config file (no database required)
    Init {
        /// SQLite connection URL (defaults to the platform data directory)
        #[arg(long)]
        db_url: Option<String>,
        /// Default profile id
        #[arg(long, default_value = config::DEFAULT_PROFILE)]
        default_profile: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and give the profile its default plan
    DbInit,
    /// List profiles that have a plan
    Profiles,
    /// Plan inspection and editing
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Restore the previous snapshot
    Undo,
    /// Re-apply the snapshot most recently undone
    Redo,
    /// Restore any retained snapshot
    Rollback {
        /// Snapshot id (or a unique prefix of one)
        snapshot_id: String,
    },
    /// List retained snapshots
    History,
    /// Feed one passive text event to the rules
    Event {
        /// Event text
        text: String,
        /// Event type recorded with the event
        #[arg(long = "type", default_value = "manual")]
        event_type: String,
    },
    /// Feed standard input to the rules, one event per line
    Watch {
        /// Event type recorded with each line
        #[arg(long = "type", default_value = "ocr")]
        event_type: String,
    },
    /// Rule management
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Record a free-form note in the memory log
    Note {
        /// Note text
        text: String,
    },
    /// Show the memory log
    Log {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Print the current plan
    Show {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a plan file without applying it
    Validate {
        /// Path to a plan JSON file (`-` for stdin)
        file: String,
    },
    /// Validate a plan file and make it current
    Apply {
        /// Path to a plan JSON file (`-` for stdin)
        file: String,
        /// Reason stored with the snapshot
        #[arg(long)]
        reason: Option<String>,
    },
    /// Submit an untrusted composer draft
    Draft {
        /// Path to the draft (`-` for stdin)
        file: String,
    },
    /// Convert a legacy profile document into the current plan
    ImportLegacy {
        /// Path to the legacy profile JSON (`-` for stdin)
        file: String,
    },
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Add a rule, or replace the rule with the same id
    Add {
        /// Path to a rule JSON file (`-` for stdin)
        file: String,
    },
    /// List rules in evaluation order
    List {
        /// Show sampling state
        #[arg(long)]
        verbose: bool,
    },
    /// Delete a rule
    Remove { rule_id: String },
    /// Turn a rule on
    Enable { rule_id: String },
    /// Turn a rule off
    Disable { rule_id: String },
}

/// Execute the `hud init` command: write config file.
fn cmd_init(db_url: Option<&str>, default_profile: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let url = db_url.map_or_else(hud_db::config::DbConfig::default_url, str::to_string);
    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: url.clone() },
        profile: config::ProfileSection {
            default: default_profile.to_string(),
        },
        retention: config::RetentionSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {url}");
    println!("  profile.default = {default_profile}");
    println!();
    println!("Next: run `hud db-init` to create the database.");

    Ok(())
}

/// Execute the `hud db-init` command: create database, run migrations, and
/// initialize the resolved profile.
async fn cmd_db_init(resolved: &HudConfig) -> anyhow::Result<()> {
    println!("Initializing hud database...");

    pool::ensure_database_dir(&resolved.db_config)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let gateway = PlanGateway::with_retention(db_pool.clone(), resolved.retention);
    match gateway.initialize_profile(&resolved.profile_id).await? {
        Some(outcome) => {
            plan_cmds::print_outcome(&format!("Profile {}", resolved.profile_id), &outcome)
        }
        None => println!("Profile {} already has a plan.", resolved.profile_id),
    }

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("hud db-init complete.");
    Ok(())
}

/// Open the configured database, bringing its schema up to date.
async fn open_gateway(resolved: &HudConfig) -> anyhow::Result<PlanGateway> {
    pool::ensure_database_dir(&resolved.db_config)?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;
    Ok(PlanGateway::with_retention(db_pool, resolved.retention))
}

async fn run_command(command: Commands, resolved: &HudConfig) -> anyhow::Result<()> {
    let gateway = open_gateway(resolved).await?;
    let profile_id = resolved.profile_id.as_str();

    let result = match command {
        Commands::Profiles => list_profiles(&gateway, profile_id).await,
        Commands::Plan { command } => {
            plan_cmds::run_plan_command(command, &gateway, profile_id).await
        }
        Commands::Undo => history_cmds::run_undo(&gateway, profile_id).await,
        Commands::Redo => history_cmds::run_redo(&gateway, profile_id).await,
        Commands::Rollback { snapshot_id } => {
            history_cmds::run_rollback(&gateway, profile_id, &snapshot_id).await
        }
        Commands::History => history_cmds::run_history(&gateway, profile_id).await,
        Commands::Event { text, event_type } => {
            event_cmds::run_event(&gateway, profile_id, &event_type, &text).await
        }
        Commands::Watch { event_type } => {
            event_cmds::run_watch(&gateway, profile_id, &event_type).await
        }
        Commands::Rule { command } => {
            rule_cmds::run_rule_command(command, &gateway, profile_id).await
        }
        Commands::Note { text } => log_cmd::run_note(&gateway, profile_id, &text).await,
        Commands::Log { limit } => log_cmd::run_log(&gateway, profile_id, limit).await,
        Commands::Init { .. } | Commands::DbInit | Commands::Completions { .. } => {
            Err(anyhow::anyhow!("command does not run against an open database"))
        }
    };

    gateway.pool().close().await;
    result
}

async fn list_profiles(gateway: &PlanGateway, selected: &str) -> anyhow::Result<()> {
    let profiles = gateway.profiles().await?;
    if profiles.is_empty() {
        println!("No profiles yet. Run `hud db-init` to create one.");
        return Ok(());
    }
    for profile in &profiles {
        let marker = if profile == selected { "*" } else { " " };
        println!("{marker} {profile}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            default_profile,
            force,
        } => {
            cmd_init(db_url.as_deref(), &default_profile, force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hud", &mut std::io::stdout());
        }
        Commands::DbInit => {
            let resolved = HudConfig::resolve(cli.database_url.as_deref(), cli.profile.as_deref())?;
            cmd_db_init(&resolved).await?;
        }
        command => {
            let resolved = HudConfig::resolve(cli.database_url.as_deref(), cli.profile.as_deref())?;
            if let Err(e) = run_command(command, &resolved).await {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
