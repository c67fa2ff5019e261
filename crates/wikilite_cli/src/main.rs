use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use config::{CliConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "wikilite-plugins")]
#[command(version, about = "Run WikiLite Lua plugins from the command line", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an article through the plugin pipeline
    Render {
        /// Markdown file to render ("-" reads stdin)
        input: PathBuf,

        /// Article slug; enables the render cache
        #[arg(long)]
        slug: Option<String>,

        /// Name of the requesting user
        #[arg(long)]
        user: Option<String>,

        /// Role of the requesting user
        #[arg(long, value_enum, default_value = "read")]
        role: RoleArg,

        /// Hook to run across all plugins
        #[arg(long, default_value = wikilite_plugins::RENDER_HOOK)]
        hook: String,

        /// Render this many times (shows cache hits)
        #[arg(long, default_value = "1")]
        repeat: u32,
    },

    /// Invoke one plugin's action handler
    Action {
        /// Plugin id
        plugin: String,

        /// Action name passed to onAction
        action: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Article slug whose cached renders are dropped on success
        #[arg(long)]
        slug: Option<String>,

        /// Name of the requesting user
        #[arg(long)]
        user: Option<String>,

        /// Role of the requesting user
        #[arg(long, value_enum, default_value = "write")]
        role: RoleArg,
    },

    /// List plugins in pipeline order
    List {
        /// Also start the worker pool and report its state
        #[arg(long)]
        workers: bool,
    },

    /// Write the Lua type definitions into the plugin directory
    InitTypes {
        /// Plugin directory (defaults to the configured one)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum RoleArg {
    Read,
    Write,
    Admin,
}

impl From<RoleArg> for wikilite_plugins::Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Read => Self::Read,
            RoleArg::Write => Self::Write,
            RoleArg::Admin => Self::Admin,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;

    wikilite_telemetry::init_telemetry(&config.telemetry)?;
    tracing::debug!(
        "Using plugins from {} and storage at {}",
        config.plugin_dir.display(),
        config.storage_path.display()
    );

    match cli.command {
        Commands::Render {
            input,
            slug,
            user,
            role,
            hook,
            repeat,
        } => {
            let caller = commands::caller(user, role.into());
            commands::render::run(&config, &input, &hook, slug, caller, repeat)
        }
        Commands::Action {
            plugin,
            action,
            payload,
            slug,
            user,
            role,
        } => {
            let caller = commands::caller(user, role.into());
            commands::action::run(&config, &plugin, &action, &payload, slug, caller)
        }
        Commands::List { workers } => commands::list::run(&config, workers),
        Commands::InitTypes { dir } => commands::init_types::run(&config, dir),
    }
}
