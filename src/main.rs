//! Binary entrypoint for the SLQuest CLI.
//!
//! Commands:
//! - `start [--bind <addr>]` - run the HTTP server
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - print the config summary and object pool statistics
//! - `admin-token` - interactively set the admin shared secret (argon2 hashed)
//!
//! See the library crate docs for module-level details: `slquest::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use slquest::config::Config;
use slquest::quest::ObjectPool;
use slquest::server::{hash_admin_secret, serve, AppState};
use slquest::storage::JsonStore;

#[derive(Parser)]
#[command(name = "slquest")]
#[command(about = "NPC chat and scavenger-hunt quest server for Second Life objects")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Start {
        /// Listen address, overriding config and SLQUEST_BIND
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show configuration summary and object pool statistics
    Status,
    /// Set or update the admin shared secret in the config file
    AdminToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { bind } => {
            let mut config = Config::load(&cli.config).await?;
            config.apply_env_overrides();
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting SLQuest v{}", env!("CARGO_PKG_VERSION"));
            if config.llm.api_key.trim().is_empty() {
                warn!("No LLM API key configured; every turn will return the apology reply");
            }
            if config.server.admin_token_hash.is_none() && config.server.admin_token.is_none() {
                warn!("No admin secret configured; /admin routes are disabled");
            }
            let state = AppState::from_config(config)?;
            serve(state).await?;
        }
        Commands::Init { force } => {
            init_logging(&None, cli.verbose);
            if !force && std::path::Path::new(&cli.config).exists() {
                println!(
                    "{} already exists; pass --force to overwrite it.",
                    cli.config
                );
                return Ok(());
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let cfg = Config::default();
            JsonStore::new(cfg.storage.data_dir.clone())?;
            info!("Data directory ready at {}", cfg.storage.data_dir);
        }
        Commands::Status => {
            let pre_config = Config::load(&cli.config).await.ok();
            init_logging(&pre_config, cli.verbose);
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            config.apply_env_overrides();
            show_status(&config)?;
        }
        Commands::AdminToken => {
            let pre_config = Config::load(&cli.config).await.ok();
            init_logging(&pre_config, cli.verbose);
            // Env overrides are not applied here so they never get written back to the file.
            let mut config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let secret1 = rpassword::prompt_password("New admin secret: ")?;
            if secret1.len() < 12 {
                println!("Error: secret too short (min 12).");
                return Ok(());
            }
            if secret1.len() > 256 {
                println!("Error: secret too long.");
                return Ok(());
            }
            let secret2 = rpassword::prompt_password("Confirm admin secret: ")?;
            if secret1 != secret2 {
                println!("Error: secrets do not match.");
                return Ok(());
            }
            let hash = match hash_admin_secret(&secret1) {
                Ok(h) => h,
                Err(e) => {
                    println!("Hash error: {e}");
                    return Ok(());
                }
            };
            config.server.admin_token_hash = Some(hash);
            config.save(&cli.config).await?;
            println!("Admin secret updated successfully.");
        }
    }

    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let store = JsonStore::new(config.storage.data_dir.clone())?;
    let pool = ObjectPool::open(store, config.quest.pool_stale_seconds);
    let status = pool.status();

    println!("SLQuest v{}", env!("CARGO_PKG_VERSION"));
    println!("  bind:             {}", config.server.bind);
    println!("  model:            {}", config.llm.model);
    println!(
        "  api key:          {}",
        if config.llm.api_key.trim().is_empty() {
            "missing"
        } else {
            "set"
        }
    );
    println!(
        "  admin secret:     {}",
        if config.server.admin_token_hash.is_some() {
            "hashed"
        } else if config.server.admin_token.is_some() {
            "environment"
        } else {
            "disabled"
        }
    );
    println!(
        "  profile enricher: {}",
        if config.profile.enabled {
            config.profile.url.as_str()
        } else {
            "disabled"
        }
    );
    println!("  data dir:         {}", config.storage.data_dir);
    println!(
        "  workers/queue:    {}/{}",
        config.callback.workers, config.callback.queue_capacity
    );
    println!(
        "Object pool: {} total, {} active (stale after {}s)",
        status.total_objects, status.active_objects, config.quest.pool_stale_seconds
    );
    for (difficulty, count) in &status.by_difficulty {
        println!("  difficulty {}: {}", difficulty, count);
    }
    for (category, count) in &status.by_category {
        let label = if category.is_empty() {
            "(none)"
        } else {
            category.as_str()
        };
        println!("  category {}: {}", label, count);
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // reqwest/hyper are chatty at debug
    builder.filter_module("hyper", log::LevelFilter::Info);
    builder.filter_module("reqwest", log::LevelFilter::Info);

    let security_path = config.as_ref().and_then(|c| c.logging.security_file.clone());
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.clone())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }
                writeln!(fmt, "{}", line)
            });
        }
    }
    let _ = builder.try_init();
}
