//! preset-catalog: command line front end for the preset catalog
//!
//! Opens the catalog under the configured data dir, runs one command and prints
//! the result. See `preset-catalog --help`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use preset_catalog::{CancelFlag, Catalog, Config, ExportScope, HttpFetcher, PresetRecord};

#[derive(Parser)]
#[command(name = "preset-catalog")]
#[command(about = "Browse, favorite and sync color-grading presets")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "preset-catalog.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "PRESET_CATALOG_DATA_DIR")]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the catalog
    List {
        /// Only favorites
        #[arg(long, conflicts_with = "custom")]
        favorites: bool,

        /// Only user-authored presets
        #[arg(long)]
        custom: bool,
    },

    /// Show one preset as JSON
    Show { id: String },

    /// List subscriptions
    Subscriptions,

    /// Add a subscription and sync it
    Subscribe {
        url: String,

        #[arg(long, default_value = "")]
        name: String,
    },

    /// Remove a subscription and its cached feed
    Unsubscribe { url: String },

    /// Enable or disable a subscription
    Toggle { url: String },

    /// Sync one subscription
    Sync { url: String },

    /// Sync every enabled subscription
    Refresh,

    /// Toggle the favorite flag of a preset
    Favorite { id: String },

    /// Export presets in the feed format
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, conflicts_with = "custom")]
        favorites: bool,

        #[arg(long)]
        custom: bool,
    },

    /// Run pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("preset_catalog=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(std::path::Path::new(&cli.config))?;
    if let Some(data_dir) = cli.data_dir {
        config.catalog.data_dir = PathBuf::from(data_dir);
    }
    info!(config = %cli.config, data_dir = %config.catalog.data_dir.display(), "Starting preset-catalog");

    let catalog = Catalog::open(config, Arc::new(HttpFetcher::new()?))?;
    if catalog.legacy_migration_pending() {
        eprintln!("Legacy preset file found, run `preset-catalog migrate` to import it.");
    }

    match cli.command {
        Command::List { favorites, custom } => {
            let presets = if favorites {
                catalog.favorites()
            } else if custom {
                catalog.custom_presets()
            } else {
                catalog.snapshot().presets.clone()
            };
            for preset in &presets {
                print_preset_line(preset);
            }
            let counts = catalog.counts();
            println!(
                "{} presets ({} bundled, {} subscribed, {} custom, {} favorites)",
                counts.total, counts.bundled, counts.subscription, counts.custom, counts.favorites
            );
        }

        Command::Show { id } => match catalog.get(&id) {
            Some(preset) => println!("{}", serde_json::to_string_pretty(&preset)?),
            None => anyhow::bail!("Unknown preset: {}", id),
        },

        Command::Subscriptions => {
            for entry in catalog.subscriptions().iter() {
                println!(
                    "[{}] {} <{}> presets={} last_synced={}",
                    if entry.enabled { "x" } else { " " },
                    entry.display_name,
                    entry.url,
                    entry.preset_count,
                    entry.last_synced_at
                );
            }
        }

        Command::Subscribe { url, name } => {
            let outcome = catalog.add_subscription(&url, &name).await?;
            match outcome.sync {
                Ok(synced) => println!("Subscribed to {} ({} presets)", outcome.entry.display_name, synced.preset_count),
                Err(e) => println!("Subscribed to {}, first sync failed: {}", outcome.entry.display_name, e),
            }
        }

        Command::Unsubscribe { url } => {
            if catalog.remove_subscription(&url).await? {
                println!("Removed {}", url);
            } else {
                println!("Not subscribed to {}", url);
            }
        }

        Command::Toggle { url } => {
            let entry = catalog.toggle_subscription(&url).await?;
            println!("{} is now {}", entry.url, if entry.enabled { "enabled" } else { "disabled" });
        }

        Command::Sync { url } => {
            let outcome = catalog.sync_subscription(&url).await?;
            println!("Synced {} ({} presets, version {})", outcome.url, outcome.preset_count, outcome.version);
        }

        Command::Refresh => {
            let cancel = CancelFlag::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let summary = catalog.refresh_all(&cancel).await;
            for failure in &summary.failures {
                println!("  {}: {}", failure.url, failure.error);
            }
            println!("{}", summary);
        }

        Command::Favorite { id } => {
            let now = catalog.toggle_favorite(&id)?;
            println!("{} {}", id, if now { "added to favorites" } else { "removed from favorites" });
        }

        Command::Export { output, favorites, custom } => {
            let scope = if favorites {
                ExportScope::Favorites
            } else if custom {
                ExportScope::Custom
            } else {
                ExportScope::All
            };
            let document = catalog.export_document(scope)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &document)?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&document)),
            }
        }

        Command::Migrate => {
            let ran = catalog.complete_legacy_migration()?;
            if ran.is_empty() {
                println!("Nothing to migrate");
            } else {
                println!("Ran migrations: {}", ran.join(", "));
            }
        }
    }

    Ok(())
}

fn print_preset_line(preset: &PresetRecord) {
    println!(
        "{} {:<40} {}",
        if preset.is_favorite { "*" } else { " " },
        preset.id(),
        preset.name
    );
}
