use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use blockplan::{chat, web_server, AppState, BlocksCatalog, DataPaths, SettingsPatch, SettingsStore};
use clap::Parser;
use tracing::{error, info};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding the settings file and the blocks catalog.
    #[arg(long, global = true, env = "BLOCKPLAN_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web server.
    Serve {
        #[arg(long, default_value = "0.0.0.0", help = "Address to bind the web server to.")]
        host: IpAddr,
        #[arg(long, default_value_t = 8000, help = "Port for the web server.")]
        port: u16,
    },
    /// Run the guided conversation in this terminal.
    Chat,
    /// Show or change persisted settings.
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
    /// Manage the blocks catalog.
    Blocks {
        #[command(subcommand)]
        action: BlocksCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SettingsCommands {
    /// Print the current settings (API key masked).
    Show,
    /// Update settings; omitted values are kept.
    Set {
        #[arg(long, help = "API key for the model provider.")]
        api_key: Option<String>,
        #[arg(long, conflicts_with = "technical_checks_file", help = "Technical checks text.")]
        technical_checks: Option<String>,
        #[arg(long, help = "Read the technical checks text from a file.")]
        technical_checks_file: Option<PathBuf>,
    },
    /// Reset settings to defaults.
    Clear,
}

#[derive(clap::Subcommand, Debug)]
enum BlocksCommands {
    /// Print the catalog.
    List,
    /// Replace the catalog with a CSV file.
    Import {
        #[arg(help = "CSV file with block_name and functionality_description columns.")]
        file: PathBuf,
    },
    /// Write the example catalog template.
    Template {
        #[arg(long, help = "Write to this file instead of stdout.")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,blockplan=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Blockplan starting with command: {:?}", cli.command);

    let paths = DataPaths::in_dir(&cli.data_dir);

    match cli.command {
        Commands::Serve { host, port } => {
            let app = AppState::from_env(&paths)?;
            let addr = SocketAddr::new(host, port);

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(addr, app).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let app = AppState::from_env(&paths)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_chat_session(&app.engine, stdin, tokio::io::stdout())
                .await
                .context("Chat session failed")?;
        }
        Commands::Settings { action } => {
            let store = SettingsStore::new(&paths.settings);
            match action {
                SettingsCommands::Show => {
                    let settings = store.load();
                    println!(
                        "api_key: {}",
                        settings.api_key_hint().unwrap_or_else(|| "(not set)".to_string())
                    );
                    println!("technical_checks:");
                    if settings.technical_checks.trim().is_empty() {
                        println!("(none)");
                    } else {
                        println!("{}", settings.technical_checks);
                    }
                }
                SettingsCommands::Set {
                    api_key,
                    technical_checks,
                    technical_checks_file,
                } => {
                    let technical_checks = match technical_checks_file {
                        Some(path) => Some(
                            std::fs::read_to_string(&path)
                                .with_context(|| format!("Failed to read {}", path.display()))?,
                        ),
                        None => technical_checks,
                    };
                    if api_key.is_none() && technical_checks.is_none() {
                        bail!("Nothing to update: pass --api-key and/or --technical-checks");
                    }
                    store
                        .save(SettingsPatch {
                            api_key,
                            technical_checks,
                        })
                        .context("Failed to save settings")?;
                    println!("Settings saved to {}", store.path().display());
                }
                SettingsCommands::Clear => {
                    store.clear().context("Failed to clear settings")?;
                    println!("Settings cleared.");
                }
            }
        }
        Commands::Blocks { action } => match action {
            BlocksCommands::List => {
                let catalog = BlocksCatalog::new(&paths.catalog);
                let entries = catalog.load();
                if entries.is_empty() {
                    println!("No blocks in catalog.");
                }
                for entry in entries {
                    println!("- {}: {}", entry.block_name, entry.functionality_description);
                }
            }
            BlocksCommands::Import { file } => {
                let bytes = std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let catalog = BlocksCatalog::new(&paths.catalog);
                let entries = catalog.save_csv(&bytes).context("Failed to import blocks")?;
                println!("Imported {} blocks into {}", entries.len(), catalog.path().display());
            }
            BlocksCommands::Template { output } => {
                let template = BlocksCatalog::template();
                match output {
                    Some(path) => {
                        std::fs::write(&path, &template)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("Template written to {}", path.display());
                    }
                    None => print!("{}", String::from_utf8_lossy(&template)),
                }
            }
        },
    }

    Ok(())
}
