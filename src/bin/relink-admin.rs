use anyhow::Result;
use clap::{Parser, Subcommand};
use relink::config::Config;
use relink::models::unix_now;
use relink::Engine;

#[derive(Parser)]
#[command(name = "relink-admin")]
#[command(about = "Relink link maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reclamation pass (expired and unused links)
    Reclaim,
    /// List expired links that have not been reclaimed yet
    Expired,
    /// Show click statistics for a link
    Stats {
        /// Short code
        code: String,
    },
    /// Delete a link regardless of owner
    Delete {
        /// Short code
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let engine = Engine::connect(config).await?;

    match cli.command {
        Commands::Reclaim => {
            let report = engine.reclaimer.run_once(unix_now()).await;
            println!(
                "✓ Reclaimed {} expired and {} unused links ({} failures)",
                report.expired, report.unused, report.failed
            );
        }
        Commands::Expired => {
            let links = engine.manager.list_expired().await?;
            if links.is_empty() {
                println!("No expired links found.");
            } else {
                println!("{:<22} {:<12} {}", "Code", "Expired at", "Original URL");
                println!("{}", "-".repeat(80));
                for link in links {
                    println!(
                        "{:<22} {:<12} {}",
                        link.code,
                        link.expires_at.unwrap_or_default(),
                        link.original_url
                    );
                }
            }
        }
        Commands::Stats { code } => {
            let stats = engine.manager.stats(&code).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Delete { code } => {
            if engine.manager.delete(&code).await? {
                println!("✓ Deleted link '{}'", code);
            } else {
                println!("⚠ Link '{}' did not exist", code);
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
