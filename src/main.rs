use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docket_offline::{Config, OfflineClient};

#[derive(Parser, Debug)]
#[command(name = "docket-offline")]
#[command(about = "Offline sync agent for the Docket legal case manager")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/docket/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queue depth, and last sync time
  Status,
  /// List queued writes awaiting delivery
  Queue,
  /// Replay queued writes now
  Sync,
  /// Seed the static cache partition and prune old cache versions
  Install,
  /// Run the background sync loop until interrupted
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let (client, engine) = OfflineClient::open(config)?;

  // A session credential is optional for local inspection commands
  if let Ok(token) = Config::get_token() {
    client.set_token(token);
  }

  match args.command {
    Command::Status => {
      let online = client.probe().await;
      let status = client.status()?;
      if online {
        println!("Online - Synced");
      } else {
        println!("Offline - Data Cached");
      }
      println!("Pending writes: {}", status.pending_writes);
      match status.last_sync {
        Some(at) => println!("Last sync: {}", at.to_rfc3339()),
        None => println!("Last sync: never"),
      }
    }

    Command::Queue => {
      let pending = client.pending_writes()?;
      if pending.is_empty() {
        println!("Queue is empty");
      }
      for write in pending {
        println!(
          "#{} {} queued {}",
          write.id,
          write.endpoint,
          write.queued_at.to_rfc3339()
        );
      }
    }

    Command::Sync => {
      let report = engine.replay_pending().await?;
      println!(
        "Replayed {} of {} queued writes ({} failed)",
        report.synced, report.attempted, report.failed
      );
    }

    Command::Install => {
      client.install().await?;
      client.activate()?;
      println!("Static cache seeded");
    }

    Command::Run => {
      let _monitor = client.spawn_monitor()?;
      tokio::select! {
        _ = engine.run() => {}
        _ = tokio::signal::ctrl_c() => {
          println!("Received shutdown signal, stopping");
        }
      }
    }
  }

  Ok(())
}
