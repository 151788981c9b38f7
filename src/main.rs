use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use time2eat_agent::fetch::FetchOutcome;
use time2eat_agent::queue::OfflineCart;
use time2eat_agent::{config, logging, Agent, Config, Event, EventOutcome};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "time2eat-agent")]
#[command(about = "Offline cache and background sync agent for Time2Eat")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/time2eat-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, overrides the config file
  #[arg(short, long)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the static manifest, then activate (pruning old generations)
  Install,
  /// Run a GET through the fetch policy
  Fetch {
    url: String,
    /// Accept header sent with the request
    #[arg(long, default_value = "*/*")]
    accept: String,
  },
  /// Fire a background sync (order-sync or cart-sync)
  Sync { tag: String },
  /// Queue an order made while offline (JSON object)
  QueueOrder { json: String },
  /// Store the offline cart (JSON object with an items array)
  QueueCart { json: String },
  /// Show the notification for a push payload
  Push { json: Option<String> },
  /// Click a notification (view, close, or nothing for the body)
  Click { action: Option<String> },
  /// Show partitions and queue sizes
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _guard = logging::init(&config::data_dir()?.join("logs"))?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    Config { origin, ..config }
  } else {
    config
  };

  let agent = Agent::open(config)?;
  agent.resume()?;

  let event = match args.command {
    Command::Install => {
      // Install skips waiting, so activation follows immediately
      let assets = agent.install().await?;
      println!("installed {} assets", assets);
      Event::Activate
    }
    Command::Fetch { url, accept } => {
      let url = agent.config().resolve(&url)?;
      Event::Fetch(time2eat_agent::http::Request::get(url).with_header("accept", &accept))
    }
    Command::Sync { tag } => Event::Sync(tag),
    Command::QueueOrder { json } => {
      let payload = serde_json::from_str(&json).map_err(|e| eyre!("Invalid order JSON: {}", e))?;
      let id = agent.queue_order(payload)?;
      println!("queued order {}", id);
      return Ok(());
    }
    Command::QueueCart { json } => {
      let cart: OfflineCart =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid cart JSON: {}", e))?;
      agent.queue_cart(&cart)?;
      println!("saved cart with {} items", cart.items.len());
      return Ok(());
    }
    Command::Push { json } => Event::Push(json.map(String::into_bytes)),
    Command::Click { action } => Event::NotificationClick { action },
    Command::Status => {
      let status = agent.status()?;
      println!("state:    {}", status.state);
      println!("static:   {}", status.static_partition);
      println!("dynamic:  {}", status.dynamic_partition);
      for (name, count) in &status.partitions {
        println!("  {:<40} {:>6} entries", name, count);
      }
      println!("orders:   {} pending", status.pending_orders);
      println!("cart:     {} items", status.cart_items);
      return Ok(());
    }
  };

  match agent.dispatch(event).await? {
    EventOutcome::Installed { assets } => println!("installed {} assets", assets),
    EventOutcome::Activated { pruned } => {
      println!("activated, pruned {} old partitions", pruned.len());
      for name in pruned {
        println!("  {}", name);
      }
    }
    EventOutcome::Fetch(outcome) => {
      let source = match &outcome {
        FetchOutcome::Passthrough => "passthrough",
        FetchOutcome::Cached(_) => "cache",
        FetchOutcome::Network(_) => "network",
        FetchOutcome::Fallback(_) => "offline fallback",
      };
      match outcome.response() {
        Some(response) => println!(
          "{} {} ({} bytes, {})",
          response.status,
          response.content_type().unwrap_or("-"),
          response.body.len(),
          source
        ),
        None => println!("{}", source),
      }
    }
    EventOutcome::Synced(report) => println!(
      "synced {} of {} items",
      report.synced, report.attempted
    ),
    EventOutcome::Notified(notification) => {
      println!("{}: {}", notification.title, notification.body)
    }
    EventOutcome::Navigated(Some(url)) => println!("opened {}", url),
    EventOutcome::Navigated(None) => println!("dismissed"),
    EventOutcome::Ignored => println!("ignored"),
  }

  Ok(())
}
