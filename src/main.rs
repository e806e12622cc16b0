use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use parla_fetch::config::Config;
use parla_fetch::{logging, RequestClient, RequestOptions};
use reqwest::Method;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "parla")]
#[command(about = "Issue requests through the Parla caching request client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/parla/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET an endpoint, optionally several times to exercise the cache
  Get {
    endpoint: String,

    /// Seconds a cached response stays fresh
    #[arg(long)]
    ttl: Option<u64>,

    /// Skip the cache read
    #[arg(long)]
    no_cache: bool,

    /// Serve cached data immediately and refresh in the background
    #[arg(long)]
    swr: bool,

    /// Number of times to issue the request
    #[arg(short, long, default_value_t = 1)]
    repeat: u32,
  },

  /// Send a request with any method and an optional JSON body
  Send {
    method: String,
    endpoint: String,

    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,

    /// Retries after the first attempt
    #[arg(long)]
    retries: Option<u32>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&config.log)?;

  let client = config.build_client()?;
  if args.offline {
    client.network().set_online(false);
  }

  match args.command {
    Command::Get {
      endpoint,
      ttl,
      no_cache,
      swr,
      repeat,
    } => {
      let mut options = RequestOptions::get();
      if let Some(secs) = ttl {
        options = options.ttl(Duration::from_secs(secs));
      }
      if no_cache {
        options = options.bypass_cache();
      }
      if swr {
        options = options.stale_while_revalidate();
      }

      for _ in 0..repeat {
        print_response(&client, &endpoint, options.clone()).await?;
      }
    }
    Command::Send {
      method,
      endpoint,
      body,
      retries,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

      let mut options = RequestOptions::new(method);
      if let Some(body) = body {
        let body: Value =
          serde_json::from_str(&body).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
        options = options.body(body);
      }
      if let Some(count) = retries {
        options = options.retry(count, config.retry.policy().delay);
      }

      print_response(&client, &endpoint, options).await?;
    }
  }

  println!("{}", serde_json::to_string_pretty(&client.cache_stats())?);

  Ok(())
}

async fn print_response(
  client: &RequestClient,
  endpoint: &str,
  options: RequestOptions,
) -> Result<()> {
  let response = client.request_value(endpoint, options).await;
  println!("{}", serde_json::to_string_pretty(&response)?);
  Ok(())
}
