//! Command-line front end for the pipeline router.
//!
//! ```text
//! pipeline-router check  --config routes.toml
//! pipeline-router render --config routes.toml [--param k=v]... <uri>...
//! pipeline-router render --config routes.toml --repeat 100 --pause-ms 1000 --watch <uri>...
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use pipeline_router::config::loader::load_config;
use pipeline_router::observability::logging::init_logging;
use pipeline_router::{ComponentRegistry, PipelineService, Request};

#[derive(Parser)]
#[command(name = "pipeline-router")]
#[command(about = "Route URIs to processing pipelines with response caching", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "routes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and list routes
    Check,
    /// Process URIs and write the responses to stdout
    Render {
        /// Request parameter as name=value
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Render every URI this many times (later passes hit the cache)
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Pause between passes, in milliseconds
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,

        /// Apply edits to the config file between passes
        #[arg(long)]
        watch: bool,

        #[arg(required = true)]
        uris: Vec<String>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.observability);

    match cli.command {
        Commands::Check => {
            tracing::info!(path = ?cli.config, routes = config.routes.len(), "Configuration is valid");
            for route in &config.routes {
                println!(
                    "{:<20} {:<30} priority={}",
                    route.name,
                    route.pattern.as_deref().unwrap_or_default(),
                    route.priority
                );
            }
        }
        Commands::Render {
            params,
            repeat,
            pause_ms,
            watch,
            uris,
        } => {
            let service = PipelineService::start(config, Arc::new(ComponentRegistry::with_builtins()))?;
            let _watcher = if watch {
                Some(service.watch_config(&cli.config)?)
            } else {
                None
            };

            for pass in 0..repeat.max(1) {
                if pass > 0 && pause_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                }

                let stdout = io::stdout();
                let mut out = stdout.lock();
                for uri in &uris {
                    let mut request = Request::new(uri.as_str());
                    for (name, value) in &params {
                        request = request.with_param(name.as_str(), value.as_str());
                    }
                    match service.handle(&request, &mut out)? {
                        Some(info) => {
                            out.write_all(b"\n")?;
                            eprintln!(
                                "{} route={} type={} bytes={} cache={:?}",
                                uri, info.route, info.mime_type, info.bytes_written, info.cache
                            );
                        }
                        None => eprintln!("{} no matching route", uri),
                    }
                }
                out.flush()?;
            }

            service.shutdown();
        }
    }

    Ok(())
}
