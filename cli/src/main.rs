use clap::{Parser, Subcommand};
use cocaine::{Config, Locator, RemoteError, Service, ServiceResult};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::Level;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid JSON argument `{arg}`: {source}")]
    InvalidArg {
        arg: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("resolve failed: {0}")]
    Resolve(#[from] cocaine::ResolveError),
    #[error("connect failed: {0}")]
    Connect(#[from] cocaine::ServiceError),
    #[error("invalid JSON output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("service returned error: {0}")]
    Remote(RemoteError),
}

#[derive(Parser, Debug)]
#[command(name = "cocaine-cli", about = "Resolve and call cloud services from the command line")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the endpoint, protocol version and method table of a service.
    Resolve { service: String },
    /// Invoke one method and print every result it streams back.
    Call {
        service: String,
        method: String,
        /// Positional arguments, each a JSON value.
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config = cli.config.with_debug_env(std::env::var(cocaine::config::DEBUG_ENV).ok().as_deref());

    let level = if config.debug() { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Resolve { service } => run_resolve(&config, &service).await,
        Command::Call { service, method, args } => run_call(&config, &service, &method, &args).await,
    }
}

async fn run_resolve(config: &Config, service: &str) -> Result<(), CliError> {
    let endpoint = Locator::from_config(config).resolve(service).await?;

    let api: serde_json::Map<String, Value> = endpoint
        .api
        .iter()
        .map(|(name, number)| (name.clone(), Value::from(*number)))
        .collect();

    print_json(&serde_json::json!({
        "endpoint": endpoint.address(),
        "version": endpoint.version,
        "api": api,
    }))
}

async fn run_call(config: &Config, service: &str, method: &str, args: &[String]) -> Result<(), CliError> {
    let args = parse_json_args(args)?;
    let service = Service::connect(service, config).await?;

    let mut results = service.call(method, args).await;
    let mut first_error = None;
    while let Some(result) = results.next().await {
        match result.err() {
            Some(err) => {
                eprintln!("error: {err}");
                first_error.get_or_insert_with(|| err.clone());
            }
            None => println!("{}", render_result(&result)?),
        }
    }
    service.close().await;

    match first_error {
        Some(err) => Err(CliError::Remote(err)),
        None => Ok(()),
    }
}

fn parse_json_args(args: &[String]) -> Result<Vec<Value>, CliError> {
    args.iter()
        .map(|arg| {
            serde_json::from_str(arg).map_err(|source| CliError::InvalidArg { arg: arg.clone(), source })
        })
        .collect()
}

/// Render a chunk as JSON, or as a MessagePack value when JSON cannot hold it
/// (binary payloads, non-string map keys).
fn render_result(result: &ServiceResult) -> Result<String, CliError> {
    if let Ok(json) = result.extract::<Value>() {
        return Ok(serde_json::to_string(&json)?);
    }
    match result.extract::<rmpv::Value>() {
        Ok(value) => Ok(format!("{value:?}")),
        Err(err) => Ok(format!("<undecodable payload: {err}>")),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
