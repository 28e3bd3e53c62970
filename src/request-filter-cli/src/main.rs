//! Request Filter - check addresses and open gated connections.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use request_filter::{
    AddressFamily, Agents, FilterOptions, FilterPolicy, Resolve, StaticResolver, SystemResolver,
    Verdict, classify_ip, parse_ip_literal,
};

/// Outbound connection gate with SSRF protection
#[derive(Parser)]
#[command(name = "request-filter")]
#[command(about = "Check addresses against an SSRF policy and open gated connections")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "REQUEST_FILTER_CONFIG")]
    config: Option<PathBuf>,

    /// Admit private, loopback, link-local and reserved addresses
    #[arg(long, global = true)]
    allow_private: bool,

    /// Admit the unspecified addresses 0.0.0.0 and ::
    #[arg(long, global = true)]
    allow_meta: bool,

    /// Always admit this address or CIDR range (repeatable)
    #[arg(long = "allow", value_name = "ENTRY", global = true)]
    allow: Vec<String>,

    /// Deny this address or CIDR range (repeatable)
    #[arg(long = "deny", value_name = "ENTRY", global = true)]
    deny: Vec<String>,

    /// Refuse literal non-unicast targets before connecting
    #[arg(long, global = true)]
    stop_port_scanning: bool,

    /// Resolve HOST to IP instead of asking the system resolver (repeatable)
    #[arg(long, value_name = "HOST=IP", global = true)]
    resolve: Vec<String>,

    /// Log level
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate an address (or the addresses a name resolves to)
    Check {
        /// IP literal or host name
        address: String,

        /// Host to report in the denial message
        #[arg(long)]
        host: Option<String>,
    },

    /// Open a gated connection to an http:// or https:// URL
    Connect {
        /// Target URL
        url: String,
    },
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load the config file, then apply command line overrides on top.
fn build_options(args: &Args) -> Result<FilterOptions> {
    let mut options = match &args.config {
        Some(path) => FilterOptions::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FilterOptions::default(),
    };

    options.allow_private_ip_address |= args.allow_private;
    options.allow_meta_ip_address |= args.allow_meta;
    options.stop_port_scanning_by_url_redirection |= args.stop_port_scanning;
    options.allow_ip_address_list.extend(args.allow.iter().cloned());
    options.deny_ip_address_list.extend(args.deny.iter().cloned());

    Ok(options)
}

/// Build a resolver from `HOST=IP` overrides, falling back to the system.
fn build_resolver(overrides: &[String]) -> Result<Arc<dyn Resolve>> {
    let mut resolver = StaticResolver::new();
    for entry in overrides {
        let Some((host, ip)) = entry.split_once('=') else {
            bail!("Invalid --resolve entry {entry:?}, expected HOST=IP");
        };
        let ip: IpAddr = ip
            .trim()
            .parse()
            .with_context(|| format!("Invalid address in --resolve entry {entry:?}"))?;
        resolver.insert(host.trim(), ip);
    }

    if resolver.is_empty() {
        return Ok(Arc::new(SystemResolver));
    }
    Ok(Arc::new(resolver.with_fallback(Arc::new(SystemResolver))))
}

async fn check(
    policy: &FilterPolicy,
    resolver: &dyn Resolve,
    address: &str,
    host: Option<&str>,
) -> Result<bool> {
    let (addresses, host) = match parse_ip_literal(address) {
        Some(ip) => (vec![ip], host.map(str::to_string)),
        None => {
            let resolved = resolver
                .resolve(address, 0)
                .await
                .with_context(|| format!("Failed to resolve {address}"))?;
            let addresses = resolved.into_iter().map(|addr| addr.ip()).collect();
            (addresses, Some(host.unwrap_or(address).to_string()))
        }
    };

    let mut admitted = true;
    for ip in addresses {
        let verdict = policy.evaluate(ip, host.as_deref(), Some(AddressFamily::of(ip)));
        match verdict {
            Verdict::Admitted => println!("{ip} ({}): admitted", classify_ip(ip)),
            Verdict::Denied(denial) => {
                admitted = false;
                println!("{ip} ({}): {denial}", classify_ip(ip));
            }
        }
    }
    Ok(admitted)
}

async fn connect(agents: &Agents, url: &str) -> Result<bool> {
    let url = Url::parse(url).with_context(|| format!("Invalid URL {url}"))?;
    let agent = agents.select(&url, None)?;

    match agent.connect(&url).await {
        Ok(stream) => {
            let peer = stream.peer_addr()?;
            println!("connected to {peer} ({})", agent.scheme());
            Ok(true)
        }
        Err(e) if e.is_denied() => {
            println!("{e}");
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to connect to {url}")),
    }
}

async fn run(args: Args) -> Result<bool> {
    let options = build_options(&args)?;
    let resolver = build_resolver(&args.resolve)?;
    debug!(?options, "effective options");

    match &args.command {
        Command::Check { address, host } => {
            let policy = FilterPolicy::new(options);
            check(&policy, resolver.as_ref(), address, host.as_deref()).await
        }
        Command::Connect { url } => {
            let agents = Agents::with_resolver(options, resolver)?;
            connect(&agents, url).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
