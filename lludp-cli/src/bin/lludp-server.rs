//! LLUDP Server - standalone transport host
//!
//! Accepts viewer circuits, answers pings and prints circuit statistics.
//! Circuits are authorised from the config file or the command line since
//! there is no login service in front of it.

use clap::Parser;
use lludp::protocol::ConnectionStats;
use lludp::{AgentId, MessageId, Server};
use lludp_cli::config::{CircuitConfig, Config, ServerConfig};
use lludp_cli::stats::{aggregate, compact_stats, display_connection_stats};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lludp-server")]
#[command(about = "LLUDP simulator transport server", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Authorise a circuit, as CODE:AGENT_ID (repeatable)
    #[arg(long = "circuit", value_name = "CODE:AGENT")]
    circuits: Vec<String>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Print the per-circuit table instead of a one-line summary
    #[arg(long)]
    table: bool,

    /// Stop after this many seconds (runs forever if omitted)
    #[arg(long)]
    duration: Option<u64>,

    /// Write an example configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    example_config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_circuit(arg: &str) -> anyhow::Result<CircuitConfig> {
    let (code, agent) = arg
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid circuit '{}', expected CODE:AGENT", arg))?;
    Ok(CircuitConfig {
        code: code
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid circuit code '{}': {}", code, e))?,
        agent: agent.to_string(),
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(path) = &args.example_config {
        Config::example_server().to_file(path)?;
        tracing::info!("Wrote example configuration to {}", path);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .server
            .ok_or_else(|| anyhow::anyhow!("No [server] section in {}", path))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    for arg in &args.circuits {
        config.circuits.push(parse_circuit(arg)?);
    }

    tracing::info!("LLUDP server starting...");
    let server = Arc::new(Server::bind(config.transport_config()?)?);
    tracing::info!("Listening on: {}", server.local_addr());

    for circuit in &config.circuits {
        let agent = circuit.agent_id()?;
        server.register_circuit(circuit.code, agent)?;
        tracing::info!("Authorised circuit {} for {}", circuit.code, agent);
    }

    // Logout is an application concern; the standalone server honours it
    let logout = Arc::downgrade(&server);
    server.register_packet_callback(MessageId::LOGOUT_REQUEST, move |_, agent: AgentId| {
        if let Some(server) = logout.upgrade() {
            tracing::info!("Logout requested by {}", agent);
            server.remove_session(agent);
        }
        Ok(())
    });

    let start = Instant::now();
    let deadline = args.duration.map(|secs| start + Duration::from_secs(secs));
    let interval = config.stats_interval();
    let mut last_stats = Instant::now();

    loop {
        thread::sleep(Duration::from_millis(200));

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        if !interval.is_zero() && last_stats.elapsed() >= interval {
            last_stats = Instant::now();
            let circuits: Vec<(AgentId, ConnectionStats)> = server
                .connected_agents()
                .into_iter()
                .filter_map(|agent| server.connection_stats(agent).map(|s| (agent, s)))
                .collect();

            if args.table {
                display_connection_stats(&circuits, start.elapsed());
            } else {
                let all: Vec<ConnectionStats> = circuits.iter().map(|(_, s)| s.clone()).collect();
                tracing::info!(
                    "{}",
                    compact_stats(circuits.len(), &aggregate(&all), start.elapsed())
                );
            }
        }
    }

    server.shutdown();
    tracing::info!("LLUDP server stopped after {:?}", start.elapsed());
    Ok(())
}
