//! LLUDP Client - minimal test viewer
//!
//! Opens a circuit, measures ping round trips, acknowledges whatever the
//! server sends reliably, then logs out.

use clap::Parser;
use lludp::io::LludpSocket;
use lludp::protocol::{
    CloseCircuit, CompletePingCheck, PacketAck, SequenceCounter, StartPingCheck, UseCircuitCode,
};
use lludp::{AgentId, MessageId, Packet};
use lludp_cli::config::{ClientConfig, Config};
use lludp_cli::stats::format_rtt;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lludp-client")]
#[command(about = "LLUDP test viewer", long_about = None)]
struct Args {
    /// Configuration file (TOML) with a [client] section
    #[arg(short, long)]
    config: Option<String>,

    /// Server address
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Circuit code issued for this session
    #[arg(long)]
    code: Option<u32>,

    /// Agent id
    #[arg(short, long)]
    agent: Option<String>,

    /// Number of pings
    #[arg(short = 'n', long)]
    pings: Option<u32>,

    /// Delay between pings in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

struct Viewer {
    socket: LludpSocket,
    server: SocketAddr,
    sequence: SequenceCounter,
    pending_acks: BTreeSet<u32>,
}

impl Viewer {
    fn send(&mut self, mut packet: Packet) -> anyhow::Result<()> {
        packet.header.sequence = self.sequence.next();
        let bytes = packet.to_bytes()?;
        self.socket.send_to(&bytes, self.server)?;
        tracing::debug!(
            "Sent {} seq={} ({} bytes)",
            packet.message_id,
            packet.sequence(),
            bytes.len()
        );
        Ok(())
    }

    fn flush_acks(&mut self) -> anyhow::Result<()> {
        if self.pending_acks.is_empty() {
            return Ok(());
        }
        let ids: Vec<u32> = std::mem::take(&mut self.pending_acks).into_iter().collect();
        self.send(PacketAck::new(ids).to_packet()?)
    }

    /// Receive until `until`, returning ping replies with their arrival time
    fn pump(&mut self, until: Instant) -> anyhow::Result<Vec<(u8, Instant)>> {
        let mut replies = Vec::new();
        let mut buf = vec![0u8; 4096];

        while Instant::now() < until {
            let (len, from) = match self.socket.recv_from(&mut buf)? {
                Some(received) => received,
                None => continue,
            };
            if from != self.server {
                continue;
            }

            let packet = match Packet::from_bytes(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!("Undecodable packet from server: {}", e);
                    continue;
                }
            };
            if packet.is_reliable() {
                self.pending_acks.insert(packet.sequence());
            }

            match packet.message_id {
                MessageId::COMPLETE_PING_CHECK => {
                    let reply = CompletePingCheck::from_packet(&packet)?;
                    replies.push((reply.ping_id, Instant::now()));
                }
                MessageId::PACKET_ACK => {
                    let ack = PacketAck::from_packet(&packet)?;
                    tracing::debug!("Server acknowledged {:?}", ack.ids);
                }
                other => {
                    tracing::info!("Received {} seq={} ({} bytes)", other, packet.sequence(), len);
                }
            }
        }

        self.flush_acks()?;
        Ok(replies)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?
            .client
            .ok_or_else(|| anyhow::anyhow!("No [client] section in {}", path))?,
        None => {
            let mut example = Config::example_client()
                .client
                .ok_or_else(|| anyhow::anyhow!("Missing example client configuration"))?;
            example.code = args
                .code
                .ok_or_else(|| anyhow::anyhow!("--code is required without a config file"))?;
            example
        }
    };

    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(code) = args.code {
        config.code = code;
    }
    if let Some(agent) = &args.agent {
        config.agent = agent.clone();
    }
    if let Some(pings) = args.pings {
        config.pings = pings;
    }
    if let Some(interval) = args.interval {
        config.ping_interval_ms = interval;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = resolve_config(&args)?;
    let agent: AgentId = config.agent_id()?;

    let socket = LludpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    socket.set_read_timeout(Duration::from_millis(50))?;
    tracing::info!("Bound to {}, server {}", socket.local_addr()?, config.server);

    let mut viewer = Viewer {
        socket,
        server: config.server,
        sequence: SequenceCounter::new(),
        pending_acks: BTreeSet::new(),
    };

    viewer.send(
        UseCircuitCode {
            code: config.code,
            session_id: AgentId::from_u128(rand_session()),
            agent_id: agent,
        }
        .to_packet(),
    )?;
    tracing::info!("Sent UseCircuitCode {} for {}", config.code, agent);
    viewer.pump(Instant::now() + Duration::from_millis(200))?;

    let mut sent_at: HashMap<u8, Instant> = HashMap::new();
    let mut rtts: Vec<Duration> = Vec::new();

    for i in 0..config.pings {
        let ping_id = (i % 256) as u8;
        viewer.send(
            StartPingCheck {
                ping_id,
                oldest_unacked: 0,
            }
            .to_packet(),
        )?;
        sent_at.insert(ping_id, Instant::now());

        for (id, arrived) in viewer.pump(Instant::now() + config.ping_interval())? {
            if let Some(start) = sent_at.remove(&id) {
                let rtt = arrived.duration_since(start);
                tracing::info!("Ping {}: {}", id, format_rtt(rtt));
                rtts.push(rtt);
            }
        }
    }

    viewer.send(Packet::new(MessageId::LOGOUT_REQUEST, Vec::new()).reliable())?;
    viewer.send(CloseCircuit.to_packet())?;

    let lost = (config.pings as usize).saturating_sub(rtts.len());
    if rtts.is_empty() {
        println!("No ping replies ({} sent)", config.pings);
    } else {
        let min = rtts.iter().min().copied().unwrap_or_default();
        let max = rtts.iter().max().copied().unwrap_or_default();
        let avg = rtts.iter().sum::<Duration>() / rtts.len() as u32;
        println!(
            "{} pings, {} lost, rtt min/avg/max = {}/{}/{}",
            config.pings,
            lost,
            format_rtt(min),
            format_rtt(avg),
            format_rtt(max)
        );
    }

    Ok(())
}

/// Session id derived from the clock; the transport treats it as opaque
fn rand_session() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1)
}
