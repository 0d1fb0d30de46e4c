mod config;
mod server;
mod simulation;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use cubeconnect::PacketLossSimulation;
use server::GameServer;

#[derive(Parser)]
#[command(name = "cubeconnect-server")]
#[command(about = "Authoritative cube scene server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = cubeconnect::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60, help = "Ticks per second, 0 for unbounded")]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 4)]
    max_clients: usize,

    #[arg(short, long, default_value_t = 3, help = "Drawables in the scene; clients must match")]
    drawables: usize,

    #[arg(long, default_value_t = 10, help = "Seconds of silence before a client is dropped")]
    peer_timeout: u64,

    #[arg(long, help = "Enable packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, help = "Stop after this many ticks")]
    max_ticks: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let packet_loss = args
        .simulate_packet_loss
        .then(|| PacketLossSimulation::new(args.loss_percent / 100.0));

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        drawable_count: args.drawables,
        peer_timeout: Duration::from_secs(args.peer_timeout),
        packet_loss,
    };
    config.validate()?;

    let context = cubeconnect::net::initialize()?;
    let mut server = GameServer::new(&context, bind_addr.as_str(), config)
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    log::info!(
        "Server started on {} with {} drawables",
        server.local_addr(),
        args.drawables
    );
    server.run(args.max_ticks)?;
    log::info!("Server shutting down");

    Ok(())
}
