mod config;
mod input;
mod render;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;

use config::ClientConfig;
use cubeconnect::{ClientSync, FramePacer, Session};
use input::{ScriptedInput, parse_keys};
use render::LogRenderer;

#[derive(Parser)]
#[command(name = "cubeconnect-client")]
#[command(about = "Headless cube scene client")]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Server host to connect to")]
    host: String,

    #[arg(short, long, default_value_t = cubeconnect::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 5000, help = "Connect timeout in milliseconds")]
    connect_timeout: u64,

    #[arg(short, long, default_value_t = 60, help = "Frames per second, 0 for unbounded")]
    frame_rate: u32,

    #[arg(short, long, default_value_t = 3, help = "Drawables registered locally; must match the server")]
    drawables: usize,

    #[arg(long, help = "Disconnect after this many frames")]
    tick_limit: Option<u64>,

    #[arg(long, value_delimiter = ',', default_value = "f", help = "Keys held, e.g. f,shift")]
    keys: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let keys = parse_keys(&args.keys)?;

    let config = ClientConfig {
        connect_timeout: Duration::from_millis(args.connect_timeout),
        frame_rate: args.frame_rate,
        drawable_count: args.drawables,
        tick_limit: args.tick_limit,
        ..Default::default()
    };
    config.validate()?;

    let context = cubeconnect::net::initialize()?;
    let mut session = Session::client(&context, config.session_config())?;
    let mut client = ClientSync::new(config.drawable_count);

    let server_addr = format!("{}:{}", args.host, args.port);
    client
        .connect(&mut session, server_addr.as_str(), config.connect_timeout)
        .with_context(|| format!("failed to connect to {}", server_addr))?;

    let mut pacer = FramePacer::new(config.frame_rate);
    let Some(client_id) = client.await_identity(&mut session, &mut pacer)? else {
        bail!("server closed the connection before assigning an identity");
    };
    log::info!("Joined {} as client {}", server_addr, client_id);

    let mut input = ScriptedInput::new(keys);
    let mut renderer = LogRenderer::with_cubes(config.drawable_count);
    let mut frames = 0u64;

    while !client.is_disconnected() {
        if config.tick_limit.is_some_and(|limit| frames >= limit) {
            log::info!("Frame limit reached, disconnecting");
            client.disconnect(&mut session);
            break;
        }

        pacer.hold();
        pacer.update();
        client.tick(&mut session, &mut input, &mut renderer, pacer.remaining())?;
        frames += 1;
    }

    let stats = client.stats();
    log::info!(
        "Session ended: {} inputs sent, {} snapshots applied, {} superseded, {} dropped, {} frames rendered",
        stats.inputs_sent,
        stats.snapshots_applied,
        stats.snapshots_superseded,
        stats.payloads_dropped,
        renderer.frames()
    );
    if let Some(position) = renderer.camera_position() {
        log::info!("Last camera position: {}", position);
    }
    log::debug!("Transport: {:?}", session.stats());

    Ok(())
}
