use clap::Parser;
use client::bot::Bot;
use client::mirror::WorldMirror;
use client::network::{Connection, ReconnectPolicy};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{ClientEvent, JobClass, ServerEvent};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::interval;

const FRAME_MS: u64 = 50;
const PING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Character name, unique among online participants
    #[arg(short = 'n', long)]
    name: String,

    /// Job class: warrior, mage, archer or thief
    #[arg(short = 'j', long, default_value = "warrior", value_parser = parse_job)]
    job: JobClass,

    /// Let the built-in bot play
    #[arg(short = 'b', long)]
    bot: bool,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "10")]
    reconnect_attempts: u32,

    /// Seed for the bot and reconnect jitter
    #[arg(long, default_value = "1")]
    seed: u64,
}

fn parse_job(value: &str) -> Result<JobClass, String> {
    match value.to_ascii_lowercase().as_str() {
        "warrior" => Ok(JobClass::Warrior),
        "mage" => Ok(JobClass::Mage),
        "archer" => Ok(JobClass::Archer),
        "thief" => Ok(JobClass::Thief),
        other => Err(format!("unknown job '{}'", other)),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::SyncState { self_id, players, .. } => {
            info!("Joined as {} with {} participants online", self_id, players.len())
        }
        ServerEvent::Error { code, message } => warn!("Server error {:?}: {}", code, message),
        ServerEvent::ChatMessage {
            from_name,
            channel,
            message,
            ..
        } => info!("[{:?}] {}: {}", channel, from_name, message),
        ServerEvent::Pong { timestamp } => {
            info!("Round trip {} ms", now_ms().saturating_sub(*timestamp))
        }
        ServerEvent::ExpGained { amount, total, level } => {
            info!("+{} exp ({} total, level {})", amount, total, level)
        }
        ServerEvent::MonsterUpdate { .. } | ServerEvent::PlayerMoved { .. } => {}
        other => info!("{}", other.name()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to {} as {} ({:?})", args.server, args.name, args.job);

    let join = ClientEvent::Join {
        name: args.name.clone(),
        job: args.job,
        x: 100.0,
        y: 100.0,
    };
    let policy = ReconnectPolicy {
        max_attempts: args.reconnect_attempts,
        ..ReconnectPolicy::default()
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut connection = Connection::connect(&args.server, join).await?;
    let mut mirror = WorldMirror::new();
    let mut bot = args.bot.then(|| Bot::new(args.seed));

    let mut frame = interval(Duration::from_millis(FRAME_MS));
    let mut last_frame = Instant::now();
    let mut last_ping = Instant::now();

    loop {
        tokio::select! {
            event = connection.recv() => match event {
                Some(event) => {
                    log_event(&event);
                    mirror.apply(&event);
                }
                None => {
                    warn!("Connection lost");
                    if let Some(me) = mirror.local() {
                        connection.set_rejoin_position(me.x, me.y);
                    }
                    connection.reconnect(&policy, &mut rng).await?;
                }
            },

            _ = frame.tick() => {
                let dt = last_frame.elapsed();
                last_frame = Instant::now();
                mirror.advance(dt.as_secs_f32());

                let mut outgoing = Vec::new();
                if let Some(bot) = bot.as_mut() {
                    outgoing.extend(bot.step(&mirror, dt.as_millis() as u64));
                }
                if last_ping.elapsed() >= PING_INTERVAL {
                    last_ping = Instant::now();
                    outgoing.push(ClientEvent::Ping { timestamp: now_ms() });
                }

                for event in outgoing {
                    if let ClientEvent::Move { x, y, direction, is_moving } = &event {
                        mirror.predict_move(*x, *y, *direction, *is_moving);
                    }
                    if let Err(e) = connection.send(&event).await {
                        error!("Error sending {}: {}", event.name(), e);
                        break;
                    }
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Leaving");
                let _ = connection.send(&ClientEvent::Leave).await;
                break;
            }
        }
    }

    Ok(())
}
