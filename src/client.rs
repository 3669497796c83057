use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use tokio::io::{AsyncBufReadExt, BufReader};

use meshroom::devices::SyntheticDevices;
use meshroom::event::{self, EventSender};
use meshroom::layout::{GridId, GridLayout, GridRenderer, Orientation};
use meshroom::registry::TileId;
use meshroom::rtc::RtcConnector;
use meshroom::signal::{SignalEvent, WsSignaling};
use meshroom::{Cue, Notifier, Room, RoomConfig, RoomEvent, UserAction};

#[derive(Parser)]
#[command(version, about = "Mesh video room client", long_about = None)]
struct Cli {
    /// Room to join
    room: String,

    /// Display name shown to the other participants
    name: Option<String>,

    /// Signaling server
    #[arg(short, long)]
    url: Option<String>,

    /// Participant id (random when omitted)
    #[arg(long)]
    id: Option<String>,

    /// STUN/TURN server url, may be repeated
    #[arg(long = "stun")]
    stun: Vec<String>,

    /// Report a mobile platform (exposes camera flipping)
    #[arg(long)]
    mobile: bool,

    #[arg(long)]
    no_facing_mode: bool,

    #[arg(long)]
    no_screen_capture: bool,

    /// Start in vertical orientation
    #[arg(long)]
    portrait: bool,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

impl Cli {
    fn config(&self) -> RoomConfig {
        let mut config = RoomConfig {
            room: self.room.clone(),
            ..Default::default()
        };
        if let Some(name) = &self.name {
            config.self_name = name.clone();
        }
        if let Some(url) = &self.url {
            config.signaling_url = url.clone();
        }
        if let Some(id) = &self.id {
            config.self_id = id.clone();
        }
        if !self.stun.is_empty() {
            config.ice_servers = self.stun.clone();
        }
        config.capabilities.mobile = self.mobile;
        config.capabilities.facing_mode = !self.no_facing_mode;
        config.capabilities.screen_capture = !self.no_screen_capture;
        config
    }
}

fn init_logging(debug: u8) {
    if debug > 0 {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log::LevelFilter::Trace)
            .init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    }
}

/// Prints grid changes instead of drawing them.
struct LogRenderer {
    portrait: Arc<AtomicBool>,
}

impl GridRenderer for LogRenderer {
    fn orientation(&self) -> Orientation {
        if self.portrait.load(Ordering::Relaxed) {
            Orientation::Vertical
        } else {
            Orientation::Horizontal
        }
    }

    fn add_grid(&mut self, grid: GridId, tiles: &[TileId]) {
        log::info!("{grid} added with {} tiles", tiles.len());
    }

    fn remove_grid(&mut self, grid: GridId) {
        log::info!("{grid} removed");
    }

    fn focus_grid(&mut self, grid: GridId) {
        log::info!("{grid} focused");
    }

    fn arrange(&mut self, grid: GridId, tiles: &[TileId], layout: GridLayout) {
        let tiles: Vec<_> = tiles.iter().map(ToString::to_string).collect();
        log::info!(
            "{grid}: {}x{} [{}]",
            layout.rows,
            layout.columns,
            tiles.join(", ")
        );
    }
}

struct LogNotifier;

impl Notifier for LogNotifier {
    fn cue(&self, cue: Cue) {
        log::info!("cue: {cue:?}");
    }

    fn alert(&self, message: &str) {
        log::warn!("{message}");
    }
}

async fn read_commands(events: EventSender, portrait: Arc<AtomicBool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("reading stdin failed: {e}");
                break;
            }
        };
        let event = match line.trim() {
            "" => continue,
            "resize" => RoomEvent::Resize,
            "rotate" => {
                portrait.fetch_xor(true, Ordering::Relaxed);
                RoomEvent::Resize
            }
            command => match command.parse::<UserAction>() {
                Ok(action) => RoomEvent::Action(action),
                Err(e) => {
                    log::warn!("{e}; try mic, cam, flip, share, rotate, debug or leave");
                    continue;
                }
            },
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = cli.config();

    let (events_tx, events_rx) = event::channel();
    let (signaling, mut signals) = WsSignaling::connect(&config.signaling_url).await?;
    let rtc = Arc::new(RtcConnector::new(&config, signaling.clone(), events_tx.clone())?);

    {
        let rtc = rtc.clone();
        let events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    SignalEvent::Relay { from, data } => {
                        if let Err(e) = rtc.handle_signal(&from, &data).await {
                            log::error!("negotiation with {from} failed: {e}");
                        }
                    }
                    other => {
                        if events.send(RoomEvent::Signal(other)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let portrait = Arc::new(AtomicBool::new(cli.portrait));
    tokio::spawn(read_commands(events_tx.clone(), portrait.clone()));
    {
        let events = events_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = events.send(RoomEvent::Unload);
            }
        });
    }

    let devices = Arc::new(SyntheticDevices::new(config.capabilities));
    let room = Room::start(
        config,
        devices,
        rtc,
        signaling,
        Box::new(LogRenderer { portrait }),
        Arc::new(LogNotifier),
        events_tx,
    )
    .await?;
    log::info!("controls: {:?}", room.controls());

    room.run(events_rx).await?;
    Ok(())
}
