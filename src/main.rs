use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use ratatui::DefaultTerminal;
use ratatui_image::picker::Picker;
use reqwest::blocking::Client;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    app::state::App,
    config::Config,
    events::types::AppEvent,
    media::element::{PlayerHandle, SharedSnapshot},
    media::source::MediaLocation,
    player::commands::PlayerCommand,
    ui::visual::{self, ImageCache},
};

mod app;
mod config;
mod events;
mod input;
mod media;
mod player;
mod ui;

#[derive(Parser, Debug)]
#[command(name = "spectroseek", version, about = "Play audio and seek on its spectrogram")]
struct Args {
    /// Audio files or http(s) URLs, played in order
    #[arg(required = true)]
    media: Vec<String>,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Starting volume between 0 and 1
    #[arg(long)]
    volume: Option<f64>,
}

/// The terminal belongs to the UI, so logs go to a file in the cache dir.
fn init_logging() -> Result<()> {
    let log_dir = dirs::cache_dir()
        .context("Could not find cache directory")?
        .join("spectroseek");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
    let log_file =
        File::create(log_dir.join("spectroseek.log")).context("Failed to create log file")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "spectroseek=info".into()))
        .with(
            fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let mut config = config::load_or_create_config(args.config.as_deref())?;
    if let Some(volume) = args.volume {
        config.initial_volume = volume.clamp(0.0, 1.0);
    }
    ui::theme::init_theme(config.theme);

    let playlist: Vec<MediaLocation> = args.media.iter().map(|m| MediaLocation::parse(m)).collect();
    info!(items = playlist.len(), "starting");

    let mut terminal = ratatui::init();
    let result = crossterm::execute!(io::stdout(), EnableMouseCapture)
        .context("Failed to enable mouse capture")
        .and_then(|_| run(&mut terminal, &config, playlist));

    let _ = crossterm::execute!(io::stdout(), DisableMouseCapture);
    ratatui::restore();
    result
}

fn run(terminal: &mut DefaultTerminal, config: &Config, playlist: Vec<MediaLocation>) -> Result<()> {
    let picker = Picker::from_query_stdio().unwrap_or_else(|_| Picker::from_fontsize((8, 16)));
    let client = Client::new();

    let (event_tx, event_rx) = mpsc::channel::<AppEvent>();
    let (player_cmd_tx, player_cmd_rx) = mpsc::channel::<PlayerCommand>();
    let snapshot = SharedSnapshot::default();

    let _input_handle = input::thread::spawn(event_tx.clone());
    let _player_handle = player::thread::spawn(
        player_cmd_rx,
        event_tx.clone(),
        snapshot.clone(),
        client.clone(),
    );

    let handle = PlayerHandle::new(player_cmd_tx, snapshot);
    let mut app = App::new(
        playlist,
        handle,
        config.initial_volume,
        config.seek_step_secs,
    );
    app.load_current();

    let mut image_cache = ImageCache::new(picker);
    let mut last_item: Option<usize> = None;

    loop {
        if last_item != Some(app.current_index) {
            image_cache.clear();
            if let Some(location) = app.current_location() {
                visual::request(
                    client.clone(),
                    location.clone(),
                    config.spectrogram,
                    app.current_index,
                    event_tx.clone(),
                );
            }
            last_item = Some(app.current_index);
        }

        let now = Instant::now();
        if let Some(ref mut player) = app.player {
            player.tick(now);
        }
        app.notifications.tick(now);

        terminal.draw(|f| ui::render::render(f, &mut app, &mut image_cache))?;

        match event_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => match event {
                AppEvent::Input(key_event) => app.handle_input(key_event),
                AppEvent::Mouse(mouse_event) => app.handle_mouse(mouse_event),
                AppEvent::Resize(width, height) => debug!(width, height, "terminal resized"),
                AppEvent::Media {
                    generation,
                    notification,
                } => app.on_media(generation, notification),
                AppEvent::MediaError(err) => app.on_media_error(err),
                AppEvent::SpectrogramReady { item, image } => {
                    if app.on_spectrogram_ready(item) {
                        image_cache.set(image.image);
                    }
                }
                AppEvent::SpectrogramFailed { item, error } => {
                    app.on_spectrogram_failed(item, error)
                }
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Event channel disconnected");
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
