// src/main.rs
use std::env;
use std::error::Error;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event as CEvent, KeyEventKind};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

mod api;
mod app;
mod auth;
mod config;
mod error;
mod fetch;
mod metrics;
mod model;
mod runtime;
mod session;
mod store;
mod ui;

use api::{CloudApi, HttpCloudApi};
use app::App;
use auth::AuthClient;
use config::Config;
use model::AppEvent;
use runtime::{ApiFactory, Executor};
use store::{CredentialStore, FileCredentialStore};
use ui::draw_ui;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenv::dotenv();

    let args: Vec<String> = env::args().collect();
    let debug_mode = args.iter().any(|s| s == "--debug");

    let config = Config::from_env()?;

    // tracing goes to a file only when --debug is passed; stdout belongs to the terminal UI
    if debug_mode {
        let file = OpenOptions::new().create(true).append(true).open(&config.log_file)?;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let fmt_layer = fmt::layer().with_writer(Arc::new(file)).with_target(false).with_ansi(false);
        Registry::default().with(filter).with(fmt_layer).init();
        info!("Tracing initialized to {}", config.log_file.display());
    }

    info!("Starting cloud TUI");

    let http = reqwest::Client::new();
    let auth = Arc::new(AuthClient::new(http.clone(), &config.auth));
    let credentials: Arc<dyn CredentialStore> = Arc::new(match &config.credential_dir {
        Some(dir) => FileCredentialStore::new(dir.clone()),
        None => FileCredentialStore::new_default(),
    });
    let api_url = config.api_url.clone();
    let api_factory: ApiFactory = Box::new(move |credential| {
        Arc::new(HttpCloudApi::new(http.clone(), &api_url, &credential.access_token)) as Arc<dyn CloudApi>
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();
    let mut executor = Executor::new(tx.clone(), auth, credentials.clone(), api_factory, config.metrics.clone());
    let mut app = App::new();

    match store::load_credential(credentials.as_ref()) {
        Ok(Some(credential)) => {
            debug!("Found stored credential");
            let _ = tx.send(AppEvent::CredentialLoaded { credential, now: OffsetDateTime::now_utc() });
        }
        Ok(None) => debug!("No stored credential"),
        Err(e) => {
            warn!("Ignoring unreadable stored credential: {}", e);
            app.message = Some(format!("Stored session unreadable: {}", e));
        }
    }

    // Terminal setup
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    crossterm::terminal::enable_raw_mode()?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let tick_rate = Duration::from_millis(50);
    let mut last_tick = std::time::Instant::now();

    let result: Result<(), Box<dyn Error>> = loop {
        if last_tick.elapsed() >= tick_rate {
            let commands = app.dispatch(AppEvent::Tick(tokio::time::Instant::now()));
            executor.run_all(commands);
            if app.is_busy() {
                app.throbber_state.calc_next();
            }
            if let Err(e) = terminal.draw(|f| draw_ui(f, &mut app)) {
                break Err(e.into());
            }
            last_tick = std::time::Instant::now();
        }

        // Drain background events
        while let Ok(ev) = rx.try_recv() {
            let commands = app.dispatch(ev);
            executor.run_all(commands);
        }

        // Input handling
        match event::poll(Duration::from_millis(20)) {
            Ok(true) => match event::read() {
                Ok(CEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                    if let Some(ev) = app.handle_key(key.code) {
                        let commands = app.dispatch(ev);
                        executor.run_all(commands);
                    }
                    if app.should_quit {
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            },
            Ok(false) => {}
            Err(e) => break Err(e.into()),
        }
    };

    executor.shutdown();

    // Cleanup
    crossterm::terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!("Exiting cloud TUI");
    result
}
