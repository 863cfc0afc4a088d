use std::collections::BTreeSet;
use std::{env, io, process};

use calloop::signals::{Signal, Signals};
use calloop::{EventLoop, LoopHandle};
use configory::{Manager as ConfigManager, Options as ConfigOptions};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, ConfigEventHandler};
use crate::dbus::LogindSource;
use crate::manager::{InhibitCategory, InhibitManager};

mod config;
mod dbus;
mod manager;

fn main() {
    // Setup logging.
    let directives = env::var("RUST_LOG").unwrap_or("warn,desvelo=info,configory=info".into());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    FmtSubscriber::builder().with_env_filter(env_filter).with_line_number(true).init();

    info!("Started Desvelo");

    if let Err(err) = run() {
        error!("[CRITICAL] {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let mut event_loop = EventLoop::try_new()?;
    let mut state = State::new(&event_loop.handle())?;

    // Terminate gracefully on SIGINT/SIGTERM, releasing all leases.
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    event_loop.handle().insert_source(signals, |_, _, state| state.terminated = true)?;

    // Start event loop.
    while !state.terminated {
        // Apply the staged desired set before going back to sleep.
        state.reconcile();

        event_loop.dispatch(None, &mut state)?;
    }

    // Give up every held lease on the way out.
    state.manager.shutdown();

    Ok(())
}

/// Application state.
struct State {
    manager: InhibitManager<LogindSource>,

    /// Desired set staged for the next reconciliation.
    pending: Option<BTreeSet<InhibitCategory>>,

    terminated: bool,

    _config_manager: ConfigManager,
}

impl State {
    fn new(event_loop: &LoopHandle<'static, Self>) -> Result<Self, Error> {
        // Initialize configuration state.
        let config_options = ConfigOptions::new("desvelo").notify(true);
        let config_handler = ConfigEventHandler::new(event_loop);
        let config_manager = ConfigManager::with_options(&config_options, config_handler)?;
        let config = config_manager
            .get::<&str, Config>(&[])
            .inspect_err(|err| error!("Config error: {err}"))
            .ok()
            .flatten()
            .unwrap_or_default();

        let manager = InhibitManager::new(LogindSource::new()?);

        Ok(Self {
            manager,
            pending: Some(config.desired()),
            _config_manager: config_manager,
            terminated: Default::default(),
        })
    }

    /// Stage a new desired set for the next reconciliation.
    ///
    /// Staged sets are coalesced; only the newest one is applied.
    fn request_reconcile(&mut self, config: &Config) {
        self.pending = Some(config.desired());
    }

    /// Reconcile inhibitor leases against the staged desired set.
    fn reconcile(&mut self) {
        let desired = match self.pending.take() {
            Some(desired) => desired,
            None => return,
        };

        if let Err(err) = self.manager.reconcile(&desired) {
            error!("{err}");
        }

        let held: Vec<_> = self.manager.held().map(|category| category.as_str()).collect();
        debug!("Holding inhibitor leases: [{}]", held.join(", "));
    }
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("{0}")]
    EventLoop(#[from] calloop::Error),
    #[error("{0}")]
    Configory(#[from] configory::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl<T> From<calloop::InsertError<T>> for Error {
    fn from(err: calloop::InsertError<T>) -> Self {
        Self::EventLoop(err.error)
    }
}
