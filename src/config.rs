//! Configuration options.

use std::collections::BTreeSet;

use calloop::LoopHandle;
use calloop::channel::{self, Event, Sender};
use configory::EventHandler;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::State;
use crate::manager::InhibitCategory;

/// # Desvelo
///
/// ## Syntax
///
/// Desvelo's configuration file uses the TOML format. The format's
/// specification can be found at _https://toml.io/en/v1.0.0_.
///
/// ## Location
///
/// Desvelo doesn't create the configuration file for you, but it looks for
/// one at <br> `${XDG_CONFIG_HOME:-$HOME/.config}/desvelo/desvelo.toml`.
///
/// ## Fields
#[derive(Deserialize, Default, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Inhibitor categories which should be held open.
    ///
    /// Valid categories are `"shutdown"`, `"sleep"`, `"idle"`,
    /// `"handle-power-key"`, `"handle-suspend-key"`,
    /// `"handle-hibernate-key"`, and `"handle-lid-switch"`.
    pub inhibited: Vec<String>,
}

impl Config {
    /// Desired inhibitor categories.
    ///
    /// Unknown category names are skipped and duplicates collapse into a
    /// single entry.
    pub fn desired(&self) -> BTreeSet<InhibitCategory> {
        let mut desired = BTreeSet::new();

        for name in &self.inhibited {
            match name.parse() {
                Ok(category) => {
                    desired.insert(category);
                },
                Err(_) => warn!("Ignoring unknown inhibitor category {name:?}"),
            }
        }

        desired
    }
}

/// Event handler for configuration manager updates.
pub struct ConfigEventHandler {
    tx: Sender<Config>,
}

impl ConfigEventHandler {
    pub fn new(event_loop: &LoopHandle<'static, State>) -> Self {
        // Create calloop channel to apply config updates.
        let (tx, rx) = channel::channel();
        let _ = event_loop
            .insert_source(rx, |event, _, state| {
                if let Event::Msg(config) = event {
                    state.request_reconcile(&config);
                }
            })
            .inspect_err(|err| error!("Failed to insert config source: {err}"));

        Self { tx }
    }

    /// Reload the configuration file.
    fn reload_config(&self, config: &configory::Config) {
        info!("Reloading configuration file");

        // Parse config or fall back to the default.
        let parsed = config
            .get::<&str, Config>(&[])
            .inspect_err(|err| error!("Config error: {err}"))
            .ok()
            .flatten()
            .unwrap_or_default();

        // Update the config.
        if let Err(err) = self.tx.send(parsed) {
            error!("Failed to send on config channel: {err}");
        }
    }
}

impl EventHandler<()> for ConfigEventHandler {
    fn file_changed(&self, config: &configory::Config) {
        self.reload_config(config);
    }

    fn ipc_changed(&self, config: &configory::Config) {
        self.reload_config(config);
    }

    fn file_error(&self, _config: &configory::Config, err: configory::Error) {
        error!("Configuration file error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_skips_unknown_names() {
        let config = Config {
            inhibited: vec![
                String::from("sleep"),
                String::from("caffeine"),
                String::from("idle"),
                String::from("sleep"),
            ],
        };

        let desired = config.desired();

        assert_eq!(desired, BTreeSet::from([InhibitCategory::Sleep, InhibitCategory::Idle]));
    }

    #[test]
    fn empty_config_desires_nothing() {
        assert!(Config::default().desired().is_empty());
    }
}
