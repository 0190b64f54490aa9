//! Persisted UI preferences

use super::KeyValueStore;
use crate::utils::{Signal, Subscription};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key of the theme preference
pub const THEME_KEY: &str = "folio-ui-theme";

/// Theme selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Dark,
    Light,
    #[default]
    System,
}

/// Concrete appearance after resolving [`ThemeMode::System`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appearance {
    Dark,
    Light,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Dark => "dark",
            ThemeMode::Light => "light",
            ThemeMode::System => "system",
        }
    }

    /// Resolve to dark or light; `System` follows the terminal background
    pub fn resolve(&self) -> Appearance {
        match self {
            ThemeMode::Dark => Appearance::Dark,
            ThemeMode::Light => Appearance::Light,
            ThemeMode::System => system_appearance(std::env::var("COLORFGBG").ok().as_deref()),
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(ThemeMode::Dark),
            "light" => Ok(ThemeMode::Light),
            "system" => Ok(ThemeMode::System),
            other => Err(format!("unknown theme '{}'", other)),
        }
    }
}

/// `COLORFGBG` is `fg;bg` (sometimes `fg;default;bg`); backgrounds 7 and 15 are light
fn system_appearance(colorfgbg: Option<&str>) -> Appearance {
    let background = colorfgbg
        .and_then(|value| value.rsplit(';').next())
        .and_then(|bg| bg.trim().parse::<u8>().ok());

    match background {
        Some(7) | Some(15) => Appearance::Light,
        _ => Appearance::Dark,
    }
}

/// The theme preference, loaded from and written back to a key-value store
#[derive(Clone)]
pub struct ThemePreference {
    store: Arc<dyn KeyValueStore>,
    mode: Signal<ThemeMode>,
}

impl ThemePreference {
    /// Read the stored preference; missing or unreadable values fall back to `System`
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let mode = match store.get(THEME_KEY) {
            Ok(Some(value)) => value.parse().unwrap_or_else(|err| {
                warn!("Ignoring stored theme: {}", err);
                ThemeMode::default()
            }),
            Ok(None) => ThemeMode::default(),
            Err(err) => {
                warn!("Could not read theme preference: {}", err);
                ThemeMode::default()
            }
        };
        debug!("Theme preference: {}", mode);

        Self {
            store,
            mode: Signal::new(mode),
        }
    }

    pub fn mode(&self) -> ThemeMode {
        self.mode.get()
    }

    pub fn appearance(&self) -> Appearance {
        self.mode().resolve()
    }

    /// Switch theme and persist the choice
    pub fn set(&self, mode: ThemeMode) -> Result<()> {
        self.store.set(THEME_KEY, mode.as_str())?;
        self.mode.set(mode);
        Ok(())
    }

    /// Flip between explicit dark and light based on what is shown now
    pub fn toggle(&self) -> Result<ThemeMode> {
        let next = match self.appearance() {
            Appearance::Dark => ThemeMode::Light,
            Appearance::Light => ThemeMode::Dark,
        };
        self.set(next)?;
        Ok(next)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ThemeMode) + Send + Sync + 'static,
    {
        self.mode.subscribe(callback)
    }
}
