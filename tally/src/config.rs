//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.

use std::{fs, io, path::Path, str::FromStr};

use serde::Deserialize;

use crate::window;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: std::path::PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The window duration string could not be parsed.
    #[error("The \"window\" option {value:?} is not a duration: {source}")]
    Duration {
        /// The offending string
        value: String,
        /// Underlying parse error
        #[source]
        source: humantime::DurationError,
    },
    /// The window in milliseconds was not a finite whole number.
    #[error("The \"window\" option must be a finite whole number of milliseconds, got {0}")]
    Millis(f64),
    /// The window does not fit in 64 bits of milliseconds.
    #[error("The \"window\" option is too large")]
    TooLarge,
    /// The window was not positive.
    #[error(transparent)]
    Window(#[from] window::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
/// Length of a summary window
///
/// Accepts either a number of milliseconds, `window: 200`, or a human readable
/// duration, `window: 5m`.
pub enum Window {
    /// Milliseconds
    Millis(f64),
    /// Human readable duration, e.g. `200ms` or `5m`, or a quoted number of
    /// milliseconds
    Human(String),
}

impl Window {
    /// The window length in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the window is not a positive, finite, whole number
    /// of milliseconds or a duration string that parses to one.
    pub fn as_millis(&self) -> Result<u64, Error> {
        let millis = match self {
            Window::Millis(ms) => whole_millis(*ms)?,
            Window::Human(s) => {
                let s = s.trim();
                if let Ok(ms) = s.parse::<f64>() {
                    whole_millis(ms)?
                } else {
                    let duration =
                        humantime::parse_duration(s).map_err(|source| Error::Duration {
                            value: s.to_string(),
                            source,
                        })?;
                    u64::try_from(duration.as_millis()).map_err(|_| Error::TooLarge)?
                }
            }
        };
        if millis == 0 {
            return Err(window::Error::Zero.into());
        }
        Ok(millis)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_millis(ms: f64) -> Result<u64, Error> {
    if !ms.is_finite() || ms.fract() != 0.0 {
        return Err(Error::Millis(ms));
    }
    if ms <= 0.0 {
        return Err(window::Error::Zero.into());
    }
    if ms >= u64::MAX as f64 {
        return Err(Error::TooLarge);
    }
    Ok(ms as u64)
}

impl FromStr for Window {
    type Err = std::convert::Infallible;

    /// Plain numbers are milliseconds, anything else a duration string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<f64>() {
            Ok(ms) => Window::Millis(ms),
            Err(_) => Window::Human(s.to_string()),
        })
    }
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Length of each summary window
    pub window: Window,
    /// Whether output names receive the `.summary` suffix
    #[serde(default)]
    pub suffix: bool,
}

impl Config {
    /// Create a configuration for `window` with suffixing disabled.
    #[must_use]
    pub fn new(window: Window) -> Self {
        Self {
            window,
            suffix: false,
        }
    }

    /// Load configuration from a YAML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// window is invalid.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        contents.parse()
    }

    /// The validated window length in milliseconds.
    ///
    /// # Errors
    ///
    /// See [`Window::as_millis`].
    pub fn window_ms(&self) -> Result<u64, Error> {
        self.window.as_millis()
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_yaml::from_str(s)?;
        config.window_ms()?;
        Ok(config)
    }
}
