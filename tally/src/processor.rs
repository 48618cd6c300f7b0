//! The summary processor
//!
//! [`Processor`] ties a [`WindowClock`] to a [`Registry`] and a list of
//! [`Observer`]s. Its life is short and linear:
//!
//! ```text
//! Uninitialized --start--> Running --stop--> Stopped
//! ```
//!
//! While running, `process` folds observations into the registry and `ping`
//! asks the window clock whether the window has elapsed. When it has, the
//! registry is finalized at the corrected window boundary and every summary
//! is published. `stop` finalizes whatever remains at the current time. There
//! is no next window to align to, so no correction applies.
//!
//! Observations are only accepted while running. `ping` outside of running is
//! a no-op and `stop` after stop is a no-op; starting twice, or after stop, is
//! an error.

use std::{fmt, sync::Arc};

use metrics::counter;
use tally_metric::Metric;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::{self, Config},
    merge::Merges,
    observer::Observer,
    registry::{self, Registry, Summary},
    window::{Correction, WindowClock},
};

/// Errors produced by [`Processor`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration was invalid, no processor was built.
    #[error(transparent)]
    Config(#[from] config::Error),
    /// The registry rejected an observation.
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// An observation arrived while not running.
    #[error("Processor is {state}, observations are only accepted while running")]
    NotRunning {
        /// State at the time of the call
        state: State,
    },
    /// A lifecycle call was made from a state that does not allow it.
    #[error("Processor cannot move from {from} to {to}")]
    InvalidTransition {
        /// State at the time of the call
        from: State,
        /// State the call would have moved to
        to: State,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle state of a [`Processor`]
pub enum State {
    /// Built, not yet started
    Uninitialized,
    /// Accepting observations and flushing on ping
    Running,
    /// Terminal
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Uninitialized => "uninitialized",
            State::Running => "running",
            State::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a flush
pub struct Flush {
    /// Timestamp every summary of the flush was stamped with
    pub timestamp: u64,
    /// Correction applied to reach `timestamp`, `None` for the final flush
    pub correction: Option<Correction>,
    /// Number of summaries published
    pub summaries: usize,
}

#[derive(Debug, Clone)]
/// A cloneable handle feeding observations to a [`Processor`]
///
/// Handles may be moved to other threads or tasks. Observations recorded
/// through a handle land in exactly one window.
pub struct Handle {
    registry: Arc<Registry>,
}

impl Handle {
    /// Fold `metric` into the current window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if the processor is not running or the
    /// metric conflicts with the existing summary for its key.
    pub fn process(&self, metric: Metric) -> Result<(), Error> {
        record(&self.registry, metric)
    }
}

fn record(registry: &Registry, metric: Metric) -> Result<(), Error> {
    match registry.record(metric) {
        Ok(()) => {
            counter!("tally_observations_total").increment(1);
            Ok(())
        }
        Err(err) => {
            if err.is_schema_conflict() {
                counter!("tally_schema_conflicts_total").increment(1);
            }
            Err(err.into())
        }
    }
}

/// Builder for [`Processor`]
pub struct Builder<C = SystemClock> {
    config: Config,
    clock: C,
    merges: Merges,
    observers: Vec<Box<dyn Observer>>,
}

impl<C> fmt::Debug for Builder<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("merges", &self.merges)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl<C> Builder<C>
where
    C: Clock,
{
    /// Read time from `clock` instead.
    pub fn clock<D>(self, clock: D) -> Builder<D>
    where
        D: Clock,
    {
        Builder {
            config: self.config,
            clock,
            merges: self.merges,
            observers: self.observers,
        }
    }

    /// Fold observations with `merges`.
    #[must_use]
    pub fn merges(mut self, merges: Merges) -> Self {
        self.merges = merges;
        self
    }

    /// Register `observer` before the processor is built.
    #[must_use]
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: Observer + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Build the [`Processor`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured window is invalid.
    pub fn build(self) -> Result<Processor<C>, Error> {
        let window_ms = self.config.window_ms()?;
        let window = WindowClock::new(window_ms).map_err(config::Error::from)?;
        let registry = Registry::new(window.resolution(), self.config.suffix, self.merges);

        Ok(Processor {
            window,
            registry: Arc::new(registry),
            observers: self.observers,
            state: State::Uninitialized,
            clock: self.clock,
        })
    }
}

/// Aggregates observations into window-aligned summaries
pub struct Processor<C = SystemClock> {
    window: WindowClock,
    registry: Arc<Registry>,
    observers: Vec<Box<dyn Observer>>,
    state: State,
    clock: C,
}

impl<C> fmt::Debug for Processor<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("window", &self.window)
            .field("registry", &self.registry)
            .field("observers", &self.observers.len())
            .field("state", &self.state)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Processor<SystemClock> {
    /// Create a new [`Processor`] reading wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured window is invalid.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::builder(config.clone()).build()
    }

    /// Begin building a [`Processor`] from `config`.
    #[must_use]
    pub fn builder(config: Config) -> Builder<SystemClock> {
        Builder {
            config,
            clock: SystemClock,
            merges: Merges::default(),
            observers: Vec::new(),
        }
    }
}

impl<C> Processor<C>
where
    C: Clock,
{
    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The window clock, for inspection
    #[must_use]
    pub fn window(&self) -> &WindowClock {
        &self.window
    }

    /// Register `observer` to receive every summary published from now on.
    pub fn subscribe<O>(&mut self, observer: O)
    where
        O: Observer + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// A [`Handle`] recording into this processor's registry.
    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Fold `metric` into the current window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] outside of [`State::Running`] and
    /// [`Error::Registry`] if the metric's unit or statistic conflicts with
    /// the existing summary for its key. Neither error alters any summary.
    pub fn process(&self, metric: Metric) -> Result<(), Error> {
        if self.state != State::Running {
            warn!(state = %self.state, metric = metric.name(), "Observation rejected");
            return Err(Error::NotRunning { state: self.state });
        }
        record(&self.registry, metric)
    }

    /// Align the window to the current time and start accepting observations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless uninitialized.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.state != State::Uninitialized {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: State::Running,
            });
        }

        let now = self.clock.now_ms();
        self.window.start(now);
        self.registry.open();
        self.state = State::Running;
        info!(
            window_ms = self.window.window(),
            last_flush = ?self.window.last_flush(),
            "Summary processor started"
        );

        tokio::task::yield_now().await;
        Ok(())
    }

    /// Flush if the current window has elapsed.
    ///
    /// Returns `None` when nothing was flushed, including when not running.
    #[allow(clippy::unused_async)]
    pub async fn ping(&mut self) -> Option<Flush> {
        if self.state != State::Running {
            return None;
        }
        let now = self.clock.now_ms();
        if !self.window.should_flush(now) {
            return None;
        }

        let (boundary, correction) = self.window.advance(now);
        if correction.is_excessive() {
            counter!("tally_flush_corrections_total").increment(1);
            warn!(
                correction_ms = correction.millis(),
                now = now,
                boundary = boundary,
                "{correction}"
            );
        }

        let summaries = self.registry.finalize_and_clear(boundary);
        let summaries = self.publish(&summaries);
        debug!(timestamp = boundary, summaries, "Flushed window");

        Some(Flush {
            timestamp: boundary,
            correction: Some(correction),
            summaries,
        })
    }

    /// Flush everything at the current time and stop for good.
    ///
    /// Returns `None` if already stopped.
    pub async fn stop(&mut self) -> Option<Flush> {
        if self.state == State::Stopped {
            return None;
        }

        let now = self.clock.now_ms();
        let summaries = self.registry.close_and_finalize(now);
        let summaries = self.publish(&summaries);
        self.window.stop();
        self.state = State::Stopped;
        info!(timestamp = now, summaries, "Summary processor stopped");

        tokio::task::yield_now().await;
        Some(Flush {
            timestamp: now,
            correction: None,
            summaries,
        })
    }

    fn publish(&mut self, summaries: &[Summary]) -> usize {
        for summary in summaries {
            for observer in &mut self.observers {
                if let Err(err) = observer.observe(summary) {
                    counter!("tally_observer_errors_total").increment(1);
                    warn!(summary = %summary.name, error = %err, "Observer failed to receive summary");
                }
            }
        }
        counter!("tally_summaries_emitted_total").increment(summaries.len() as u64);
        summaries.len()
    }
}
