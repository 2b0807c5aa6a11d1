//! Run trigger and abort trigger
//!
//! `ProtocolRunner` owns the stock and buffer bindings between runs. A run
//! takes them out, drives the sequencer (or a push-pull program) on a
//! named worker thread and puts them back when it ends, so a second start
//! while one is in flight is rejected with [`TriggerError::Busy`].

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use embassy_futures::block_on;
use embedded_hal_async::delay::DelayNs;
use gradient_core::config::{ConfigError, ProtocolConfig, PushPullConfig};
use gradient_core::sequencer::{
    CancellationMonitor, PhaseSequencer, PushPull, PushPullError, PushPullOutcome,
};
use gradient_core::traits::{FlowActuator, Role};
use gradient_core::{RunError, RunOutcome};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::observer::TracingObserver;
use crate::recovery::{stop_both, StopReport};

/// Worker thread name
const WORKER_NAME: &str = "gradient-run";

/// Run trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Protocol rejected before anything was started
    #[error("invalid protocol: {0}")]
    Invalid(#[from] ConfigError),
    /// A run is already in flight
    #[error("a run is already in progress")]
    Busy,
    /// The run failed part way
    #[error(transparent)]
    Run(#[from] RunError),
    /// Push-pull failed part way
    #[error(transparent)]
    PushPull(#[from] PushPullError),
    /// Worker thread could not be created; the bindings are lost
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
    /// Worker thread panicked; the bindings are lost
    #[error("worker thread panicked")]
    WorkerPanicked,
}

type Bindings<S, B> = Arc<Mutex<Option<(S, B)>>>;

/// Cloneable handle that cancels one run
#[derive(Debug, Clone)]
pub struct AbortTrigger {
    cancel: Arc<CancellationMonitor>,
}

impl AbortTrigger {
    /// Request cancellation (idempotent)
    pub fn abort(&self) {
        if self.cancel.abort() {
            info!("Abort requested");
        }
    }

    /// Check if cancellation was requested
    pub fn is_requested(&self) -> bool {
        self.cancel.is_tripped()
    }
}

impl From<Arc<CancellationMonitor>> for AbortTrigger {
    fn from(cancel: Arc<CancellationMonitor>) -> Self {
        Self { cancel }
    }
}

/// A run in flight
pub struct RunHandle<T = RunOutcome, E = RunError> {
    trigger: AbortTrigger,
    join: JoinHandle<Result<T, E>>,
}

impl<T, E: Into<TriggerError>> RunHandle<T, E> {
    /// Request cancellation of this run (idempotent)
    pub fn abort(&self) {
        self.trigger.abort();
    }

    /// Get a trigger that can abort this run from another thread
    pub fn abort_trigger(&self) -> AbortTrigger {
        self.trigger.clone()
    }

    /// Check if the worker has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end
    ///
    /// A cancelled run is `Ok` with the aborted outcome.
    pub fn join(self) -> Result<T, TriggerError> {
        match self.join.join() {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                error!("Worker thread panicked");
                Err(TriggerError::WorkerPanicked)
            }
        }
    }
}

/// Runs protocols against one stock and one buffer binding
pub struct ProtocolRunner<S, B, D> {
    bindings: Bindings<S, B>,
    delay: D,
    current: Arc<Mutex<Option<AbortTrigger>>>,
}

impl<S, B, D> ProtocolRunner<S, B, D>
where
    S: FlowActuator + Send + 'static,
    B: FlowActuator + Send + 'static,
    D: DelayNs + Clone + Send + 'static,
{
    /// Create a runner owning both bindings
    pub fn new(stock: S, buffer: B, delay: D) -> Self {
        Self {
            bindings: Arc::new(Mutex::new(Some((stock, buffer)))),
            delay,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Check if a run holds the bindings
    pub fn is_busy(&self) -> bool {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Start a run with a fresh cancellation handle
    pub fn start(&self, config: ProtocolConfig) -> Result<RunHandle, TriggerError> {
        self.start_with(config, Arc::new(CancellationMonitor::new()))
    }

    /// Start a run watching the given cancellation handle, and return
    /// immediately
    ///
    /// The protocol is validated here, before the bindings are taken. A
    /// handle that is already tripped ends the run before any pump moves.
    pub fn start_with(
        &self,
        config: ProtocolConfig,
        cancel: Arc<CancellationMonitor>,
    ) -> Result<RunHandle, TriggerError> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Protocol rejected");
            return Err(TriggerError::Invalid(e));
        }

        info!(targets = config.step_count(), "Starting run");

        self.spawn(cancel, move |stock, buffer, delay, cancel| {
            let mut observer = TracingObserver::new();
            let result = block_on(
                PhaseSequencer::new(&config, stock, buffer, delay, cancel).run(&mut observer),
            );

            match &result {
                Ok(outcome) => info!(?outcome, phases = observer.phases(), "Run finished"),
                Err(e) => error!(error = %e, "Run failed"),
            }
            result
        })
    }

    /// Start push-pull cycling and return immediately
    pub fn start_push_pull(
        &self,
        config: PushPullConfig,
    ) -> Result<RunHandle<PushPullOutcome, PushPullError>, TriggerError> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Push-pull rejected");
            return Err(TriggerError::Invalid(e));
        }

        info!(
            cycles = config.cycles,
            stroke_ml = config.stroke_volume_ml(),
            "Starting push-pull"
        );

        self.spawn(
            Arc::new(CancellationMonitor::new()),
            move |stock, buffer, delay, cancel| {
                let result = block_on(PushPull::new(&config, stock, buffer, delay, cancel).run());

                match &result {
                    Ok(outcome) => info!(?outcome, "Push-pull finished"),
                    Err(e) => error!(error = %e, "Push-pull failed"),
                }
                result
            },
        )
    }

    /// Take the bindings out and hand them to `work` on the worker thread
    fn spawn<T, E, F>(
        &self,
        cancel: Arc<CancellationMonitor>,
        work: F,
    ) -> Result<RunHandle<T, E>, TriggerError>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(&mut S, &mut B, D, &CancellationMonitor) -> Result<T, E> + Send + 'static,
    {
        let (mut stock, mut buffer) = self
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TriggerError::Busy)?;

        let trigger = AbortTrigger::from(Arc::clone(&cancel));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(trigger.clone());

        let bindings = Arc::clone(&self.bindings);
        let current = Arc::clone(&self.current);
        let delay = self.delay.clone();

        let spawned = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let result = work(&mut stock, &mut buffer, delay, cancel.as_ref());

                // Forget the trigger before the bindings can be taken again
                current.lock().unwrap_or_else(PoisonError::into_inner).take();
                *bindings.lock().unwrap_or_else(PoisonError::into_inner) = Some((stock, buffer));
                result
            });

        match spawned {
            Ok(join) => Ok(RunHandle { trigger, join }),
            Err(e) => {
                self.current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                Err(TriggerError::Spawn(e))
            }
        }
    }

    /// Abort the run in flight, if any (idempotent)
    pub fn abort(&self) {
        if let Some(trigger) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            trigger.abort();
        }
    }

    /// Stop both bindings and report what each was doing
    ///
    /// Rejected with [`TriggerError::Busy`] while a run holds them; abort
    /// that run instead.
    pub fn stop_all(&self) -> Result<[(Role, StopReport); 2], TriggerError> {
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        let (stock, buffer) = bindings.as_mut().ok_or(TriggerError::Busy)?;
        Ok(stop_both(stock, buffer))
    }

    /// Take the bindings back, if no run holds them
    pub fn into_bindings(self) -> Option<(S, B)> {
        match Arc::try_unwrap(self.bindings) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        }
    }
}
