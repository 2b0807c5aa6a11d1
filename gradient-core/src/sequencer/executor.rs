//! Phase sequencer
//!
//! Drives both pumps through every target: Prime, Hold, and a Flush at the
//! next target's ratio between targets. Every wait is cut into
//! `poll_interval_ms` slices so a tripped [`CancellationMonitor`] is seen
//! within one slice.

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

use super::cancel::{sliced_wait, CancellationMonitor, Cancelled};
use crate::config::{ConfigError, ProtocolConfig, MAX_TARGETS};
use crate::error::{ActuatorFault, ActuatorOp, RunError, RunOutcome};
use crate::mixing::{ratio, synchronize, MixRatio, PhaseKind, PhasePlan, PhaseVolumeModel, StartPlan};
use crate::state::{Event, SequencerState};
use crate::traits::{stop_quietly, ActuatorError, FlowActuator, Role};

/// Progress callbacks
///
/// All methods default to no-ops.
pub trait RunObserver {
    /// State changed
    fn on_transition(&mut self, _step: usize, _from: SequencerState, _to: SequencerState) {}

    /// A phase is about to start its pumps
    fn on_phase(&mut self, _step: usize, _plan: &PhasePlan, _start: &StartPlan) {}
}

impl RunObserver for () {}

/// Transient execution state, owned by the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RunState {
    /// Current step index (0-based)
    pub step: usize,
    /// Current state
    pub state: SequencerState,
    /// Cancellation has been seen
    pub cancel_observed: bool,
}

/// Why a phase stopped early
enum Halt {
    Cancelled,
    Config(ConfigError),
    Fault(ActuatorFault),
}

/// Two-pump phase sequencer
///
/// Borrows both pumps exclusively for the whole run.
pub struct PhaseSequencer<'a, S, B, D> {
    config: &'a ProtocolConfig,
    stock: &'a mut S,
    buffer: &'a mut B,
    delay: D,
    cancel: &'a CancellationMonitor,
    run: RunState,
}

impl<'a, S, B, D> PhaseSequencer<'a, S, B, D>
where
    S: FlowActuator,
    B: FlowActuator,
    D: DelayNs,
{
    /// Create a sequencer for one run
    pub fn new(
        config: &'a ProtocolConfig,
        stock: &'a mut S,
        buffer: &'a mut B,
        delay: D,
        cancel: &'a CancellationMonitor,
    ) -> Self {
        Self {
            config,
            stock,
            buffer,
            delay,
            cancel,
            run: RunState {
                step: 0,
                state: SequencerState::Idle,
                cancel_observed: false,
            },
        }
    }

    /// Get current execution state
    pub fn run_state(&self) -> RunState {
        self.run
    }

    /// Get current state
    pub fn state(&self) -> SequencerState {
        self.run.state
    }

    /// Execute the whole protocol
    ///
    /// The protocol is validated before any pump is touched. Cancellation
    /// ends the run with `Ok(RunOutcome::Aborted)`; a pump failure stops
    /// both pumps and returns the fault.
    pub async fn run<O: RunObserver>(&mut self, observer: &mut O) -> Result<RunOutcome, RunError> {
        if let Err(e) = self.config.validate() {
            warn!("Protocol rejected: {:?}", e);
            return Err(RunError::Config(e));
        }

        let mut ratios: Vec<MixRatio, MAX_TARGETS> = Vec::new();
        for target in self.config.target_concentrations.iter() {
            let r = ratio(*target, self.config.stock_concentration)?;
            ratios
                .push(r)
                .map_err(|_| RunError::Config(ConfigError::TooManyTargets))?;
        }

        info!("Protocol started: {} targets", ratios.len());

        for step in 0..ratios.len() {
            self.run.step = step;
            if let Err(halt) = self.execute_step(step, &ratios, observer).await {
                return self.halt(halt, observer);
            }
        }

        info!("Protocol complete");
        Ok(RunOutcome::Completed {
            steps: ratios.len(),
        })
    }

    /// Prime and hold one target, then flush towards the next
    async fn execute_step<O: RunObserver>(
        &mut self,
        step: usize,
        ratios: &[MixRatio],
        observer: &mut O,
    ) -> Result<(), Halt> {
        self.checkpoint()?;

        info!(
            "Step {}/{}: target {}",
            step + 1,
            ratios.len(),
            self.config.target_concentrations[step]
        );

        if self.run.state == SequencerState::Idle {
            self.apply(Event::Start, observer);
        }

        let current = ratios[step];
        self.run_phase(PhaseKind::Prime, current, observer).await?;
        self.apply(Event::PrimeFinished, observer);

        self.run_phase(PhaseKind::Hold, current, observer).await?;

        match ratios.get(step + 1) {
            Some(next) => {
                self.apply(Event::HoldFinished, observer);
                // Flush conditions the line for the upcoming target
                self.run_phase(PhaseKind::Flush, *next, observer).await?;
                self.apply(Event::FlushFinished, observer);
            }
            None => self.apply(Event::ProgramFinished, observer),
        }

        Ok(())
    }

    /// Configure, start (staggered), wait and stop for one phase
    async fn run_phase<O: RunObserver>(
        &mut self,
        kind: PhaseKind,
        ratio: MixRatio,
        observer: &mut O,
    ) -> Result<(), Halt> {
        self.checkpoint()?;

        let plan = PhaseVolumeModel::plan(kind, self.config, ratio).map_err(Halt::Config)?;
        let start = synchronize(
            plan.stock.line_flow(),
            plan.buffer.line_flow(),
            self.config.transit_volume_ml(),
        );

        debug!(
            "{:?}: stock {} mL/min x {} mL, buffer {} mL/min x {} mL, lag {} ms",
            kind,
            plan.stock.per_unit.rate_ml_min,
            plan.stock.per_unit.volume_ml,
            plan.buffer.per_unit.rate_ml_min,
            plan.buffer.per_unit.volume_ml,
            start.delay_ms()
        );
        observer.on_phase(self.run.step, &plan, &start);

        if start == StartPlan::Idle {
            debug!("Both channels idle during {:?}", kind);
        }

        // Larger transit first, for configure as well as start
        for role in start.first().into_iter().chain(start.second()) {
            let channel = *plan.channel(role);
            let geometry = self.config.syringe;
            let direction = self.config.direction;
            self.with_actuator(role, |pump| {
                pump.configure(
                    geometry,
                    direction,
                    channel.per_unit.rate_ml_min,
                    channel.per_unit.volume_ml,
                )
            })
            .map_err(|e| self.fault(kind, role, ActuatorOp::Configure, e))?;
        }

        if let Some(first) = start.first() {
            self.start_channel(kind, first)?;
        }
        if let Some(second) = start.second() {
            self.wait(start.delay_ms()).await?;
            self.start_channel(kind, second)?;
        }

        // Hold plans carry the configured hold time, not volume/rate
        self.wait(plan.nominal_duration_ms()).await?;

        self.stop_both(kind)
    }

    fn start_channel(&mut self, kind: PhaseKind, role: Role) -> Result<(), Halt> {
        debug_assert!(self.run.state.pumps_allowed());
        debug_assert_eq!(self.run.state.phase(), Some(kind));
        trace!("Starting {:?}", role);
        self.with_actuator(role, |pump| pump.start(false))
            .map_err(|e| self.fault(kind, role, ActuatorOp::Start, e))
    }

    /// Stop both pumps at a phase boundary
    ///
    /// Both stops are always issued; the first real failure is returned.
    fn stop_both(&mut self, kind: PhaseKind) -> Result<(), Halt> {
        let stock = stop_quietly(&mut *self.stock);
        let buffer = stop_quietly(&mut *self.buffer);

        stock.map_err(|e| self.fault(kind, Role::Stock, ActuatorOp::Stop, e))?;
        buffer.map_err(|e| self.fault(kind, Role::Buffer, ActuatorOp::Stop, e))
    }

    /// Stop both pumps on the abort/error path, ignoring failures
    fn stop_all_best_effort(&mut self) {
        if let Err(e) = stop_quietly(&mut *self.stock) {
            warn!("Stock stop failed: {:?}", e);
        }
        if let Err(e) = stop_quietly(&mut *self.buffer) {
            warn!("Buffer stop failed: {:?}", e);
        }
    }

    /// Cancellable wait
    async fn wait(&mut self, ms: u32) -> Result<(), Halt> {
        let slice = self.config.poll_interval_ms;
        match sliced_wait(&mut self.delay, self.cancel, slice, ms).await {
            Ok(()) => Ok(()),
            Err(Cancelled) => {
                self.run.cancel_observed = true;
                Err(Halt::Cancelled)
            }
        }
    }

    fn checkpoint(&mut self) -> Result<(), Halt> {
        if self.cancel.is_tripped() {
            self.run.cancel_observed = true;
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn halt<O: RunObserver>(&mut self, halt: Halt, observer: &mut O) -> Result<RunOutcome, RunError> {
        self.stop_all_best_effort();

        let step = self.run.step;
        match halt {
            Halt::Cancelled => {
                let state = self.run.state;
                info!("Protocol aborted during {:?} of step {}", state, step + 1);
                self.apply(Event::Abort, observer);
                Ok(RunOutcome::Aborted { step, state })
            }
            Halt::Config(e) => {
                self.apply(Event::Fault, observer);
                Err(RunError::Config(e))
            }
            Halt::Fault(fault) => {
                warn!(
                    "{:?} pump failed ({:?}) during {:?} of step {}",
                    fault.role,
                    fault.error,
                    fault.phase,
                    step + 1
                );
                self.apply(Event::Fault, observer);
                Err(RunError::Actuator(fault))
            }
        }
    }

    fn apply<O: RunObserver>(&mut self, event: Event, observer: &mut O) {
        let from = self.run.state;
        let to = from.transition(event);
        if to != from {
            self.run.state = to;
            observer.on_transition(self.run.step, from, to);
        }
    }

    fn with_actuator<T>(
        &mut self,
        role: Role,
        f: impl FnOnce(&mut dyn FlowActuator) -> T,
    ) -> T {
        match role {
            Role::Stock => f(&mut *self.stock),
            Role::Buffer => f(&mut *self.buffer),
        }
    }

    fn fault(&self, phase: PhaseKind, role: Role, op: ActuatorOp, error: ActuatorError) -> Halt {
        Halt::Fault(ActuatorFault {
            step: self.run.step,
            phase,
            role,
            op,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};

    use embassy_futures::block_on;

    use super::*;
    use crate::config::{FlushVolume, LineGeometry, Parallelism};
    use crate::mixing::abs;

    const POLL_MS: u32 = 100;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Configure(Role, f32, f32),
        Start(Role),
        Stop(Role),
    }

    /// Pump calls stamped with virtual time (ms)
    type Log = RefCell<Vec<(u64, Call), 128>>;

    struct FakePump<'a> {
        role: Role,
        log: &'a Log,
        clock: &'a Cell<u64>,
        running: bool,
        finishes_instantly: bool,
        configure_error: Option<ActuatorError>,
        start_error: Option<ActuatorError>,
        stop_error: Option<ActuatorError>,
    }

    impl<'a> FakePump<'a> {
        fn new(role: Role, log: &'a Log, clock: &'a Cell<u64>) -> Self {
            Self {
                role,
                log,
                clock,
                running: false,
                finishes_instantly: false,
                configure_error: None,
                start_error: None,
                stop_error: None,
            }
        }

        fn record(&self, call: Call) {
            let _ = self.log.borrow_mut().push((self.clock.get(), call));
        }
    }

    impl FlowActuator for FakePump<'_> {
        fn configure(
            &mut self,
            _geometry: crate::traits::SyringeGeometry,
            _direction: crate::traits::PumpDirection,
            rate_ml_min: f32,
            volume_ml: f32,
        ) -> Result<(), ActuatorError> {
            self.record(Call::Configure(self.role, rate_ml_min, volume_ml));
            match self.configure_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn start(&mut self, _wait_for_completion: bool) -> Result<(), ActuatorError> {
            self.record(Call::Start(self.role));
            if let Some(e) = self.start_error {
                return Err(e);
            }
            self.running = !self.finishes_instantly;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), ActuatorError> {
            self.record(Call::Stop(self.role));
            if let Some(e) = self.stop_error {
                return Err(e);
            }
            if self.running {
                self.running = false;
                Ok(())
            } else {
                Err(ActuatorError::AlreadyIdle)
            }
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    /// Virtual clock; optionally trips the monitor once `trip_at_ms` passes
    struct FakeDelay<'a> {
        clock: &'a Cell<u64>,
        trip: Option<(u64, &'a CancellationMonitor)>,
    }

    impl FakeDelay<'_> {
        fn advance(&mut self, ms: u64) {
            self.clock.set(self.clock.get() + ms);
            if let Some((at, monitor)) = self.trip {
                if self.clock.get() >= at {
                    monitor.abort();
                }
            }
        }
    }

    impl DelayNs for FakeDelay<'_> {
        async fn delay_ns(&mut self, ns: u32) {
            self.advance(u64::from(ns) / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.advance(u64::from(ms));
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Vec<SequencerState, 32>,
        plans: Vec<PhasePlan, 32>,
    }

    impl RunObserver for Recorder {
        fn on_transition(&mut self, _step: usize, _from: SequencerState, to: SequencerState) {
            let _ = self.states.push(to);
        }

        fn on_phase(&mut self, _step: usize, plan: &PhasePlan, _start: &StartPlan) {
            let _ = self.plans.push(*plan);
        }
    }

    /// Short line so the start offset spans several poll slices
    fn short_line() -> LineGeometry {
        LineGeometry {
            tubing_length_cm: 1.0,
            tubing_diameter_cm: 0.1,
        }
    }

    /// Prime 600 ms, hold 2000 ms, flush 1200 ms at 1 mL/min
    fn config(targets: &[f32]) -> ProtocolConfig {
        let mut config = ProtocolConfig::new(0.2, targets).unwrap();
        config.prime.rate_ml_min = 1.0;
        config.prime.well_volume_ml = 0.01;
        config.hold.rate_ml_min = 1.0;
        config.hold.duration_s = 2.0;
        config.flush.rate_ml_min = 1.0;
        config.flush.volume = FlushVolume::Fixed(0.02);
        config.poll_interval_ms = POLL_MS;
        config
    }

    fn close(a: f32, b: f32) -> bool {
        abs(a - b) < 1e-5
    }

    fn calls(log: &Log) -> Vec<(u64, Call), 128> {
        log.borrow().clone()
    }

    #[test]
    fn test_phase_order_and_flush_uses_next_ratio() {
        let config = config(&[0.01, 0.05]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        let mut recorder = Recorder::default();

        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay { clock: &clock, trip: None },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut recorder));

        assert_eq!(outcome, Ok(RunOutcome::Completed { steps: 2 }));
        assert_eq!(seq.state(), SequencerState::Completed);
        assert_eq!(
            recorder.states.as_slice(),
            &[
                SequencerState::Priming,
                SequencerState::Holding,
                SequencerState::Flushing,
                SequencerState::Priming,
                SequencerState::Holding,
                SequencerState::Completed,
            ]
        );

        let kinds: Vec<PhaseKind, 8> = recorder.plans.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds.as_slice(),
            &[
                PhaseKind::Prime,
                PhaseKind::Hold,
                PhaseKind::Flush,
                PhaseKind::Prime,
                PhaseKind::Hold,
            ]
        );

        // 0.01 / 0.2 for step one, 0.05 / 0.2 from the flush on
        assert!(close(recorder.plans[0].ratio.stock_fraction, 0.05));
        assert!(close(recorder.plans[1].ratio.stock_fraction, 0.05));
        assert!(close(recorder.plans[2].ratio.stock_fraction, 0.25));
        assert!(close(recorder.plans[3].ratio.stock_fraction, 0.25));

        // Flush stock command: 0.25 × 1 mL/min, 0.25 × 0.02 mL
        let log = calls(&log);
        let flush_config = log.iter().find_map(|(at, call)| match call {
            Call::Configure(Role::Stock, rate, volume) if *at == 2600 => Some((*rate, *volume)),
            _ => None,
        });
        let (rate, volume) = flush_config.unwrap();
        assert!(close(rate, 0.25));
        assert!(close(volume, 0.005));

        // 600 + 2000 + 1200 + 600 + 2000
        assert_eq!(clock.get(), 6400);
    }

    #[test]
    fn test_pure_stock_never_touches_buffer_pump() {
        let config = config(&[0.2]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );

        assert_eq!(outcome, Ok(RunOutcome::Completed { steps: 1 }));
        let log = calls(&log);
        assert!(!log.iter().any(|(_, call)| matches!(
            call,
            Call::Configure(Role::Buffer, ..) | Call::Start(Role::Buffer)
        )));
        assert_eq!(
            log.iter()
                .filter(|(_, call)| matches!(call, Call::Start(Role::Stock)))
                .count(),
            2
        );
    }

    #[test]
    fn test_invalid_target_touches_nothing() {
        let config = config(&[0.01, 0.3]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay { clock: &clock, trip: None },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut ()));

        assert_eq!(
            outcome,
            Err(RunError::Config(ConfigError::InvalidConcentration { value: 0.3 }))
        );
        assert_eq!(seq.state(), SequencerState::Idle);
        assert!(log.borrow().is_empty());
        assert_eq!(clock.get(), 0);
    }

    #[test]
    fn test_stop_on_idle_pump_is_benign() {
        let config = config(&[0.05, 0.1]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        stock.finishes_instantly = true;
        buffer.finishes_instantly = true;

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );

        assert_eq!(outcome, Ok(RunOutcome::Completed { steps: 2 }));
    }

    #[test]
    fn test_cancel_during_hold_stops_both_within_one_poll() {
        let config = config(&[0.05, 0.1]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        let mut recorder = Recorder::default();

        // Hold runs from 600 to 2600 ms
        let trip_at = 1050;
        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay {
                clock: &clock,
                trip: Some((trip_at, &monitor)),
            },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut recorder));

        assert_eq!(
            outcome,
            Ok(RunOutcome::Aborted {
                step: 0,
                state: SequencerState::Holding,
            })
        );
        assert_eq!(seq.state(), SequencerState::Aborted);
        assert!(seq.run_state().cancel_observed);
        assert_eq!(recorder.states.last(), Some(&SequencerState::Aborted));
        assert!(!recorder.plans.iter().any(|p| p.kind == PhaseKind::Flush));

        let log = calls(&log);
        let after: Vec<(u64, Call), 8> = log
            .iter()
            .filter(|(at, _)| *at >= trip_at)
            .copied()
            .collect();
        assert_eq!(after.len(), 2);
        for (at, call) in after.iter() {
            assert!(matches!(call, Call::Stop(_)));
            assert!(*at < trip_at + u64::from(POLL_MS));
        }
        assert!(after.iter().any(|(_, c)| *c == Call::Stop(Role::Stock)));
        assert!(after.iter().any(|(_, c)| *c == Call::Stop(Role::Buffer)));
    }

    #[test]
    fn test_cancel_before_run_configures_nothing() {
        let config = config(&[0.05]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        monitor.abort();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );

        assert_eq!(
            outcome,
            Ok(RunOutcome::Aborted {
                step: 0,
                state: SequencerState::Idle,
            })
        );
        let log = calls(&log);
        assert!(log.iter().all(|(_, call)| matches!(call, Call::Stop(_))));
    }

    #[test]
    fn test_staggered_start_compensates_transit() {
        let mut config = config(&[0.05]);
        config.line = short_line();
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );
        assert_eq!(outcome, Ok(RunOutcome::Completed { steps: 1 }));

        // Stock carries 0.25 mL/min against 0.75 for buffer: longer transit
        let plan = PhaseVolumeModel::plan(PhaseKind::Prime, &config, ratio(0.05, 0.2).unwrap())
            .unwrap();
        let expected = synchronize(
            plan.stock.line_flow(),
            plan.buffer.line_flow(),
            config.transit_volume_ml(),
        );
        assert_eq!(expected.first(), Some(Role::Stock));
        let lag = u64::from(expected.delay_ms());
        assert!(lag > 1000);

        let log = calls(&log);
        let starts: Vec<(u64, Call), 8> = log
            .iter()
            .filter(|(_, call)| matches!(call, Call::Start(_)))
            .copied()
            .collect();
        assert_eq!(
            starts.as_slice(),
            &[
                (0, Call::Start(Role::Stock)),
                (lag, Call::Start(Role::Buffer)),
                (lag + 600, Call::Start(Role::Stock)),
                (2 * lag + 600, Call::Start(Role::Buffer)),
            ]
        );
    }

    #[test]
    fn test_hold_waits_configured_duration() {
        let config = config(&[0.05]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        )
        .unwrap();

        let log = calls(&log);
        let stock_starts: Vec<u64, 4> = log
            .iter()
            .filter(|(_, c)| *c == Call::Start(Role::Stock))
            .map(|(at, _)| *at)
            .collect();
        let stock_stops: Vec<u64, 4> = log
            .iter()
            .filter(|(_, c)| *c == Call::Stop(Role::Stock))
            .map(|(at, _)| *at)
            .collect();
        assert_eq!(stock_starts.as_slice(), &[0, 600]);
        assert_eq!(stock_stops.as_slice(), &[600, 2600]);
    }

    #[test]
    fn test_configure_failure_stops_both_and_reports_channel() {
        let config = config(&[0.05, 0.1]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        buffer.configure_error = Some(ActuatorError::Communication);
        let mut recorder = Recorder::default();

        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay { clock: &clock, trip: None },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut recorder));

        assert_eq!(
            outcome,
            Err(RunError::Actuator(ActuatorFault {
                step: 0,
                phase: PhaseKind::Prime,
                role: Role::Buffer,
                op: ActuatorOp::Configure,
                error: ActuatorError::Communication,
            }))
        );
        assert_eq!(seq.state(), SequencerState::Failed);
        assert_eq!(recorder.states.last(), Some(&SequencerState::Failed));

        let log = calls(&log);
        assert!(!log.iter().any(|(_, c)| matches!(c, Call::Start(_))));
        assert!(log.iter().any(|(_, c)| *c == Call::Stop(Role::Stock)));
        assert!(log.iter().any(|(_, c)| *c == Call::Stop(Role::Buffer)));
    }

    #[test]
    fn test_stop_failure_at_boundary_is_fatal() {
        let config = config(&[0.05]);
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        stock.stop_error = Some(ActuatorError::Timeout);

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );

        assert_eq!(
            outcome,
            Err(RunError::Actuator(ActuatorFault {
                step: 0,
                phase: PhaseKind::Prime,
                role: Role::Stock,
                op: ActuatorOp::Stop,
                error: ActuatorError::Timeout,
            }))
        );
        // Buffer was still stopped at the boundary
        let log = calls(&log);
        assert!(log.iter().any(|(at, c)| *at == 600 && *c == Call::Stop(Role::Buffer)));
    }

    #[test]
    fn test_parallel_units_get_divided_commands() {
        let mut config = config(&[0.05]);
        config.parallelism = Parallelism { stock: 1, buffer: 3 };
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        )
        .unwrap();

        let log = calls(&log);
        let (rate, volume) = log
            .iter()
            .find_map(|(_, c)| match c {
                Call::Configure(Role::Buffer, rate, volume) => Some((*rate, *volume)),
                _ => None,
            })
            .unwrap();
        // 0.75 mL/min and 0.0075 mL over three pumps
        assert!(close(rate, 0.25));
        assert!(close(volume, 0.0025));
    }

    #[test]
    fn test_larger_transit_channel_is_configured_first() {
        // 0.15 / 0.2 leaves buffer at 0.25 of the flow: buffer leads
        let mut config = config(&[0.15]);
        config.line = short_line();
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        let outcome = block_on(
            PhaseSequencer::new(
                &config,
                &mut stock,
                &mut buffer,
                FakeDelay { clock: &clock, trip: None },
                &monitor,
            )
            .run(&mut ()),
        );
        assert_eq!(outcome, Ok(RunOutcome::Completed { steps: 1 }));

        let log = calls(&log);
        assert!(matches!(log[0], (0, Call::Configure(Role::Buffer, ..))));
        assert!(matches!(log[1], (0, Call::Configure(Role::Stock, ..))));
        assert_eq!(log[2], (0, Call::Start(Role::Buffer)));
        assert!(matches!(log[3], (lag, Call::Start(Role::Stock)) if lag > 0));
    }

    #[test]
    fn test_follower_start_failure_stops_both() {
        let mut config = config(&[0.05]);
        config.line = short_line();
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);
        buffer.start_error = Some(ActuatorError::Communication);

        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay { clock: &clock, trip: None },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut ()));

        assert_eq!(
            outcome,
            Err(RunError::Actuator(ActuatorFault {
                step: 0,
                phase: PhaseKind::Prime,
                role: Role::Buffer,
                op: ActuatorOp::Start,
                error: ActuatorError::Communication,
            }))
        );
        assert_eq!(seq.state(), SequencerState::Failed);

        // Stock was already running when buffer refused to start
        let log = calls(&log);
        let failed_at = log
            .iter()
            .find_map(|(at, c)| (*c == Call::Start(Role::Buffer)).then_some(*at))
            .unwrap();
        assert!(failed_at > 0);
        assert!(log.contains(&(0, Call::Start(Role::Stock))));
        assert!(log.contains(&(failed_at, Call::Stop(Role::Stock))));
        assert!(log.contains(&(failed_at, Call::Stop(Role::Buffer))));
        assert!(!stock.is_running());
    }

    #[test]
    fn test_cancel_during_start_offset_never_starts_follower() {
        let mut config = config(&[0.05]);
        config.line = short_line();
        let log = Log::default();
        let clock = Cell::new(0);
        let monitor = CancellationMonitor::new();
        let mut stock = FakePump::new(Role::Stock, &log, &clock);
        let mut buffer = FakePump::new(Role::Buffer, &log, &clock);

        // Stock leads; buffer is due after more than a second
        let trip_at = 500;
        let mut seq = PhaseSequencer::new(
            &config,
            &mut stock,
            &mut buffer,
            FakeDelay {
                clock: &clock,
                trip: Some((trip_at, &monitor)),
            },
            &monitor,
        );
        let outcome = block_on(seq.run(&mut ()));

        assert_eq!(
            outcome,
            Ok(RunOutcome::Aborted {
                step: 0,
                state: SequencerState::Priming,
            })
        );

        let log = calls(&log);
        assert!(log.contains(&(0, Call::Start(Role::Stock))));
        assert!(!log.iter().any(|(_, c)| *c == Call::Start(Role::Buffer)));
        for role in [Role::Stock, Role::Buffer] {
            let stopped_at = log
                .iter()
                .find_map(|(at, c)| (*c == Call::Stop(role)).then_some(*at))
                .unwrap();
            assert!(stopped_at >= trip_at && stopped_at < trip_at + u64::from(POLL_MS));
        }
    }
}
