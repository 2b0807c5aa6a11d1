//! Phase volume model
//!
//! Derives the nominal rate/volume of each phase from the protocol and
//! splits it between the two channels.

use super::minutes_to_ms;
use super::ratio::MixRatio;
use crate::config::{ConfigError, FlushVolume, Parallelism, ProtocolConfig};
use crate::traits::Role;

/// Phase of a protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseKind {
    /// Fill the line at the target ratio
    Prime,
    /// Steady delivery for a fixed duration
    Hold,
    /// Clear the line ahead of the next target
    Flush,
}

impl PhaseKind {
    /// Hold is timed by the clock, the other phases by volume/rate
    pub fn is_duration_defined(self) -> bool {
        self == PhaseKind::Hold
    }
}

/// A rate/volume pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelFlow {
    /// Rate (mL/min)
    pub rate_ml_min: f32,
    /// Volume (mL)
    pub volume_ml: f32,
}

impl ChannelFlow {
    /// Create a flow
    pub const fn new(rate_ml_min: f32, volume_ml: f32) -> Self {
        Self {
            rate_ml_min,
            volume_ml,
        }
    }

    /// Zero flow
    pub const fn idle() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Both rate and volume are positive
    pub fn is_active(&self) -> bool {
        self.rate_ml_min > 0.0 && self.volume_ml > 0.0
    }

    /// Delivery time in minutes (0 for an idle flow)
    pub fn duration_min(&self) -> f32 {
        if self.is_active() {
            self.volume_ml / self.rate_ml_min
        } else {
            0.0
        }
    }

    fn scaled(&self, factor: f32) -> Self {
        Self::new(self.rate_ml_min * factor, self.volume_ml * factor)
    }
}

/// What one role does during a phase
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelPlan {
    /// Command sent to each physical pump of the role
    pub per_unit: ChannelFlow,
    /// Physical pumps sharing the role
    pub units: u8,
}

impl ChannelPlan {
    /// Aggregate flow of the role through the shared line
    pub fn line_flow(&self) -> ChannelFlow {
        self.per_unit.scaled(self.units as f32)
    }

    /// Whether the role runs at all in this phase
    pub fn is_active(&self) -> bool {
        self.per_unit.is_active()
    }
}

/// Derived plan for one (step, phase)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhasePlan {
    /// Phase kind
    pub kind: PhaseKind,
    /// Ratio the phase is mixed at
    pub ratio: MixRatio,
    /// Stock role
    pub stock: ChannelPlan,
    /// Buffer role
    pub buffer: ChannelPlan,
    /// How long the phase lasts once both channels run (minutes)
    pub nominal_duration_min: f32,
}

impl PhasePlan {
    /// Plan for one role
    pub fn channel(&self, role: Role) -> &ChannelPlan {
        match role {
            Role::Stock => &self.stock,
            Role::Buffer => &self.buffer,
        }
    }

    /// Nominal duration in milliseconds
    pub fn nominal_duration_ms(&self) -> u32 {
        minutes_to_ms(self.nominal_duration_min)
    }
}

/// Phase volume model
pub struct PhaseVolumeModel;

impl PhaseVolumeModel {
    /// Prime: configured rate, line fill volume
    pub fn prime(config: &ProtocolConfig) -> Result<ChannelFlow, ConfigError> {
        let flow = ChannelFlow::new(config.prime.rate_ml_min, config.prime.volume_ml());
        checked(PhaseKind::Prime, flow)
    }

    /// Hold: configured rate, rate × duration
    pub fn hold(config: &ProtocolConfig) -> Result<ChannelFlow, ConfigError> {
        let rate = config.hold.rate_ml_min;
        let duration_min = config.hold.duration_min();
        if !(duration_min > 0.0) || !duration_min.is_finite() {
            return Err(ConfigError::InvalidPhaseParameters(PhaseKind::Hold));
        }
        checked(PhaseKind::Hold, ChannelFlow::new(rate, rate * duration_min))
    }

    /// Flush: configured rate, volume from the flush policy
    pub fn flush(config: &ProtocolConfig) -> Result<ChannelFlow, ConfigError> {
        let volume = match config.flush.volume {
            FlushVolume::Fixed(volume) => volume,
            FlushVolume::PrimeMultiple(n) => n * config.prime.volume_ml(),
            FlushVolume::LineMultiple(n) => n * config.transit_volume_ml(),
        };
        checked(
            PhaseKind::Flush,
            ChannelFlow::new(config.flush.rate_ml_min, volume),
        )
    }

    /// Nominal flow for a phase kind
    pub fn nominal(kind: PhaseKind, config: &ProtocolConfig) -> Result<ChannelFlow, ConfigError> {
        match kind {
            PhaseKind::Prime => Self::prime(config),
            PhaseKind::Hold => Self::hold(config),
            PhaseKind::Flush => Self::flush(config),
        }
    }

    /// Split a nominal flow between the two roles
    ///
    /// Each role gets its fraction, divided among its physical pumps so the
    /// aggregate matches the nominal. A zero fraction yields an idle role.
    pub fn split(
        kind: PhaseKind,
        nominal: ChannelFlow,
        ratio: MixRatio,
        parallelism: Parallelism,
    ) -> PhasePlan {
        let stock = channel(nominal, ratio.stock_fraction, parallelism.stock);
        let buffer = channel(nominal, ratio.buffer_fraction, parallelism.buffer);

        // Fraction and unit count cancel out, so both active channels
        // share the nominal duration; take the slower anyway.
        let slowest = max(stock.per_unit.duration_min(), buffer.per_unit.duration_min());

        PhasePlan {
            kind,
            ratio,
            stock,
            buffer,
            nominal_duration_min: slowest,
        }
    }

    /// Full plan for a phase of the protocol
    ///
    /// Hold plans use the configured hold duration as nominal duration.
    pub fn plan(
        kind: PhaseKind,
        config: &ProtocolConfig,
        ratio: MixRatio,
    ) -> Result<PhasePlan, ConfigError> {
        let nominal = Self::nominal(kind, config)?;
        let mut plan = Self::split(kind, nominal, ratio, config.parallelism);
        if kind.is_duration_defined() {
            plan.nominal_duration_min = config.hold.duration_min();
        }
        Ok(plan)
    }
}

fn checked(kind: PhaseKind, flow: ChannelFlow) -> Result<ChannelFlow, ConfigError> {
    let ok = flow.rate_ml_min > 0.0
        && flow.volume_ml > 0.0
        && flow.rate_ml_min.is_finite()
        && flow.volume_ml.is_finite();
    if ok {
        Ok(flow)
    } else {
        Err(ConfigError::InvalidPhaseParameters(kind))
    }
}

fn channel(nominal: ChannelFlow, fraction: f32, units: u8) -> ChannelPlan {
    let units = units.max(1);
    let per_unit = if fraction > 0.0 {
        nominal.scaled(fraction / units as f32)
    } else {
        ChannelFlow::idle()
    };
    ChannelPlan { per_unit, units }
}

fn max(a: f32, b: f32) -> f32 {
    if a > b {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixing::{abs, ratio};

    fn close(a: f32, b: f32) -> bool {
        abs(a - b) < 1e-5
    }

    fn config() -> ProtocolConfig {
        let mut config = ProtocolConfig::new(0.2, &[0.05]).unwrap();
        config.prime.rate_ml_min = 0.05;
        config.prime.well_volume_ml = 0.2;
        config.hold.rate_ml_min = 0.1;
        config.hold.duration_s = 600.0;
        config.flush.rate_ml_min = 0.5;
        config.flush.volume = FlushVolume::PrimeMultiple(3.0);
        config
    }

    #[test]
    fn test_prime() {
        let flow = PhaseVolumeModel::prime(&config()).unwrap();
        assert!(close(flow.rate_ml_min, 0.05));
        assert!(close(flow.volume_ml, 0.2));
    }

    #[test]
    fn test_hold_volume_is_rate_times_duration() {
        // 0.1 mL/min for 10 minutes
        let flow = PhaseVolumeModel::hold(&config()).unwrap();
        assert!(close(flow.volume_ml, 1.0));
    }

    #[test]
    fn test_flush_policies() {
        let mut config = config();
        assert!(close(PhaseVolumeModel::flush(&config).unwrap().volume_ml, 0.6));

        config.flush.volume = FlushVolume::Fixed(2.5);
        assert!(close(PhaseVolumeModel::flush(&config).unwrap().volume_ml, 2.5));

        config.line.tubing_length_cm = 100.0;
        config.line.tubing_diameter_cm = 0.1;
        config.flush.volume = FlushVolume::LineMultiple(2.0);
        let volume = PhaseVolumeModel::flush(&config).unwrap().volume_ml;
        assert!(abs(volume - 1.5708) < 1e-3);
    }

    #[test]
    fn test_invalid_parameters() {
        let mut config = config();
        config.prime.rate_ml_min = 0.0;
        assert_eq!(
            PhaseVolumeModel::prime(&config),
            Err(ConfigError::InvalidPhaseParameters(PhaseKind::Prime))
        );

        let mut config = self::config();
        config.hold.duration_s = -1.0;
        assert_eq!(
            PhaseVolumeModel::hold(&config),
            Err(ConfigError::InvalidPhaseParameters(PhaseKind::Hold))
        );

        let mut config = self::config();
        config.flush.volume = FlushVolume::Fixed(0.0);
        assert_eq!(
            PhaseVolumeModel::flush(&config),
            Err(ConfigError::InvalidPhaseParameters(PhaseKind::Flush))
        );
    }

    #[test]
    fn test_split_by_fraction() {
        let r = ratio(0.05, 0.2).unwrap();
        let plan = PhaseVolumeModel::split(
            PhaseKind::Prime,
            ChannelFlow::new(0.4, 0.2),
            r,
            Parallelism::default(),
        );

        assert!(close(plan.stock.per_unit.rate_ml_min, 0.1));
        assert!(close(plan.stock.per_unit.volume_ml, 0.05));
        assert!(close(plan.buffer.per_unit.rate_ml_min, 0.3));
        assert!(close(plan.buffer.per_unit.volume_ml, 0.15));
        // 0.2 mL at 0.4 mL/min
        assert!(close(plan.nominal_duration_min, 0.5));
    }

    #[test]
    fn test_split_by_parallelism_keeps_aggregate() {
        let r = ratio(0.05, 0.2).unwrap();
        let plan = PhaseVolumeModel::split(
            PhaseKind::Flush,
            ChannelFlow::new(0.4, 0.2),
            r,
            Parallelism { stock: 1, buffer: 3 },
        );

        assert_eq!(plan.buffer.units, 3);
        assert!(close(plan.buffer.per_unit.rate_ml_min, 0.1));
        assert!(close(plan.buffer.per_unit.volume_ml, 0.05));
        assert!(close(plan.buffer.line_flow().rate_ml_min, 0.3));
        assert!(close(plan.buffer.line_flow().volume_ml, 0.15));
        assert!(close(plan.nominal_duration_min, 0.5));
    }

    #[test]
    fn test_pure_stock_idles_buffer() {
        let r = ratio(0.2, 0.2).unwrap();
        let plan = PhaseVolumeModel::plan(PhaseKind::Prime, &config(), r).unwrap();
        assert!(plan.stock.is_active());
        assert!(!plan.buffer.is_active());
        assert_eq!(plan.buffer.per_unit, ChannelFlow::idle());
    }

    #[test]
    fn test_hold_plan_uses_configured_duration() {
        let r = ratio(0.05, 0.2).unwrap();
        let plan = PhaseVolumeModel::plan(PhaseKind::Hold, &config(), r).unwrap();
        assert!(close(plan.nominal_duration_min, 10.0));
        assert_eq!(plan.nominal_duration_ms(), 600_000);
    }
}
