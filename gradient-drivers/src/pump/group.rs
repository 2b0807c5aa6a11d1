//! Pump group
//!
//! Several physical pumps sharing one role. Every command is sent to each
//! unit unchanged, so the group delivers `units × rate` through the line.

use gradient_core::traits::{stop_quietly, ActuatorError, FlowActuator, PumpDirection, SyringeGeometry};
use heapless::Vec;

/// Fixed-capacity group of pumps driven as one
pub struct PumpGroup<A, const N: usize> {
    units: Vec<A, N>,
}

impl<A: FlowActuator, const N: usize> PumpGroup<A, N> {
    /// Create an empty group
    pub fn new() -> Self {
        Self { units: Vec::new() }
    }

    /// Add a pump to the group
    ///
    /// Hands the pump back if the group is full.
    pub fn add(&mut self, unit: A) -> Result<(), A> {
        self.units.push(unit)
    }

    /// Number of pumps in the group
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the group has no pumps
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Get a pump by index
    pub fn unit(&self, index: usize) -> Option<&A> {
        self.units.get(index)
    }

    /// Get a pump by index (mutable)
    pub fn unit_mut(&mut self, index: usize) -> Option<&mut A> {
        self.units.get_mut(index)
    }

    /// Iterate over the pumps
    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.units.iter()
    }

    /// Iterate over the pumps (mutable)
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut A> {
        self.units.iter_mut()
    }

    /// Stop every unit, returning the first real failure
    fn stop_all(&mut self) -> Result<(), ActuatorError> {
        let mut result = Ok(());
        for unit in self.units.iter_mut() {
            if let Err(e) = stop_quietly(unit) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl<A: FlowActuator, const N: usize> Default for PumpGroup<A, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: FlowActuator, const N: usize> FlowActuator for PumpGroup<A, N> {
    fn configure(
        &mut self,
        geometry: SyringeGeometry,
        direction: PumpDirection,
        rate_ml_min: f32,
        volume_ml: f32,
    ) -> Result<(), ActuatorError> {
        if self.units.is_empty() {
            return Err(ActuatorError::NotConfigured);
        }
        for unit in self.units.iter_mut() {
            unit.configure(geometry, direction, rate_ml_min, volume_ml)?;
        }
        Ok(())
    }

    /// Start every unit
    ///
    /// If one unit fails, the units already started are stopped again.
    /// With `wait_for_completion` the units deliver one after another.
    fn start(&mut self, wait_for_completion: bool) -> Result<(), ActuatorError> {
        if self.units.is_empty() {
            return Err(ActuatorError::NotConfigured);
        }

        for index in 0..self.units.len() {
            if let Err(e) = self.units[index].start(wait_for_completion) {
                for started in self.units[..index].iter_mut() {
                    let _ = stop_quietly(started);
                }
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stop every unit
    ///
    /// Reports [`ActuatorError::AlreadyIdle`] only if no unit was running.
    fn stop(&mut self) -> Result<(), ActuatorError> {
        let any_running = self.is_running();
        self.stop_all()?;
        if any_running {
            Ok(())
        } else {
            Err(ActuatorError::AlreadyIdle)
        }
    }

    fn is_running(&self) -> bool {
        self.units.iter().any(|unit| unit.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::{SyringePump, SyringePumpConfig};

    fn group(n: usize) -> PumpGroup<SyringePump, 4> {
        let mut group = PumpGroup::new();
        for _ in 0..n {
            assert!(group.add(SyringePump::new(SyringePumpConfig::default())).is_ok());
        }
        group
    }

    fn configure(group: &mut PumpGroup<SyringePump, 4>) -> Result<(), ActuatorError> {
        group.configure(SyringeGeometry::default(), PumpDirection::Infuse, 1.0, 0.5)
    }

    #[test]
    fn test_capacity() {
        let mut group = group(4);
        assert_eq!(group.len(), 4);
        assert!(group.add(SyringePump::new(SyringePumpConfig::default())).is_err());
    }

    #[test]
    fn test_empty_group_refuses_commands() {
        let mut group = group(0);
        assert!(group.is_empty());
        assert_eq!(configure(&mut group), Err(ActuatorError::NotConfigured));
        assert_eq!(group.start(false), Err(ActuatorError::NotConfigured));
    }

    #[test]
    fn test_commands_reach_every_unit() {
        let mut group = group(3);
        configure(&mut group).unwrap();
        group.start(false).unwrap();

        assert!(group.is_running());
        for unit in group.iter() {
            assert!(unit.is_running());
            assert_eq!(unit.rate_ml_min(), Some(1.0));
        }

        assert_eq!(group.stop(), Ok(()));
        assert!(!group.is_running());
        assert_eq!(group.stop(), Err(ActuatorError::AlreadyIdle));
    }

    #[test]
    fn test_partly_idle_group_stops_cleanly() {
        let mut group = group(2);
        configure(&mut group).unwrap();
        group.start(false).unwrap();

        // One unit finishes early
        if let Some(unit) = group.unit_mut(0) {
            unit.update_with_delta(60_000);
        }
        assert!(!group.unit(0).map_or(true, |u| u.is_running()));

        assert_eq!(group.stop(), Ok(()));
    }

    #[test]
    fn test_failed_start_rolls_back() {
        let mut group = group(2);
        configure(&mut group).unwrap();

        // Second unit never configured
        let _ = group.units.pop();
        assert!(group.add(SyringePump::new(SyringePumpConfig::default())).is_ok());

        assert_eq!(group.start(false), Err(ActuatorError::NotConfigured));
        assert!(!group.is_running());
    }

    #[test]
    fn test_start_waiting_for_completion() {
        let mut group = group(2);
        configure(&mut group).unwrap();
        group.start(true).unwrap();

        assert!(!group.is_running());
        for unit in group.iter() {
            assert_eq!(unit.dispensed_ml(), 0.5);
        }
    }
}
