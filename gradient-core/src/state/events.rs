//! Events that trigger state transitions

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Run triggered with a valid protocol
    Start,

    // Phase completion events
    /// Prime phase delivered its volume
    PrimeFinished,
    /// Hold phase elapsed and another target follows
    HoldFinished,
    /// Flush phase delivered its volume
    FlushFinished,
    /// Hold of the last target elapsed
    ProgramFinished,

    // Termination events
    /// Cancellation observed
    Abort,
    /// Pump failure
    Fault,
}
