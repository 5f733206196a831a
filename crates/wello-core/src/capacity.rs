//! Tank capacity model.
//!
//! Only one fact about the tank geometry matters to the controller: how
//! much room is left. Volume formulas for specific tank shapes live with
//! whatever computes the `volume` reading.

/// Usable tank volume and the head room kept below it (both mm3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankCapacity {
    capacity: f64,
    margin: f64,
}

impl TankCapacity {
    /// Create a capacity model. Values are expected to be validated by
    /// the configuration loader.
    pub const fn new(capacity: f64, margin: f64) -> Self {
        Self { capacity, margin }
    }

    /// Usable volume.
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Head room kept below capacity.
    pub const fn margin(&self) -> f64 {
        self.margin
    }

    /// Volume that can still be added before the tank is full, never
    /// negative.
    pub fn remaining(&self, volume: f64) -> f64 {
        (self.capacity - volume).max(0.0)
    }

    /// Whether starting the pump at `volume` risks an overflow.
    pub fn may_overflow(&self, volume: f64) -> bool {
        volume + self.margin >= self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn overflow_risk_starts_at_the_margin() {
        let tank = TankCapacity::new(100.0, 10.0);
        assert!(!tank.may_overflow(89.9));
        assert!(tank.may_overflow(90.0));
        assert!(tank.may_overflow(120.0));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let tank = TankCapacity::new(100.0, 10.0);
        assert_eq!(tank.remaining(40.0), 60.0);
        assert_eq!(tank.remaining(150.0), 0.0);
    }
}
