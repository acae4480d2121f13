//! Multiplier Clock
//!
//! Compound growth of the live multiplier, one step per tick. The value is
//! tracked in millionths so small growth rates don't vanish to rounding,
//! and reported in hundredths (floored, so the reported value never runs
//! ahead of the true curve).
//!
//! ```text
//! m(0)   = 1.000000
//! m(n+1) = m(n) * (1 + growth_ppm / 1e6)
//! crash when m(n) >= crash_point
//! ```

use crate::core::money::Multiplier;

/// Millionths per 1.00x.
pub const MICROS_PER_ONE: u64 = 1_000_000;

/// Millionths per hundredth.
const MICROS_PER_HUNDREDTH: u64 = MICROS_PER_ONE / 100;

/// Outcome of one clock step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Still below the crash point.
    Climbing(Multiplier),
    /// Reached the crash point; the value is the crash point itself.
    Crashed(Multiplier),
}

impl TickResult {
    pub fn multiplier(self) -> Multiplier {
        match self {
            TickResult::Climbing(m) | TickResult::Crashed(m) => m,
        }
    }

    pub fn is_crashed(self) -> bool {
        matches!(self, TickResult::Crashed(_))
    }
}

/// Deterministic multiplier progression for one round.
#[derive(Debug, Clone)]
pub struct MultiplierClock {
    micros: u64,
    growth_ppm: u64,
    crash_point: Multiplier,
    ticks: u32,
    crashed: bool,
}

impl MultiplierClock {
    pub fn new(crash_point: Multiplier, growth_ppm: u64) -> Self {
        Self {
            micros: MICROS_PER_ONE,
            growth_ppm,
            crash_point,
            ticks: 0,
            crashed: false,
        }
    }

    /// Advance one step.
    ///
    /// A crash point at or below the current value crashes without growing,
    /// so a 1.00x round crashes on its first tick.
    pub fn tick(&mut self) -> TickResult {
        if self.crashed {
            return TickResult::Crashed(self.crash_point);
        }
        if !self.reached() {
            let grown = self.micros as u128 * (MICROS_PER_ONE + self.growth_ppm) as u128 / MICROS_PER_ONE as u128;
            // always make progress, even with a tiny growth rate
            self.micros = (grown as u64).max(self.micros + 1);
            self.ticks += 1;
        }
        if self.reached() {
            self.crashed = true;
            TickResult::Crashed(self.crash_point)
        } else {
            TickResult::Climbing(self.current())
        }
    }

    /// Reported multiplier, floored to the hundredth.
    pub fn current(&self) -> Multiplier {
        if self.crashed {
            return self.crash_point;
        }
        Multiplier::from_hundredths(self.micros / MICROS_PER_HUNDREDTH)
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    fn reached(&self) -> bool {
        self.micros >= self.crash_point.hundredths().saturating_mul(MICROS_PER_HUNDREDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_crash(crash: Multiplier, growth_ppm: u64) -> (Vec<Multiplier>, u32) {
        let mut clock = MultiplierClock::new(crash, growth_ppm);
        let mut seen = Vec::new();
        loop {
            match clock.tick() {
                TickResult::Climbing(m) => seen.push(m),
                TickResult::Crashed(m) => {
                    assert_eq!(m, crash);
                    return (seen, clock.ticks());
                }
            }
        }
    }

    #[test]
    fn test_crash_at_one_is_immediate() {
        let (seen, ticks) = run_to_crash(Multiplier::ONE, 3_500);
        assert!(seen.is_empty());
        assert_eq!(ticks, 0);
    }

    #[test]
    fn test_monotonic_and_below_crash() {
        let crash = Multiplier::from_hundredths(250);
        let (seen, _) = run_to_crash(crash, 3_500);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|m| *m < crash));
    }

    #[test]
    fn test_growth_rate() {
        // ln(2) / ln(1.0035) ~= 198.4 ticks to double
        let (_, ticks) = run_to_crash(Multiplier::from_whole(2), 3_500);
        assert!((198..=200).contains(&ticks), "ticks = {}", ticks);
    }

    #[test]
    fn test_stays_crashed() {
        let mut clock = MultiplierClock::new(Multiplier::from_hundredths(101), 3_500);
        while !clock.tick().is_crashed() {}
        assert_eq!(clock.tick(), TickResult::Crashed(Multiplier::from_hundredths(101)));
        assert_eq!(clock.current(), Multiplier::from_hundredths(101));
    }
}
