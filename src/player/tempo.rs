//! Conversion of delta ticks to play units

/// Play units in 240 seconds
pub const PLAY_MODE_TICKS: f64 = 255.0 * 64.0;

/// Play units per second of music
pub const PLAY_UNITS_PER_SECOND: f64 = PLAY_MODE_TICKS / 240.0;

/// Tempo assumed until the first tempo event
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoState {
    division: u16,
    inv_delta_ticks: f64,
    micros_per_quarter: u32,
    factor: f64,
}

impl TempoState {
    pub fn new(division: u16) -> Self {
        let inv_delta_ticks = PLAY_MODE_TICKS / (240_000_000.0 * division.max(1) as f64);
        let mut tempo = Self {
            division,
            inv_delta_ticks,
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
            factor: 0.0,
        };
        tempo.set_tempo(DEFAULT_MICROS_PER_QUARTER);
        tempo
    }

    pub fn set_tempo(&mut self, micros_per_quarter: u32) {
        self.micros_per_quarter = micros_per_quarter;
        self.factor = micros_per_quarter as f64 * self.inv_delta_ticks;
    }

    pub fn division(&self) -> u16 {
        self.division
    }

    pub fn micros_per_quarter(&self) -> u32 {
        self.micros_per_quarter
    }

    /// Play units per delta tick
    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn ticks_to_units(&self, ticks: f64) -> f64 {
        ticks * self.factor
    }
}

/// Convert play units to seconds
pub fn units_to_seconds(units: f64) -> f64 {
    units / PLAY_UNITS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_tempo() {
        let tempo = TempoState::new(96);
        assert_eq!(tempo.micros_per_quarter(), 1_000_000);
        // One quarter note lasts one second at the default tempo
        assert!(close(tempo.ticks_to_units(96.0), PLAY_UNITS_PER_SECOND));
        assert_eq!(PLAY_UNITS_PER_SECOND, 68.0);
    }

    #[test]
    fn test_tempo_change() {
        let mut tempo = TempoState::new(480);
        tempo.set_tempo(500_000);
        assert!(close(units_to_seconds(tempo.ticks_to_units(480.0)), 0.5));
        assert!(close(tempo.factor(), 500_000.0 * 16320.0 / (240e6 * 480.0)));
    }
}
