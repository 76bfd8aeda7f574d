use crate::protocol::command::Rgb;

pub const RED: Rgb = Rgb::new(255, 0, 0);
pub const GREEN: Rgb = Rgb::new(0, 255, 0);
pub const WHITE: Rgb = Rgb::new(255, 255, 255);
pub const GOLD: Rgb = Rgb::new(255, 215, 0);
pub const BLUE: Rgb = Rgb::new(0, 100, 255);
pub const DARK: Rgb = Rgb::new(0, 0, 0);

pub const QUIET_CYCLE: [Rgb; 3] = [RED, GREEN, WHITE];
pub const MEDIUM_CYCLE: [Rgb; 4] = [RED, GREEN, GOLD, WHITE];
pub const LOUD_CYCLE: [Rgb; 5] = [RED, GREEN, BLUE, GOLD, WHITE];

/// Very loud theater chase, keyed by counter parity
pub const CHASE_PAIR: [Rgb; 2] = [RED, GREEN];
/// Extreme full-tree pulse, keyed by counter mod 4
pub const PULSE_CYCLE: [Rgb; 4] = [RED, GREEN, GOLD, WHITE];

/// VU meter section colors, bottom to top
pub const BASS_COLOR: Rgb = GREEN;
pub const MID_COLOR: Rgb = GOLD;
pub const TREBLE_COLOR: Rgb = RED;

/// `pixel_count` pixels where pixel i takes `cycle[i % cycle.len()]`
pub fn cycled(cycle: &[Rgb], pixel_count: usize) -> Vec<Rgb> {
    (0..pixel_count).map(|i| cycle[i % cycle.len()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_by_index() {
        let pattern = cycled(&QUIET_CYCLE, 7);
        assert_eq!(pattern, vec![RED, GREEN, WHITE, RED, GREEN, WHITE, RED]);
    }
}
