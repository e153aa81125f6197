//! Flow sensor edge accumulator.
//!
//! Four hall sensors watch the pump rotor. Every level change on any line is
//! one tick, regardless of direction, so the counter measures total edge
//! activity rather than net rotation.

/// Number of flow sensor lines wired to the node.
pub const SENSOR_LINE_COUNT: usize = 4;

/// Identifier for one of the flow sensor lines.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorLine {
    Hall0,
    Hall1,
    Hall2,
    Hall3,
}

impl SensorLine {
    /// Every sensor line in index order.
    pub const ALL: [SensorLine; SENSOR_LINE_COUNT] = [
        SensorLine::Hall0,
        SensorLine::Hall1,
        SensorLine::Hall2,
        SensorLine::Hall3,
    ];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            SensorLine::Hall0 => 0,
            SensorLine::Hall1 => 1,
            SensorLine::Hall2 => 2,
            SensorLine::Hall3 => 3,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SensorLine::Hall0),
            1 => Some(SensorLine::Hall1),
            2 => Some(SensorLine::Hall2),
            3 => Some(SensorLine::Hall3),
            _ => None,
        }
    }
}

/// Tick accumulator shared between the edge handler and the main loop.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlowCounter {
    ticks: u32,
    edge_state: [bool; SENSOR_LINE_COUNT],
}

impl FlowCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            edge_state: [false; SENSOR_LINE_COUNT],
        }
    }

    /// Records the level observed on `line`; returns `true` when it counted a tick.
    pub fn on_edge(&mut self, line: SensorLine, level: bool) -> bool {
        let stored = &mut self.edge_state[line.as_index()];
        if *stored == level {
            return false;
        }

        *stored = level;
        self.ticks = self.ticks.wrapping_add(1);
        true
    }

    /// Ticks accumulated since the last clear.
    #[must_use]
    pub const fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Last level recorded for `line`.
    #[must_use]
    pub const fn level(&self, line: SensorLine) -> bool {
        self.edge_state[line.as_index()]
    }

    /// Returns the accumulated ticks and zeroes the counter.
    pub fn snapshot_and_clear(&mut self) -> u32 {
        core::mem::take(&mut self.ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_change_counts_once() {
        let mut counter = FlowCounter::new();

        assert!(counter.on_edge(SensorLine::Hall0, true));
        assert!(counter.on_edge(SensorLine::Hall2, true));
        assert!(counter.on_edge(SensorLine::Hall0, false));
        assert!(counter.on_edge(SensorLine::Hall3, true));

        assert_eq!(counter.ticks(), 4);
    }

    #[test]
    fn repeated_level_is_not_a_tick() {
        let mut counter = FlowCounter::new();

        assert!(!counter.on_edge(SensorLine::Hall1, false));
        assert!(counter.on_edge(SensorLine::Hall1, true));
        assert!(!counter.on_edge(SensorLine::Hall1, true));

        assert_eq!(counter.ticks(), 1);
        assert!(counter.level(SensorLine::Hall1));
    }

    #[test]
    fn tick_count_is_independent_of_line_order() {
        let mut forward = FlowCounter::new();
        let mut shuffled = FlowCounter::new();

        for round in 0..25u32 {
            let level = round % 2 == 0;
            for line in SensorLine::ALL {
                forward.on_edge(line, level);
            }
            for index in [3, 1, 0, 2] {
                let line = SensorLine::from_index(index).expect("valid line index");
                shuffled.on_edge(line, level);
            }
        }

        assert_eq!(forward.ticks(), 100);
        assert_eq!(shuffled.ticks(), 100);
    }

    #[test]
    fn snapshot_clears_ticks_but_keeps_levels() {
        let mut counter = FlowCounter::new();
        counter.on_edge(SensorLine::Hall2, true);
        counter.on_edge(SensorLine::Hall3, true);

        assert_eq!(counter.snapshot_and_clear(), 2);
        assert_eq!(counter.ticks(), 0);
        assert!(!counter.on_edge(SensorLine::Hall2, true));
    }
}
