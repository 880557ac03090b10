//! Command-level model of the six-axis controller firmware.
//!
//! Each axis starts unreferenced (position `-1`). Homing answers `BUSY` a
//! configurable number of times before `OK`; a move advances the stage by a
//! fixed step every time its position is queried, clamped to the travel
//! range, so a far-away target ends stalled against the limit.

use crate::protocol::Command;
use beamrig_common::consts::{AXIS_COUNT, FIRMWARE_ID, NOT_REFERENCED};
use tracing::{debug, trace};

/// Reply sent for the laser information query.
pub const LASER_INFO: &str = "Laser module\nS/N: SIM-0001\nModel: L532-50-SIM\nHours: 0\nOK";

/// Reply sent for the cooler readings query.
pub const COOLER_READINGS: &str = "#Readings: 21.4 21.2 21.1 123mA 10% 20% APC 50% 3.30V";

/// Simulated stage behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// `BUSY` replies to a home command before `OK`
    pub home_busy_polls: u32,
    /// Steps travelled per position query while moving
    pub step_per_query: i64,
    /// Far hardware limit in steps (near limit is 0)
    pub travel_limit: i64,
    /// Prefix every reply with a stray `0xFF`
    pub noise: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            home_busy_polls: 2,
            step_per_query: 500,
            travel_limit: 200_000,
            noise: false,
        }
    }
}

/// Homing state of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingState {
    /// Never homed since power-on
    Unreferenced,
    /// Homing cycle running; `BUSY` replies left
    Homing { remaining: u32 },
    Referenced,
}

/// One simulated axis.
#[derive(Debug, Clone)]
pub struct StageAxis {
    state: HomingState,
    position: i64,
    target: Option<i64>,
}

impl Default for StageAxis {
    fn default() -> Self {
        Self {
            state: HomingState::Unreferenced,
            position: 0,
            target: None,
        }
    }
}

impl StageAxis {
    pub fn state(&self) -> HomingState {
        self.state
    }

    /// Position as the firmware reports it.
    pub fn reported_position(&self) -> i64 {
        match self.state {
            HomingState::Referenced => self.position,
            _ => NOT_REFERENCED,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.target.is_some()
    }

    fn home(&mut self, config: &StageConfig) -> &'static str {
        let remaining = match self.state {
            HomingState::Homing { remaining } => remaining,
            _ => {
                self.target = None;
                config.home_busy_polls
            }
        };
        if remaining == 0 {
            self.state = HomingState::Referenced;
            self.position = 0;
            "OK"
        } else {
            self.state = HomingState::Homing {
                remaining: remaining - 1,
            };
            "BUSY"
        }
    }

    fn query_position(&mut self, config: &StageConfig) -> String {
        match self.state {
            HomingState::Homing { .. } => return "BUSY".to_string(),
            HomingState::Unreferenced => return NOT_REFERENCED.to_string(),
            HomingState::Referenced => {}
        }
        if let Some(target) = self.target {
            let step = config.step_per_query.max(1);
            self.position = if target > self.position {
                (self.position + step).min(target)
            } else {
                (self.position - step).max(target)
            };
            if self.position == target {
                self.target = None;
            }
        }
        self.position.to_string()
    }

    fn move_to(&mut self, target: i64, config: &StageConfig) -> &'static str {
        match self.state {
            HomingState::Homing { .. } => "BUSY",
            HomingState::Unreferenced => "Error_3",
            HomingState::Referenced => {
                let clamped = target.clamp(0, config.travel_limit);
                self.target = (clamped != self.position).then_some(clamped);
                "OK"
            }
        }
    }
}

/// Whole-controller state shared by all client connections.
#[derive(Debug, Clone)]
pub struct SimulatedController {
    config: StageConfig,
    axes: Vec<StageAxis>,
    laser_on: bool,
}

impl SimulatedController {
    pub fn new(config: StageConfig) -> Self {
        Self {
            config,
            axes: vec![StageAxis::default(); usize::from(AXIS_COUNT)],
            laser_on: false,
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn axis(&self, axis: u8) -> Option<&StageAxis> {
        self.axes.get(usize::from(axis))
    }

    pub fn laser_on(&self) -> bool {
        self.laser_on
    }

    /// Force an axis into the referenced state at `position`.
    pub fn reference(&mut self, axis: u8, position: i64) {
        if let Some(stage) = self.axes.get_mut(usize::from(axis)) {
            stage.state = HomingState::Referenced;
            stage.position = position;
            stage.target = None;
        }
    }

    /// Reply to one command line (without its newline).
    pub fn respond(&mut self, line: &str) -> String {
        let line = line.trim();
        let reply = self.dispatch(line);
        trace!("sim {:?} -> {:?}", line, reply);
        reply
    }

    fn dispatch(&mut self, line: &str) -> String {
        let fixed = [
            Command::Identify,
            Command::LaserStatus,
            Command::LaserOn,
            Command::LaserOff,
            Command::LaserInfo,
            Command::LaserPower,
            Command::CoolerData,
        ];
        if let Some(command) = fixed.into_iter().find(|c| c.wire() == line) {
            return match command {
                Command::Identify => FIRMWARE_ID.to_string(),
                Command::LaserStatus => format!("LP50 {}", u8::from(self.laser_on)),
                Command::LaserOn => {
                    self.laser_on = true;
                    "OK".to_string()
                }
                Command::LaserOff => {
                    self.laser_on = false;
                    "OK".to_string()
                }
                Command::LaserInfo => LASER_INFO.to_string(),
                Command::CoolerData => COOLER_READINGS.to_string(),
                _ => "OK".to_string(),
            };
        }

        let mut chars = line.chars();
        let (Some(op @ ('H' | 'P')), Some(digit)) = (chars.next(), chars.next()) else {
            return "Error_1".to_string();
        };
        let Some(axis) = digit.to_digit(10) else {
            return "Error_1".to_string();
        };
        let rest = chars.as_str();
        let config = self.config.clone();
        let Some(stage) = self.axes.get_mut(axis as usize) else {
            return "Error_2".to_string();
        };

        match (op, rest) {
            ('H', "") => {
                debug!("sim: home axis {}", axis);
                stage.home(&config).to_string()
            }
            ('P', "?") => stage.query_position(&config),
            ('P', target) => match target.parse::<i64>() {
                Ok(target) => {
                    debug!("sim: move axis {} to {}", axis, target);
                    stage.move_to(target, &config).to_string()
                }
                Err(_) => "Error_1".to_string(),
            },
            _ => "Error_1".to_string(),
        }
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new(StageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(home_busy_polls: u32, step: i64) -> SimulatedController {
        SimulatedController::new(StageConfig {
            home_busy_polls,
            step_per_query: step,
            travel_limit: 10_000,
            noise: false,
        })
    }

    #[test]
    fn unreferenced_until_homed() {
        let mut s = sim(2, 100);
        assert_eq!(s.respond("P0?"), "-1");
        assert_eq!(s.respond("H0"), "BUSY");
        assert_eq!(s.respond("P0?"), "BUSY");
        assert_eq!(s.respond("H0"), "BUSY");
        assert_eq!(s.respond("H0"), "OK");
        assert_eq!(s.respond("P0?"), "0");
        assert_eq!(s.axis(0).unwrap().state(), HomingState::Referenced);
        // Other axes are untouched.
        assert_eq!(s.respond("P1?"), "-1");
    }

    #[test]
    fn moves_advance_per_query_and_clamp_at_the_limit() {
        let mut s = sim(0, 4_000);
        assert_eq!(s.respond("H0"), "OK");
        assert_eq!(s.respond("P0100000000000"), "OK");
        assert_eq!(s.respond("P0?"), "4000");
        assert_eq!(s.respond("P0?"), "8000");
        assert_eq!(s.respond("P0?"), "10000");
        assert_eq!(s.respond("P0?"), "10000");
        assert!(!s.axis(0).unwrap().is_moving());

        assert_eq!(s.respond("P09500"), "OK");
        assert_eq!(s.respond("P0?"), "9500");
    }

    #[test]
    fn moving_an_unreferenced_axis_is_refused() {
        let mut s = sim(0, 1);
        assert_eq!(s.respond("P0500"), "Error_3");
    }

    #[test]
    fn errors_for_unknown_commands_and_axes() {
        let mut s = sim(0, 1);
        assert_eq!(s.respond("XYZ"), "Error_1");
        assert_eq!(s.respond("P0abc"), "Error_1");
        assert_eq!(s.respond("H7"), "Error_2");
        assert_eq!(s.respond("P9?"), "Error_2");
        assert_eq!(s.respond(""), "Error_1");
    }

    #[test]
    fn identification_laser_and_cooler() {
        let mut s = sim(0, 1);
        assert_eq!(s.respond("ID?"), FIRMWARE_ID);
        assert_eq!(s.respond("LCe 1"), "OK");
        assert!(s.laser_on());
        assert_eq!(s.respond("LCr rLP50"), "LP50 1");
        assert_eq!(s.respond("LCe 0"), "OK");
        assert_eq!(s.respond("LCr i").lines().count(), 5);
        assert_eq!(s.respond("TCr r"), COOLER_READINGS);
    }
}
