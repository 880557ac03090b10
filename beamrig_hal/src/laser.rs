//! Laser control through the axis controller's laser commands.

use crate::axis::AxisController;
use crate::error::AxisError;
use crate::protocol::{Command, ProtocolError};
use serde::Serialize;
use tracing::{info, warn};

/// Decoded `LCr i` block. Fields are `None` when absent from the reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaserInfo {
    pub raw: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub wavelength_nm: Option<f64>,
}

impl LaserInfo {
    pub fn parse(raw: &str) -> Self {
        let serial = token_after(raw, "S/N:", false);
        let model = token_after(raw, "model:", true);
        let wavelength_nm = model.as_deref().and_then(wavelength_from_model);
        Self {
            raw: Some(raw.to_string()),
            serial,
            model,
            wavelength_nm,
        }
    }
}

/// Whitespace-delimited token following `label`.
fn token_after(text: &str, label: &str, ignore_case: bool) -> Option<String> {
    let at = if ignore_case {
        text.to_ascii_lowercase().find(&label.to_ascii_lowercase())?
    } else {
        text.find(label)?
    };
    text[at + label.len()..]
        .split_whitespace()
        .next()
        .map(str::to_string)
}

/// `L532-50-A` → 532.0
pub fn wavelength_from_model(model: &str) -> Option<f64> {
    model.split('-').next()?.replace('L', "").parse().ok()
}

/// Laser on/off state tracked on top of the controller.
pub struct LaserService<'a> {
    controller: &'a AxisController,
    on: bool,
}

impl<'a> LaserService<'a> {
    pub fn new(controller: &'a AxisController) -> Self {
        Self {
            controller,
            on: false,
        }
    }

    /// Service for a laser already known to be in state `on`.
    pub fn with_state(controller: &'a AxisController, on: bool) -> Self {
        Self { controller, on }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    fn send(&self, command: Command) -> Result<String, AxisError> {
        self.controller
            .command(&command)
            .ok_or(AxisError::Protocol(ProtocolError::NoReply))
    }

    /// Set output power, then enable. No-op when already on.
    pub fn turn_on(&mut self) -> Result<(), AxisError> {
        if self.on {
            return Ok(());
        }
        self.send(Command::LaserPower)?;
        self.send(Command::LaserOn)?;
        self.on = true;
        info!("Laser on");
        Ok(())
    }

    /// No-op when already off.
    pub fn turn_off(&mut self) -> Result<(), AxisError> {
        if !self.on {
            return Ok(());
        }
        self.send(Command::LaserOff)?;
        self.on = false;
        info!("Laser off");
        Ok(())
    }

    pub fn status(&self) -> Option<String> {
        self.controller.command(&Command::LaserStatus)
    }

    /// Read and decode the information block; empty on failure.
    pub fn info(&self) -> LaserInfo {
        match self.controller.command(&Command::LaserInfo) {
            Some(raw) => LaserInfo::parse(&raw),
            None => {
                warn!("No laser information received");
                LaserInfo::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::rig;

    const INFO: &str = "Laser module\nS/N: 12345-AB\nModel: L532-50-A\nHours: 120\nOK";

    #[test]
    fn info_block_is_decoded() {
        let info = LaserInfo::parse(INFO);
        assert_eq!(info.serial.as_deref(), Some("12345-AB"));
        assert_eq!(info.model.as_deref(), Some("L532-50-A"));
        assert_eq!(info.wavelength_nm, Some(532.0));
    }

    #[test]
    fn missing_fields_stay_empty() {
        let info = LaserInfo::parse("nothing useful");
        assert_eq!(info.serial, None);
        assert_eq!(info.model, None);
        assert_eq!(info.wavelength_nm, None);
        assert_eq!(wavelength_from_model("Lxyz-1"), None);
    }

    #[test]
    fn on_and_off_are_idempotent() {
        let (controller, link, _clock) = rig();
        link.script("LP50", &["OK"]);
        link.script("LCe 1", &["OK"]);
        link.script("LCe 0", &["OK"]);
        let mut laser = LaserService::new(&controller);

        laser.turn_off().unwrap();
        assert_eq!(link.count("LCe 0"), 0);

        laser.turn_on().unwrap();
        laser.turn_on().unwrap();
        assert!(laser.is_on());
        assert_eq!(link.count("LP50"), 1);
        assert_eq!(link.count("LCe 1"), 1);

        laser.turn_off().unwrap();
        assert!(!laser.is_on());
        assert_eq!(link.count("LCe 0"), 1);
    }

    #[test]
    fn info_without_reply_is_empty() {
        let (controller, link, _clock) = rig();
        link.silence("LCr i");
        assert_eq!(LaserService::new(&controller).info(), LaserInfo::default());

        link.script("LCr i", &[INFO]);
        assert_eq!(
            LaserService::new(&controller).info().wavelength_nm,
            Some(532.0)
        );
    }
}
