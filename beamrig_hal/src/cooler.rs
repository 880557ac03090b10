//! Cooler telemetry read through the axis controller (`TCr r`).
//!
//! The firmware answers with a single line such as
//! `#Readings: 21.4 21.2 21.1 123mA 10% 20% APC 50% 3.30V`.

use crate::axis::AxisController;
use crate::protocol::Command;
use serde::Serialize;
use thiserror::Error;

const READINGS_PREFIX: &str = "#Readings:";

/// Error type for cooler line parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoolerParseError {
    /// The controller sent nothing.
    #[error("no cooler reading received")]
    NoReading,

    #[error("too few fields ({found}), expected at least 9: {line:?}")]
    TooFewFields { found: usize, line: String },

    #[error("field {name} is not numeric: {value:?}")]
    NotNumeric { name: &'static str, value: String },
}

/// One decoded readings line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoolerReadings {
    pub temperatures_c: [f64; 3],
    pub current_ma: f64,
    pub load1_pct: f64,
    pub load2_pct: f64,
    /// Control-mode tag (`APC`), trailing colon removed.
    pub apc_tag: String,
    pub apc_level_pct: f64,
    pub voltage_v: f64,
}

fn number(name: &'static str, raw: &str, suffix: &str) -> Result<f64, CoolerParseError> {
    raw.strip_suffix(suffix)
        .unwrap_or(raw)
        .parse()
        .map_err(|_| CoolerParseError::NotNumeric {
            name,
            value: raw.to_string(),
        })
}

impl CoolerReadings {
    /// Decode a readings line. Commas count as whitespace; fields past the
    /// ninth are ignored.
    pub fn parse(line: &str) -> Result<Self, CoolerParseError> {
        let trimmed = line.trim();
        let body = trimmed.strip_prefix(READINGS_PREFIX).unwrap_or(trimmed);
        let spaced = body.replace(',', " ");
        let fields: Vec<&str> = spaced.split_whitespace().collect();

        let [t1, t2, t3, current, load1, load2, tag, level, volts, ..] = fields.as_slice() else {
            return Err(CoolerParseError::TooFewFields {
                found: fields.len(),
                line: trimmed.to_string(),
            });
        };

        Ok(Self {
            temperatures_c: [
                number("temp1", t1, "")?,
                number("temp2", t2, "")?,
                number("temp3", t3, "")?,
            ],
            current_ma: number("current", current, "mA")?,
            load1_pct: number("load1", load1, "%")?,
            load2_pct: number("load2", load2, "%")?,
            apc_tag: tag.trim_end_matches(':').to_string(),
            apc_level_pct: number("apc_level", level, "%")?,
            voltage_v: number("voltage", volts, "V")?,
        })
    }

    /// Query the controller and decode the reply.
    pub fn read(controller: &AxisController) -> Result<Self, CoolerParseError> {
        let raw = controller
            .command(&Command::CoolerData)
            .ok_or(CoolerParseError::NoReading)?;
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::tests::rig;

    #[test]
    fn parses_a_full_line() {
        let readings =
            CoolerReadings::parse("#Readings: 21.4 21.2 21.1 123mA 10% 20% APC 50% 3.30V").unwrap();
        assert_eq!(readings.temperatures_c, [21.4, 21.2, 21.1]);
        assert_eq!(readings.current_ma, 123.0);
        assert_eq!(readings.load1_pct, 10.0);
        assert_eq!(readings.load2_pct, 20.0);
        assert_eq!(readings.apc_tag, "APC");
        assert_eq!(readings.apc_level_pct, 50.0);
        assert_eq!(readings.voltage_v, 3.3);
    }

    #[test]
    fn commas_and_missing_prefix_are_accepted() {
        let readings = CoolerReadings::parse("20,21,22, 5mA 1% 2% APC: 3% 12V extra").unwrap();
        assert_eq!(readings.temperatures_c, [20.0, 21.0, 22.0]);
        assert_eq!(readings.apc_tag, "APC");
        assert_eq!(readings.voltage_v, 12.0);
    }

    #[test]
    fn short_or_non_numeric_lines_fail() {
        assert!(matches!(
            CoolerReadings::parse("#Readings: 1 2 3"),
            Err(CoolerParseError::TooFewFields { found: 3, .. })
        ));
        assert!(matches!(
            CoolerReadings::parse("#Readings: 1 x 3 4mA 5% 6% APC 7% 8V"),
            Err(CoolerParseError::NotNumeric { name: "temp2", .. })
        ));
    }

    #[test]
    fn reads_through_the_controller() {
        let (controller, link, _clock) = rig();
        link.script("TCr r", &["#Readings: 1 2 3 4mA 5% 6% APC 7% 8V"]);
        let readings = CoolerReadings::read(&controller).unwrap();
        assert_eq!(readings.current_ma, 4.0);

        link.silence("TCr r");
        assert_eq!(CoolerReadings::read(&controller), Err(CoolerParseError::NoReading));
    }
}
