use std::fmt::Display;

/// Line sent back to the embedded controller once a plant has been logged.
/// The rig will not move on, or send another identifier, until it sees it.
pub const ACKNOWLEDGEMENT: &[u8] = b"DONE\n";

/// Identifier of one physical plant (scan position) as sent by the
/// embedded controller. Only ever constructed through [`PlantId::sanitise`]
/// so it is guaranteed to be non empty and to contain nothing but
/// `[A-Za-z0-9_-]`, which keeps it safe for file names, CSV and SMS.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlantId(String);

impl PlantId {
    /// Strip everything that is not an ASCII letter, digit, `-` or `_`
    /// from a raw line. Returns `None` when nothing is left, in which case
    /// the session for that line must be skipped.
    ///
    /// * `raw`: line as received from the embedded controller.
    pub fn sanitise(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(Self(cleaned))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the capture for this plant, e.g. `plant_P7-day1.jpg`.
    ///
    /// * `survey_day`: day of the survey the capture belongs to.
    pub fn image_file_name(&self, survey_day: u32) -> String {
        format!("plant_{}-day{survey_day}.jpg", self.0)
    }

    /// Body of the SMS sent to the farmer and the control unit.
    ///
    /// * `label`: classification label for the plant.
    pub fn sms_body(&self, label: &str) -> String {
        format!("{}-{label}", self.0)
    }
}

impl Display for PlantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
