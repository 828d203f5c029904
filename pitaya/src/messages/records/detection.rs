use crate::{messages::control::plant::PlantId, PitayaError, Result};
use chrono::{DateTime, Local};

/// Format of the timestamp column in the detection log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of running the classifier once over a capture.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    /// Name of the winning class, or `class_<index>` when the model
    /// produced more classes than we have names for.
    pub label: String,
    /// Score of the winning class as a percentage in [0, 100], widened
    /// before scaling so the two decimal log value is not rounded twice.
    pub confidence: f64,
    /// Scores exactly as returned by the model, in class order.
    pub raw_scores: Vec<f32>,
}

impl ClassificationResult {
    /// Pick the highest scoring class from a score vector. Ties go to the
    /// lowest index and non finite scores are never selected.
    ///
    /// * `raw_scores`: model output, one score per class.
    /// * `class_names`: names for the classes the model was trained on.
    pub fn from_scores(raw_scores: Vec<f32>, class_names: &[String]) -> Result<Self> {
        let (index, best) = raw_scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best: Option<(usize, f32)>, (idx, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((idx, score)),
            })
            .ok_or(PitayaError::EmptyScores)?;

        let label = class_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{index}"));

        Ok(Self {
            label,
            confidence: (f64::from(best) * 100.0).clamp(0.0, 100.0),
            raw_scores,
        })
    }
}

/// One row of the detection log.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    /// When the detection was logged.
    pub timestamp: DateTime<Local>,
    /// Plant the detection belongs to.
    pub plant_id: PlantId,
    /// Winning class label.
    pub label: String,
    /// Confidence percentage of the label.
    pub confidence: f64,
    /// File name (not path) of the capture the label came from.
    pub image_file: String,
}

impl DetectionRecord {
    /// Build a record for a plant stamped with the current local time.
    pub fn new(plant_id: PlantId, result: &ClassificationResult, image_file: String) -> Self {
        Self {
            timestamp: Local::now(),
            plant_id,
            label: result.label.clone(),
            confidence: result.confidence,
            image_file,
        }
    }

    /// The record as CSV fields, confidence to exactly two decimals.
    pub fn to_row(&self) -> [String; 5] {
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.plant_id.to_string(),
            self.label.clone(),
            format!("{:.2}", self.confidence),
            self.image_file.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rstest::rstest;

    fn class_names() -> Vec<String> {
        ["anthracnose", "cactusvirusx", "healthy", "stemcanker"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_healthy_plant_scores() {
        let result =
            ClassificationResult::from_scores(vec![0.1, 0.05, 0.8, 0.05], &class_names()).unwrap();
        assert_eq!(result.label, "healthy");
        assert!((result.confidence - 80.0).abs() < 1e-4);
        assert_eq!(result.raw_scores, vec![0.1, 0.05, 0.8, 0.05]);
    }

    #[rstest]
    #[case(vec![0.9, 0.1], "anthracnose", 90.0)]
    #[case(vec![0.0, 0.0, 0.0, 1.0], "stemcanker", 100.0)]
    #[case(vec![0.25, 0.25, 0.25, 0.25], "anthracnose", 25.0)]
    #[case(vec![0.1, 0.1, 0.1, 0.1, 0.6], "class_4", 60.0)]
    #[case(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.7], "class_7", 70.0)]
    #[case(vec![f32::NAN, 0.3, 0.2], "cactusvirusx", 30.0)]
    fn test_label_follows_argmax(
        #[case] scores: Vec<f32>,
        #[case] expected_label: &str,
        #[case] expected_confidence: f64,
    ) {
        let result = ClassificationResult::from_scores(scores, &class_names()).unwrap();
        assert_eq!(result.label, expected_label);
        assert!((result.confidence - expected_confidence).abs() < 1e-3);
        assert!((0.0..=100.0).contains(&result.confidence));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![f32::NAN, f32::INFINITY])]
    fn test_no_usable_scores(#[case] scores: Vec<f32>) {
        assert!(matches!(
            ClassificationResult::from_scores(scores, &class_names()),
            Err(PitayaError::EmptyScores)
        ));
    }

    #[test]
    /// Logits are clamped rather than reported as impossible percentages.
    fn test_confidence_clamped_for_unnormalised_scores() {
        let result = ClassificationResult::from_scores(vec![-2.0, 3.5], &class_names()).unwrap();
        assert_eq!(result.label, "cactusvirusx");
        assert_eq!(result.confidence, 100.0);

        let result = ClassificationResult::from_scores(vec![-2.0, -3.5], &class_names()).unwrap();
        assert_eq!(result.label, "anthracnose");
        assert_eq!(result.confidence, 0.0);
    }

    #[rstest]
    #[case(0.8, "80.00")]
    #[case(0.00255, "0.26")]
    #[case(1.0, "100.00")]
    fn test_confidence_column(#[case] score: f32, #[case] expected: &str) {
        let result = ClassificationResult::from_scores(vec![score], &class_names()).unwrap();
        let plant_id = PlantId::sanitise("P7").unwrap();
        let record = DetectionRecord::new(plant_id.clone(), &result, plant_id.image_file_name(1));
        assert_eq!(record.to_row()[3], expected);
    }

    #[test]
    fn test_record_row_formatting() {
        let result =
            ClassificationResult::from_scores(vec![0.1, 0.05, 0.8, 0.05], &class_names()).unwrap();
        let plant_id = PlantId::sanitise("P7").unwrap();
        let record = DetectionRecord::new(plant_id.clone(), &result, plant_id.image_file_name(1));
        let row = record.to_row();

        assert_eq!(row[1], "P7");
        assert_eq!(row[2], "healthy");
        assert_eq!(row[3], "80.00");
        assert_eq!(row[4], "plant_P7-day1.jpg");
        assert!(chrono::NaiveDateTime::parse_from_str(&row[0], TIMESTAMP_FORMAT).is_ok());
    }
}
