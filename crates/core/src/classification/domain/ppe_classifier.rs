use serde::Serialize;

use crate::classification::domain::head_region_classifier::{
    ClassificationWarning, HeadRegionClassifier,
};
use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;

/// PPE verdict for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    #[serde(rename = "personDetected")]
    pub person_detected: bool,
    /// `true` when no person is present.
    #[serde(rename = "helmetDetected")]
    pub helmet_detected: bool,
    /// Chosen person's score scaled to 0-100, or 0 without a person.
    pub confidence: f64,
    pub detections: Vec<Detection>,
    #[serde(rename = "personCount")]
    pub person_count: usize,
    #[serde(rename = "headColorRatio", skip_serializing_if = "Option::is_none")]
    pub head_color_ratio: Option<f64>,
    #[serde(skip)]
    pub warning: Option<ClassificationWarning>,
}

impl ClassificationResult {
    /// Nothing usable came out of the cycle.
    pub fn empty() -> Self {
        Self {
            person_detected: false,
            helmet_detected: true,
            confidence: 0.0,
            detections: Vec::new(),
            person_count: 0,
            head_color_ratio: None,
            warning: None,
        }
    }

    pub fn is_violation(&self) -> bool {
        self.person_detected && !self.helmet_detected
    }
}

/// Turns raw detections into a helmet verdict for the most confident person.
#[derive(Debug, Clone, Default)]
pub struct PpeClassifier {
    head: HeadRegionClassifier,
}

impl PpeClassifier {
    pub fn new(head: HeadRegionClassifier) -> Self {
        Self { head }
    }

    pub fn classify(&self, frame: &Frame, detections: Vec<Detection>) -> ClassificationResult {
        let person_count = detections.iter().filter(|d| d.is_person()).count();
        let best = detections
            .iter()
            .filter(|d| d.is_person())
            .max_by(|a, b| a.score.total_cmp(&b.score));

        let Some(person) = best else {
            return ClassificationResult {
                detections,
                ..ClassificationResult::empty()
            };
        };

        let inspection = self.head.inspect(frame, &person.bbox);
        if let Some(ref warning) = inspection.warning {
            log::debug!("Head region not inspected on frame {}: {warning}", frame.index());
        }
        ClassificationResult {
            person_detected: true,
            helmet_detected: inspection.helmet,
            confidence: person.score * 100.0,
            person_count,
            head_color_ratio: inspection.ratio,
            warning: inspection.warning,
            detections,
        }
    }
}
