use thiserror::Error;

use crate::classification::domain::safety_color::SafetyColor;
use crate::shared::bbox::BoundingBox;
use crate::shared::config::MonitorConfig;
use crate::shared::constants::{
    DEFAULT_HEAD_REGION_FRACTION, DEFAULT_HEAD_REGION_WIDTH_FRACTION,
    DEFAULT_HELMET_COLOR_RATIO_THRESHOLD,
};
use crate::shared::frame::Frame;

/// Why a head region could not be inspected. The classifier reports
/// "no helmet" in these cases rather than failing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationWarning {
    #[error("person box has no usable extent")]
    DegenerateBox,
    #[error("head region lies outside the frame")]
    EmptyRegion,
    #[error("frame pixels are unreadable")]
    FrameUnreadable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadRegionParams {
    /// Share of the person box height, from the top, treated as the head.
    pub height_fraction: f64,
    /// Share of the person box width, centered, treated as the head.
    pub width_fraction: f64,
    /// Helmet iff the safety-color pixel ratio is strictly above this.
    pub ratio_threshold: f64,
}

impl Default for HeadRegionParams {
    fn default() -> Self {
        Self {
            height_fraction: DEFAULT_HEAD_REGION_FRACTION,
            width_fraction: DEFAULT_HEAD_REGION_WIDTH_FRACTION,
            ratio_threshold: DEFAULT_HELMET_COLOR_RATIO_THRESHOLD,
        }
    }
}

impl From<&MonitorConfig> for HeadRegionParams {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            height_fraction: config.head_region_fraction,
            width_fraction: config.head_region_width_fraction,
            ratio_threshold: config.helmet_color_ratio_threshold,
        }
    }
}

/// Outcome of inspecting one head region.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadInspection {
    pub helmet: bool,
    /// Safety-color pixel ratio, `None` when no pixels were sampled.
    pub ratio: Option<f64>,
    pub warning: Option<ClassificationWarning>,
}

impl HeadInspection {
    fn warned(warning: ClassificationWarning) -> Self {
        Self {
            helmet: false,
            ratio: None,
            warning: Some(warning),
        }
    }
}

/// Color-ratio heuristic: a person wears a helmet when enough of the top
/// center of their box is a hard-hat color.
#[derive(Debug, Clone, Default)]
pub struct HeadRegionClassifier {
    params: HeadRegionParams,
}

impl HeadRegionClassifier {
    pub fn new(params: HeadRegionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HeadRegionParams {
        &self.params
    }

    /// Head rectangle for a person box, before clamping.
    pub fn head_region(&self, person: &BoundingBox) -> BoundingBox {
        let margin = (1.0 - self.params.width_fraction) / 2.0;
        BoundingBox::new(
            person.x + person.width * margin,
            person.y,
            person.width * self.params.width_fraction,
            person.height * self.params.height_fraction,
        )
    }

    pub fn classify_helmet(&self, frame: &Frame, person: &BoundingBox) -> bool {
        self.inspect(frame, person).helmet
    }

    pub fn inspect(&self, frame: &Frame, person: &BoundingBox) -> HeadInspection {
        if person.is_degenerate() {
            return HeadInspection::warned(ClassificationWarning::DegenerateBox);
        }
        if frame.is_unreadable() {
            return HeadInspection::warned(ClassificationWarning::FrameUnreadable);
        }

        let head = self
            .head_region(person)
            .clamp_to(frame.width(), frame.height());
        let x0 = head.x.floor() as u32;
        let y0 = head.y.floor() as u32;
        let x1 = (head.right().ceil() as u32).min(frame.width());
        let y1 = (head.bottom().ceil() as u32).min(frame.height());
        if x1 <= x0 || y1 <= y0 {
            return HeadInspection::warned(ClassificationWarning::EmptyRegion);
        }

        let mut total = 0u64;
        let mut matching = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                if let Some(rgb) = frame.rgb_at(x, y) {
                    total += 1;
                    if SafetyColor::matches(rgb) {
                        matching += 1;
                    }
                }
            }
        }
        if total == 0 {
            return HeadInspection::warned(ClassificationWarning::EmptyRegion);
        }

        let ratio = matching as f64 / total as f64;
        HeadInspection {
            helmet: ratio > self.params.ratio_threshold,
            ratio: Some(ratio),
            warning: None,
        }
    }
}
