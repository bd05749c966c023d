use serde::{Deserialize, Serialize};

use crate::shared::bbox::BoundingBox;
use crate::shared::constants::PERSON_CLASS;

/// One classified box from a single inference pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "className")]
    pub class_name: String,
    /// Model confidence in `[0, 1]`.
    pub score: f64,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, score: f64, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            score,
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class_name == PERSON_CLASS
    }
}
