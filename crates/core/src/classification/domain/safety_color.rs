/// Hard-hat colors counted by the head-region heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyColor {
    Yellow,
    Orange,
    White,
    Red,
    BrightBlue,
}

impl SafetyColor {
    /// Classifies one RGB pixel, or `None` if it matches no helmet color.
    ///
    /// Ranges don't overlap, so the order of checks is irrelevant.
    pub fn classify(r: u8, g: u8, b: u8) -> Option<SafetyColor> {
        if r > 200 && g > 180 && b < 100 {
            Some(SafetyColor::Yellow)
        } else if r > 200 && g > 100 && g < 180 && b < 100 {
            Some(SafetyColor::Orange)
        } else if r > 200 && g > 200 && b > 200 {
            Some(SafetyColor::White)
        } else if r > 180 && g < 100 && b < 100 {
            Some(SafetyColor::Red)
        } else if r < 100 && g > 150 && b > 200 {
            Some(SafetyColor::BrightBlue)
        } else {
            None
        }
    }

    pub fn matches(rgb: [u8; 3]) -> bool {
        Self::classify(rgb[0], rgb[1], rgb[2]).is_some()
    }
}
