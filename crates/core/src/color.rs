use serde::{Deserialize, Serialize};

use crate::logger;
use crate::platform::ScreenSampler;
use crate::types::{Capture, Rect, Rgb};

/// Target color and the thresholds that declare the event present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTarget {
    pub rgb: Rgb,
    /// Manhattan distance cutoff.
    pub tolerance: u16,
    /// The event is present when strictly more pixels than this match.
    pub min_pixels: u64,
}

/// |dr| + |dg| + |db|
pub fn manhattan(target: Rgb, [r, g, b]: [u8; 3]) -> u16 {
    target.0.abs_diff(r) as u16 + target.1.abs_diff(g) as u16 + target.2.abs_diff(b) as u16
}

/// Pixels closer than `tolerance` to the target. An exact match always counts.
pub fn count_matching(frame: &Capture, target: &ColorTarget) -> u64 {
    let cutoff = target.tolerance.max(1);
    frame
        .pixels()
        .filter(|px| manhattan(target.rgb, *px) < cutoff)
        .count() as u64
}

pub fn is_present(frame: &Capture, target: &ColorTarget) -> bool {
    count_matching(frame, target) > target.min_pixels
}

/// Sample `region` and test it. Capture failures read as "absent".
pub fn detect(screen: &dyn ScreenSampler, region: Rect, target: &ColorTarget) -> bool {
    match screen.capture(Some(region)) {
        Ok(frame) => is_present(&frame, target),
        Err(e) => {
            logger::warn_p(logger::STAGE, &format!("event capture failed: {}", e));
            false
        }
    }
}
