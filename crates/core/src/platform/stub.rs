use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;

use crate::error::CaptureError;
use crate::logger;
use crate::types::*;
use super::{InputDriver, ScreenSampler};

const SCREEN_W: u32 = 1920;
const SCREEN_H: u32 = 1080;

/// Stand-in for machines without a desktop backend: a blank 1920x1080
/// screen and clicks that only reach the log.
#[derive(Default)]
pub struct StubPlatform {
    clicks: AtomicU64,
}

impl StubPlatform {
    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::Relaxed)
    }
}

impl ScreenSampler for StubPlatform {
    fn capture(&self, region: Option<Rect>) -> Result<Capture, CaptureError> {
        let (w, h) = match region {
            Some(r) if r.is_empty() => return Err(CaptureError::EmptyRegion),
            Some(r) => (r.width(), r.height()),
            None => (SCREEN_W, SCREEN_H),
        };
        Ok(Capture::filled(w, h, Rgb(0, 0, 0)))
    }
}

impl InputDriver for StubPlatform {
    fn click(&self, at: Point) -> Result<()> {
        let n = self.clicks.fetch_add(1, Ordering::Relaxed) + 1;
        logger::info_p(logger::PLATFORM, &format!("stub click #{} at {}", n, at));
        Ok(())
    }
}
