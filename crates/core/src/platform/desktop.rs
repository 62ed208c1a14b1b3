use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};
use image::imageops;
use xcap::Monitor;

use crate::error::CaptureError;
use crate::logger;
use crate::types::*;
use super::{InputDriver, ScreenSampler};

/// Primary-monitor capture through xcap, clicks through enigo.
pub struct DesktopPlatform {
    enigo: Mutex<Option<Enigo>>,
}

impl DesktopPlatform {
    pub fn new() -> Self {
        let enigo = match Enigo::new(&Settings::default()) {
            Ok(e) => Some(e),
            Err(e) => {
                logger::error_p(logger::PLATFORM, &format!("input backend unavailable: {}", e));
                None
            }
        };
        Self { enigo: Mutex::new(enigo) }
    }
}

impl Default for DesktopPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn primary_monitor() -> Result<Monitor, CaptureError> {
    let monitors = Monitor::all().map_err(|e| CaptureError::Backend(e.to_string()))?;
    let mut fallback = None;
    for m in monitors {
        if m.is_primary().unwrap_or(false) {
            return Ok(m);
        }
        fallback.get_or_insert(m);
    }
    fallback.ok_or(CaptureError::NoDisplay)
}

impl ScreenSampler for DesktopPlatform {
    fn capture(&self, region: Option<Rect>) -> Result<Capture, CaptureError> {
        if region.is_some_and(|r| r.is_empty()) {
            return Err(CaptureError::EmptyRegion);
        }
        let monitor = primary_monitor()?;
        let full = monitor
            .capture_image()
            .map_err(|e| CaptureError::Backend(e.to_string()))?;
        let Some(r) = region else {
            return Ok(Capture::from_rgba(full));
        };

        // region is in desktop coordinates; the image starts at the monitor origin
        let ox = monitor.x().unwrap_or(0);
        let oy = monitor.y().unwrap_or(0);
        let x = (r.x1 - ox).max(0) as u32;
        let y = (r.y1 - oy).max(0) as u32;
        if x >= full.width() || y >= full.height() {
            return Err(CaptureError::EmptyRegion);
        }
        let w = r.width().min(full.width() - x);
        let h = r.height().min(full.height() - y);
        Ok(Capture::from_rgba(imageops::crop_imm(&full, x, y, w, h).to_image()))
    }
}

impl InputDriver for DesktopPlatform {
    fn click(&self, at: Point) -> Result<()> {
        let mut guard = self.enigo.lock().unwrap_or_else(PoisonError::into_inner);
        let enigo = guard.as_mut().ok_or_else(|| anyhow!("input backend unavailable"))?;
        enigo.move_mouse(at.x, at.y, Coordinate::Abs)?;
        thread::sleep(Duration::from_millis(15));
        enigo.button(Button::Left, Direction::Click)?;
        Ok(())
    }
}
