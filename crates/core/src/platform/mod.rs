pub mod stub;

#[cfg(feature = "desktop")]
pub mod desktop;

use std::sync::Arc;

use anyhow::Result;

use crate::error::CaptureError;
use crate::logger;
use crate::types::*;

/// Pixel source for matching and detection.
pub trait ScreenSampler: Send + Sync {
    /// Capture `region`, or the whole primary display when `None`.
    fn capture(&self, region: Option<Rect>) -> Result<Capture, CaptureError>;
}

/// Synthetic input.
pub trait InputDriver: Send + Sync {
    fn click(&self, at: Point) -> Result<()>;
}

/// Capabilities the stage machine and remote channel run against.
#[derive(Clone)]
pub struct Platform {
    pub screen: Arc<dyn ScreenSampler>,
    pub input: Arc<dyn InputDriver>,
}

/// Create the platform appropriate for this build.
pub fn create_platform() -> Platform {
    #[cfg(feature = "desktop")]
    {
        logger::info_p(logger::PLATFORM, "using desktop capture and input");
        let desktop = Arc::new(desktop::DesktopPlatform::new());
        return Platform { screen: desktop.clone(), input: desktop };
    }
    #[cfg(not(feature = "desktop"))]
    {
        logger::warn_p(logger::PLATFORM, "built without `desktop`; clicks and captures are simulated");
        let stub = Arc::new(stub::StubPlatform::default());
        Platform { screen: stub.clone(), input: stub }
    }
}
