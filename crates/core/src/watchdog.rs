use std::sync::Arc;
use std::time::Duration;

use crate::logger;
use crate::notify::{format_duration, timestamp, Notifier};
use crate::settings::Settings;
use crate::state::{SharedState, TimeoutClaim};

/// Emits one notification per stage occupancy that outlives the threshold.
pub struct TimeoutWatchdog {
    enabled: bool,
    threshold: Duration,
    notifier: Arc<dyn Notifier>,
}

impl TimeoutWatchdog {
    pub fn new(enabled: bool, threshold: Duration, notifier: Arc<dyn Notifier>) -> Self {
        Self { enabled, threshold, notifier }
    }

    pub fn from_settings(settings: &Settings, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            settings.stage_timeout_enabled,
            Duration::from_secs(settings.stage_timeout_seconds),
            notifier,
        )
    }

    /// Call on every status refresh. Returns true if a notification went out.
    pub fn check(&self, state: &SharedState) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(claim) = state.claim_timeout(self.threshold) else {
            return false;
        };
        let text = self.message(&claim);
        match self.notifier.notify(&text) {
            Ok(()) => logger::info_p(logger::WATCHDOG, &format!("stage timeout sent: {}", claim.status)),
            Err(e) => logger::warn_p(logger::WATCHDOG, &format!("stage timeout notification failed: {}", e)),
        }
        true
    }

    fn message(&self, claim: &TimeoutClaim) -> String {
        let stage = claim
            .stage
            .map(|s| format!("{} ({})", s, s.describe()))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "Stage held too long\n\nStage: {}\nStatus: {}\nElapsed: {}\nThreshold: {}\n\nTime: {}",
            stage,
            claim.status,
            format_duration(claim.elapsed),
            format_duration(self.threshold),
            timestamp(),
        )
    }
}
