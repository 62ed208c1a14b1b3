use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::{CancelToken, Ticker};
use crate::color;
use crate::error::ConfigError;
use crate::logger;
use crate::machine::{StageMachine, Timings};
use crate::notify::Notifier;
use crate::platform::Platform;
use crate::settings::{Settings, StageReferences};
use crate::state::{FlagChange, RunState, SharedState};
use crate::types::{Command, StageId};

const PROBE_WINDOW: Duration = Duration::from_secs(5);
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts and stops runs of the stage machine and owns what they share.
pub struct Monitor {
    state: Arc<SharedState>,
    settings: Mutex<Arc<Settings>>,
    references: Mutex<Arc<StageReferences>>,
    platform: Platform,
    notifier: Arc<dyn Notifier>,
    timings: Timings,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(
        state: Arc<SharedState>,
        settings: Settings,
        references: StageReferences,
        platform: Platform,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state,
            settings: Mutex::new(Arc::new(settings)),
            references: Mutex::new(Arc::new(references)),
            platform,
            notifier,
            timings: Timings::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn snapshot(&self) -> RunState {
        self.state.snapshot()
    }

    pub fn settings(&self) -> Arc<Settings> {
        lock(&self.settings).clone()
    }

    pub fn references(&self) -> Arc<StageReferences> {
        lock(&self.references).clone()
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), ConfigError> {
        if self.state.is_running() {
            return Err(ConfigError::RunActive);
        }
        *lock(&self.settings) = Arc::new(settings);
        Ok(())
    }

    pub fn set_references(&self, references: StageReferences) -> Result<(), ConfigError> {
        if self.state.is_running() {
            return Err(ConfigError::RunActive);
        }
        *lock(&self.references) = Arc::new(references);
        Ok(())
    }

    /// Validate the settings and launch the stage loop in stage A.
    pub fn start(&self) -> Result<(), ConfigError> {
        if self.state.is_running() {
            return Err(ConfigError::AlreadyRunning);
        }
        let settings = self.settings();
        settings.validate_for_run()?;

        // a loop from an earlier run exits promptly once its token is cancelled
        let previous = lock(&self.worker).take();
        if let Some(old) = previous {
            old.join().ok();
        }

        let token = CancelToken::new();
        if !self.state.begin_run(token.clone()) {
            return Err(ConfigError::AlreadyRunning);
        }
        self.state.enter_stage(StageId::A);
        self.state.set_status("Stage A: starting");

        let machine = StageMachine::new(
            settings,
            self.references(),
            self.platform.clone(),
            self.state.clone(),
            self.notifier.clone(),
            Ticker::new(self.state.clock().clone(), token),
        )
        .with_timings(self.timings.clone());
        *lock(&self.worker) = Some(thread::spawn(move || machine.run()));
        logger::info_p(logger::STAGE, "run started");
        Ok(())
    }

    pub fn stop(&self) -> FlagChange {
        let change = self.state.stop();
        if change == FlagChange::Applied {
            self.state.set_status("Stopped");
            logger::info_p(logger::STAGE, "run stopped");
        }
        change
    }

    pub fn toggle_pause(&self) -> FlagChange {
        let change = if self.state.is_paused() { self.state.resume() } else { self.state.pause() };
        if change == FlagChange::Applied {
            let word = if self.state.is_paused() { "paused" } else { "resumed" };
            logger::info_p(logger::STAGE, &format!("run {}", word));
        }
        change
    }

    /// Sample the detection region every 200ms for up to 5s. Returns how
    /// long it took to see the event, or `None` if it never showed.
    pub fn probe_detection(&self) -> Result<Option<Duration>, ConfigError> {
        if self.state.is_running() {
            return Err(ConfigError::RunActive);
        }
        let settings = self.settings();
        let region = match settings.detection_area {
            Some(r) if !r.is_empty() => r,
            _ => return Err(ConfigError::MissingDetectionRegion),
        };
        let target = settings.color_target();
        let clock = self.state.clock();
        let started = clock.now();
        loop {
            let elapsed = clock.now().saturating_duration_since(started);
            if elapsed >= PROBE_WINDOW {
                return Ok(None);
            }
            if color::detect(self.platform.screen.as_ref(), region, &target) {
                return Ok(Some(elapsed));
            }
            clock.sleep(PROBE_INTERVAL);
        }
    }

    /// Stop any run and wait for its loop to exit.
    pub fn shutdown(&self) {
        self.stop();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                logger::error_p(logger::STAGE, "stage loop panicked");
            }
        }
    }
}

/// Controller thread body: apply TUI commands until `Quit`.
pub fn serve(monitor: Arc<Monitor>, cmd_rx: mpsc::Receiver<Command>) {
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            Command::Quit => break,
            Command::StartStop => {
                if monitor.state().is_running() {
                    monitor.stop();
                } else if let Err(e) = monitor.start() {
                    logger::error(&format!("cannot start: {}", e));
                    monitor.state().set_status(format!("Cannot start: {}", e));
                }
            }
            Command::PauseResume => {
                if monitor.toggle_pause() == FlagChange::NotRunning {
                    logger::warn("not running");
                }
            }
            Command::Probe => match monitor.probe_detection() {
                Ok(Some(after)) => logger::info(&format!(
                    "probe: event detected after {:.1}s",
                    after.as_secs_f64()
                )),
                Ok(None) => logger::info("probe: no event within 5s"),
                Err(e) => logger::warn(&format!("probe refused: {}", e)),
            },
        }
    }
    logger::info("shutting down");
    monitor.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FakeClock, SystemClock};
    use crate::testing::{RecordingInput, RecordingNotifier, ScriptedScreen};
    use crate::types::{Capture, Point, Rect, RunStatus, Rgb};

    fn fast() -> Timings {
        Timings {
            tick: Duration::from_millis(1),
            sample_interval: Duration::from_millis(1),
            recheck: Duration::from_millis(1),
            misconfigured: Duration::from_millis(1),
            settle: Duration::from_millis(1),
            channel_gap: Duration::from_millis(1),
            pause_poll: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
            ..Timings::default()
        }
    }

    fn valid_settings() -> Settings {
        let mut s = Settings::default();
        s.detection_area = Some(Rect::new(0, 0, 20, 20));
        s.click_positions.login = Some(Point::new(5, 5));
        s
    }

    fn monitor(settings: Settings, screen: Arc<ScriptedScreen>, fake_time: bool) -> Monitor {
        let state = if fake_time {
            Arc::new(SharedState::new(Arc::new(FakeClock::new())))
        } else {
            Arc::new(SharedState::new(Arc::new(SystemClock)))
        };
        let platform = Platform { screen, input: Arc::new(RecordingInput::default()) };
        Monitor::new(
            state,
            settings,
            StageReferences::new(),
            platform,
            Arc::new(RecordingNotifier::default()),
        )
        .with_timings(fast())
    }

    #[test]
    fn start_refused_without_detection_region() {
        let m = monitor(Settings::default(), Arc::new(ScriptedScreen::new()), false);
        assert!(matches!(m.start(), Err(ConfigError::MissingDetectionRegion)));
        assert_eq!(m.snapshot().run_status(), RunStatus::NotStarted);
        assert!(lock(&m.worker).is_none());
    }

    #[test]
    fn start_enters_stage_a_and_stop_ends_the_loop() {
        let m = monitor(valid_settings(), Arc::new(ScriptedScreen::new()), false);
        m.start().unwrap();
        let snap = m.snapshot();
        assert_eq!(snap.run_status(), RunStatus::Running);
        assert_eq!(snap.stage, Some(StageId::A));
        assert!(matches!(m.start(), Err(ConfigError::AlreadyRunning)));

        assert_eq!(m.toggle_pause(), FlagChange::Applied);
        assert_eq!(m.snapshot().run_status(), RunStatus::Paused);
        assert_eq!(m.stop(), FlagChange::Applied);
        m.shutdown();
        assert_eq!(m.snapshot().run_status(), RunStatus::Stopped);

        // restart after stop
        m.start().unwrap();
        assert!(m.state().is_running());
        m.shutdown();
        assert!(!m.state().is_running());
    }

    #[test]
    fn second_start_is_refused_without_blocking() {
        let m = Arc::new(monitor(valid_settings(), Arc::new(ScriptedScreen::new()), false));
        m.start().unwrap();

        let (tx, rx) = mpsc::channel();
        let again = {
            let m = m.clone();
            thread::spawn(move || {
                tx.send(m.start()).ok();
            })
        };
        let second = rx.recv_timeout(Duration::from_secs(3)).expect("start() blocked during a run");
        assert!(matches!(second, Err(ConfigError::AlreadyRunning)));
        again.join().unwrap();
        assert!(m.state().is_running());
        m.shutdown();
    }

    #[test]
    fn restart_in_stage_a_begins_a_fresh_stage_timer() {
        let screen = Arc::new(ScriptedScreen::new());
        let m = monitor(valid_settings(), screen, true);
        let clock = m.state().clock().clone();

        m.start().unwrap();
        m.shutdown();
        assert_eq!(m.snapshot().stage, Some(StageId::A));

        clock.sleep(Duration::from_secs(600));
        assert!(m.state().elapsed_in_stage() >= Duration::from_secs(600));
        m.start().unwrap();
        m.shutdown();

        assert_eq!(m.snapshot().stage, Some(StageId::A));
        assert!(m.state().elapsed_in_stage() < Duration::from_secs(60));
        assert!(!m.snapshot().timeout_notified);
        assert!(m.state().claim_timeout(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn settings_locked_while_running() {
        let m = monitor(valid_settings(), Arc::new(ScriptedScreen::new()), false);
        m.start().unwrap();
        assert!(matches!(m.update_settings(Settings::default()), Err(ConfigError::RunActive)));
        assert!(matches!(m.set_references(StageReferences::new()), Err(ConfigError::RunActive)));
        m.shutdown();

        let mut changed = valid_settings();
        changed.boss_wait_time = 90;
        m.update_settings(changed).unwrap();
        assert_eq!(m.settings().boss_wait_time, 90);
    }

    #[test]
    fn probe_reports_event_and_absence() {
        let screen = Arc::new(ScriptedScreen::new());
        let m = monitor(valid_settings(), screen.clone(), true);

        screen.set_region(Capture::filled(20, 20, Rgb(0, 0, 0)));
        assert_eq!(m.probe_detection().unwrap(), None);
        assert_eq!(screen.captures(), 25);

        screen.queue_region(Capture::filled(20, 20, Rgb(0, 0, 0)));
        screen.set_region(Capture::filled(20, 20, Rgb(255, 0, 0)));
        assert_eq!(m.probe_detection().unwrap(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn probe_refused_without_region_or_while_running() {
        let m = monitor(Settings::default(), Arc::new(ScriptedScreen::new()), true);
        assert!(matches!(m.probe_detection(), Err(ConfigError::MissingDetectionRegion)));

        let m = monitor(valid_settings(), Arc::new(ScriptedScreen::new()), false);
        m.start().unwrap();
        assert!(matches!(m.probe_detection(), Err(ConfigError::RunActive)));
        m.shutdown();
    }

    #[test]
    fn serve_applies_commands_until_quit() {
        let m = Arc::new(monitor(valid_settings(), Arc::new(ScriptedScreen::new()), false));
        let (tx, rx) = mpsc::channel();
        let worker = {
            let m = m.clone();
            thread::spawn(move || serve(m, rx))
        };
        tx.send(Command::StartStop).unwrap();
        tx.send(Command::PauseResume).unwrap();
        tx.send(Command::Quit).unwrap();
        worker.join().unwrap();

        let snap = m.snapshot();
        assert_eq!(snap.run_status(), RunStatus::Stopped);
        assert_eq!(snap.stage, Some(StageId::A));
    }
}
