//! The A -> C -> D -> E -> F -> A stage loop.
//!
//! Each iteration runs one stage handler, which returns the next stage.
//! Handlers sample the detection region, compare it against that stage's
//! reference frame, click, and report a status line. Every status line
//! goes through the timeout watchdog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::clock::Ticker;
use crate::color;
use crate::error::ConfigError;
use crate::logger;
use crate::notify::{event_message, Notifier};
use crate::platform::Platform;
use crate::settings::{Settings, StageReferences};
use crate::similarity;
use crate::state::SharedState;
use crate::types::{Capture, ClickRole, Point, Rect, StageId};
use crate::watchdog::TimeoutWatchdog;

/// Delays used by the stage handlers.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Between loop iterations, except after stage E.
    pub tick: Duration,
    /// Between detection samples in stage E.
    pub sample_interval: Duration,
    /// Samples per stage E iteration; the wait budget is checked after each batch.
    pub sample_batch: u32,
    /// Hold after a reference mismatch before sampling again.
    pub recheck: Duration,
    /// Hold when a stage cannot run because a click point is missing.
    pub misconfigured: Duration,
    /// After the login or character click.
    pub settle: Duration,
    /// Between the four channel-switch clicks.
    pub channel_gap: Duration,
    /// Countdown before the automatic switch after an event.
    pub event_hold: Duration,
    pub pause_poll: Duration,
    pub error_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            sample_interval: Duration::from_millis(100),
            sample_batch: 10,
            recheck: Duration::from_secs(1),
            misconfigured: Duration::from_secs(2),
            settle: Duration::from_secs(2),
            channel_gap: Duration::from_secs(1),
            event_hold: Duration::from_secs(5),
            pause_poll: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub struct StageMachine {
    settings: Arc<Settings>,
    references: Arc<StageReferences>,
    platform: Platform,
    state: Arc<SharedState>,
    notifier: Arc<dyn Notifier>,
    watchdog: TimeoutWatchdog,
    ticker: Ticker,
    timings: Timings,
    stage: StageId,
    /// Start of the current no-event wait in stage E.
    watch_started: Option<Instant>,
}

impl StageMachine {
    pub fn new(
        settings: Arc<Settings>,
        references: Arc<StageReferences>,
        platform: Platform,
        state: Arc<SharedState>,
        notifier: Arc<dyn Notifier>,
        ticker: Ticker,
    ) -> Self {
        let watchdog = TimeoutWatchdog::from_settings(&settings, notifier.clone());
        Self {
            settings,
            references,
            platform,
            state,
            notifier,
            watchdog,
            ticker,
            timings: Timings::default(),
            stage: StageId::A,
            watch_started: None,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Loop until the run is stopped or the ticker is cancelled.
    pub fn run(mut self) {
        logger::info_p(logger::STAGE, "stage loop started");
        self.state.enter_stage(self.stage);
        loop {
            if self.ticker.is_cancelled() || !self.state.is_running() {
                break;
            }
            if self.state.is_paused() {
                if !self.ticker.wait(self.timings.pause_poll) {
                    break;
                }
                continue;
            }
            let next = self.step();
            if next != StageId::E && !self.ticker.wait(self.timings.tick) {
                break;
            }
        }
        logger::info_p(logger::STAGE, &format!("stage loop stopped in {}", self.stage));
    }

    /// Run the current stage once and record the stage it hands off to.
    /// A failing handler leaves the machine in the same stage.
    pub fn step(&mut self) -> StageId {
        let current = self.stage;
        self.state.enter_stage(current);
        let next = match self.handle(current) {
            Ok(next) => next,
            Err(e) => {
                logger::error_p(logger::STAGE, &format!("stage {} failed: {:#}", current, e));
                self.report(format!("Stage {}: error - {:#}", current, e));
                self.ticker.wait(self.timings.error_backoff);
                current
            }
        };
        if next != current {
            logger::info_p(logger::STAGE, &format!("{} -> {}", current, next));
        }
        self.stage = next;
        self.state.enter_stage(next);
        next
    }

    fn handle(&mut self, stage: StageId) -> Result<StageId> {
        match stage {
            StageId::A => self.channel_screen(),
            StageId::C => self.login_screen(),
            StageId::D => self.character_select(),
            StageId::E => self.watch_for_event(),
            StageId::F => self.switch_channel(),
        }
    }

    fn report(&self, text: impl Into<String>) {
        self.state.set_status(text);
        self.watchdog.check(&self.state);
    }

    fn hold(&self, text: impl Into<String>, d: Duration) {
        self.report(text);
        self.ticker.wait(d);
    }

    fn region(&self) -> Result<Rect> {
        match self.settings.detection_area {
            Some(r) if !r.is_empty() => Ok(r),
            _ => Err(ConfigError::MissingDetectionRegion.into()),
        }
    }

    /// Sample the detection region. Capture failures read as "no frame".
    fn sample(&self) -> Result<Option<Capture>> {
        let region = self.region()?;
        match self.platform.screen.capture(Some(region)) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                logger::warn_p(logger::STAGE, &format!("capture failed: {}", e));
                Ok(None)
            }
        }
    }

    fn looks_like(&self, frame: Option<&Capture>, stage: StageId) -> bool {
        let (Some(frame), Some(reference)) = (frame, self.references.get(stage)) else {
            return false;
        };
        similarity::matches(reference, frame, self.settings.threshold_for(stage))
    }

    fn click(&self, role: ClickRole, at: Point) -> Result<()> {
        logger::info_p(logger::STAGE, &format!("click {} at {}", role, at));
        self.platform.input.click(at)
    }

    /// A: wait for the post-switch screen. Without a reference this holds.
    fn channel_screen(&mut self) -> Result<StageId> {
        if self.references.get(StageId::A).is_none() {
            self.hold("Stage A: no reference frame, holding", self.timings.recheck);
            return Ok(StageId::A);
        }
        let frame = self.sample()?;
        if self.looks_like(frame.as_ref(), StageId::A) {
            self.report("Stage A: channel switch confirmed");
            Ok(StageId::C)
        } else {
            self.hold("Stage A: waiting for channel screen", self.timings.recheck);
            Ok(StageId::A)
        }
    }

    /// C: click login once the login screen shows.
    fn login_screen(&mut self) -> Result<StageId> {
        if self.references.get(StageId::C).is_some() {
            let frame = self.sample()?;
            if !self.looks_like(frame.as_ref(), StageId::C) {
                self.hold("Stage C: waiting for login screen", self.timings.recheck);
                return Ok(StageId::C);
            }
        }
        let Some(at) = self.settings.click_point(ClickRole::Login) else {
            self.hold("Stage C: login click point not set", self.timings.misconfigured);
            return Ok(StageId::C);
        };
        self.report("Stage C: clicking login");
        self.click(ClickRole::Login, at)?;
        self.ticker.wait(self.timings.settle);
        Ok(StageId::D)
    }

    /// D: click the character once character select shows. If the login
    /// screen is still up, click login again.
    fn character_select(&mut self) -> Result<StageId> {
        if self.references.get(StageId::D).is_some() {
            let frame = self.sample()?;
            if self.references.get(StageId::C).is_some() && self.looks_like(frame.as_ref(), StageId::C) {
                self.report("Stage D: still on login screen, clicking login again");
                if let Some(at) = self.settings.click_point(ClickRole::Login) {
                    self.click(ClickRole::Login, at)?;
                    self.ticker.wait(self.timings.settle);
                }
                return Ok(StageId::D);
            }
            if !self.looks_like(frame.as_ref(), StageId::D) {
                self.hold("Stage D: waiting for character select", self.timings.recheck);
                return Ok(StageId::D);
            }
        }
        let Some(at) = self.settings.click_point(ClickRole::Character) else {
            self.hold("Stage D: character click point not set", self.timings.misconfigured);
            return Ok(StageId::D);
        };
        self.report("Stage D: selecting character");
        self.click(ClickRole::Character, at)?;
        self.ticker.wait(self.timings.settle);
        Ok(StageId::E)
    }

    /// E: sample for the target color; switch channel after the wait
    /// budget runs out without it.
    fn watch_for_event(&mut self) -> Result<StageId> {
        let region = self.region()?;
        let target = self.settings.color_target();
        let now = self.ticker.now();
        let started = *self.watch_started.get_or_insert(now);

        for _ in 0..self.timings.sample_batch {
            if !self.state.is_running() || self.state.is_paused() || self.ticker.is_cancelled() {
                return Ok(StageId::E);
            }
            if color::detect(self.platform.screen.as_ref(), region, &target) {
                self.watch_started = None;
                return Ok(self.on_event());
            }
            if !self.ticker.wait(self.timings.sample_interval) {
                return Ok(StageId::E);
            }
        }

        let budget = Duration::from_secs(self.settings.boss_wait_time);
        let waited = self.ticker.now().saturating_duration_since(started);
        if waited > budget {
            self.watch_started = None;
            self.report(format!("Stage E: no event for {}s, switching channel", waited.as_secs()));
            return Ok(StageId::F);
        }
        let left = budget - waited;
        self.report(format!("Stage E: watching for event ({}s left)", left.as_secs()));
        Ok(StageId::E)
    }

    /// Notify, pause, and either count down to an automatic switch or wait
    /// for the operator to resume.
    fn on_event(&mut self) -> StageId {
        logger::info_p(logger::STAGE, "target event detected");
        if let Err(e) = self.notifier.notify(&event_message()) {
            logger::warn_p(logger::STAGE, &format!("event notification failed: {:#}", e));
        }
        self.state.pause();

        if self.settings.auto_channel_switch_after_boss {
            let secs = self.timings.event_hold.as_secs().max(1);
            for left in (1..=secs).rev() {
                if !self.state.is_running() {
                    return StageId::E;
                }
                if !self.state.is_paused() {
                    break;
                }
                self.report(format!("Event detected! Switching channel in {}s", left));
                if !self.ticker.wait(Duration::from_secs(1)) {
                    return StageId::E;
                }
            }
            if !self.state.is_running() {
                return StageId::E;
            }
            self.state.resume();
            return StageId::F;
        }

        self.report("Event detected! Paused, resume to switch channel");
        while self.state.is_paused() {
            if !self.ticker.wait(self.timings.pause_poll) {
                return StageId::E;
            }
        }
        if self.state.is_running() {
            StageId::F
        } else {
            StageId::E
        }
    }

    /// Wait out a pause. False once the run ends.
    fn hold_while_paused(&self) -> bool {
        while self.state.is_paused() && self.state.is_running() {
            if !self.ticker.wait(self.timings.pause_poll) {
                return false;
            }
        }
        self.state.is_running() && !self.ticker.is_cancelled()
    }

    /// F: click the four channel-switch points in order, then go back to A.
    fn switch_channel(&mut self) -> Result<StageId> {
        let points = match self.settings.channel_points() {
            Ok(points) => points,
            Err(e) => {
                logger::warn_p(logger::STAGE, &e.to_string());
                self.hold(format!("Stage F: {}", e), self.timings.misconfigured);
                return Ok(StageId::F);
            }
        };
        self.report("Stage F: switching channel");
        for (i, at) in points.into_iter().enumerate() {
            if !self.hold_while_paused() {
                return Ok(StageId::F);
            }
            self.click(ClickRole::Channel(i), at)?;
            if !self.ticker.wait(self.timings.channel_gap) {
                return Ok(StageId::F);
            }
        }
        self.watch_started = None;
        self.report("Stage F: channel switch sent");
        self.ticker.wait(self.timings.settle);
        Ok(StageId::A)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::clock::{CancelToken, Clock, FakeClock};
    use crate::remote::RemoteChannel;
    use crate::testing::{checker, text_update, RecordingInput, RecordingNotifier, ScriptedBotApi, ScriptedScreen};
    use crate::types::Rgb;

    struct Rig {
        clock: Arc<FakeClock>,
        state: Arc<SharedState>,
        screen: Arc<ScriptedScreen>,
        input: Arc<RecordingInput>,
        notifier: Arc<RecordingNotifier>,
        token: CancelToken,
    }

    const LOGIN: Point = Point { x: 100, y: 200 };
    const CHARACTER: Point = Point { x: 300, y: 400 };

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.detection_area = Some(Rect::new(0, 0, 40, 40));
        s.click_positions.login = Some(LOGIN);
        s.click_positions.character = Some(CHARACTER);
        s.click_positions.channel = (1..=4).map(|i| Some(Point::new(i * 10, i * 10))).collect();
        s
    }

    fn login_frame() -> Capture {
        checker(40, 40, false)
    }

    fn character_frame() -> Capture {
        checker(40, 40, true)
    }

    fn channel_frame() -> Capture {
        Capture::filled(40, 40, Rgb(128, 128, 128))
    }

    fn event_frame() -> Capture {
        Capture::filled(40, 40, Rgb(255, 0, 0))
    }

    fn references(stages: &[StageId]) -> StageReferences {
        let mut refs = StageReferences::new();
        for &stage in stages {
            let frame = match stage {
                StageId::A => channel_frame(),
                StageId::C => login_frame(),
                StageId::D => character_frame(),
                _ => continue,
            };
            refs.insert(stage, frame);
        }
        refs
    }

    fn rig() -> Rig {
        let clock = Arc::new(FakeClock::new());
        let state = Arc::new(SharedState::new(clock.clone()));
        let token = CancelToken::new();
        assert!(state.begin_run(token.clone()));
        Rig {
            clock,
            state,
            screen: Arc::new(ScriptedScreen::new()),
            input: Arc::new(RecordingInput::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            token,
        }
    }

    fn machine(rig: &Rig, settings: Settings, refs: StageReferences, stage: StageId) -> StageMachine {
        let platform = Platform { screen: rig.screen.clone(), input: rig.input.clone() };
        let mut m = StageMachine::new(
            Arc::new(settings),
            Arc::new(refs),
            platform,
            rig.state.clone(),
            rig.notifier.clone(),
            Ticker::new(rig.clock.clone(), rig.token.clone()),
        );
        m.stage = stage;
        m
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn stage_a_without_reference_holds() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::A);
        assert_eq!(m.step(), StageId::A);
        assert_eq!(rig.screen.captures(), 0);
        assert!(rig.state.snapshot().status.contains("no reference"));
    }

    #[test]
    fn stage_a_advances_on_match_only() {
        let rig = rig();
        let mut m = machine(&rig, settings(), references(&[StageId::A]), StageId::A);
        rig.screen.set_region(login_frame());
        assert_eq!(m.step(), StageId::A);
        rig.screen.set_region(channel_frame());
        assert_eq!(m.step(), StageId::C);
        assert_eq!(rig.state.stage(), Some(StageId::C));
        assert!(rig.input.clicks().is_empty());
    }

    #[test]
    fn stage_c_without_reference_clicks_login() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::C);
        assert_eq!(m.step(), StageId::D);
        assert_eq!(rig.input.clicks(), vec![LOGIN]);
    }

    #[test]
    fn stage_c_mismatch_holds_without_clicking() {
        let rig = rig();
        let mut m = machine(&rig, settings(), references(&[StageId::C]), StageId::C);
        rig.screen.set_region(channel_frame());
        assert_eq!(m.step(), StageId::C);
        assert!(rig.input.clicks().is_empty());

        rig.screen.set_region(login_frame());
        assert_eq!(m.step(), StageId::D);
        assert_eq!(rig.input.clicks(), vec![LOGIN]);
    }

    #[test]
    fn stage_c_with_unbound_login_holds() {
        let rig = rig();
        let mut s = settings();
        s.click_positions.login = None;
        let mut m = machine(&rig, s, StageReferences::new(), StageId::C);
        assert_eq!(m.step(), StageId::C);
        assert!(rig.input.clicks().is_empty());
        assert!(rig.state.snapshot().status.contains("login click point not set"));
    }

    #[test]
    fn stage_d_reclicks_login_while_login_screen_shows() {
        let rig = rig();
        let mut m = machine(&rig, settings(), references(&[StageId::C, StageId::D]), StageId::D);
        rig.screen.set_region(login_frame());
        assert_eq!(m.step(), StageId::D);
        assert_eq!(rig.input.clicks(), vec![LOGIN]);
    }

    #[test]
    fn stage_d_selects_character_on_match() {
        let rig = rig();
        let mut m = machine(&rig, settings(), references(&[StageId::C, StageId::D]), StageId::D);
        rig.screen.set_region(channel_frame());
        assert_eq!(m.step(), StageId::D);
        assert!(rig.input.clicks().is_empty());

        rig.screen.set_region(character_frame());
        assert_eq!(m.step(), StageId::E);
        assert_eq!(rig.input.clicks(), vec![CHARACTER]);
    }

    #[test]
    fn stage_d_without_reference_clicks_character() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::D);
        assert_eq!(m.step(), StageId::E);
        assert_eq!(rig.input.clicks(), vec![CHARACTER]);
    }

    #[test]
    fn stage_e_switches_after_wait_budget() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::E);
        rig.screen.set_region(channel_frame());
        let start = rig.clock.now();

        let mut steps = 0;
        while m.step() == StageId::E {
            steps += 1;
            assert!(steps < 100, "never left stage E");
        }
        assert_eq!(m.stage(), StageId::F);
        let waited = rig.clock.now() - start;
        assert!(waited > Duration::from_secs(30), "left after {:?}", waited);
        assert!(waited <= Duration::from_secs(32), "left after {:?}", waited);
        assert!(rig.notifier.messages().is_empty());
    }

    #[test]
    fn stage_e_event_with_auto_switch_counts_down_then_switches() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::E);
        rig.screen.queue_region(channel_frame());
        rig.screen.set_region(event_frame());
        let start = rig.clock.now();

        assert_eq!(m.step(), StageId::F);
        assert!(!rig.state.is_paused());
        assert!(rig.clock.now() - start >= Duration::from_secs(5));
        let sent = rig.notifier.messages();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Target event detected!"));
    }

    #[test]
    fn stage_e_event_without_auto_switch_waits_for_resume() {
        let rig = rig();
        let mut s = settings();
        s.auto_channel_switch_after_boss = false;
        let mut m = machine(&rig, s, StageReferences::new(), StageId::E);
        rig.screen.set_region(event_frame());

        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || {
            let next = m.step();
            tx.send(()).ok();
            next
        });

        wait_until("pause", || rig.state.is_paused());
        thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err(), "stage E returned while paused");
        assert_eq!(rig.state.stage(), Some(StageId::E));

        rig.state.resume();
        assert_eq!(worker.join().unwrap(), StageId::F);
        assert_eq!(rig.notifier.messages().len(), 1);
    }

    #[test]
    fn chat_resume_command_releases_event_pause() {
        let rig = rig();
        let mut s = settings();
        s.auto_channel_switch_after_boss = false;
        let mut m = machine(&rig, s, StageReferences::new(), StageId::E);
        rig.screen.set_region(event_frame());

        let api = Arc::new(ScriptedBotApi::default());
        let mut channel = RemoteChannel::new(api.clone(), 77, rig.state.clone(), rig.screen.clone());

        let worker = thread::spawn(move || m.step());
        wait_until("pause", || rig.state.is_paused());
        assert!(!worker.is_finished());

        api.push_batch(vec![text_update(1, 77, "/resume")]);
        assert_eq!(channel.poll_once().unwrap(), 1);
        assert_eq!(worker.join().unwrap(), StageId::F);
        assert!(!rig.state.is_paused());
        assert!(api.replies().iter().any(|r| r.contains("Run resumed")));
    }

    #[test]
    fn stop_during_event_pause_keeps_stage_e() {
        let rig = rig();
        let mut s = settings();
        s.auto_channel_switch_after_boss = false;
        let mut m = machine(&rig, s, StageReferences::new(), StageId::E);
        rig.screen.set_region(event_frame());

        let worker = thread::spawn(move || m.step());
        wait_until("pause", || rig.state.is_paused());
        rig.state.stop();
        assert_eq!(worker.join().unwrap(), StageId::E);
    }

    #[test]
    fn stage_f_clicks_channel_points_in_order() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::F);
        assert_eq!(m.step(), StageId::A);
        let expected: Vec<Point> = (1..=4).map(|i| Point::new(i * 10, i * 10)).collect();
        assert_eq!(rig.input.clicks(), expected);
    }

    #[test]
    fn stage_f_with_missing_points_holds() {
        let rig = rig();
        let mut s = settings();
        s.click_positions.channel[2] = None;
        let mut m = machine(&rig, s, StageReferences::new(), StageId::F);
        assert_eq!(m.step(), StageId::F);
        assert!(rig.input.clicks().is_empty());
        assert!(rig.state.snapshot().status.contains("3 bound"));
    }

    #[test]
    fn stage_f_aborts_when_cancelled_mid_sequence() {
        let rig = rig();
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::F);
        rig.state.stop();
        assert_eq!(m.step(), StageId::F);
        assert!(rig.input.clicks().is_empty());
    }

    #[test]
    fn handler_error_is_reported_and_stage_retried() {
        let rig = rig();
        rig.input.set_failing(true);
        let mut m = machine(&rig, settings(), StageReferences::new(), StageId::C);
        assert_eq!(m.step(), StageId::C);
        let status = rig.state.snapshot().status;
        assert!(status.starts_with("Stage C: error - "), "{}", status);
        assert!(status.contains("unplugged"));

        rig.input.set_failing(false);
        assert_eq!(m.step(), StageId::D);
    }

    #[test]
    fn capture_failure_is_treated_as_mismatch() {
        let rig = rig();
        // no region frame set: every capture fails
        let mut m = machine(&rig, settings(), references(&[StageId::A]), StageId::A);
        assert_eq!(m.step(), StageId::A);
        assert!(rig.screen.captures() > 0);
    }

    #[test]
    fn paused_loop_runs_no_stage_logic_until_stopped() {
        let rig = rig();
        let m = machine(&rig, settings(), references(&[StageId::A]), StageId::A);
        rig.state.pause();
        let worker = thread::spawn(move || m.run());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(rig.screen.captures(), 0);
        assert_eq!(rig.state.stage(), Some(StageId::A));

        rig.state.stop();
        worker.join().unwrap();
        assert_eq!(rig.screen.captures(), 0);
    }

    #[test]
    fn run_loop_exits_on_stop() {
        let rig = rig();
        rig.screen.set_region(login_frame());
        let m = machine(&rig, settings(), references(&[StageId::A]), StageId::A);
        let worker = thread::spawn(move || m.run());
        wait_until("first sample", || rig.screen.captures() > 0);
        rig.state.stop();
        worker.join().unwrap();
        assert!(!rig.state.is_running());
        assert_eq!(rig.state.stage(), Some(StageId::A));
    }
}
