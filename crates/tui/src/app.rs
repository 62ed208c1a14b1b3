use std::sync::{mpsc, Arc, Mutex};

use chanwatch_core::monitor::Monitor;
use chanwatch_core::state::RunState;
use chanwatch_core::types::Command;

use crate::confirm::ConfirmDialog;

/// Log lines kept for the panel.
const LOG_CAPACITY: usize = 2000;

pub struct App {
    pub monitor: Arc<Monitor>,
    pub snapshot: RunState,
    snapshot_rx: mpsc::Receiver<RunState>,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(monitor: Arc<Monitor>, log_rx: mpsc::Receiver<String>, cmd_tx: mpsc::Sender<Command>) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::channel();
        let snapshot_tx = Mutex::new(snapshot_tx);
        monitor.state().observe(move |run| {
            if let Ok(tx) = snapshot_tx.lock() {
                tx.send(run.clone()).ok();
            }
        });
        let snapshot = monitor.snapshot();
        Self {
            monitor,
            snapshot,
            snapshot_rx,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            should_quit: false,
        }
    }

    /// Take the newest published run state and any new log lines.
    pub fn refresh(&mut self) {
        while let Ok(run) = self.snapshot_rx.try_recv() {
            self.snapshot = run;
        }
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n).min(self.log_messages.len());
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn start_stop(&mut self) {
        self.cmd_tx.send(Command::StartStop).ok();
    }

    pub fn pause_resume(&mut self) {
        self.cmd_tx.send(Command::PauseResume).ok();
    }

    pub fn probe(&mut self) {
        self.cmd_tx.send(Command::Probe).ok();
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quit at once when idle; ask first while a run is active.
    pub fn request_quit(&mut self) {
        if self.monitor.state().is_running() {
            self.confirm = Some(ConfirmDialog::new("A run is active. Stop it and quit?"));
        } else {
            self.quit();
        }
    }

    /// Close the dialog; quit if it was answered Yes.
    pub fn answer_confirm(&mut self, yes: bool) {
        if self.confirm.take().is_some() && yes {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}
