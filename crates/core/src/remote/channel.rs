//! Long-polling chat loop that answers status queries and applies
//! pause / resume / stop to the shared run state.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use image::ImageFormat;

use super::api::{BotApi, CallbackQuery, Update};
use super::command::{bot_commands, keyboard, Origin, RemoteCommand};
use crate::clock::Ticker;
use crate::logger;
use crate::notify::{format_duration, timestamp};
use crate::platform::ScreenSampler;
use crate::state::{FlagChange, SharedState};
use crate::types::RunStatus;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const LONG_POLL: Duration = Duration::from_secs(2);

pub struct RemoteChannel {
    api: Arc<dyn BotApi>,
    /// Only updates from this chat are dispatched.
    chat: i64,
    state: Arc<SharedState>,
    screen: Arc<dyn ScreenSampler>,
    /// Highest update id seen so far.
    offset: i64,
    welcome: bool,
}

impl RemoteChannel {
    pub fn new(api: Arc<dyn BotApi>, chat: i64, state: Arc<SharedState>, screen: Arc<dyn ScreenSampler>) -> Self {
        Self { api, chat, state, screen, offset: 0, welcome: true }
    }

    pub fn with_welcome(mut self, welcome: bool) -> Self {
        self.welcome = welcome;
        self
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Publish the command menu and, if enabled, the welcome message.
    pub fn announce(&self) {
        match self.api.set_my_commands(&bot_commands()) {
            Ok(()) => logger::info_p(logger::REMOTE, "command menu published"),
            Err(e) => logger::warn_p(logger::REMOTE, &format!("setMyCommands failed: {:#}", e)),
        }
        if !self.welcome {
            return;
        }
        let text = format!(
            "Channel watch is online\nTime: {}\n\nUse the buttons below, or pick a command from the / menu.",
            timestamp()
        );
        if let Err(e) = self.api.send_message(self.chat, &text, Some(&keyboard())) {
            logger::warn_p(logger::REMOTE, &format!("welcome message failed: {:#}", e));
        }
    }

    /// Fetch one batch of updates and dispatch them in arrival order.
    pub fn poll_once(&mut self) -> Result<usize> {
        let updates = self.api.get_updates(self.offset + 1, LONG_POLL)?;
        for update in &updates {
            self.dispatch(update);
            self.offset = self.offset.max(update.update_id);
        }
        Ok(updates.len())
    }

    pub fn run(mut self, ticker: Ticker) {
        logger::info_p(logger::REMOTE, "remote channel started");
        self.announce();
        while !ticker.is_cancelled() {
            let pause = match self.poll_once() {
                Ok(_) => POLL_INTERVAL,
                Err(e) => {
                    logger::warn_p(logger::REMOTE, &format!("poll failed: {:#}", e));
                    ERROR_BACKOFF
                }
            };
            if !ticker.wait(pause) {
                break;
            }
        }
        logger::info_p(logger::REMOTE, "remote channel stopped");
    }

    fn dispatch(&self, update: &Update) {
        if update.chat_id() != Some(self.chat) {
            return;
        }
        if let Some(query) = &update.callback_query {
            self.on_button(query);
        } else if let Some(text) = update.message.as_ref().and_then(|m| m.text.as_deref()) {
            self.on_text(text);
        }
    }

    fn on_text(&self, text: &str) {
        let Some(cmd) = RemoteCommand::parse_text(text) else {
            return;
        };
        logger::info_p(logger::REMOTE, &format!("command {:?}", cmd));
        let origin = Origin::Text { chat: self.chat };
        let reply = self.handle(cmd, &origin).unwrap_or_else(|e| Some(failure(&e)));
        if let Some(reply) = reply {
            if let Err(e) = self.api.send_message(self.chat, &reply, None) {
                logger::warn_p(logger::REMOTE, &format!("reply failed: {:#}", e));
            }
        }
    }

    fn on_button(&self, query: &CallbackQuery) {
        let Some(message) = &query.message else {
            return;
        };
        // acknowledge before touching any state so the client stops spinning
        if let Err(e) = self.api.answer_callback_query(&query.id, "Working...") {
            logger::warn_p(logger::REMOTE, &format!("callback ack failed: {:#}", e));
        }
        let cmd = RemoteCommand::parse_callback(query.data.as_deref().unwrap_or_default());
        logger::info_p(logger::REMOTE, &format!("button {:?}", cmd));
        let origin = Origin::Button {
            chat: message.chat.id,
            message_id: message.message_id,
            query_id: query.id.clone(),
        };
        let reply = self.handle(cmd, &origin).unwrap_or_else(|e| Some(failure(&e)));
        if let Some(reply) = reply {
            if let Err(e) = self.api.edit_message_text(origin.chat(), message.message_id, &reply, Some(&keyboard())) {
                logger::warn_p(logger::REMOTE, &format!("message edit failed: {:#}", e));
            }
        }
    }

    /// Run `cmd`. `None` means the reply already went out (menu, photo).
    fn handle(&self, cmd: RemoteCommand, origin: &Origin) -> Result<Option<String>> {
        let button = matches!(origin, Origin::Button { .. });
        let reply = match cmd {
            RemoteCommand::Menu if button => button_help(),
            RemoteCommand::Menu => {
                self.api.send_message(origin.chat(), &menu_text(), Some(&keyboard()))?;
                return Ok(None);
            }
            RemoteCommand::Status => self.status_text(),
            RemoteCommand::Pause => stamped(match self.state.pause() {
                FlagChange::Applied => "Run paused",
                FlagChange::Unchanged => "Run is already paused",
                FlagChange::NotRunning => "Not running, nothing to pause",
            }),
            RemoteCommand::Resume => stamped(match self.state.resume() {
                FlagChange::Applied => "Run resumed",
                FlagChange::Unchanged => "Run is not paused",
                FlagChange::NotRunning => "Not running, start it first",
            }),
            RemoteCommand::Stop => {
                let change = self.state.stop();
                if change == FlagChange::Applied {
                    self.state.set_status("Stopped from chat");
                    logger::info_p(logger::REMOTE, "run stopped from chat");
                }
                stamped(match change {
                    FlagChange::Applied => "Run stopped",
                    _ => "Run is already stopped",
                })
            }
            RemoteCommand::Screenshot => {
                self.send_screenshot(origin.chat())?;
                if !button {
                    return Ok(None);
                }
                stamped("Screenshot sent")
            }
            RemoteCommand::Unknown if button => stamped("Unknown action"),
            RemoteCommand::Unknown => stamped("Unrecognized command, send /menu for the list"),
        };
        Ok(Some(reply))
    }

    fn status_text(&self) -> String {
        let snap = self.state.snapshot();
        let run = match snap.run_status() {
            RunStatus::NotStarted => "Not started",
            RunStatus::Running => "Running",
            RunStatus::Paused => "Paused",
            RunStatus::Stopped => "Stopped",
        };
        let stage = snap
            .stage
            .map(|s| format!("{} ({})", s, s.describe()))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "Run status: {}\nStage: {}\nIn stage: {}\nStatus: {}\nTime: {}",
            run,
            stage,
            format_duration(self.state.elapsed_in_stage()),
            snap.status,
            timestamp(),
        )
    }

    /// Capture the whole screen into a temporary PNG and upload it. The
    /// file is removed when this returns, whether or not the upload worked.
    fn send_screenshot(&self, chat: i64) -> Result<()> {
        let frame = self.screen.capture(None).context("screen capture failed")?;
        let mut file = tempfile::Builder::new()
            .prefix("chanwatch-shot-")
            .suffix(".png")
            .tempfile()?;
        frame.to_rgba_image().write_to(file.as_file_mut(), ImageFormat::Png)?;
        file.as_file_mut().flush()?;
        let caption = format!("Screenshot\nTime: {}", timestamp());
        self.api.send_photo(chat, file.path(), &caption)
    }
}

fn stamped(text: &str) -> String {
    format!("{}\nTime: {}", text, timestamp())
}

fn failure(e: &anyhow::Error) -> String {
    logger::error_p(logger::REMOTE, &format!("command failed: {:#}", e));
    stamped(&format!("Command failed: {:#}", e))
}

fn menu_text() -> String {
    let mut text = String::from("Commands\n\n");
    for c in bot_commands() {
        text.push_str(&format!("/{} - {}\n", c.command, c.description));
    }
    text.push_str("\nTap a button below, pick from the / menu, or type a command.");
    stamped(&text)
}

fn button_help() -> String {
    stamped(
        "Buttons\n\n\
         Status - current stage and time in stage\n\
         Screenshot - full screen capture\n\
         Pause / Resume - hold or continue the run\n\
         Stop - end the run\n\
         Menu - this help",
    )
}
