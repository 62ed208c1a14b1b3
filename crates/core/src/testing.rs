//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::json;

use crate::error::CaptureError;
use crate::notify::Notifier;
use crate::platform::{InputDriver, ScreenSampler};
use crate::remote::api::{BotApi, BotCommand, InlineKeyboard, Update};
use crate::state::SharedState;
use crate::types::{Capture, Point, Rect, Rgb};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Screen whose region frames are set (or queued) by the test.
#[derive(Default)]
pub struct ScriptedScreen {
    region: Mutex<Option<Capture>>,
    queue: Mutex<VecDeque<Capture>>,
    fail: AtomicBool,
    captures: AtomicUsize,
}

impl ScriptedScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let s = Self::default();
        s.fail.store(true, Ordering::SeqCst);
        s
    }

    /// Frame returned for every region capture once the queue is empty.
    pub fn set_region(&self, frame: Capture) {
        *lock(&self.region) = Some(frame);
    }

    pub fn queue_region(&self, frame: Capture) {
        lock(&self.queue).push_back(frame);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl ScreenSampler for ScriptedScreen {
    fn capture(&self, region: Option<Rect>) -> Result<Capture, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CaptureError::NoDisplay);
        }
        if region.is_none() {
            return Ok(Capture::filled(8, 6, Rgb(10, 20, 30)));
        }
        if let Some(frame) = lock(&self.queue).pop_front() {
            return Ok(frame);
        }
        lock(&self.region).clone().ok_or(CaptureError::NoDisplay)
    }
}

#[derive(Default)]
pub struct RecordingInput {
    clicks: Mutex<Vec<Point>>,
    fail: AtomicBool,
}

impl RecordingInput {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn clicks(&self) -> Vec<Point> {
        lock(&self.clicks).clone()
    }
}

impl InputDriver for RecordingInput {
    fn click(&self, at: Point) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("input device unplugged");
        }
        lock(&self.clicks).push(at);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, text: &str) -> Result<()> {
        lock(&self.messages).push(text.to_string());
        Ok(())
    }
}

/// Checkerboard frame; `invert` swaps the two colors.
pub fn checker(w: u32, h: u32, invert: bool) -> Capture {
    let mut frame = Capture::filled(w, h, Rgb(0, 0, 0));
    for y in 0..h {
        for x in 0..w {
            let on = ((x / 4 + y / 4) % 2 == 0) ^ invert;
            let v = if on { 230 } else { 20 };
            frame.set_rgb(x, y, Rgb(v, v, v));
        }
    }
    frame
}

/// One recorded Bot API call.
#[derive(Debug, Clone)]
pub enum ApiCall {
    GetUpdates(i64),
    Send { chat: i64, text: String, keyboard: bool },
    Edit { chat: i64, message_id: i64, text: String, keyboard: bool },
    /// `paused_at_call` is the watched run state's pause flag when the ack went out.
    Answer { query_id: String, paused_at_call: Option<bool> },
    Photo { chat: i64, path: PathBuf, existed: bool },
    Commands(usize),
}

/// Bot API that serves queued update batches and records every call.
#[derive(Default)]
pub struct ScriptedBotApi {
    batches: Mutex<VecDeque<Result<Vec<Update>, String>>>,
    calls: Mutex<Vec<ApiCall>>,
    fail_photo: AtomicBool,
    watched: Mutex<Option<Arc<SharedState>>>,
}

impl ScriptedBotApi {
    pub fn push_batch(&self, updates: Vec<Update>) {
        lock(&self.batches).push_back(Ok(updates));
    }

    pub fn push_error(&self, message: &str) {
        lock(&self.batches).push_back(Err(message.to_string()));
    }

    pub fn set_photo_failing(&self, fail: bool) {
        self.fail_photo.store(fail, Ordering::SeqCst);
    }

    pub fn watch(&self, state: Arc<SharedState>) {
        *lock(&self.watched) = Some(state);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        lock(&self.calls).clone()
    }

    pub fn polled_offsets(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::GetUpdates(offset) => Some(offset),
                _ => None,
            })
            .collect()
    }

    /// Text of every sent or edited message, in order.
    pub fn replies(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Send { text, .. } | ApiCall::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn photos(&self) -> Vec<(PathBuf, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Photo { path, existed, .. } => Some((path, existed)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        lock(&self.calls).push(call);
    }
}

impl BotApi for ScriptedBotApi {
    fn get_updates(&self, offset: i64, _long_poll: Duration) -> Result<Vec<Update>> {
        self.record(ApiCall::GetUpdates(offset));
        match lock(&self.batches).pop_front() {
            Some(Ok(updates)) => Ok(updates),
            Some(Err(message)) => bail!(message),
            None => Ok(Vec::new()),
        }
    }

    fn send_message(&self, chat: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()> {
        self.record(ApiCall::Send { chat, text: text.to_string(), keyboard: keyboard.is_some() });
        Ok(())
    }

    fn edit_message_text(&self, chat: i64, message_id: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()> {
        self.record(ApiCall::Edit { chat, message_id, text: text.to_string(), keyboard: keyboard.is_some() });
        Ok(())
    }

    fn answer_callback_query(&self, query_id: &str, _text: &str) -> Result<()> {
        let paused_at_call = lock(&self.watched).as_ref().map(|s| s.is_paused());
        self.record(ApiCall::Answer { query_id: query_id.to_string(), paused_at_call });
        Ok(())
    }

    fn send_photo(&self, chat: i64, photo: &Path, _caption: &str) -> Result<()> {
        self.record(ApiCall::Photo { chat, path: photo.to_path_buf(), existed: photo.is_file() });
        if self.fail_photo.load(Ordering::SeqCst) {
            bail!("upload rejected");
        }
        Ok(())
    }

    fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()> {
        self.record(ApiCall::Commands(commands.len()));
        Ok(())
    }
}

pub fn text_update(id: i64, chat: i64, text: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": id,
        "message": { "message_id": id * 10, "chat": { "id": chat }, "text": text },
    }))
    .unwrap()
}

pub fn callback_update(id: i64, chat: i64, message_id: i64, data: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": id,
        "callback_query": {
            "id": format!("q{}", id),
            "data": data,
            "message": { "message_id": message_id, "chat": { "id": chat } },
        },
    }))
    .unwrap()
}
