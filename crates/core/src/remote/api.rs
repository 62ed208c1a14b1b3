//! Telegram Bot API shapes and a blocking HTTP client for them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::notify::Notifier;

const API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const PHOTO_TIMEOUT: Duration = Duration::from_secs(30);
/// Client-side margin on top of the server-side long-poll window.
const POLL_MARGIN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// Chat the update came from, if it carries one.
    pub fn chat_id(&self) -> Option<i64> {
        if let Some(m) = &self.message {
            return Some(m.chat.id);
        }
        self.callback_query.as_ref()?.message.as_ref().map(|m| m.chat.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

/// The subset of the Bot API the remote channel uses.
pub trait BotApi: Send + Sync {
    fn get_updates(&self, offset: i64, long_poll: Duration) -> Result<Vec<Update>>;
    fn send_message(&self, chat: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()>;
    fn edit_message_text(&self, chat: i64, message_id: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()>;
    fn answer_callback_query(&self, query_id: &str, text: &str) -> Result<()>;
    fn send_photo(&self, chat: i64, photo: &Path, caption: &str) -> Result<()>;
    fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

pub struct HttpBotApi {
    client: Client,
    base: String,
}

impl HttpBotApi {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base(API_BASE, token)
    }

    pub fn with_base(base: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("http client init failed")?;
        Ok(Self { client, base: format!("{}/bot{}", base.trim_end_matches('/'), token) })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    fn decode<T: DeserializeOwned>(method: &str, response: reqwest::blocking::Response) -> Result<T> {
        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .with_context(|| format!("{}: invalid response ({})", method, status))?;
        if !envelope.ok {
            let why = envelope.description.unwrap_or_else(|| status.to_string());
            bail!("{} rejected: {}", method, why);
        }
        envelope.result.ok_or_else(|| anyhow!("{}: empty result", method))
    }

    fn call<T: DeserializeOwned>(&self, method: &str, body: Value, timeout: Duration) -> Result<T> {
        let response = self
            .client
            .post(self.url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .with_context(|| format!("{} request failed", method))?;
        Self::decode(method, response)
    }
}

impl BotApi for HttpBotApi {
    fn get_updates(&self, offset: i64, long_poll: Duration) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": long_poll.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", body, long_poll + POLL_MARGIN)
    }

    fn send_message(&self, chat: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()> {
        let mut body = json!({ "chat_id": chat, "text": text });
        if let Some(k) = keyboard {
            body["reply_markup"] = serde_json::to_value(k)?;
        }
        self.call::<Value>("sendMessage", body, SEND_TIMEOUT).map(drop)
    }

    fn edit_message_text(&self, chat: i64, message_id: i64, text: &str, keyboard: Option<&InlineKeyboard>) -> Result<()> {
        let mut body = json!({ "chat_id": chat, "message_id": message_id, "text": text });
        if let Some(k) = keyboard {
            body["reply_markup"] = serde_json::to_value(k)?;
        }
        self.call::<Value>("editMessageText", body, SEND_TIMEOUT).map(drop)
    }

    fn answer_callback_query(&self, query_id: &str, text: &str) -> Result<()> {
        let body = json!({ "callback_query_id": query_id, "text": text, "show_alert": false });
        self.call::<Value>("answerCallbackQuery", body, ACK_TIMEOUT).map(drop)
    }

    fn send_photo(&self, chat: i64, photo: &Path, caption: &str) -> Result<()> {
        let form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .file("photo", photo)
            .with_context(|| format!("cannot attach {}", photo.display()))?;
        let response = self
            .client
            .post(self.url("sendPhoto"))
            .timeout(PHOTO_TIMEOUT)
            .multipart(form)
            .send()
            .context("sendPhoto request failed")?;
        Self::decode::<Value>("sendPhoto", response).map(drop)
    }

    fn set_my_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let body = json!({ "commands": commands });
        self.call::<Value>("setMyCommands", body, SEND_TIMEOUT).map(drop)
    }
}

/// Delivers notifications as plain chat messages.
pub struct ChatNotifier {
    api: Arc<dyn BotApi>,
    chat: i64,
}

impl ChatNotifier {
    pub fn new(api: Arc<dyn BotApi>, chat: i64) -> Self {
        Self { api, chat }
    }
}

impl Notifier for ChatNotifier {
    fn notify(&self, text: &str) -> Result<()> {
        self.api.send_message(self.chat, text, None)
    }
}
