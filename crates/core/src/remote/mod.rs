//! Chat-bot remote control.

pub mod api;
pub mod channel;
pub mod command;

pub use api::{BotApi, ChatNotifier, HttpBotApi};
pub use channel::RemoteChannel;
pub use command::{Origin, RemoteCommand};
