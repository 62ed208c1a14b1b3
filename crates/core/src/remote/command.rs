use std::sync::OnceLock;

use regex::Regex;

use super::api::{BotCommand, InlineButton, InlineKeyboard};

/// Operator command received over the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Menu,
    Status,
    Pause,
    Resume,
    Stop,
    Screenshot,
    Unknown,
}

/// Where a command came from, which decides how the reply is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A `/command` text message; replies go out as new messages.
    Text { chat: i64 },
    /// An inline button; replies edit the message that carried the button.
    Button { chat: i64, message_id: i64, query_id: String },
}

impl Origin {
    pub fn chat(&self) -> i64 {
        match self {
            Origin::Text { chat } | Origin::Button { chat, .. } => *chat,
        }
    }
}

const TABLE: [(RemoteCommand, &str, &str); 6] = [
    (RemoteCommand::Menu, "menu", "Show the command menu"),
    (RemoteCommand::Status, "status", "Show run status"),
    (RemoteCommand::Pause, "pause", "Pause the run"),
    (RemoteCommand::Resume, "resume", "Resume the run"),
    (RemoteCommand::Stop, "stop", "Stop the run"),
    (RemoteCommand::Screenshot, "screenshot", "Send a screenshot"),
];

fn command_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // `/status` or `/status@somebot`, followed by anything
    RE.get_or_init(|| Regex::new(r"^/([A-Za-z_]+)(?:@\w+)?(?:\s|$)").ok())
        .as_ref()
}

impl RemoteCommand {
    /// Token used both as the `/command` name and as button callback data.
    pub fn token(self) -> Option<&'static str> {
        TABLE.iter().find(|(c, ..)| *c == self).map(|(_, t, _)| *t)
    }

    fn from_token(token: &str) -> Self {
        let token = token.to_ascii_lowercase();
        TABLE
            .iter()
            .find(|(_, t, _)| *t == token)
            .map(|(c, ..)| *c)
            .unwrap_or(RemoteCommand::Unknown)
    }

    /// Parse a chat message. `None` means the text is not a command at all.
    pub fn parse_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        Some(match command_re().and_then(|re| re.captures(text)) {
            Some(caps) => Self::from_token(&caps[1]),
            None => RemoteCommand::Unknown,
        })
    }

    pub fn parse_callback(data: &str) -> Self {
        Self::from_token(data.trim())
    }
}

/// Commands published to the chat's `/` menu.
pub fn bot_commands() -> Vec<BotCommand> {
    TABLE
        .iter()
        .map(|(_, t, d)| BotCommand { command: t.to_string(), description: d.to_string() })
        .collect()
}

/// Six buttons, two per row, mirroring the text commands.
pub fn keyboard() -> InlineKeyboard {
    let button = |text: &str, cmd: RemoteCommand| InlineButton {
        text: text.to_string(),
        callback_data: cmd.token().unwrap_or_default().to_string(),
    };
    InlineKeyboard {
        inline_keyboard: vec![
            vec![button("Status", RemoteCommand::Status), button("Screenshot", RemoteCommand::Screenshot)],
            vec![button("Pause", RemoteCommand::Pause), button("Resume", RemoteCommand::Resume)],
            vec![button("Stop", RemoteCommand::Stop), button("Menu", RemoteCommand::Menu)],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_commands_parse_by_leading_token() {
        assert_eq!(RemoteCommand::parse_text("/status"), Some(RemoteCommand::Status));
        assert_eq!(RemoteCommand::parse_text("  /PAUSE now"), Some(RemoteCommand::Pause));
        assert_eq!(RemoteCommand::parse_text("/screenshot@chan_watch_bot"), Some(RemoteCommand::Screenshot));
        assert_eq!(RemoteCommand::parse_text("/launch"), Some(RemoteCommand::Unknown));
        assert_eq!(RemoteCommand::parse_text("/123"), Some(RemoteCommand::Unknown));
        assert_eq!(RemoteCommand::parse_text("/statusx"), Some(RemoteCommand::Unknown));
        assert_eq!(RemoteCommand::parse_text("hello"), None);
    }

    #[test]
    fn callbacks_parse_by_data() {
        assert_eq!(RemoteCommand::parse_callback("resume"), RemoteCommand::Resume);
        assert_eq!(RemoteCommand::parse_callback("reboot"), RemoteCommand::Unknown);
    }

    #[test]
    fn keyboard_mirrors_every_command() {
        let k = keyboard();
        let data: Vec<&str> = k.inline_keyboard.iter().flatten().map(|b| b.callback_data.as_str()).collect();
        assert_eq!(data.len(), 6);
        for c in bot_commands() {
            assert!(data.contains(&c.command.as_str()), "{} has no button", c.command);
        }
        assert_eq!(RemoteCommand::Unknown.token(), None);
    }
}
