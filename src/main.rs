use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use crossterm::{
    execute,
    event::{DisableMouseCapture, EnableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use chanwatch_core::clock::{CancelToken, SystemClock, Ticker};
use chanwatch_core::logger;
use chanwatch_core::monitor::{self, Monitor};
use chanwatch_core::notify::{LogNotifier, Notifier};
use chanwatch_core::platform::create_platform;
use chanwatch_core::remote::{BotApi, ChatNotifier, HttpBotApi, RemoteChannel};
use chanwatch_core::settings::{Settings, StageReferences};
use chanwatch_core::state::SharedState;
use chanwatch_core::types::Command;

fn main() -> Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    logger::init(&cwd.join("logs"))?;

    let settings_path = cwd.join("config.json");
    let settings = Settings::load(&settings_path)?;
    let references = StageReferences::load_dir(&cwd.join("stage_screenshots"));
    logger::info(&format!("loaded {} stage reference(s)", references.len()));

    let platform = create_platform();
    let state = Arc::new(SharedState::new(Arc::new(SystemClock)));

    // Chat remote control is optional: it needs both a token and a chat id
    let remote: Option<(Arc<dyn BotApi>, i64)> = match settings.telegram_chat_id {
        Some(chat) if settings.remote_enabled() => match HttpBotApi::new(settings.telegram_bot_token.trim()) {
            Ok(api) => {
                let api: Arc<dyn BotApi> = Arc::new(api);
                Some((api, chat))
            }
            Err(e) => {
                logger::error(&format!("remote control disabled: {:#}", e));
                None
            }
        },
        _ => None,
    };
    let notifier: Arc<dyn Notifier> = match &remote {
        Some((api, chat)) => Arc::new(ChatNotifier::new(api.clone(), *chat)),
        None => Arc::new(LogNotifier),
    };

    let monitor = Arc::new(Monitor::new(
        state.clone(),
        settings.clone(),
        references,
        platform.clone(),
        notifier,
    ));

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    logger::set_tui_sender(log_tx);
    logger::info("chanwatch started");

    let remote_token = CancelToken::new();
    let remote_thread = remote.map(|(api, chat)| {
        let channel = RemoteChannel::new(api, chat, state.clone(), platform.screen.clone())
            .with_welcome(settings.send_welcome_message);
        let ticker = Ticker::new(state.clock().clone(), remote_token.clone());
        thread::spawn(move || channel.run(ticker))
    });
    if remote_thread.is_none() {
        logger::warn("no bot token / chat id configured, remote control off");
    }

    let controller = {
        let monitor = Arc::clone(&monitor);
        thread::spawn(move || monitor::serve(monitor, cmd_rx))
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = chanwatch_tui::App::new(Arc::clone(&monitor), log_rx, cmd_tx);
    let result = chanwatch_tui::event::run(&mut terminal, &mut app);
    let restored = restore_terminal(&mut terminal);

    // dropping the app closes the command channel, so the controller exits
    // even if the console failed before sending Quit
    drop(app);
    Background { controller, remote_token, remote: remote_thread }.wind_down(&monitor, &settings_path);

    result.and(restored)
}

/// Threads started next to the console.
struct Background {
    controller: JoinHandle<()>,
    remote_token: CancelToken,
    remote: Option<JoinHandle<()>>,
}

impl Background {
    /// Join every thread and persist settings, whether or not the terminal
    /// was restored.
    fn wind_down(self, monitor: &Monitor, settings_path: &Path) {
        if self.controller.join().is_err() {
            logger::error("controller thread panicked");
        }
        self.remote_token.cancel();
        if let Some(remote) = self.remote {
            remote.join().ok();
        }
        if let Err(e) = monitor.settings().save(settings_path) {
            logger::error(&format!("failed to save {}: {:#}", settings_path.display(), e));
        }
    }
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    let raw = disable_raw_mode();
    let screen = execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture);
    let cursor = terminal.show_cursor();
    raw?;
    screen?;
    cursor?;
    Ok(())
}
