use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::ui;
use crate::App;

pub fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> anyhow::Result<()> {
    loop {
        if app.should_quit {
            return Ok(());
        }

        app.refresh();
        terminal.draw(|f| ui::draw(f, app))?;

        // 100ms poll keeps the status line ticking
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if app.confirm.is_some() {
                    confirm_key(app, key);
                } else {
                    main_key(app, key);
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => app.scroll_log_up(3),
                MouseEventKind::ScrollDown => app.scroll_log_down(3),
                _ => {}
            },
            _ => {}
        }
    }
}

fn main_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => app.request_quit(),
        KeyCode::Char('s') | KeyCode::Char('S') => app.start_stop(),
        KeyCode::Char('p') | KeyCode::Char('P') => app.pause_resume(),
        KeyCode::Char('t') | KeyCode::Char('T') => app.probe(),
        KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
        KeyCode::Up | KeyCode::Char('k') => app.scroll_log_up(1),
        KeyCode::Down | KeyCode::Char('j') => app.scroll_log_down(1),
        KeyCode::PageUp => app.scroll_log_up(10),
        KeyCode::PageDown => app.scroll_log_down(10),
        KeyCode::End => app.log_scroll = 0,
        _ => {}
    }
}

fn confirm_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
            if let Some(dialog) = app.confirm.as_mut() {
                dialog.toggle();
            }
        }
        KeyCode::Enter => {
            let yes = app.confirm.as_ref().is_some_and(|d| d.selected);
            app.answer_confirm(yes);
        }
        KeyCode::Char('y') | KeyCode::Char('Y') => app.answer_confirm(true),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.answer_confirm(false),
        _ => {}
    }
}
