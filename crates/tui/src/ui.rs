use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use chanwatch_core::logger;
use chanwatch_core::notify::format_duration;
use chanwatch_core::settings::{Settings, CHANNEL_POINTS};
use chanwatch_core::types::{ClickRole, RunStatus, StageId};

use crate::App;

fn key(k: &'static str) -> Span<'static> {
    Span::styled(k, Style::default().fg(Color::Yellow))
}

fn field(label: &'static str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!(" {:<12}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let (banner_label, banner_bg) = match app.snapshot.run_status() {
        RunStatus::NotStarted => ("NOT STARTED (Press S to start)", Color::DarkGray),
        RunStatus::Running => ("RUNNING (Press S to stop)", Color::Green),
        RunStatus::Paused => ("PAUSED (Press P to resume)", Color::Yellow),
        RunStatus::Stopped => ("STOPPED (Press S to start)", Color::Red),
    };

    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::raw(" "),
            key("s"),
            Span::raw(" start/stop  "),
            key("p"),
            Span::raw(" pause  "),
            key("t"),
            Span::raw(" test detection  "),
            key("l"),
            Span::raw(" logs  "),
            key("q"),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    let stage = app
        .snapshot
        .stage
        .map(|s| format!("{} - {}", s, s.describe()))
        .unwrap_or_else(|| "-".to_string());
    lines.push(field("Stage", stage, Color::White));
    lines.push(field("Status", app.snapshot.status.clone(), Color::Cyan));
    if app.snapshot.stage.is_some() {
        let elapsed = app.monitor.state().elapsed_in_stage();
        lines.push(field("In stage", format_duration(elapsed), Color::White));
    }
    lines.push(Line::from(""));

    let settings = app.monitor.settings();
    lines.extend(settings_lines(&settings, app.monitor.references().len()));

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let width = left[0].width as usize;
    let pad = width.saturating_sub(banner_label.len());
    let banner_text = format!("{}{}{}", " ".repeat(pad / 2), banner_label, " ".repeat(pad - pad / 2));
    let banner = Paragraph::new(Line::from(Span::styled(
        banner_text,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left[0]);

    let body = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(body, left[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible));
        let start = total.saturating_sub(visible + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

        let title = if scroll > 0 { format!(" Logs (+{}) ", scroll) } else { " Logs ".to_string() };
        let panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn settings_lines(s: &Settings, references: usize) -> Vec<Line<'static>> {
    let on_off = |b: bool| if b { "on" } else { "off" };
    let area = match s.detection_area {
        Some(r) => format!("({}, {}) - ({}, {})  {}x{}", r.x1, r.y1, r.x2, r.y2, r.width(), r.height()),
        None => "not set".to_string(),
    };
    let area_color = if s.detection_area.is_some() { Color::White } else { Color::Red };
    let channel_bound = (0..CHANNEL_POINTS).filter(|&i| s.click_point(ClickRole::Channel(i)).is_some()).count();
    let clicks = format!(
        "login {}  character {}  channel {}/{}",
        if s.click_positions.login.is_some() { "set" } else { "unset" },
        if s.click_positions.character.is_some() { "set" } else { "unset" },
        channel_bound,
        CHANNEL_POINTS,
    );
    let thresholds: Vec<String> = StageId::ALL
        .iter()
        .filter(|st| !matches!(st, StageId::E | StageId::F))
        .map(|st| format!("{} {}%", st, s.threshold_for(*st)))
        .collect();

    vec![
        Line::from(Span::styled(" Settings", Style::default().fg(Color::White).add_modifier(Modifier::BOLD))),
        field("Region", area, area_color),
        field(
            "Target",
            format!(
                "rgb({}, {}, {})  tolerance {}  pixels > {}",
                s.target_color.0, s.target_color.1, s.target_color.2, s.color_tolerance, s.color_threshold
            ),
            Color::White,
        ),
        field("Clicks", clicks, Color::White),
        field("Match", thresholds.join("  "), Color::White),
        field("References", format!("{}/{} stages", references, StageId::ALL.len()), Color::White),
        field("Event wait", format!("{}s, auto switch {}", s.boss_wait_time, on_off(s.auto_channel_switch_after_boss)), Color::White),
        field(
            "Timeout",
            if s.stage_timeout_enabled { format!("{}s", s.stage_timeout_seconds) } else { "off".to_string() },
            Color::White,
        ),
        field("Remote", on_off(s.remote_enabled()).to_string(), Color::White),
    ]
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }
    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);

    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        logger::COLOR_GRAY => Color::DarkGray,
        logger::COLOR_BLUE => Color::LightBlue,
        logger::COLOR_GREEN => Color::LightGreen,
        logger::COLOR_MAGENTA => Color::LightMagenta,
        _ => Color::White,
    };

    let mut spans = vec![Span::styled(timestamp, Style::default().fg(Color::DarkGray)), Span::raw(" ")];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}
