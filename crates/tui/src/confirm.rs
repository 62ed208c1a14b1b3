use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

/// Modal yes/no question drawn over the console. Defaults to "no".
pub struct ConfirmDialog {
    pub message: String,
    pub yes_label: &'static str,
    pub no_label: &'static str,
    pub selected: bool, // true = yes
}

impl ConfirmDialog {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), yes_label: "Stop & quit", no_label: "Keep running", selected: false }
    }

    pub fn toggle(&mut self) {
        self.selected = !self.selected;
    }

    fn button(label: &str, active: bool, bg: Color) -> Span<'static> {
        let style = if active {
            Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Span::styled(format!(" [{}] ", label), style)
    }

    pub fn render(&self, f: &mut Frame) {
        let width = (self.message.len() as u16 + 6).max(44);
        let area = centered_rect(width, 8, f.area());
        f.render_widget(Clear, area);

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Confirm ");
        let inner = block.inner(area);
        f.render_widget(block, area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1), // message
                Constraint::Length(1),
                Constraint::Length(1), // buttons
                Constraint::Length(1), // key hint
            ])
            .split(inner);

        let message = Paragraph::new(Span::styled(self.message.as_str(), Style::default().fg(Color::White)))
            .alignment(Alignment::Center);
        f.render_widget(message, rows[1]);

        let buttons = Line::from(vec![
            Self::button(self.yes_label, self.selected, Color::Green),
            Span::raw("   "),
            Self::button(self.no_label, !self.selected, Color::Red),
        ]);
        f.render_widget(Paragraph::new(buttons).alignment(Alignment::Center), rows[3]);

        let hint = Span::styled("tab switch, enter choose, y / n", Style::default().fg(Color::DarkGray));
        f.render_widget(Paragraph::new(hint).alignment(Alignment::Center), rows[4]);
    }
}

/// Centered `width` x `height` rect inside `area`, clipped to it.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}
