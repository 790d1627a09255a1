use std::time::Duration;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use targetctl_core::model::MonotonicTime;

use super::app::{App, StatusMessage};
use super::theme::styles;

/// Time since the last state change, e.g. ` 3d  0h 12m  5s`. Leading zero
/// fields are left out; seconds are always shown.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let seconds = total % 60;
    let minutes = total / 60 % 60;
    let hours = total / 3_600 % 24;
    let days = total / 86_400;

    let mut out = String::new();
    let mut started = false;
    for (value, unit) in [(days, 'd'), (hours, 'h'), (minutes, 'm')] {
        if value > 0 || started {
            out.push_str(&format!("{:>2}{} ", value, unit));
            started = true;
        }
    }
    out.push_str(&format!("{:>2}s", seconds));
    out
}

pub fn draw(f: &mut Frame, app: &mut App) {
    let area = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);

    draw_units(f, app, chunks[0]);
    draw_bottom_bar(f, app, chunks[1]);
}

fn draw_units(f: &mut Frame, app: &mut App, area: Rect) {
    let now = MonotonicTime::now();
    // borders, checkbox and the uptime column
    let name_width = (area.width as usize).saturating_sub(2 + 4 + 16);

    let items: Vec<ListItem> = app
        .rows
        .iter()
        .map(|row| {
            let checkbox = if app.is_selected(&row.name) {
                "[*] "
            } else {
                "[ ] "
            };
            let name = format!("{}{}", "  ".repeat(row.depth), row.name);
            let uptime = format_uptime(row.state_changed.elapsed_until(now));
            ListItem::new(Line::from(vec![
                Span::raw(checkbox),
                Span::raw(format!("{:<width$}", name, width = name_width)),
                Span::raw(format!("{:>16}", uptime)),
            ]))
            .style(styles::state(row.state))
        })
        .collect();

    let title = Line::from(vec![Span::styled(
        format!(" {} ", app.root.name),
        styles::title(app.root.state),
    )]);
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(styles::border())
                .title(title),
        )
        .highlight_style(styles::cursor());

    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn draw_bottom_bar(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    for (key, label) in [
        ("a", "Select all"),
        ("s", "Start"),
        ("S", "Stop"),
        ("r", "Restart"),
        ("l", "Reload"),
        ("q", "Quit"),
    ] {
        spans.push(Span::styled(key, styles::key_hint()));
        spans.push(Span::styled(format!(" {}  ", label), styles::text_muted()));
    }

    if let Some(message) = &app.message {
        let style = match message {
            StatusMessage::Error(_) => styles::error(),
            StatusMessage::Info(_) => styles::text(),
        };
        spans.push(Span::styled(message.text().to_string(), style));
    }

    let mut status = Vec::new();
    if app.selected_count() > 0 {
        status.push(Span::styled(
            format!("Selected: {} ", app.selected_count()),
            styles::text(),
        ));
    }
    if app.summary.failed > 0 {
        status.push(Span::styled(
            format!("{} failed ", app.summary.failed),
            styles::error(),
        ));
    }
    status.push(Span::styled(
        format!("{}/{}", app.summary.active, app.summary.total),
        styles::success(),
    ));

    let status_width: u16 = status.iter().map(|s| s.width() as u16).sum();
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(status_width)])
        .split(area);

    f.render_widget(Paragraph::new(Line::from(spans)), chunks[0]);
    f.render_widget(Paragraph::new(Line::from(status)), chunks[1]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), " 0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(61)), " 1m  1s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), " 1h  0m  0s");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 5)),
            " 2d  0h  0m  5s"
        );
        assert_eq!(
            format_uptime(Duration::from_millis(125_999)),
            " 2m  5s"
        );
    }
}
