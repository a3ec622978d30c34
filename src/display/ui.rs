//! Drawing. Everything here reads from [`App`] and the shared store; nothing mutates.

use std::collections::VecDeque;

use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use super::app::{App, InputMode};
use super::{DisplayMode, RowKind, RowStatus, VisibleRow};
use crate::probe::AssertionOutcome;
use crate::registry::TargetKey;
use crate::store::{LogEntry, LogScope, Severity, SharedLog};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const LOG_PANEL_HEIGHT: u16 = 8;

pub fn render(f: &mut Frame, app: &App) {
    let area = f.area();
    let show_search = app.input == InputMode::Search || !app.state.search_text().is_empty();

    let mut constraints = vec![Constraint::Min(5)];
    if app.show_logs {
        constraints.push(Constraint::Length(LOG_PANEL_HEIGHT));
    }
    if show_search {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Length(1));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let mut next = 0;
    let main = chunks[next];
    next += 1;

    match app.state.mode() {
        DisplayMode::SinglePane => render_detail(f, app, main),
        DisplayMode::FlatList | DisplayMode::TreeView => {
            let panes = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
                .split(main);
            render_list(f, app, panes[0]);
            render_detail(f, app, panes[1]);
        }
    }

    if app.show_logs {
        render_logs(f, app, chunks[next]);
        next += 1;
    }
    if show_search {
        render_search(f, app, chunks[next]);
        next += 1;
    }
    render_footer(f, app, chunks[next]);
}

fn status_style(status: RowStatus) -> Style {
    match status {
        RowStatus::Up => Style::default().fg(Color::Green),
        RowStatus::Down => Style::default().fg(Color::Red),
        RowStatus::Pending => Style::default().fg(Color::DarkGray),
    }
}

fn status_icon(status: RowStatus) -> &'static str {
    match status {
        RowStatus::Up => "●",
        RowStatus::Down => "✖",
        RowStatus::Pending => "○",
    }
}

fn row_item(row: &VisibleRow) -> ListItem<'static> {
    let indent = "  ".repeat(usize::from(row.depth));
    let marker = match row.kind {
        RowKind::Group { collapsed: true, children } => format!("▸ ({}) ", children),
        RowKind::Group { collapsed: false, .. } => "▾ ".to_string(),
        _ => String::new(),
    };

    ListItem::new(Line::from(vec![
        Span::raw(indent),
        Span::styled(format!("{} ", status_icon(row.status)), status_style(row.status)),
        Span::raw(marker),
        Span::raw(row.label.clone()),
    ]))
}

fn render_list(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.state.mode() {
        DisplayMode::TreeView => format!("Targets ({} streams)", app.state.registry().len()),
        _ => format!("Targets ({})", app.state.registry().len()),
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    if app.state.rows().is_empty() {
        let empty = Paragraph::new(Span::styled("No matches", Style::default().fg(Color::DarkGray)))
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = app.state.rows().iter().map(row_item).collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default().with_selected(app.state.selected_index());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn render_detail(f: &mut Frame, app: &App, area: Rect) {
    let Some(key) = app.state.selected_key() else {
        let block = Block::default().borders(Borders::ALL).title("Details");
        f.render_widget(Paragraph::new("Nothing selected").block(block), area);
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(key.to_string())
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines = detail_lines(app, key, inner.width.saturating_sub(10));
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn label(text: &str) -> Span<'static> {
    Span::styled(format!("{:<10}", text), Style::default().fg(Color::Cyan))
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{:.1}ms", ms))
}

fn detail_lines(app: &App, key: &TargetKey, spark_width: u16) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let url = app
        .state
        .registry()
        .spec_for(key)
        .map(|spec| spec.url.clone())
        .unwrap_or_default();
    lines.push(Line::from(vec![label("URL"), Span::raw(url.clone())]));

    let Some(data) = app.store.get_target_data(key) else {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Waiting for first check...",
            Style::default().fg(Color::DarkGray),
        )));
        return lines;
    };
    let result = &data.result;
    let stats = &data.stats;

    let status = if result.success { RowStatus::Up } else { RowStatus::Down };
    let code = result
        .status_code
        .map_or_else(|| "no response".to_string(), |c| c.to_string());
    lines.push(Line::from(vec![
        label("Status"),
        Span::styled(
            if result.success { "UP" } else { "DOWN" },
            status_style(status).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  {}  {:.0}ms", code, result.latency_ms())),
    ]));

    if let Some(ip) = stats.last_ip {
        lines.push(Line::from(vec![label("IP"), Span::raw(ip.to_string())]));
    }
    if let Some(last) = stats.last_check {
        let ago = (Utc::now() - last).num_seconds().max(0);
        lines.push(Line::from(vec![label("Checked"), Span::raw(format!("{}s ago", ago))]));
    }

    lines.push(Line::from(vec![
        label("Uptime"),
        Span::raw(format!(
            "{:.2}%  ({}/{} checks)",
            stats.uptime_percent, stats.success_count, stats.count
        )),
    ]));
    lines.push(Line::from(vec![
        label("Latency"),
        Span::raw(format!(
            "avg {}  min {}  max {}",
            fmt_ms(stats.avg_ms),
            fmt_ms(stats.min_ms),
            fmt_ms(stats.max_ms)
        )),
    ]));
    lines.push(Line::from(vec![
        label(""),
        Span::raw(format!("stddev {}  p95 {}", fmt_ms(stats.stddev_ms), fmt_ms(stats.p95_ms))),
    ]));

    let breakdown = &result.breakdown;
    if breakdown.ttfb.is_some() || breakdown.download.is_some() {
        let part = |d: Option<std::time::Duration>| fmt_ms(d.map(|d| d.as_secs_f64() * 1000.0));
        lines.push(Line::from(vec![
            label("Timing"),
            Span::raw(format!("ttfb {}  download {}", part(breakdown.ttfb), part(breakdown.download))),
        ]));
    }

    if let Some(days) = app.store.ssl_days(&url) {
        let style = if days < 14 {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![label("SSL"), Span::styled(format!("{} days left", days), style)]));
    }

    if result.assertion == AssertionOutcome::Failed {
        lines.push(Line::from(vec![
            label("Assert"),
            Span::styled("expected text not found", Style::default().fg(Color::Red)),
        ]));
    }
    if let Some(error) = &result.error {
        lines.push(Line::from(vec![
            label("Error"),
            Span::styled(error.clone(), Style::default().fg(Color::Red)),
        ]));
    }

    if let Some(history) = app.store.get_plot_history(key) {
        let width = usize::from(spark_width);
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            label("Latency"),
            Span::styled(sparkline(&history.latency, width), Style::default().fg(Color::Yellow)),
        ]));
        lines.push(Line::from(vec![
            label("Uptime"),
            Span::styled(sparkline(&history.uptime, width), Style::default().fg(Color::Green)),
        ]));
    }

    lines
}

/// Render the newest `width` values as block characters scaled between their min and max.
fn sparkline(values: &VecDeque<f64>, width: usize) -> String {
    let skip = values.len().saturating_sub(width);
    let window: Vec<f64> = values.iter().skip(skip).copied().collect();
    let (min, max) = window
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = max - min;
    let top = SPARK_LEVELS.len() - 1;

    window
        .iter()
        .map(|&v| {
            let level = if span > 0.0 {
                (((v - min) / span) * top as f64).round() as usize
            } else if v > 0.0 {
                top
            } else {
                0
            };
            SPARK_LEVELS[level.min(top)]
        })
        .collect()
}

fn render_logs(f: &mut Frame, app: &App, area: Rect) {
    // Follow the selected stream; group rows and empty selections show everything.
    let scoped_key = match app.state.selected_row() {
        Some(VisibleRow {
            kind: RowKind::Group { .. },
            ..
        })
        | None => None,
        Some(_) => app.state.selected_key(),
    };
    let (scope, title) = match scoped_key {
        Some(key) => (LogScope::Key(key), format!("Log: {}", key)),
        None => (LogScope::Global, "Log".to_string()),
    };

    let lines: Vec<Line> = visible_log_entries(&app.log, scope, area.height)
        .into_iter()
        .map(|entry| {
            let style = match entry.severity {
                Severity::Info => Style::default().fg(Color::Gray),
                Severity::Warning => Style::default().fg(Color::Yellow),
                Severity::Error => Style::default().fg(Color::Red),
            };
            let mut spans = vec![
                Span::styled(
                    entry.timestamp.format("%H:%M:%S ").to_string(),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("{:<5} ", entry.severity.label()), style),
                Span::raw(entry.message),
            ];
            if let Some(detail) = entry.detail {
                spans.push(Span::styled(format!(": {}", detail), Style::default().fg(Color::DarkGray)));
            }
            Line::from(spans)
        })
        .collect();

    let block = Block::default().borders(Borders::ALL).title(title);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

/// Entries that fit inside a bordered panel `height` rows tall, newest first.
fn visible_log_entries(log: &SharedLog, scope: LogScope<'_>, height: u16) -> Vec<LogEntry> {
    let rows = usize::from(height.saturating_sub(2));
    // recent_logs treats 0 as "everything".
    if rows == 0 {
        return Vec::new();
    }
    log.recent_logs(scope, rows)
}

fn render_search(f: &mut Frame, app: &App, area: Rect) {
    let cursor = if app.input == InputMode::Search { "_" } else { "" };
    let line = Line::from(vec![
        Span::styled("/", Style::default().fg(Color::Yellow)),
        Span::raw(format!("{}{}", app.state.search_text(), cursor)),
        Span::styled(
            format!("  {} matches", app.state.rows().len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hints = match (app.input, app.state.mode()) {
        (InputMode::Search, _) => "Enter confirm  Esc cancel  ↑/↓ move",
        (InputMode::Normal, DisplayMode::SinglePane) => "l logs  q quit",
        (InputMode::Normal, DisplayMode::FlatList) => "↑/k ↓/j move  / search  l logs  q quit",
        (InputMode::Normal, DisplayMode::TreeView) => {
            "↑/k ↓/j move  Space expand/collapse  / search  l logs  q quit"
        }
    };
    f.render_widget(
        Paragraph::new(Span::styled(hints, Style::default().fg(Color::DarkGray))),
        area,
    );
}
