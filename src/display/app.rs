//! Terminal application: key handling, the render loop and the headless loop.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use futures_util::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;

use super::{ui, DisplayState};
use crate::events::Event;
use crate::store::{LiveDataStore, SharedLog};

/// Redraw period when nothing else happens, so "last check" ages stay current.
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
}

pub struct App {
    pub state: DisplayState,
    pub store: Arc<LiveDataStore>,
    pub log: Arc<SharedLog>,
    pub input: InputMode,
    pub show_logs: bool,
    pub should_quit: bool,
}

impl App {
    pub fn new(state: DisplayState, store: Arc<LiveDataStore>, log: Arc<SharedLog>) -> Self {
        Self {
            state,
            store,
            log,
            input: InputMode::Normal,
            show_logs: true,
            should_quit: false,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        match self.input {
            InputMode::Normal => self.handle_key_normal(key),
            InputMode::Search => self.handle_key_search(key),
        }
    }

    fn handle_key_normal(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('j') | KeyCode::Down => self.state.next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.previous(),
            KeyCode::Char('g') | KeyCode::Home => self.state.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.state.select_last(),
            KeyCode::Char('/') => self.input = InputMode::Search,
            KeyCode::Char(' ') | KeyCode::Enter => self.state.toggle_selected_group(),
            KeyCode::Char('l') => self.show_logs = !self.show_logs,
            KeyCode::Esc => self.state.clear_search(),
            _ => {}
        }
    }

    fn handle_key_search(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.state.clear_search();
                self.input = InputMode::Normal;
            }
            KeyCode::Enter => self.input = InputMode::Normal,
            KeyCode::Backspace => self.state.pop_search_char(),
            KeyCode::Down => self.state.next(),
            KeyCode::Up => self.state.previous(),
            KeyCode::Char(c) => self.state.push_search_char(c),
            _ => {}
        }
    }

    /// Apply a terminal event. Resizes are pushed to the probe tasks through `width`.
    pub fn handle_terminal_event(&mut self, event: TermEvent, width: &AtomicU16) {
        match event {
            TermEvent::Key(key) => self.handle_key(key),
            TermEvent::Resize(columns, _) => {
                width.store(columns, Ordering::Relaxed);
                self.store.resize_plot_histories(columns);
            }
            _ => {}
        }
    }
}

/// Run the interactive UI until the user quits. The terminal is restored even on error.
pub async fn run_tui(
    mut app: App,
    mut events: mpsc::UnboundedReceiver<Event>,
    width: Arc<AtomicU16>,
) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = render_loop(&mut terminal, &mut app, &mut events, &width).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn render_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    events: &mut mpsc::UnboundedReceiver<Event>,
    width: &AtomicU16,
) -> io::Result<()> {
    let mut input = EventStream::new();
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !app.should_quit {
        terminal.draw(|frame| ui::render(frame, app))?;

        tokio::select! {
            _ = ticker.tick() => {}
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                app.state.apply_event(&event);
                // Coalesce a burst of updates into one redraw.
                while let Ok(event) = events.try_recv() {
                    app.state.apply_event(&event);
                }
            }
            maybe_input = input.next() => match maybe_input {
                Some(Ok(event)) => app.handle_terminal_event(event, width),
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
    }

    Ok(())
}

/// Report every event through `tracing` until `shutdown` resolves or the queue closes.
///
/// Returns the number of events reported.
pub async fn run_headless<F>(mut events: mpsc::UnboundedReceiver<Event>, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut reported = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else { break };
                report_event(&event);
                reported += 1;
            }
        }
    }

    reported
}

fn report_event(event: &Event) {
    match event {
        Event::TargetDataUpdated { key, data, .. } => {
            let summary = serde_json::json!({
                "key": key,
                "success": data.result.success,
                "status": data.result.status_code,
                "latency_ms": data.result.latency_ms(),
                "count": data.stats.count,
                "uptime_percent": data.stats.uptime_percent,
                "p95_ms": data.stats.p95_ms,
            });
            if data.result.success {
                tracing::info!("{} {}", key, summary);
            } else {
                tracing::warn!(
                    "{} {} error={}",
                    key,
                    summary,
                    data.result.error.as_deref().unwrap_or("unsuccessful response")
                );
            }
        }
        Event::SslDataUpdated {
            url,
            days_remaining: Some(days),
        } => tracing::info!("Certificate for {} expires in {} days", url, days),
        Event::SslDataUpdated { url, days_remaining: None } => {
            tracing::debug!("Certificate expiry unknown for {}", url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetSpec;
    use crate::probe::CheckResult;
    use crate::registry::{Registry, TargetKey};
    use crate::stats::Stats;
    use crate::store::TargetData;

    fn make_app(targets: &[&str]) -> App {
        let specs: Vec<TargetSpec> = targets
            .iter()
            .map(|name| TargetSpec::new(name, "https://example.com"))
            .collect();
        let registry = Arc::new(Registry::build(&specs, &[]).unwrap());
        App::new(
            DisplayState::new(registry),
            Arc::new(LiveDataStore::new()),
            Arc::new(SharedLog::new(8)),
        )
    }

    fn press(app: &mut App, code: KeyCode) {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE));
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    fn update(key: &TargetKey) -> Event {
        let mut result = CheckResult::for_key(key);
        result.success = true;
        Event::TargetDataUpdated {
            key: key.clone(),
            data: TargetData {
                key: key.clone(),
                spec: TargetSpec::new(key.target_name(), "https://example.com"),
                result,
                stats: Stats::default(),
            },
            terminal_width: 80,
        }
    }

    #[test]
    fn test_navigation_keys() {
        let mut app = make_app(&["api", "web", "db"]);
        press(&mut app, KeyCode::Char('j'));
        press(&mut app, KeyCode::Down);
        assert_eq!(app.state.selected_key(), Some(&TargetKey::local("db")));
        press(&mut app, KeyCode::Char('k'));
        assert_eq!(app.state.selected_key(), Some(&TargetKey::local("web")));
        press(&mut app, KeyCode::Char('G'));
        assert_eq!(app.state.selected_index(), Some(2));
    }

    #[test]
    fn test_search_input() {
        let mut app = make_app(&["api", "web", "db"]);
        press(&mut app, KeyCode::Char('/'));
        assert_eq!(app.input, InputMode::Search);

        // 'j', 'k', 'q' and 'l' are text while searching.
        type_text(&mut app, "webq");
        assert_eq!(app.state.search_text(), "webq");
        assert!(!app.should_quit);
        assert!(app.state.rows().is_empty());

        press(&mut app, KeyCode::Backspace);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.input, InputMode::Normal);
        assert_eq!(app.state.search_text(), "web");
        assert_eq!(app.state.rows().len(), 1);

        press(&mut app, KeyCode::Char('/'));
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.input, InputMode::Normal);
        assert_eq!(app.state.search_text(), "");
        assert_eq!(app.state.rows().len(), 3);
    }

    #[test]
    fn test_quit_and_log_toggle() {
        let mut app = make_app(&["api", "web"]);
        assert!(app.show_logs);
        press(&mut app, KeyCode::Char('l'));
        assert!(!app.show_logs);

        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_quit);

        let mut app = make_app(&["api", "web"]);
        press(&mut app, KeyCode::Char('q'));
        assert!(app.should_quit);
    }

    #[test]
    fn test_resize_updates_width_and_histories() {
        let mut app = make_app(&["api", "web"]);
        let key = TargetKey::local("api");
        let result = CheckResult::for_key(&key);
        for _ in 0..40 {
            app.store.update_plot_history(&key, &result, 200);
        }

        let width = AtomicU16::new(200);
        app.handle_terminal_event(TermEvent::Resize(20, 10), &width);

        assert_eq!(width.load(Ordering::Relaxed), 20);
        assert_eq!(app.store.get_plot_history(&key).unwrap().len(), 10);
    }

    #[test]
    fn test_headless_reports_until_queue_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(update(&TargetKey::local("api"))).unwrap();
        tx.send(Event::SslDataUpdated {
            url: "https://example.com".to_string(),
            days_remaining: Some(30),
        })
        .unwrap();
        drop(tx);

        let reported = tokio_test::block_on(run_headless(rx, std::future::pending()));
        assert_eq!(reported, 2);
    }

    #[tokio::test]
    async fn test_headless_stops_on_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let reported = run_headless(rx, tokio::time::sleep(Duration::from_millis(20))).await;
        assert_eq!(reported, 0);
        drop(tx);
    }
}
