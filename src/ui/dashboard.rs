use crate::app::{Snapshot, UiCommand};
use crate::error::Result;
use crate::market::feed::ConnectionState;
use crate::market::format::{format_currency, format_currency_str, format_pct};
use crate::market::series::Trend;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, warn};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

type TermFrame<'a> = Frame<'a, CrosstermBackend<io::Stdout>>;

/// Terminal front end. Renders the latest [`Snapshot`] and turns key presses
/// into [`UiCommand`]s; it never touches market state directly.
pub struct Dashboard {
    snapshots: watch::Receiver<Snapshot>,
    commands: mpsc::Sender<UiCommand>,
    /// Command line being typed, when in command mode
    input: Option<String>,
    running: bool,
}

impl Dashboard {
    pub fn new(snapshots: watch::Receiver<Snapshot>, commands: mpsc::Sender<UiCommand>) -> Self {
        Self {
            snapshots,
            commands,
            input: None,
            running: true,
        }
    }

    /// Blocking draw/input loop; run it on a blocking thread
    pub fn run(mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        while self.running {
            if event::poll(Duration::from_millis(100))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Release {
                        if let Some(command) = self.handle_key(key) {
                            self.send(command);
                        }
                    }
                }
            }

            if self.snapshots.has_changed().is_err() {
                debug!("App task gone, leaving dashboard");
                break;
            }
            let snapshot = self.snapshots.borrow_and_update().clone();

            terminal.draw(|f| {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Length(3),
                        Constraint::Min(8),
                        Constraint::Length(3),
                    ])
                    .split(f.size());

                self.render_header(f, chunks[0], &snapshot);
                self.render_main_content(f, chunks[1], &snapshot);
                self.render_footer(f, chunks[2], &snapshot);
            })?;
        }
        Ok(())
    }

    fn send(&mut self, command: UiCommand) {
        if command == UiCommand::Quit {
            self.running = false;
        }
        if self.commands.blocking_send(command).is_err() {
            warn!("Command channel closed");
            self.running = false;
        }
    }

    /// Map a key press to a command. In command mode keys edit the line
    /// until Enter submits it or Esc abandons it.
    fn handle_key(&mut self, key: KeyEvent) -> Option<UiCommand> {
        if let Some(input) = self.input.as_mut() {
            match key.code {
                KeyCode::Enter => {
                    let line = self.input.take().unwrap_or_default();
                    return UiCommand::parse(&line);
                }
                KeyCode::Esc => self.input = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            return None;
        }

        match key.code {
            KeyCode::Char('q') => Some(UiCommand::Quit),
            KeyCode::Up | KeyCode::Left => Some(UiCommand::SelectPrevious),
            KeyCode::Down | KeyCode::Right => Some(UiCommand::SelectNext),
            KeyCode::Char('p') => Some(UiCommand::TogglePause),
            KeyCode::Char('c') => Some(UiCommand::ClearSeries),
            KeyCode::Char('x') => Some(UiCommand::CancelAlert),
            KeyCode::Char('a') => {
                self.input = Some("alert ".to_string());
                None
            }
            KeyCode::Char(':') | KeyCode::Char('/') => {
                self.input = Some(String::new());
                None
            }
            _ => None,
        }
    }

    fn render_header(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let connection_status = match snapshot.connection {
            ConnectionState::Open => Span::styled("LIVE", Style::default().fg(Color::Green)),
            ConnectionState::Connecting => {
                Span::styled("CONNECTING", Style::default().fg(Color::Yellow))
            }
            ConnectionState::Closing => Span::styled("CLOSING", Style::default().fg(Color::Yellow)),
            ConnectionState::Idle => Span::styled("OFFLINE", Style::default().fg(Color::Red)),
        };

        let header = Paragraph::new(Text::from(vec![
            Line::from(vec![
                Span::styled(
                    "TICKWATCH ",
                    Style::default()
                        .fg(Color::LightCyan)
                        .add_modifier(Modifier::BOLD),
                ),
                connection_status,
            ]),
            Line::from(Span::styled(
                format!(
                    "Last update: {} | Currency: {} | Watching {} pairs",
                    Local::now().format("%H:%M:%S"),
                    snapshot.currency.code,
                    snapshot.cards.len()
                ),
                Style::default().fg(Color::Gray),
            )),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));

        f.render_widget(header, area);
    }

    fn render_main_content(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(5), Constraint::Length(4)])
            .split(columns[1]);

        self.render_watchlist(f, columns[0], snapshot);
        self.render_chart(f, right[0], snapshot);
        self.render_alert_panel(f, right[1], snapshot);
    }

    fn render_watchlist(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let block = Block::default().borders(Borders::ALL).title("Watchlist");
        let inner_area = block.inner(area);
        f.render_widget(block, area);

        if snapshot.cards.is_empty() {
            let hint = Paragraph::new("Watchlist empty. Type ':add BTCUSDT'.")
                .style(Style::default().fg(Color::Gray));
            f.render_widget(hint, inner_area);
            return;
        }

        let currency = &snapshot.currency;
        let rows = snapshot.cards.iter().map(|card| {
            let is_selected = snapshot.selected.as_deref() == Some(card.symbol.as_str());
            let (price, change) = match &card.ticker {
                Some(ticker) => {
                    let change = ticker.change_percent.parse::<f64>().unwrap_or(0.0);
                    let color = if change < 0.0 { Color::Red } else { Color::Green };
                    (
                        Cell::from(format_currency_str(
                            &ticker.price,
                            currency.rate,
                            &currency.code,
                        )),
                        Cell::from(Span::styled(format_pct(change), Style::default().fg(color))),
                    )
                }
                None => (
                    Cell::from(Span::styled("waiting", Style::default().fg(Color::DarkGray))),
                    Cell::from(""),
                ),
            };

            Row::new(vec![Cell::from(card.symbol.as_str()), price, change]).style(
                if is_selected {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Yellow)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                },
            )
        });

        let table = Table::new(rows)
            .header(
                Row::new(vec!["Pair", "Price", "24h"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .widths(&[
                Constraint::Length(12),
                Constraint::Length(16),
                Constraint::Length(9),
            ]);

        f.render_widget(table, inner_area);
    }

    fn render_chart(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let color = match snapshot.trend {
            Trend::Up => Color::Green,
            Trend::Down => Color::Red,
        };
        let mode = if snapshot.paused { "PAUSED" } else { "LIVE" };
        let title = format!(
            "{} {} {}/{}",
            snapshot.selected.as_deref().unwrap_or("-"),
            mode,
            snapshot.samples.len(),
            snapshot.series_capacity
        );
        let block = Block::default().borders(Borders::ALL).title(title);

        let points = chart_points(snapshot);
        let Some((min_price, max_price)) = bounds(&points) else {
            let message = Paragraph::new("Insufficient data for chart")
                .style(Style::default().fg(Color::Gray))
                .block(block);
            f.render_widget(message, area);
            return;
        };

        let currency = &snapshot.currency;
        let label = |value: f64| Span::raw(format_currency(value, 1.0, &currency.code));
        let datasets = vec![Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&points)];

        let chart = Chart::new(datasets)
            .block(block)
            .x_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .bounds([0.0, (snapshot.series_capacity.max(2) - 1) as f64]),
            )
            .y_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .labels(vec![label(min_price), label(max_price)])
                    .bounds([min_price, max_price]),
            );
        f.render_widget(chart, area);
    }

    fn render_alert_panel(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let currency = &snapshot.currency;
        let line = match &snapshot.alert {
            Some(alert) => {
                let current = snapshot
                    .cards
                    .iter()
                    .find(|c| c.symbol == alert.symbol)
                    .and_then(|c| c.ticker.as_ref())
                    .map(|t| format_currency_str(&t.price, currency.rate, &currency.code))
                    .unwrap_or_else(|| "-".to_string());
                Line::from(vec![
                    Span::styled("ARMED ", Style::default().fg(Color::Yellow)),
                    Span::raw(format!(
                        "{} >= {} (now {})",
                        alert.symbol,
                        format_currency(alert.target_price, currency.rate, &currency.code),
                        current
                    )),
                ])
            }
            None => Line::from(Span::styled(
                "No alert armed",
                Style::default().fg(Color::Gray),
            )),
        };

        let panel = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Alert"));
        f.render_widget(panel, area);
    }

    fn render_footer(&self, f: &mut TermFrame, area: Rect, snapshot: &Snapshot) {
        let first = if let Some(input) = &self.input {
            Line::from(vec![
                Span::styled(":", Style::default().fg(Color::Yellow)),
                Span::raw(input.as_str()),
                Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
            ])
        } else {
            Line::from(vec![
                Span::raw("Controls: "),
                Span::styled("↑/↓", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Select  "),
                Span::styled("a", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Alert  "),
                Span::styled("x", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Cancel  "),
                Span::styled("p", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Pause  "),
                Span::styled("c", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Clear  "),
                Span::styled(":", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Command  "),
                Span::styled("q", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(" Quit"),
            ])
        };
        let status = Line::from(Span::styled(
            snapshot.status.clone().unwrap_or_default(),
            Style::default().fg(Color::LightCyan),
        ));
        let content = Text::from(vec![first, status]);

        let footer = Paragraph::new(content)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));

        f.render_widget(footer, area);
    }
}

/// Chart points in display currency, indexed by position in the window
fn chart_points(snapshot: &Snapshot) -> Vec<(f64, f64)> {
    snapshot
        .samples
        .iter()
        .enumerate()
        .map(|(i, s)| (i as f64, s.price * snapshot.currency.rate))
        .collect()
}

/// Y bounds for the chart, padded so a flat line stays visible.
/// `None` until there are two points to draw.
fn bounds(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let pad = ((max - min) * 0.05).max(max.abs() * 0.0005).max(0.01);
    Some((min - pad, max + pad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::series::Sample;
    use crate::market::store::CurrencyConversion;
    use chrono::Utc;
    use crossterm::event::KeyModifiers;

    fn dashboard() -> (Dashboard, watch::Sender<Snapshot>, mpsc::Receiver<UiCommand>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (tx, rx) = mpsc::channel(8);
        (Dashboard::new(snapshot_rx, tx), snapshot_tx, rx)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_line(dashboard: &mut Dashboard, text: &str) -> Option<UiCommand> {
        for c in text.chars() {
            assert_eq!(dashboard.handle_key(key(KeyCode::Char(c))), None);
        }
        dashboard.handle_key(key(KeyCode::Enter))
    }

    #[test]
    fn test_keys_map_to_commands() {
        let (mut dashboard, _, _) = dashboard();
        assert_eq!(dashboard.handle_key(key(KeyCode::Down)), Some(UiCommand::SelectNext));
        assert_eq!(dashboard.handle_key(key(KeyCode::Up)), Some(UiCommand::SelectPrevious));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('p'))), Some(UiCommand::TogglePause));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('c'))), Some(UiCommand::ClearSeries));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('x'))), Some(UiCommand::CancelAlert));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('q'))), Some(UiCommand::Quit));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn test_command_mode_editing() {
        let (mut dashboard, _, _) = dashboard();
        dashboard.handle_key(key(KeyCode::Char(':')));
        assert_eq!(
            type_line(&mut dashboard, "add solusdtt"),
            Some(UiCommand::AddSymbol("solusdtt".to_string()))
        );
        assert!(dashboard.input.is_none());

        dashboard.handle_key(key(KeyCode::Char(':')));
        for c in "rm eth".chars() {
            dashboard.handle_key(key(KeyCode::Char(c)));
        }
        dashboard.handle_key(key(KeyCode::Backspace));
        assert_eq!(dashboard.input.as_deref(), Some("rm et"));
        dashboard.handle_key(key(KeyCode::Esc));
        assert!(dashboard.input.is_none());
        // q inside command mode is text, not quit
        dashboard.handle_key(key(KeyCode::Char(':')));
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('q'))), None);
    }

    #[test]
    fn test_alert_key_prefills_command() {
        let (mut dashboard, _, _) = dashboard();
        assert_eq!(dashboard.handle_key(key(KeyCode::Char('a'))), None);
        assert_eq!(
            type_line(&mut dashboard, "96000"),
            Some(UiCommand::ArmAlert("96000".to_string()))
        );
    }

    #[test]
    fn test_send_quit_stops_loop() {
        let (mut dashboard, _, mut rx) = dashboard();
        dashboard.send(UiCommand::Quit);
        assert!(!dashboard.running);
        assert_eq!(rx.try_recv().ok(), Some(UiCommand::Quit));
    }

    #[test]
    fn test_chart_needs_two_points() {
        let mut snapshot = Snapshot {
            currency: CurrencyConversion {
                code: "INR".to_string(),
                rate: 2.0,
            },
            ..Snapshot::default()
        };
        snapshot.samples.push(Sample {
            time: Utc::now(),
            price: 10.0,
        });
        assert_eq!(bounds(&chart_points(&snapshot)), None);

        snapshot.samples.push(Sample {
            time: Utc::now(),
            price: 10.0,
        });
        let points = chart_points(&snapshot);
        assert_eq!(points, vec![(0.0, 20.0), (1.0, 20.0)]);
        let (low, high) = bounds(&points).unwrap();
        assert!(low < 20.0 && high > 20.0);
    }
}
