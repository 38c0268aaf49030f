use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::download::CancelToken;
use crate::error::CantoError;

const EVENTS_MAX: usize = 200;
const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Fetch,
    Verify,
    Store,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Verify => "Verify",
            Phase::Store => "Store",
        }
    }

    fn color(self) -> Color {
        match self {
            Phase::Resolve => Color::Yellow,
            Phase::Fetch => Color::Cyan,
            Phase::Verify => Color::Magenta,
            Phase::Store => Color::Green,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug)]
struct TuiState {
    status: String,
    phase: Phase,
    saved: u64,
    failures: u64,
    events: VecDeque<String>,
    started: Instant,
    cancelling: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<TuiState>>,
    cancel: Option<CancelToken>,
}

struct TuiProgress {
    state: Arc<Mutex<TuiState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let message = event.message.trim().to_string();
        tracing::debug!(message = %message, "progress");
        if let Ok(mut state) = self.state.lock() {
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
                if phase == Phase::Store && payload.starts_with("saved ") {
                    state.saved = state.saved.saturating_add(1);
                }
            } else {
                if message.contains("failed") {
                    state.failures = state.failures.saturating_add(1);
                }
                state.status = message.clone();
            }
            state.events.push_back(message);
            while state.events.len() > EVENTS_MAX {
                state.events.pop_front();
            }
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(TuiState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                saved: 0,
                failures: 0,
                events: VecDeque::new(),
                started: Instant::now(),
                cancelling: false,
            })),
            cancel: None,
        }
    }

    /// `q`/`Esc` trips this token instead of tearing the worker down, so the
    /// worker stops at a point where its markers are still accurate.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, CantoError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_progress(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && key.kind == KeyEventKind::Press
                && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
            {
                self.request_cancel();
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        result.map_err(miette::Report::new)
    }

    pub fn confirm(&mut self, question: &str) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default().borders(Borders::ALL).title("Confirm");
                    let text = Paragraph::new(vec![
                        Line::from(question.to_string()),
                        Line::from("Press y to confirm, n to cancel."),
                    ])
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true })
                    .block(block);
                    frame.render_widget(text, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
            {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                    _ => {}
                }
            }
        };

        disable_raw_mode().into_diagnostic()?;
        io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(confirmed)
    }

    fn request_cancel(&self) {
        let Some(cancel) = &self.cancel else {
            return;
        };
        cancel.cancel();
        if let Ok(mut state) = self.state.lock() {
            state.cancelling = true;
            state.status = "cancelling after the current batch".to_string();
        }
    }
}

fn draw_progress(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &TuiState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(5),
        ])
        .split(frame.area());

    let elapsed = state.started.elapsed().as_secs();
    let spinner = SPINNER[tick % SPINNER.len()];
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" canto {} ", kind.label()),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("{spinner} ")),
        Span::styled(state.phase.to_string(), Style::default().fg(state.phase.color())),
        Span::raw(format!("  {:02}:{:02}", elapsed / 60, elapsed % 60)),
    ]))
    .block(Block::default().borders(Borders::ALL));
    frame.render_widget(header, chunks[0]);

    let footer = if state.cancelling {
        "cancelling..."
    } else {
        "q / Esc: stop after current batch"
    };
    let status = Paragraph::new(vec![
        Line::from(state.status.clone()),
        Line::from(format!("saved: {}   failed: {}", state.saved, state.failures)),
        Line::from(Span::styled(footer, Style::default().fg(Color::DarkGray))),
    ])
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status, chunks[1]);

    let visible = chunks[2].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .events
        .iter()
        .skip(state.events.len().saturating_sub(visible))
        .map(|event| Line::from(event.clone()))
        .collect();
    let events = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Events"));
    frame.render_widget(events, chunks[2]);
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let (head, rest) = message.split_once(';')?;
    let phase = match head.strip_prefix("phase=")? {
        "Resolve" => Phase::Resolve,
        "Fetch" => Phase::Fetch,
        "Verify" => Phase::Verify,
        "Store" => Phase::Store,
        _ => return None,
    };
    Some((phase, rest.trim()))
}
