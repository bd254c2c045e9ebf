use std::error::Error;
use std::io::stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};

use crate::cue::{CueInfo, CueState};
use crate::{AudioCore, CoreStatus};

const TICK_RATE: Duration = Duration::from_millis(100);
const FADE_SECONDS: f64 = 2.0;
const CROSSFADE_SECONDS: f64 = 3.0;

#[derive(Default)]
struct AppState {
    status: Option<CoreStatus>,
    selected: usize,
    mode: Mode,
    message: Option<String>,
    last_update: Option<Instant>,
}

impl AppState {
    fn cue_count(&self) -> usize {
        self.status.as_ref().map_or(0, |s| s.cues.len())
    }

    fn current_cue(&self) -> Option<CueInfo> {
        self.status.as_ref()?.cues.get(self.selected).copied()
    }

    fn next_cue(&self) -> Option<CueInfo> {
        let cues = &self.status.as_ref()?.cues;
        if cues.len() < 2 {
            return None;
        }
        cues.get((self.selected + 1) % cues.len()).copied()
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    VolumeInput,
}

struct VolumeEditor {
    buffer: String,
}

/// Run the ratatui cue console against `core` until the user quits.
pub fn run(core: Arc<AudioCore>) -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    let poller = Arc::clone(&core);
    std::thread::spawn(move || {
        loop {
            if status_tx.send(poller.status()).is_err() {
                break;
            }
            std::thread::sleep(TICK_RATE);
        }
    });

    let mut app = AppState::default();
    let mut volume_editor: Option<VolumeEditor> = None;

    let result: Result<(), Box<dyn Error>> = loop {
        if let Err(err) = terminal.draw(|frame| draw(frame, &app, volume_editor.as_ref())) {
            break Err(err.into());
        }

        if let Some(status) = try_recv_latest(&status_rx) {
            app.status = Some(status);
            app.last_update = Some(Instant::now());
            let count = app.cue_count();
            app.selected = if count > 0 { app.selected.min(count - 1) } else { 0 };
        }

        match event::poll(Duration::from_millis(10)) {
            Ok(true) => match event::read() {
                Ok(CEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                    if handle_key(&core, &mut app, &mut volume_editor, key) {
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(err) => break Err(err.into()),
            },
            Ok(false) => {}
            Err(err) => break Err(err.into()),
        }
    };

    restore_terminal()?;
    result
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn report(core: &AudioCore, ok: bool, done: String) -> String {
    if ok {
        done
    } else {
        core.last_error().unwrap_or_else(|| "request refused".into())
    }
}

/// Returns `true` when the console should exit.
fn handle_key(
    core: &AudioCore,
    app: &mut AppState,
    volume_editor: &mut Option<VolumeEditor>,
    key: KeyEvent,
) -> bool {
    match app.mode {
        Mode::Normal => match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Up => {
                app.selected = app.selected.saturating_sub(1);
            }
            KeyCode::Down => {
                if app.selected + 1 < app.cue_count() {
                    app.selected += 1;
                }
            }
            KeyCode::Char(' ') => {
                if let Some(cue) = app.current_cue() {
                    let name = cue.id.as_str();
                    app.message = Some(if cue.state == CueState::Stopped {
                        report(core, core.start_cue(name), format!("Started {name}"))
                    } else {
                        report(core, core.stop_cue(name), format!("Stopped {name}"))
                    });
                }
            }
            KeyCode::Char('p') => {
                if let Some(cue) = app.current_cue() {
                    let name = cue.id.as_str();
                    app.message = Some(if cue.state == CueState::Paused {
                        report(core, core.resume_cue(name), format!("Resumed {name}"))
                    } else {
                        report(core, core.pause_cue(name), format!("Paused {name}"))
                    });
                }
            }
            KeyCode::Char('i') => {
                if let Some(cue) = app.current_cue() {
                    let name = cue.id.as_str();
                    let ok = core.fade_in(name, FADE_SECONDS);
                    app.message = Some(report(core, ok, format!("Fading in {name}")));
                }
            }
            KeyCode::Char('o') => {
                if let Some(cue) = app.current_cue() {
                    let name = cue.id.as_str();
                    let ok = core.fade_out(name, FADE_SECONDS);
                    app.message = Some(report(core, ok, format!("Fading out {name}")));
                }
            }
            KeyCode::Char('l') => {
                if let Some(cue) = app.current_cue() {
                    let name = cue.id.as_str();
                    let ok = core.set_loop(name, !cue.looping);
                    let state = if cue.looping { "off" } else { "on" };
                    app.message = Some(report(core, ok, format!("Loop {state} for {name}")));
                }
            }
            KeyCode::Char('x') => {
                if let (Some(from), Some(to)) = (app.current_cue(), app.next_cue()) {
                    let (from, to) = (from.id.as_str(), to.id.as_str());
                    let ok = core.start_crossfade(from, to, CROSSFADE_SECONDS, None);
                    app.message = Some(report(core, ok, format!("Crossfading {from} -> {to}")));
                }
            }
            KeyCode::Char('s') => {
                let ok = core.stop_all();
                app.message = Some(report(core, ok, "Stopped all cues".into()));
            }
            KeyCode::Char('v') => {
                if let Some(cue) = app.current_cue() {
                    volume_editor.replace(VolumeEditor {
                        buffer: format!("{:.2}", cue.volume),
                    });
                    app.mode = Mode::VolumeInput;
                }
            }
            _ => {}
        },
        Mode::VolumeInput => match key.code {
            KeyCode::Esc => {
                volume_editor.take();
                app.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                if let (Some(editor), Some(cue)) = (volume_editor.take(), app.current_cue()) {
                    if let Ok(value) = editor.buffer.trim().parse::<f32>() {
                        let name = cue.id.as_str();
                        let ok = core.set_volume(name, value);
                        app.message =
                            Some(report(core, ok, format!("Set {name} volume to {value:.2}")));
                    }
                }
                app.mode = Mode::Normal;
            }
            KeyCode::Backspace => {
                if let Some(editor) = volume_editor.as_mut() {
                    editor.buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(editor) = volume_editor.as_mut() {
                    if c.is_ascii_digit() || c == '.' {
                        editor.buffer.push(c);
                    }
                }
            }
            _ => {}
        },
    }
    false
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState, volume_editor: Option<&VolumeEditor>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_cues(frame, chunks[1], app);
    draw_footer(frame, chunks[2], app);

    if let Some(editor) = volume_editor {
        let area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(frame.size())[1];

        let block = Block::default()
            .title("Set Volume (0-1): Enter to apply, Esc to cancel")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        let paragraph = Paragraph::new(editor.buffer.clone())
            .block(block)
            .wrap(Wrap { trim: false });

        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Cue Console").borders(Borders::ALL);

    let content = match &app.status {
        Some(status) if status.performance.blocks_processed > 0 => {
            let perf = &status.performance;
            let xfade = &status.crossfade;
            let crossfade = match (xfade.from, xfade.to) {
                (Some(from), Some(to)) if xfade.active => format!(
                    "{from} -> {to} {:.0}% ({})",
                    xfade.progress * 100.0,
                    xfade.curve.name()
                ),
                _ => "idle".to_string(),
            };
            let stats = format!(
                "Rate: {} Hz    Block: {} frames    Latency: {:.2} ms    CPU: {:.1}%    Xruns: {}/{}    {}    Crossfade: {}",
                perf.sample_rate,
                perf.buffer_size,
                perf.latency_ms,
                perf.cpu_usage_percent,
                perf.buffer_underrun_count,
                perf.buffer_overrun_count,
                if perf.is_stable { "stable" } else { "UNSTABLE" },
                crossfade,
            );
            Paragraph::new(stats)
        }
        _ => Paragraph::new(Line::from(vec![Span::styled(
            "Waiting for audio",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )])),
    };

    frame.render_widget(content.block(block), area);
}

fn state_color(state: CueState) -> Color {
    match state {
        CueState::Stopped => Color::DarkGray,
        CueState::Playing => Color::Green,
        CueState::Paused => Color::Blue,
        CueState::FadingIn | CueState::FadingOut => Color::Magenta,
    }
}

fn draw_cues(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Cues").borders(Borders::ALL);

    let Some(status) = &app.status else {
        frame.render_widget(Paragraph::new("").block(block), area);
        return;
    };

    let header = Row::new(vec![
        Cell::from(""),
        Cell::from("Cue"),
        Cell::from("State"),
        Cell::from("Volume"),
        Cell::from("Pan"),
        Cell::from("Gain"),
        Cell::from("Position"),
        Cell::from("Loop"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let rows = status.cues.iter().enumerate().map(|(idx, cue)| {
        let indicator = if idx == app.selected { ">" } else { "" };
        let mut row = Row::new(vec![
            Cell::from(indicator.to_string()),
            Cell::from(cue.id.as_str().to_string()),
            Cell::from(Span::styled(
                cue.state.label(),
                Style::default().fg(state_color(cue.state)),
            )),
            Cell::from(format!("{:.2}", cue.volume)),
            Cell::from(format!("{:+.2}", cue.pan)),
            Cell::from(format!("{:.2}", cue.gain)),
            Cell::from(format!(
                "{:.1} / {:.1} s",
                cue.position_seconds, cue.duration_seconds
            )),
            Cell::from(if cue.looping { "Yes" } else { "No" }),
        ]);
        if idx == app.selected {
            row = row.style(Style::default().fg(Color::Yellow));
        }
        row
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(24),
            Constraint::Length(12),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(18),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "Up/Down: Select  Space: Start/Stop  p: Pause  i/o: Fade in/out  x: Crossfade to next  l: Loop  v: Volume  s: Stop all  q: Quit";
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }
    if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {:.1}s ago", ago),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
