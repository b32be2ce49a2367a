use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use orchestrator::progress::{Phase, ProgressBoard, ProgressSnapshot, Tally};
use orchestrator::summary::format_clock;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table},
    Frame, Terminal,
};
use sysinfo::System;
use tokio_util::sync::CancellationToken;

/// Width of the text bar drawn in the PROGRESS column
const TEXT_BAR_WIDTH: usize = 20;

struct App {
    board: Arc<ProgressBoard>,
    system: System,
    rows: Vec<(usize, ProgressSnapshot)>,
    tally: Tally,
    input_root: PathBuf,
    stopping: bool,
}

impl App {
    fn new(board: Arc<ProgressBoard>, input_root: PathBuf) -> Self {
        Self {
            board,
            system: System::new(),
            rows: Vec::new(),
            tally: Tally::default(),
            input_root,
            stopping: false,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.rows = self.board.snapshot_all();
        self.tally = self.board.tally();
    }
}

/// Full-screen dashboard. Blocks until `stop` fires; `q` or Ctrl-C cancels the run.
pub fn run(
    board: Arc<ProgressBoard>,
    input_root: PathBuf,
    interval: Duration,
    stop: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    // Setup terminal
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(board, input_root);
    let result = event_loop(&mut terminal, &mut app, interval, &stop, &cancel);

    // Restore terminal even if drawing failed
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    result
}

fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    interval: Duration,
    stop: &CancellationToken,
    cancel: &CancellationToken,
) -> Result<()> {
    while !stop.is_cancelled() {
        app.refresh();
        terminal.draw(|f| ui(f, app))?;

        if crossterm::event::poll(interval)? {
            if let crossterm::event::Event::Key(key) = crossterm::event::read()? {
                let interrupt = key.code == crossterm::event::KeyCode::Char('c')
                    && key.modifiers.contains(crossterm::event::KeyModifiers::CONTROL);
                if key.code == crossterm::event::KeyCode::Char('q') || interrupt {
                    app.stopping = true;
                    cancel.cancel();
                }
            }
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let size = f.size();

    if size.height < 10 || size.width < 60 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 60x10.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_slot_table(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);
    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let total_memory = app.system.total_memory();
    let memory_percent = if total_memory == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / total_memory as f64 * 100.0)
    };
    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!("{:.1}%", memory_percent));
    f.render_widget(memory_gauge, chunks[1]);

    let batch_percent = if app.tally.total == 0 {
        0.0
    } else {
        clamp_percent(app.tally.completed as f64 / app.tally.total as f64 * 100.0)
    };
    let batch_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Batch"))
        .gauge_style(Style::default().fg(Color::Magenta))
        .percent(batch_percent as u16)
        .label(format!("{}/{} files", app.tally.completed, app.tally.total));
    f.render_widget(batch_gauge, chunks[2]);
}

fn render_slot_table(f: &mut Frame, app: &App, area: Rect) {
    let header = Row::new(vec!["SLOT", "FILE", "PROGRESS", "MEDIA", "TIME", "PHASE"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let capacity = app.board.capacity();
    let mut active = app.rows.iter().peekable();
    let rows: Vec<Row> = (0..capacity)
        .map(|slot| match active.next_if(|(s, _)| *s == slot) {
            Some((_, snap)) => slot_row(slot, snap),
            None => Row::new(vec![
                slot.to_string(),
                "-".to_string(),
                text_bar(None),
                "-".to_string(),
                "-".to_string(),
                "idle".to_string(),
            ]),
        })
        .collect();

    let widths = [
        Constraint::Length(4),
        Constraint::Percentage(40),
        Constraint::Length(TEXT_BAR_WIDTH as u16 + 9),
        Constraint::Length(17),
        Constraint::Length(8),
        Constraint::Length(10),
    ];

    let title = format!("Workers ({} active / {} slots)", app.rows.len(), capacity);
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn slot_row(slot: usize, snap: &ProgressSnapshot) -> Row<'static> {
    let media = match (snap.position, snap.total) {
        (Some(pos), Some(total)) => format!("{}/{}", format_clock(pos), format_clock(total)),
        (Some(pos), None) => format!("{}/?", format_clock(pos)),
        _ => "-".to_string(),
    };
    let phase = match snap.phase {
        Phase::Queued => "starting",
        Phase::Running => "encoding",
        Phase::Finalizing => "finalizing",
    };
    Row::new(vec![
        slot.to_string(),
        truncate_string(&snap.label, 50),
        text_bar(snap.fraction),
        media,
        format_clock(snap.elapsed),
        phase.to_string(),
    ])
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let dir_display = app.input_root.display().to_string();
    let hint = if app.stopping { "stopping..." } else { "q=stop" };
    let status_text = format!(
        "Total: {} | Done: {} | Success: {} | Failed: {} | Running: {} | Dir: {} | {}",
        app.tally.total,
        app.tally.completed,
        app.tally.succeeded,
        app.tally.failed,
        app.rows.len(),
        truncate_string(&dir_display, 35),
        hint
    );

    let paragraph = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(ratatui::widgets::Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// `[#####-----]  50.0%`, or `?` when the fraction is unknown
fn text_bar(fraction: Option<f64>) -> String {
    match fraction {
        Some(f) => {
            let filled = ((f * TEXT_BAR_WIDTH as f64).round() as usize).min(TEXT_BAR_WIDTH);
            format!(
                "[{}{}] {:5.1}%",
                "#".repeat(filled),
                "-".repeat(TEXT_BAR_WIDTH - filled),
                f * 100.0
            )
        }
        None => format!("[{}]     ?", "-".repeat(TEXT_BAR_WIDTH)),
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
