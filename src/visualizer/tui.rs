use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Gauge, Paragraph},
    DefaultTerminal, Frame,
};

use crate::audio::timeline::Timeline;
use crate::effects::encoder::Tier;
use crate::show::state::{FeatureReading, SharedPlaybackState};

use super::view::{build_view, LookaheadRow, RowDetail, View, ViewSettings};

/// 10 Hz redraw
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

const BAR_WIDTH: usize = 20;

pub trait Frontend: Send {
    fn draw(&mut self, view: &View) -> Result<()>;

    /// Waits up to `timeout` for input. Returns true when the user asked to stop.
    fn wait_for_quit(&mut self, timeout: Duration) -> Result<bool>;
}

/// Redraws until `cancel` is set. A quit key sets `cancel` for the whole
/// session. Never touches the dispatcher beyond reading snapshots.
pub fn run_visualizer(
    mut frontend: Box<dyn Frontend>,
    timeline: Arc<Timeline>,
    state: Arc<SharedPlaybackState>,
    settings: ViewSettings,
    cancel: Arc<AtomicBool>,
) {
    while !cancel.load(Ordering::Relaxed) {
        let view = build_view(&state.snapshot(), &timeline, &settings);
        if let Err(e) = frontend.draw(&view) {
            log::warn!("Visualizer stopped: {:#}", e);
            return;
        }
        match frontend.wait_for_quit(FRAME_INTERVAL) {
            Ok(true) => {
                log::info!("Stop requested from the visualizer");
                cancel.store(true, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                log::warn!("Visualizer input failed: {:#}", e);
                return;
            }
        }
    }
}

/// Full-screen terminal view. The terminal is restored on drop.
pub struct TerminalFrontend {
    terminal: DefaultTerminal,
    title: String,
}

impl TerminalFrontend {
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let terminal = ratatui::try_init().context("Failed to initialize terminal")?;
        Ok(Self {
            terminal,
            title: title.into(),
        })
    }
}

impl Drop for TerminalFrontend {
    fn drop(&mut self) {
        ratatui::restore();
    }
}

impl Frontend for TerminalFrontend {
    fn draw(&mut self, view: &View) -> Result<()> {
        let title = self.title.as_str();
        self.terminal.draw(|f| draw(f, title, view))?;
        Ok(())
    }

    fn wait_for_quit(&mut self, timeout: Duration) -> Result<bool> {
        if !event::poll(timeout)? {
            return Ok(false);
        }
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
                return Ok(ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc));
            }
        }
        Ok(false)
    }
}

/// Logs progress once per second instead of drawing
pub struct HeadlessFrontend {
    last_report: Option<Instant>,
}

impl HeadlessFrontend {
    pub fn new() -> Self {
        Self { last_report: None }
    }
}

impl Frontend for HeadlessFrontend {
    fn draw(&mut self, view: &View) -> Result<()> {
        if self.last_report.is_some_and(|at| at.elapsed() < Duration::from_secs(1)) {
            return Ok(());
        }
        self.last_report = Some(Instant::now());
        if let Some(position) = view.status.position {
            log::info!(
                "{:>7.2}s  entry {}/{}  {}  {}",
                view.status.current_time,
                position + 1,
                view.status.total,
                reading_text(&view.status.reading),
                view.status.effect.unwrap_or("-")
            );
        }
        Ok(())
    }

    fn wait_for_quit(&mut self, timeout: Duration) -> Result<bool> {
        thread::sleep(timeout);
        Ok(false)
    }
}

impl Default for HeadlessFrontend {
    fn default() -> Self {
        Self::new()
    }
}

fn tier_color(tier: Tier) -> Color {
    match tier {
        Tier::Quiet => Color::Blue,
        Tier::Medium => Color::Green,
        Tier::Loud => Color::Yellow,
        Tier::VeryLoud => Color::Red,
        Tier::Extreme => Color::Magenta,
    }
}

fn bar(value: f32) -> String {
    let filled = ((value.clamp(0.0, 1.0) * BAR_WIDTH as f32) as usize).min(BAR_WIDTH);
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

fn reading_text(reading: &FeatureReading) -> String {
    match *reading {
        FeatureReading::None => "waiting".into(),
        FeatureReading::Amplitude { level } => format!("level {:.3}", level),
        FeatureReading::Bands { bass, mid, treble } => {
            format!("bass {:.2} mid {:.2} treble {:.2}", bass, mid, treble)
        }
        FeatureReading::Beat { number } => format!("beat #{}", number),
    }
}

fn panel(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title(title)
}

fn draw(frame: &mut Frame, title: &str, view: &View) {
    let pulse_height = if view.beat_pulse.is_some() { 3 } else { 0 };
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(7),
        Constraint::Length(pulse_height),
        Constraint::Min(5),
    ])
    .split(frame.area());

    let mut header = vec![
        Span::styled(
            format!(" {} ", view.mode.label()),
            Style::default().fg(Color::Black).bg(Color::Cyan),
        ),
        Span::raw("  "),
        Span::styled(title.to_string(), Style::default().fg(Color::White)),
    ];
    if let Some(bpm) = view.tempo_bpm {
        header.push(Span::raw(format!("  {:.1} BPM", bpm)));
    }
    header.push(Span::raw(format!("  latency {:.0} ms", view.latency * 1000.0)));
    header.push(Span::styled("   q/Esc to stop", Style::default().fg(Color::DarkGray)));
    frame.render_widget(Paragraph::new(Line::from(header)).block(panel(" Tree Show ")), chunks[0]);

    let status = &view.status;
    let gauge = Gauge::default()
        .block(panel(" Progress "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(view.progress())
        .label(format!("{:.1}s / {:.1}s", status.current_time, status.duration));
    frame.render_widget(gauge, chunks[1]);

    draw_status(frame, chunks[2], view);

    if let Some(pulse) = view.beat_pulse {
        let spans: Vec<Span> = pulse
            .iter()
            .map(|&lit| {
                if lit {
                    Span::styled(" ● ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
                } else {
                    Span::styled(" ○ ", Style::default().fg(Color::DarkGray))
                }
            })
            .collect();
        frame.render_widget(Paragraph::new(Line::from(spans)).block(panel(" Beat ")), chunks[3]);
    }

    let rows: Vec<Line> = view.lookahead.iter().map(lookahead_line).collect();
    frame.render_widget(
        Paragraph::new(rows).block(panel(" Coming Up ")),
        chunks[4],
    );
}

fn draw_status(frame: &mut Frame, area: Rect, view: &View) {
    let status = &view.status;
    let position = match status.position {
        Some(i) => format!("{}/{}", i + 1, status.total),
        None => format!("-/{}", status.total),
    };

    let mut lines = vec![Line::from(vec![
        Span::raw(format!("Time {:>7.2}s   Entry {}   ", status.current_time, position)),
        Span::styled(
            format!("Effect {}", status.effect.unwrap_or("-")),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ])];

    match status.reading {
        FeatureReading::Amplitude { level } => {
            let color = status.tier.map_or(Color::White, tier_color);
            lines.push(Line::from(vec![
                Span::raw("Level  "),
                Span::styled(bar(level), Style::default().fg(color)),
                Span::raw(format!(" {:.3}", level)),
            ]));
            if let Some(tier) = status.tier {
                lines.push(Line::from(Span::styled(
                    tier.label(),
                    Style::default().fg(tier_color(tier)).add_modifier(Modifier::BOLD),
                )));
            }
        }
        FeatureReading::Bands { bass, mid, treble } => {
            let rows = [
                ("Bass  ", bass, Color::Green),
                ("Mid   ", mid, Color::Yellow),
                ("Treble", treble, Color::Red),
            ];
            for (i, (name, value, color)) in rows.into_iter().enumerate() {
                let mut spans = vec![
                    Span::raw(format!("{} ", name)),
                    Span::styled(bar(value), Style::default().fg(color)),
                    Span::raw(format!(" {:.2}", value)),
                ];
                if let Some(sections) = status.vu_sections {
                    let section = sections[i];
                    spans.push(Span::raw(format!("  {:>3}/{} px", section.lit, section.budget)));
                }
                lines.push(Line::from(spans));
            }
        }
        FeatureReading::Beat { number } => {
            lines.push(Line::from(format!("Beat #{}", number)));
        }
        FeatureReading::None => lines.push(Line::from("Waiting for first entry")),
    }

    let counts = if status.failed > 0 {
        Span::styled(
            format!("Sent {}  Failed {}", status.sent, status.failed),
            Style::default().fg(Color::Red),
        )
    } else {
        Span::raw(format!("Sent {}", status.sent))
    };
    lines.push(Line::from(counts));
    if status.finished {
        lines.push(Line::from(Span::styled("Done", Style::default().fg(Color::Green))));
    }

    frame.render_widget(Paragraph::new(lines).block(panel(" Now ")), area);
}

fn lookahead_line(row: &LookaheadRow) -> Line<'static> {
    let when = format!("{:>5} {:>7.2}s  +{:>5.2}s  ", row.index + 1, row.timestamp, row.offset.max(0.0));
    match row.detail {
        RowDetail::Level { level, tier } => Line::from(vec![
            Span::raw(when),
            Span::styled(bar(level), Style::default().fg(tier_color(tier))),
            Span::raw(format!(" {}", tier.label())),
        ]),
        RowDetail::Bands { bass, mid, treble } => Line::from(vec![
            Span::raw(when),
            Span::styled(format!("B {:.2} ", bass), Style::default().fg(Color::Green)),
            Span::styled(format!("M {:.2} ", mid), Style::default().fg(Color::Yellow)),
            Span::styled(format!("T {:.2}", treble), Style::default().fg(Color::Red)),
        ]),
        RowDetail::Beat { number } => Line::from(vec![Span::raw(when), Span::raw(format!("beat #{}", number))]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::timeline::{Mode, TimelineEntry};
    use crate::effects::encoder::Thresholds;
    use crate::show::state::PlaybackSnapshot;
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Mutex;

    fn settings() -> ViewSettings {
        ViewSettings {
            thresholds: Thresholds::default(),
            pixel_count: 106,
            latency: 0.025,
        }
    }

    fn render(view: &View) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| draw(f, "song.wav", view)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    struct CountingFrontend {
        frames: Arc<Mutex<usize>>,
        quit_after: Option<usize>,
    }

    impl Frontend for CountingFrontend {
        fn draw(&mut self, _view: &View) -> Result<()> {
            *self.frames.lock().unwrap() += 1;
            Ok(())
        }

        fn wait_for_quit(&mut self, _timeout: Duration) -> Result<bool> {
            let frames = *self.frames.lock().unwrap();
            Ok(self.quit_after.is_some_and(|n| frames >= n))
        }
    }

    fn timeline() -> Arc<Timeline> {
        let entries = vec![TimelineEntry::Amplitude { timestamp: 0.0, level: 0.5 }];
        Arc::new(Timeline::new(Mode::Effects, entries, None).unwrap())
    }

    #[test]
    fn quit_key_raises_cancel() {
        let frames = Arc::new(Mutex::new(0));
        let cancel = Arc::new(AtomicBool::new(false));
        let frontend = CountingFrontend {
            frames: Arc::clone(&frames),
            quit_after: Some(3),
        };
        run_visualizer(
            Box::new(frontend),
            timeline(),
            Arc::new(SharedPlaybackState::new()),
            settings(),
            Arc::clone(&cancel),
        );
        assert!(cancel.load(Ordering::Relaxed));
        assert_eq!(*frames.lock().unwrap(), 3);
    }

    #[test]
    fn stops_when_cancel_is_already_set() {
        let frames = Arc::new(Mutex::new(0));
        let frontend = CountingFrontend {
            frames: Arc::clone(&frames),
            quit_after: None,
        };
        run_visualizer(
            Box::new(frontend),
            timeline(),
            Arc::new(SharedPlaybackState::new()),
            settings(),
            Arc::new(AtomicBool::new(true)),
        );
        assert_eq!(*frames.lock().unwrap(), 0);
    }

    #[test]
    fn vu_frame_shows_latency_and_section_pixels() {
        let entries = vec![TimelineEntry::Bands { timestamp: 0.0, bass: 1.0, mid: 0.5, treble: 0.0 }];
        let timeline = Timeline::new(Mode::Vu, entries, None).unwrap();
        let snapshot = PlaybackSnapshot {
            current_index: Some(0),
            reading: FeatureReading::Bands { bass: 1.0, mid: 0.5, treble: 0.0 },
            ..PlaybackSnapshot::default()
        };
        let screen = render(&build_view(&snapshot, &timeline, &settings()));

        assert!(screen.contains("latency 25 ms"));
        assert!(screen.contains(" 35/35 px"));
        assert!(screen.contains(" 17/35 px"));
        assert!(screen.contains("  0/36 px"));
    }

    #[test]
    fn bars_are_fixed_width() {
        assert_eq!(bar(0.0).chars().count(), BAR_WIDTH);
        assert_eq!(bar(2.0).chars().filter(|c| *c == '█').count(), BAR_WIDTH);
        assert_eq!(bar(0.5).chars().filter(|c| *c == '█').count(), 10);
    }
}
