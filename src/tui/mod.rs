// Terminal view: a player table, a status line, and a command prompt.
//
// The view owns a `ViewState` that mirrors what the app loop pushes over
// the `UiUpdate` channel, applied strictly in arrival order. All real
// behavior lives behind the channel pair; this layer stays thin.

use std::collections::HashMap;
use std::time::Duration;

use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind};
use futures_util::StreamExt;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};
use ratatui::Frame;
use tokio::sync::mpsc;

use crate::protocol::{
    DetailInfo, GamesFilter, GamesSummary, LookupTarget, PlayerRow, RowState, Severity, UiUpdate,
    UserCommand,
};

// ---------------------------------------------------------------------------
// ViewState
// ---------------------------------------------------------------------------

/// View-local mirror of the application state, updated via `UiUpdate`s.
#[derive(Default)]
pub struct ViewState {
    pub players: Vec<PlayerRow>,
    /// Transient per-row display state from the running task.
    pub row_states: HashMap<usize, RowState>,
    pub status: String,
    pub severity: Option<Severity>,
    pub progress: Option<(usize, usize)>,
    pub rate_limit: Option<String>,
    /// Set while a task is running; mutating keys are ignored meanwhile
    /// (the app loop rejects them anyway).
    pub busy: bool,
    pub selected: usize,
    pub games: Option<GamesSummary>,
    pub detail: Option<DetailInfo>,
    /// Command prompt buffer; `None` when the prompt is closed.
    pub prompt: Option<String>,
}

impl ViewState {
    /// Apply one update. Order matters: a `Removed` row transition arrives
    /// before the snapshot that no longer contains the row.
    pub fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Players(players) => {
                self.players = players;
                self.row_states.clear();
                if self.selected >= self.players.len() {
                    self.selected = self.players.len().saturating_sub(1);
                }
            }
            UiUpdate::Row { index, state } => {
                if state == RowState::Removed {
                    self.row_states.remove(&index);
                    if index < self.players.len() {
                        self.players.remove(index);
                    }
                } else {
                    self.row_states.insert(index, state);
                }
            }
            UiUpdate::Progress { current, maximum } => {
                self.progress = Some((current, maximum));
            }
            UiUpdate::TaskStarted { label } => {
                self.busy = true;
                self.severity = None;
                self.progress = None;
                self.status = label;
            }
            UiUpdate::TaskResult {
                message, severity, ..
            } => {
                self.busy = false;
                self.severity = Some(severity);
                self.status = message;
            }
            UiUpdate::RateLimit { remaining, limit } => {
                self.rate_limit = Some(format!("{remaining}/{limit}"));
            }
            UiUpdate::Games(summary) => {
                self.games = Some(summary);
            }
            UiUpdate::Detail(info) => {
                self.detail = Some(info);
            }
            UiUpdate::Status(message) => {
                self.severity = None;
                self.status = message;
            }
        }
    }

    fn selected_id(&self) -> Option<i64> {
        self.players.get(self.selected).map(|p| p.id)
    }
}

// ---------------------------------------------------------------------------
// Command prompt parsing
// ---------------------------------------------------------------------------

/// Parse a prompt line into a command.
///
///   add <id> <nickname...>
///   edit <id> <nickname...>
///   game | map | server <id>        (single-entity lookup)
///   games map | server <id>         (recent games for a map/server)
pub fn parse_command(input: &str) -> Option<UserCommand> {
    let mut words = input.split_whitespace();
    match words.next()? {
        "add" => {
            let id = words.next()?.parse().ok()?;
            let nickname = words.collect::<Vec<_>>().join(" ");
            if nickname.is_empty() {
                return None;
            }
            Some(UserCommand::AddPlayer { id, nickname })
        }
        "edit" => {
            let id = words.next()?.parse().ok()?;
            let nickname = words.collect::<Vec<_>>().join(" ");
            if nickname.is_empty() {
                return None;
            }
            Some(UserCommand::EditPlayer {
                id,
                nickname: Some(nickname),
                description: None,
            })
        }
        "game" => Some(UserCommand::Lookup(LookupTarget::Game(
            words.next()?.parse().ok()?,
        ))),
        "map" => Some(UserCommand::Lookup(LookupTarget::Map(
            words.next()?.parse().ok()?,
        ))),
        "server" => Some(UserCommand::Lookup(LookupTarget::Server(
            words.next()?.parse().ok()?,
        ))),
        "games" => {
            let filter = match words.next()? {
                "map" => GamesFilter::Map(words.next()?.parse().ok()?),
                "server" => GamesFilter::Server(words.next()?.parse().ok()?),
                id => GamesFilter::Player(id.parse().ok()?),
            };
            Some(UserCommand::ShowGames(filter))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the terminal view until the user quits. Consumes `ui_rx`, sends
/// commands through `cmd_tx`.
pub async fn run(
    mut ui_rx: mpsc::Receiver<UiUpdate>,
    cmd_tx: mpsc::Sender<UserCommand>,
) -> anyhow::Result<()> {
    let mut terminal = ratatui::init();
    let mut view = ViewState::default();
    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(Duration::from_millis(100));

    let result = loop {
        tokio::select! {
            update = ui_rx.recv() => {
                match update {
                    Some(update) => view.apply(update),
                    None => break Ok(()),
                }
            }
            event = events.next() => {
                match event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if handle_key(key.code, &mut view, &cmd_tx).await {
                            break Ok(());
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                }
            }
            _ = redraw.tick() => {
                if let Err(e) = terminal.draw(|frame| render(frame, &view)) {
                    break Err(e.into());
                }
            }
        }
    };

    ratatui::restore();
    result
}

/// Handle one key press. Returns true when the view should exit.
async fn handle_key(
    code: KeyCode,
    view: &mut ViewState,
    cmd_tx: &mpsc::Sender<UserCommand>,
) -> bool {
    // Prompt mode captures everything except Esc/Enter.
    if view.prompt.is_some() {
        match code {
            KeyCode::Esc => view.prompt = None,
            KeyCode::Backspace => {
                if let Some(prompt) = &mut view.prompt {
                    prompt.pop();
                }
            }
            KeyCode::Enter => {
                let line = view.prompt.take().unwrap_or_default();
                match parse_command(&line) {
                    Some(cmd) => {
                        let _ = cmd_tx.send(cmd).await;
                    }
                    None => view.status = format!("unrecognized command: {line}"),
                }
            }
            KeyCode::Char(c) => {
                if let Some(prompt) = &mut view.prompt {
                    prompt.push(c);
                }
            }
            _ => {}
        }
        return false;
    }

    match code {
        KeyCode::Char('q') => {
            let _ = cmd_tx.send(UserCommand::Quit).await;
            return true;
        }
        KeyCode::Char('r') => {
            let _ = cmd_tx.send(UserCommand::Refresh).await;
        }
        KeyCode::Char('d') => {
            if let Some(id) = view.selected_id() {
                let _ = cmd_tx.send(UserCommand::RemovePlayer { id }).await;
            }
        }
        KeyCode::Char('g') => {
            if let Some(id) = view.selected_id() {
                let _ = cmd_tx
                    .send(UserCommand::ShowGames(GamesFilter::Player(id)))
                    .await;
            }
        }
        KeyCode::Char(':') => view.prompt = Some(String::new()),
        KeyCode::Up | KeyCode::Char('k') => {
            view.selected = view.selected.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if view.selected + 1 < view.players.len() {
                view.selected += 1;
            }
        }
        _ => {}
    }
    false
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(frame: &mut Frame, view: &ViewState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Length(if view.games.is_some() { 4 } else { 0 }),
            Constraint::Length(3),
        ])
        .split(frame.area());

    // -- player table --
    let rows = view.players.iter().enumerate().map(|(i, p)| {
        let marker = match view.row_states.get(&i) {
            Some(RowState::Pending) => "…",
            Some(RowState::Updated) => "✓",
            Some(RowState::Failed) => "✗",
            _ => " ",
        };
        let style = if i == view.selected {
            Style::default().add_modifier(Modifier::REVERSED)
        } else if p.error.is_some() {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        Row::new(vec![
            marker.to_string(),
            p.id.to_string(),
            p.nickname.clone(),
            p.current_name.clone().unwrap_or_default(),
            p.last_active.clone().unwrap_or_default(),
            p.error.clone().unwrap_or_default(),
        ])
        .style(style)
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(10),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec!["", "id", "nickname", "name", "last active", "error"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("players"));
    frame.render_widget(table, chunks[0]);

    // -- games summary --
    if let Some(games) = &view.games {
        let text = vec![
            Line::from(format!(
                "{}: {} games, {} in the last week ({} pages)",
                games.filter.describe(),
                games.total_games,
                games.recent_week,
                games.pages
            )),
            Line::from(heatmap_line(&games.heatmap)),
        ];
        let panel = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("recent games"));
        frame.render_widget(panel, chunks[1]);
    }

    // -- status line --
    let status = if let Some(prompt) = &view.prompt {
        Line::from(format!(":{prompt}"))
    } else {
        let mut parts = Vec::new();
        if let Some((current, maximum)) = view.progress {
            parts.push(format!("[{current}/{maximum}]"));
        }
        if !view.status.is_empty() {
            parts.push(view.status.clone());
        }
        if let Some(detail) = &view.detail {
            parts.push(format!(
                "{}: {}",
                detail.target.describe(),
                detail.name.as_deref().unwrap_or("(unnamed)")
            ));
        }
        if let Some(rate) = &view.rate_limit {
            parts.push(format!("rate {rate}"));
        }
        Line::from(parts.join("  ")).style(severity_style(view.severity))
    };
    let bar = Paragraph::new(status).block(Block::default().borders(Borders::ALL));
    frame.render_widget(bar, chunks[2]);
}

fn severity_style(severity: Option<Severity>) -> Style {
    match severity {
        Some(Severity::Success) => Style::default().fg(Color::Green),
        Some(Severity::Partial) => Style::default().fg(Color::Yellow),
        Some(Severity::Failure) => Style::default().fg(Color::Red),
        None => Style::default(),
    }
}

/// Collapse the weekly heatmap into one line of per-bucket totals.
fn heatmap_line(heatmap: &[Vec<u32>]) -> String {
    if heatmap.is_empty() {
        return String::new();
    }
    let buckets = heatmap[0].len();
    let totals: Vec<String> = (0..buckets)
        .map(|col| {
            let sum: u32 = heatmap.iter().map(|row| row[col]).sum();
            sum.to_string()
        })
        .collect();
    format!("activity by hour bucket: {}", totals.join(" "))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_add_command() {
        assert_eq!(
            parse_command("add 42 Foo Bar"),
            Some(UserCommand::AddPlayer {
                id: 42,
                nickname: "Foo Bar".into(),
            })
        );
        assert_eq!(parse_command("add 42"), None);
        assert_eq!(parse_command("add nope Foo"), None);
    }

    #[test]
    fn parse_lookup_commands() {
        assert_eq!(
            parse_command("map 7"),
            Some(UserCommand::Lookup(LookupTarget::Map(7)))
        );
        assert_eq!(
            parse_command("server 9"),
            Some(UserCommand::Lookup(LookupTarget::Server(9)))
        );
        assert_eq!(
            parse_command("game 123"),
            Some(UserCommand::Lookup(LookupTarget::Game(123)))
        );
    }

    #[test]
    fn parse_games_commands() {
        assert_eq!(
            parse_command("games 5"),
            Some(UserCommand::ShowGames(GamesFilter::Player(5)))
        );
        assert_eq!(
            parse_command("games map 5"),
            Some(UserCommand::ShowGames(GamesFilter::Map(5)))
        );
        assert_eq!(
            parse_command("games server 5"),
            Some(UserCommand::ShowGames(GamesFilter::Server(5)))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("frobnicate 1"), None);
        assert_eq!(parse_command("map"), None);
    }

    fn row(id: i64, nickname: &str) -> PlayerRow {
        PlayerRow {
            id,
            nickname: nickname.into(),
            description: String::new(),
            current_name: None,
            last_active: None,
            error: None,
        }
    }

    #[test]
    fn removed_row_update_drops_the_row_immediately() {
        let mut view = ViewState::default();
        view.apply(UiUpdate::Players(vec![row(1, "a"), row(2, "b"), row(3, "c")]));
        view.apply(UiUpdate::Row {
            index: 1,
            state: RowState::Removed,
        });

        let ids: Vec<i64> = view.players.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn snapshot_clamps_selection() {
        let mut view = ViewState::default();
        view.apply(UiUpdate::Players(vec![row(1, "a"), row(2, "b")]));
        view.selected = 1;
        view.apply(UiUpdate::Players(vec![row(1, "a")]));
        assert_eq!(view.selected, 0);
    }

    #[test]
    fn task_lifecycle_toggles_busy() {
        let mut view = ViewState::default();
        view.apply(UiUpdate::TaskStarted {
            label: "refreshing tracked players".into(),
        });
        assert!(view.busy);
        view.apply(UiUpdate::TaskResult {
            message: "updated 2 of 3 players".into(),
            severity: Severity::Partial,
            success: 2,
            total: 3,
        });
        assert!(!view.busy);
        assert_eq!(view.severity, Some(Severity::Partial));
        assert_eq!(view.status, "updated 2 of 3 players");
    }

    #[test]
    fn heatmap_line_sums_columns() {
        let heatmap = vec![vec![1, 0], vec![0, 2], vec![0, 0], vec![3, 0], vec![0, 0], vec![0, 0], vec![0, 1]];
        assert_eq!(heatmap_line(&heatmap), "activity by hour bucket: 4 3");
    }
}
