// Message types exchanged between the background task engine, the app
// orchestrator, and the view layer.
//
// Three closed sets, one per channel direction:
//   - `TaskEvent`:   worker task -> app loop (generation-tagged)
//   - `UiUpdate`:    app loop -> view
//   - `UserCommand`: view -> app loop
//
// Delivery order over each mpsc channel matches emission order, which is
// what lets the view apply row updates without re-reading shared state.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Task outcomes
// ---------------------------------------------------------------------------

/// Terminal summary of one background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Human-readable result line, e.g. "updated 2 of 3 players".
    pub message: String,
    /// Units that succeeded.
    pub success: usize,
    /// Units that were attempted (not the units that were planned; a
    /// cancelled task reports only what it actually touched).
    pub total: usize,
}

impl TaskOutcome {
    pub fn new(message: impl Into<String>, success: usize, total: usize) -> Self {
        TaskOutcome {
            message: message.into(),
            success,
            total,
        }
    }

    /// Derived severity: full success, partial, or failure.
    pub fn severity(&self) -> Severity {
        if self.success == self.total {
            Severity::Success
        } else if self.success > 0 {
            Severity::Partial
        } else {
            Severity::Failure
        }
    }
}

/// Display severity derived from a task outcome's counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Partial,
    Failure,
}

// ---------------------------------------------------------------------------
// Row updates
// ---------------------------------------------------------------------------

/// Per-row display transition emitted while a task works through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// A fetch for this row is in flight.
    Pending,
    /// The row's derived fields were refreshed successfully.
    Updated,
    /// The most recent fetch for this row failed.
    Failed,
    /// The row is about to be removed from the store. Emitted *before* the
    /// store mutation so the view drops the row before any index past it
    /// shifts.
    Removed,
}

// ---------------------------------------------------------------------------
// TaskEvent (worker -> app)
// ---------------------------------------------------------------------------

/// Events emitted by a running background task.
///
/// Every variant carries the generation number assigned when the task was
/// spawned. The app loop discards events whose generation is stale, so a
/// cancelled task that is still draining its last network call cannot
/// corrupt the display of its successor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The task body is about to run. The app disables conflicting controls
    /// until the matching `Finished` arrives.
    Started { label: String, generation: u64 },
    /// One more unit of work was attempted.
    Progress {
        current: usize,
        maximum: usize,
        generation: u64,
    },
    /// A per-row display transition.
    Row {
        index: usize,
        state: RowState,
        generation: u64,
    },
    /// Rate-limit headers from the most recent successful remote call,
    /// passed through verbatim.
    RateLimit {
        remaining: String,
        limit: String,
        generation: u64,
    },
    /// Summary produced by a recent-games fetch.
    Games {
        summary: GamesSummary,
        generation: u64,
    },
    /// Detail record produced by a single-entity lookup.
    Detail { info: DetailInfo, generation: u64 },
    /// The task reached a terminal state. Emitted exactly once per task,
    /// whether it completed, was cancelled, or its body panicked.
    Finished {
        outcome: TaskOutcome,
        generation: u64,
    },
}

impl TaskEvent {
    /// The generation tag carried by any variant.
    pub fn generation(&self) -> u64 {
        match self {
            TaskEvent::Started { generation, .. }
            | TaskEvent::Progress { generation, .. }
            | TaskEvent::Row { generation, .. }
            | TaskEvent::RateLimit { generation, .. }
            | TaskEvent::Games { generation, .. }
            | TaskEvent::Detail { generation, .. }
            | TaskEvent::Finished { generation, .. } => *generation,
        }
    }
}

// ---------------------------------------------------------------------------
// Recent-games summary
// ---------------------------------------------------------------------------

/// What a paginated recent-games fetch is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamesFilter {
    Player(i64),
    Map(i64),
    Server(i64),
}

impl GamesFilter {
    /// Query parameter name on the `games` endpoint.
    pub fn query_key(&self) -> &'static str {
        match self {
            GamesFilter::Player(_) => "player_id",
            GamesFilter::Map(_) => "map_id",
            GamesFilter::Server(_) => "server_id",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            GamesFilter::Player(id) | GamesFilter::Map(id) | GamesFilter::Server(id) => *id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            GamesFilter::Player(id) => format!("player {id}"),
            GamesFilter::Map(id) => format!("map {id}"),
            GamesFilter::Server(id) => format!("server {id}"),
        }
    }
}

/// Aggregated view of a paginated recent-games fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamesSummary {
    pub filter: GamesFilter,
    /// Games seen across all fetched pages.
    pub total_games: usize,
    /// Games whose timestamp falls inside the trailing 7x24h window.
    pub recent_week: usize,
    /// Pages actually fetched (may be less than the configured budget when
    /// an empty page ended the listing early).
    pub pages: usize,
    /// Weekly activity grid: 7 rows (Mon..Sun) x (24 / heatmap_hour_span)
    /// columns, counting only games inside the 7-day window.
    pub heatmap: Vec<Vec<u32>>,
}

// ---------------------------------------------------------------------------
// Entity lookups
// ---------------------------------------------------------------------------

/// Which entity a `LookupTask` fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTarget {
    Game(i64),
    Map(i64),
    Server(i64),
}

impl LookupTarget {
    pub fn id(&self) -> i64 {
        match self {
            LookupTarget::Game(id) | LookupTarget::Map(id) | LookupTarget::Server(id) => *id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LookupTarget::Game(id) => format!("game {id}"),
            LookupTarget::Map(id) => format!("map {id}"),
            LookupTarget::Server(id) => format!("server {id}"),
        }
    }
}

/// Result of a single-entity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailInfo {
    pub target: LookupTarget,
    /// The entity's display name, when the response carried one.
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// UiUpdate (app -> view)
// ---------------------------------------------------------------------------

/// One display row of the tracked-player table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRow {
    pub id: i64,
    pub nickname: String,
    pub description: String,
    pub current_name: Option<String>,
    pub last_active: Option<String>,
    pub error: Option<String>,
}

/// Updates pushed to the view layer, applied in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Full snapshot of the tracked-player table.
    Players(Vec<PlayerRow>),
    /// Per-row display transition.
    Row { index: usize, state: RowState },
    /// Progress of the running task.
    Progress { current: usize, maximum: usize },
    /// A task started; the view disables conflicting actions.
    TaskStarted { label: String },
    /// A task finished; the view re-enables actions and shows the result.
    TaskResult {
        message: String,
        severity: Severity,
        success: usize,
        total: usize,
    },
    /// Verbatim rate-limit headers from the most recent remote call.
    RateLimit { remaining: String, limit: String },
    /// Recent-games summary for display.
    Games(GamesSummary),
    /// Entity lookup result for display.
    Detail(DetailInfo),
    /// Transient status line (e.g. a rejected command).
    Status(String),
}

// ---------------------------------------------------------------------------
// UserCommand (view -> app)
// ---------------------------------------------------------------------------

/// Commands issued by the user through the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    /// Refresh every tracked player. If a task is already running this
    /// cancels it instead of starting another.
    Refresh,
    /// Track a new player.
    AddPlayer { id: i64, nickname: String },
    /// Stop tracking a player.
    RemovePlayer { id: i64 },
    /// Change a tracked player's label or note.
    EditPlayer {
        id: i64,
        nickname: Option<String>,
        description: Option<String>,
    },
    /// Fetch the recent-games history for a player, map, or server.
    ShowGames(GamesFilter),
    /// Fetch one game, map, or server by id.
    Lookup(LookupTarget),
    Quit,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
