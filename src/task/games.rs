// Paginated recent-games fetch and single-entity lookups, used by the
// player/map/server detail views.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde_json::Value;
use tracing::warn;

use crate::api::ApiClient;
use crate::config::Config;
use crate::protocol::{DetailInfo, GamesFilter, GamesSummary, LookupTarget, TaskOutcome};
use crate::task::{Task, TaskContext};

// ---------------------------------------------------------------------------
// GamesTask
// ---------------------------------------------------------------------------

/// Walks the `games` listing for one filter, page by page, newest first.
///
/// Page budget is `game_list_count`; the cursor for the next page is the
/// last game id of the current page minus one. An empty or missing page
/// ends the listing early and revises the progress maximum down to the
/// pages actually fetched. A bad page (error status) counts as an
/// unsuccessful unit but does not end the loop.
pub struct GamesTask {
    api: Arc<ApiClient>,
    filter: GamesFilter,
    max_pages: usize,
    heatmap_hour_span: u32,
}

impl GamesTask {
    pub fn new(api: Arc<ApiClient>, filter: GamesFilter, config: &Config) -> Self {
        GamesTask {
            api,
            filter,
            max_pages: config.tracker.game_list_count,
            heatmap_hour_span: config.tracker.heatmap_hour_span,
        }
    }
}

#[async_trait]
impl Task for GamesTask {
    fn label(&self) -> String {
        format!("fetching games for {}", self.filter.describe())
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        let now = Utc::now();
        let mut acc = GamesAccumulator::new(self.heatmap_hour_span);
        let mut maximum = self.max_pages;
        let mut attempted = 0;
        let mut succeeded = 0;
        let mut cursor: Option<i64> = None;
        let mut cancelled = false;

        for page in 0..self.max_pages {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            if !ctx.pace_single().await {
                cancelled = true;
                break;
            }

            match self.api.games(self.filter, cursor).await {
                Ok(response) => {
                    ctx.rate_limit(response.rate_limit.clone()).await;
                    attempted += 1;
                    succeeded += 1;

                    let games = response.body.get("games").and_then(Value::as_array);
                    match games {
                        Some(games) if !games.is_empty() => {
                            for entry in games {
                                acc.absorb(entry, now);
                            }
                            cursor = next_cursor(games).or(cursor);
                            ctx.progress(attempted, maximum).await;
                        }
                        _ => {
                            // End of data: the listing is shorter than the
                            // page budget.
                            maximum = attempted;
                            ctx.progress(attempted, maximum).await;
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "games page {} for {} failed: {err}",
                        page + 1,
                        self.filter.describe()
                    );
                    attempted += 1;
                    ctx.progress(attempted, maximum).await;
                }
            }

            if page + 1 < self.max_pages && !ctx.pace_group().await {
                cancelled = true;
                break;
            }
        }

        let summary = acc.into_summary(self.filter, attempted);
        let message = if cancelled {
            format!(
                "games fetch cancelled after {attempted} pages for {}",
                self.filter.describe()
            )
        } else {
            format!(
                "fetched {} games for {} across {attempted} pages",
                summary.total_games,
                self.filter.describe()
            )
        };
        ctx.games(summary).await;
        TaskOutcome::new(message, succeeded, attempted)
    }
}

/// Cursor for the page after this one: the last game id in the page,
/// minus one.
fn next_cursor(games: &[Value]) -> Option<i64> {
    games.last()?.get("id")?.as_i64().map(|id| id - 1)
}

// ---------------------------------------------------------------------------
// Classification and heatmap accumulation
// ---------------------------------------------------------------------------

/// Whether a game's UTC timestamp falls within the trailing 7x24h window.
/// Future-dated entries are not counted.
pub(crate) fn within_last_week(ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let delta = now.signed_duration_since(ts);
    delta >= ChronoDuration::zero() && delta < ChronoDuration::days(7)
}

/// Accumulates the per-fetch games summary: totals, the 7-day count, and
/// the weekday x hour-bucket activity grid.
pub(crate) struct GamesAccumulator {
    hour_span: u32,
    total: usize,
    recent: usize,
    heatmap: Vec<Vec<u32>>,
}

impl GamesAccumulator {
    pub(crate) fn new(hour_span: u32) -> Self {
        let buckets = (24 / hour_span) as usize;
        GamesAccumulator {
            hour_span,
            total: 0,
            recent: 0,
            heatmap: vec![vec![0; buckets]; 7],
        }
    }

    /// Fold one games-list entry in. Entries without a readable timestamp
    /// count toward the total but never toward the recent window.
    pub(crate) fn absorb(&mut self, entry: &Value, now: DateTime<Utc>) {
        self.total += 1;
        let Some(ts) = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
        else {
            return;
        };
        if !within_last_week(ts, now) {
            return;
        }
        self.recent += 1;
        let row = ts.date_naive().weekday().num_days_from_monday() as usize;
        let col = (ts.hour() / self.hour_span) as usize;
        self.heatmap[row][col] += 1;
    }

    pub(crate) fn into_summary(self, filter: GamesFilter, pages: usize) -> GamesSummary {
        GamesSummary {
            filter,
            total_games: self.total,
            recent_week: self.recent,
            pages,
            heatmap: self.heatmap,
        }
    }
}

// ---------------------------------------------------------------------------
// LookupTask
// ---------------------------------------------------------------------------

/// Fetches one game, map, or server by id and reports its name.
pub struct LookupTask {
    api: Arc<ApiClient>,
    target: LookupTarget,
}

impl LookupTask {
    pub fn new(api: Arc<ApiClient>, target: LookupTarget) -> Self {
        LookupTask { api, target }
    }
}

#[async_trait]
impl Task for LookupTask {
    fn label(&self) -> String {
        format!("looking up {}", self.target.describe())
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        if ctx.is_cancelled() {
            return TaskOutcome::new("lookup cancelled", 0, 0);
        }

        let result = match self.target {
            LookupTarget::Game(id) => self.api.game(id).await,
            LookupTarget::Map(id) => self.api.map(id).await,
            LookupTarget::Server(id) => self.api.server(id).await,
        };

        match result {
            Ok(response) => {
                ctx.rate_limit(response.rate_limit.clone()).await;
                let name = response
                    .body
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ctx.detail(DetailInfo {
                    target: self.target,
                    name,
                })
                .await;
                ctx.progress(1, 1).await;
                TaskOutcome::new(format!("fetched {}", self.target.describe()), 1, 1)
            }
            Err(err) => {
                ctx.progress(1, 1).await;
                TaskOutcome::new(format!("{}: {err}", self.target.describe()), 0, 1)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
