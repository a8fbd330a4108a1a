// Refresh-all task, plus the single-player fetch step it shares with the
// add task.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;

use crate::api::ApiClient;
use crate::protocol::{RowState, TaskOutcome};
use crate::store::{self, SharedStore};
use crate::task::{Task, TaskContext};

// ---------------------------------------------------------------------------
// RefreshTask
// ---------------------------------------------------------------------------

/// Re-fetches the profile of every tracked player, in store order.
///
/// At most one refresh may run per store; a refresh request while one is
/// active must be turned into a cancel of the active task by the caller.
pub struct RefreshTask {
    store: SharedStore,
    api: Arc<ApiClient>,
}

impl RefreshTask {
    pub fn new(store: SharedStore, api: Arc<ApiClient>) -> Self {
        RefreshTask { store, api }
    }
}

#[async_trait]
impl Task for RefreshTask {
    fn label(&self) -> String {
        "refreshing tracked players".into()
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        let planned = store::lock(&self.store).len();
        if planned == 0 {
            return TaskOutcome::new("no players to refresh", 0, 0);
        }

        let mut attempted = 0;
        let mut succeeded = 0;
        let mut cancelled = false;

        for index in 0..planned {
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }
            // Refresh is a distinct operation from whatever ran before it,
            // so the pacing sleep is not skipped before the first player.
            if !ctx.pace_single().await {
                cancelled = true;
                break;
            }

            let id = match store::lock(&self.store).get(index) {
                Some(record) => record.id,
                None => break,
            };

            ctx.row(index, RowState::Pending).await;
            let ok = fetch_and_apply(&self.api, &self.store, id, ctx).await;
            attempted += 1;
            if ok {
                succeeded += 1;
            }
            ctx.row(index, if ok { RowState::Updated } else { RowState::Failed })
                .await;
            ctx.progress(attempted, planned).await;
        }

        // Totals reflect only players actually attempted, so a cancelled
        // refresh reports k of k-attempted, not k of n-planned.
        let message = if cancelled {
            format!("refresh cancelled after {attempted} of {planned} players")
        } else {
            format!("updated {succeeded} of {attempted} players")
        };
        TaskOutcome::new(message, succeeded, attempted)
    }
}

// ---------------------------------------------------------------------------
// Shared fetch step
// ---------------------------------------------------------------------------

/// Fetch one player's profile and fold the result into their record.
/// Returns whether the player now has fully valid derived state.
///
/// Used by both `RefreshTask` and `AddTask`; the variants compose this
/// step rather than inheriting from each other.
pub(crate) async fn fetch_and_apply(
    api: &ApiClient,
    store: &SharedStore,
    id: i64,
    ctx: &TaskContext,
) -> bool {
    match api.player(id).await {
        Ok(response) => {
            ctx.rate_limit(response.rate_limit.clone()).await;
            let profile = parse_profile(&response.body, Utc::now());
            let ok = profile.problem.is_none();
            let mut guard = store::lock(store);
            if let Some(record) = guard.get_mut_by_id(id) {
                record.apply_profile(profile.current_name, profile.last_active);
                if let Some(problem) = profile.problem {
                    record.set_field_error(problem);
                }
                ok
            } else {
                false
            }
        }
        Err(err) => {
            let mut guard = store::lock(store);
            if let Some(record) = guard.get_mut_by_id(id) {
                record.set_error(err.to_string());
            }
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Profile derivation
// ---------------------------------------------------------------------------

/// Derived fields extracted from one profile response. `problem` holds the
/// first field-level parse failure, if any.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ProfileFields {
    pub current_name: Option<String>,
    pub last_active: Option<String>,
    pub problem: Option<String>,
}

/// Pull `name` and `last_seen` out of a profile body. Each field degrades
/// independently; the first failure becomes the record's error message.
pub(crate) fn parse_profile(body: &Value, now: DateTime<Utc>) -> ProfileFields {
    let mut problem: Option<String> = None;

    let current_name = match body.get("name").and_then(Value::as_str) {
        Some(name) => Some(name.to_string()),
        None => {
            problem.get_or_insert_with(|| "profile has no name".to_string());
            None
        }
    };

    let last_active = match body.get("last_seen").and_then(Value::as_str) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(humanize_last_active(ts.with_timezone(&Utc), now)),
            Err(_) => {
                problem.get_or_insert_with(|| "profile has an unreadable last_seen".to_string());
                None
            }
        },
        None => {
            problem.get_or_insert_with(|| "profile has no last_seen".to_string());
            None
        }
    };

    ProfileFields {
        current_name,
        last_active,
        problem,
    }
}

/// Human-readable freshness of a last-seen timestamp.
pub(crate) fn humanize_last_active(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(ts);
    if delta < ChronoDuration::minutes(1) {
        // Includes slightly-future timestamps from clock skew.
        return "just now".to_string();
    }
    if delta < ChronoDuration::hours(1) {
        return plural(delta.num_minutes(), "minute");
    }
    if delta < ChronoDuration::days(1) {
        return plural(delta.num_hours(), "hour");
    }
    if delta < ChronoDuration::days(2) {
        return "yesterday".to_string();
    }
    plural(delta.num_days(), "day")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
