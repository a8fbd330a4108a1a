// Application state and orchestration logic.
//
// The central event loop that coordinates background task events and user
// commands from the view. Owns the only mutation rights to the active-task
// slot: at most one background task runs per store, a refresh request while
// one is active turns into a cancellation of the running task, and every
// other mutating command is rejected until the slot is free.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::protocol::{PlayerRow, TaskEvent, UiUpdate, UserCommand};
use crate::store::{self, SharedStore};
use crate::task::add::AddTask;
use crate::task::games::{GamesTask, LookupTask};
use crate::task::load::LoadTask;
use crate::task::refresh::RefreshTask;
use crate::task::remove::RemoveTask;
use crate::task::{self, CancelToken, Task, TaskContext};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The currently running background task.
struct ActiveTask {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancelToken,
    label: String,
}

/// The complete application state.
pub struct AppState {
    pub config: Config,
    pub store: SharedStore,
    pub api: Arc<ApiClient>,
    players_path: PathBuf,
    /// Sender cloned into every spawned task.
    task_tx: mpsc::Sender<TaskEvent>,
    active: Option<ActiveTask>,
    /// Monotonically increasing counter identifying the current task.
    /// Incremented each time a task is spawned. Events from stale
    /// generations are discarded in `handle_task_event`.
    generation: u64,
}

impl AppState {
    pub fn new(
        config: Config,
        store: SharedStore,
        api: Arc<ApiClient>,
        task_tx: mpsc::Sender<TaskEvent>,
    ) -> Self {
        let players_path = config.players_path();
        AppState {
            config,
            store,
            api,
            players_path,
            task_tx,
            active: None,
            generation: 0,
        }
    }

    /// A clone of the task event sender, for callers that need to inject
    /// events (tests, mainly).
    pub fn task_sender(&self) -> mpsc::Sender<TaskEvent> {
        self.task_tx.clone()
    }

    /// Whether a background task is currently running. Reaps the handle of
    /// a task that already finished.
    fn task_running(&mut self) -> bool {
        match &self.active {
            Some(active) if !active.handle.is_finished() => true,
            Some(_) => {
                self.active = None;
                false
            }
            None => false,
        }
    }

    /// Spawn a task into the active slot. Precondition: the slot is free.
    fn spawn_task(&mut self, task: impl Task + 'static) {
        self.generation += 1;
        let cancel = CancelToken::new();
        let ctx = TaskContext::new(
            &self.config,
            self.task_tx.clone(),
            cancel.clone(),
            self.generation,
        );
        let label = task.label();
        debug!("spawning task: {label} (gen {})", self.generation);
        let handle = task::spawn(task, ctx);
        self.active = Some(ActiveTask {
            handle,
            cancel,
            label,
        });
    }

    /// Request cancellation of the running task, if any. Returns its label.
    fn cancel_active(&self) -> Option<&str> {
        self.active.as_ref().map(|active| {
            active.cancel.cancel();
            active.label.as_str()
        })
    }

    fn snapshot(&self) -> Vec<PlayerRow> {
        store::lock(&self.store)
            .iter()
            .map(|record| PlayerRow {
                id: record.id,
                nickname: record.nickname.clone(),
                description: record.description.clone(),
                current_name: record.current_name.clone(),
                last_active: record.last_active.clone(),
                error: record.error.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

/// Run the main application event loop.
///
/// Listens on two channels using `tokio::select!`: events from the running
/// background task, and user commands from the view. Pushes `UiUpdate`s in
/// emission order. Spawns the initial bulk load before accepting commands'
/// effects, so the tracked list appears without user action.
pub async fn run(
    mut task_rx: mpsc::Receiver<TaskEvent>,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("application event loop started");

    let load = LoadTask::new(state.store.clone(), state.players_path.clone());
    state.spawn_task(load);

    loop {
        tokio::select! {
            event = task_rx.recv() => {
                match event {
                    Some(event) => handle_task_event(&mut state, event, &ui_tx).await,
                    None => {
                        info!("task channel closed, shutting down");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => handle_user_command(&mut state, cmd, &ui_tx).await,
                    None => {
                        info!("command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    // Controlled shutdown: ask the running task to stop and give it a
    // moment to reach its terminal state.
    if let Some(active) = state.active.take() {
        active.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), active.handle).await;
    }
    info!("application event loop exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Task events
// ---------------------------------------------------------------------------

/// Fold one task event into the view stream.
///
/// **Generation check**: every event carries the generation assigned when
/// its task was spawned. Events from an older generation come from a
/// cancelled task that was still draining; they are discarded.
async fn handle_task_event(
    state: &mut AppState,
    event: TaskEvent,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    if event.generation() != state.generation {
        debug!(
            "discarding stale task event (gen {} != {})",
            event.generation(),
            state.generation
        );
        return;
    }

    match event {
        TaskEvent::Started { label, .. } => {
            let _ = ui_tx.send(UiUpdate::TaskStarted { label }).await;
        }
        TaskEvent::Progress {
            current, maximum, ..
        } => {
            let _ = ui_tx.send(UiUpdate::Progress { current, maximum }).await;
        }
        TaskEvent::Row { index, state: row_state, .. } => {
            let _ = ui_tx
                .send(UiUpdate::Row {
                    index,
                    state: row_state,
                })
                .await;
        }
        TaskEvent::RateLimit {
            remaining, limit, ..
        } => {
            let _ = ui_tx.send(UiUpdate::RateLimit { remaining, limit }).await;
        }
        TaskEvent::Games { summary, .. } => {
            let _ = ui_tx.send(UiUpdate::Games(summary)).await;
        }
        TaskEvent::Detail { info, .. } => {
            let _ = ui_tx.send(UiUpdate::Detail(info)).await;
        }
        TaskEvent::Finished { outcome, .. } => {
            state.active = None;
            let _ = ui_tx.send(UiUpdate::Players(state.snapshot())).await;
            let severity = outcome.severity();
            let _ = ui_tx
                .send(UiUpdate::TaskResult {
                    message: outcome.message,
                    severity,
                    success: outcome.success,
                    total: outcome.total,
                })
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// User commands
// ---------------------------------------------------------------------------

async fn handle_user_command(
    state: &mut AppState,
    cmd: UserCommand,
    ui_tx: &mpsc::Sender<UiUpdate>,
) {
    match cmd {
        UserCommand::Refresh => {
            if state.task_running() {
                // A second refresh request supersedes the running task:
                // it becomes a cancel, never a concurrent task.
                if let Some(label) = state.cancel_active() {
                    let label = label.to_string();
                    info!("refresh requested while busy, cancelling: {label}");
                    let _ = ui_tx
                        .send(UiUpdate::Status(format!("cancelling {label}")))
                        .await;
                }
            } else {
                state.spawn_task(RefreshTask::new(state.store.clone(), state.api.clone()));
            }
        }

        UserCommand::AddPlayer { id, nickname } => {
            if state.task_running() {
                reject_busy(state, ui_tx).await;
                return;
            }
            // Uniqueness is checked before the task exists; a duplicate id
            // never reaches the engine.
            if store::lock(&state.store).contains(id) {
                let _ = ui_tx
                    .send(UiUpdate::Status(format!("player {id} is already tracked")))
                    .await;
                return;
            }
            state.spawn_task(AddTask::new(
                state.store.clone(),
                state.api.clone(),
                state.players_path.clone(),
                id,
                nickname,
            ));
        }

        UserCommand::RemovePlayer { id } => {
            if state.task_running() {
                reject_busy(state, ui_tx).await;
                return;
            }
            state.spawn_task(RemoveTask::new(
                state.store.clone(),
                state.players_path.clone(),
                id,
            ));
        }

        UserCommand::EditPlayer {
            id,
            nickname,
            description,
        } => {
            if state.task_running() {
                reject_busy(state, ui_tx).await;
                return;
            }
            // Edits are applied inline: they never run concurrently with a
            // mutating task, so the single-writer discipline holds.
            let found = {
                let mut guard = store::lock(&state.store);
                match guard.get_mut_by_id(id) {
                    Some(record) => {
                        if let Some(nickname) = nickname {
                            record.nickname = nickname;
                        }
                        if let Some(description) = description {
                            record.description = description;
                        }
                        true
                    }
                    None => false,
                }
            };
            if !found {
                let _ = ui_tx
                    .send(UiUpdate::Status(format!("player {id} is not tracked")))
                    .await;
                return;
            }
            let save_result = {
                let guard = store::lock(&state.store);
                store::save_players(&state.players_path, &guard)
            };
            let status = match save_result {
                Ok(()) => format!("updated player {id}"),
                Err(e) => {
                    warn!(
                        "failed to save player file {}: {e}",
                        state.players_path.display()
                    );
                    format!("updated player {id}; failed to save player file")
                }
            };
            let _ = ui_tx.send(UiUpdate::Players(state.snapshot())).await;
            let _ = ui_tx.send(UiUpdate::Status(status)).await;
        }

        UserCommand::ShowGames(filter) => {
            if state.task_running() {
                reject_busy(state, ui_tx).await;
                return;
            }
            state.spawn_task(GamesTask::new(state.api.clone(), filter, &state.config));
        }

        UserCommand::Lookup(target) => {
            if state.task_running() {
                reject_busy(state, ui_tx).await;
                return;
            }
            state.spawn_task(LookupTask::new(state.api.clone(), target));
        }

        UserCommand::Quit => unreachable!("Quit is handled by the event loop"),
    }
}

async fn reject_busy(state: &AppState, ui_tx: &mpsc::Sender<UiUpdate>) {
    let label = state
        .active
        .as_ref()
        .map(|active| active.label.clone())
        .unwrap_or_else(|| "a task".to_string());
    let _ = ui_tx
        .send(UiUpdate::Status(format!("busy: {label} in progress")))
        .await;
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
