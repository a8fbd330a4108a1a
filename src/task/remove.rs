// Remove-one-player task: notify the view, delete, persist.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::protocol::{RowState, TaskOutcome};
use crate::store::{self, SharedStore};
use crate::task::{Task, TaskContext};

/// Removes one tracked player, order-preserving for the remaining rows.
///
/// The `Removed` row event goes out *before* the store mutation, so a view
/// draining the channel in order drops the row before any index past it
/// shifts. An id that is not tracked is a loud failure, not a no-op.
pub struct RemoveTask {
    store: SharedStore,
    path: PathBuf,
    id: i64,
}

impl RemoveTask {
    pub fn new(store: SharedStore, path: PathBuf, id: i64) -> Self {
        RemoveTask { store, path, id }
    }
}

#[async_trait]
impl Task for RemoveTask {
    fn label(&self) -> String {
        format!("removing player {}", self.id)
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        let index = match store::lock(&self.store).position(self.id) {
            Some(index) => index,
            None => {
                return TaskOutcome::new(format!("player {} is not tracked", self.id), 0, 1);
            }
        };

        ctx.row(index, RowState::Removed).await;

        let removed = store::lock(&self.store).remove(self.id);
        let Some((_, record)) = removed else {
            // Single-writer discipline makes this unreachable in practice.
            return TaskOutcome::new(format!("player {} is not tracked", self.id), 0, 1);
        };
        ctx.progress(1, 1).await;

        let save_result = {
            let guard = store::lock(&self.store);
            store::save_players(&self.path, &guard)
        };

        let mut message = format!("removed player {} ({})", record.id, record.nickname);
        if let Err(e) = save_result {
            warn!("failed to save player file {}: {e}", self.path.display());
            message.push_str("; failed to save player file");
        }

        TaskOutcome::new(message, 1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::TaskEvent;
    use crate::store::{PlayerRecord, PlayerStore};
    use crate::task::{run_task, CancelToken};
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rosterwatch_remove_tests");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn store_with_three() -> SharedStore {
        let mut store = PlayerStore::new();
        for (id, nick) in [(1, "a"), (2, "b"), (3, "c")] {
            store.add(PlayerRecord::new(id, nick)).unwrap();
        }
        Arc::new(Mutex::new(store))
    }

    async fn run_remove(
        store: SharedStore,
        path: PathBuf,
        id: i64,
    ) -> (TaskOutcome, Vec<TaskEvent>) {
        let config = Config::default();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = crate::task::TaskContext::new(&config, tx, CancelToken::new(), 1);
        run_task(Box::new(RemoveTask::new(store, path, id)), ctx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let outcome = events
            .iter()
            .find_map(|e| match e {
                TaskEvent::Finished { outcome, .. } => Some(outcome.clone()),
                _ => None,
            })
            .expect("task must finish");
        (outcome, events)
    }

    #[tokio::test]
    async fn removes_and_persists() {
        let store = store_with_three();
        let path = temp_file("remove_ok.json");
        let _ = fs::remove_file(&path);

        let (outcome, events) = run_remove(store.clone(), path.clone(), 2).await;
        assert_eq!((outcome.success, outcome.total), (1, 1));

        let ids: Vec<i64> = store.lock().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);

        // The Removed row event precedes the progress that follows the
        // actual mutation.
        let removed_pos = events
            .iter()
            .position(|e| matches!(e, TaskEvent::Row { state: RowState::Removed, .. }))
            .expect("row event emitted");
        let progress_pos = events
            .iter()
            .position(|e| matches!(e, TaskEvent::Progress { .. }))
            .expect("progress emitted");
        assert!(removed_pos < progress_pos);

        let (records, _) = store::load_players(&path);
        let file_ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(file_ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn removed_row_event_carries_old_index() {
        let store = store_with_three();
        let path = temp_file("remove_index.json");

        let (_, events) = run_remove(store, path, 3).await;
        match events
            .iter()
            .find(|e| matches!(e, TaskEvent::Row { .. }))
            .unwrap()
        {
            TaskEvent::Row { index, state, .. } => {
                assert_eq!(*index, 2);
                assert_eq!(*state, RowState::Removed);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn missing_id_is_loud_failure() {
        let store = store_with_three();
        let path = temp_file("remove_missing.json");
        let _ = fs::remove_file(&path);

        let (outcome, events) = run_remove(store.clone(), path.clone(), 99).await;
        assert_eq!((outcome.success, outcome.total), (0, 1));
        assert!(outcome.message.contains("not tracked"));

        // Nothing mutated, nothing persisted, no row event.
        assert_eq!(store.lock().unwrap().len(), 3);
        assert!(!path.exists());
        assert!(!events.iter().any(|e| matches!(e, TaskEvent::Row { .. })));
    }
}
