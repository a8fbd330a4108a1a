// Bulk load of the tracked-player list from the player file.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::protocol::TaskOutcome;
use crate::store::{self, SharedStore};
use crate::task::{Task, TaskContext};

/// Populates the store from the player file's JSON array.
///
/// Malformed entries are skipped, never fatal; a missing or unparseable
/// file yields an empty store and a "no players found" result. There is no
/// hard failure path visible to the user.
pub struct LoadTask {
    store: SharedStore,
    path: PathBuf,
}

impl LoadTask {
    pub fn new(store: SharedStore, path: PathBuf) -> Self {
        LoadTask { store, path }
    }
}

#[async_trait]
impl Task for LoadTask {
    fn label(&self) -> String {
        "loading tracked players".into()
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        let (records, file_entries) = store::load_players(&self.path);
        if file_entries == 0 {
            return TaskOutcome::new("no players found", 0, 0);
        }

        let maximum = records.len();
        let mut loaded = 0;
        for (processed, record) in records.into_iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            if store::lock(&self.store).add(record).is_ok() {
                loaded += 1;
            }
            ctx.progress(processed + 1, maximum).await;
        }

        TaskOutcome::new(
            format!("loaded {loaded} of {file_entries} players"),
            loaded,
            file_entries,
        )
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
        let dir = std::env::temp_dir().join("rosterwatch_load_tests");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn fresh_store() -> SharedStore {
        Arc::new(Mutex::new(PlayerStore::new()))
    }

    async fn run_load(path: PathBuf, store: SharedStore) -> (TaskOutcome, Vec<TaskEvent>) {
        let config = Config::default();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = crate::task::TaskContext::new(&config, tx, CancelToken::new(), 1);
        run_task(Box::new(LoadTask::new(store, path)), ctx).await;

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
    async fn loads_single_valid_entry() {
        let path = temp_file("one.json");
        fs::write(&path, r#"[{"id": 1, "nick": "Foo"}]"#).unwrap();
        let store = fresh_store();

        let (outcome, _) = run_load(path, store.clone()).await;
        assert_eq!((outcome.success, outcome.total), (1, 1));

        let guard = store.lock().unwrap();
        assert_eq!(guard.len(), 1);
        let record = guard.get(0).unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.nickname, "Foo");
    }

    #[tokio::test]
    async fn skips_entry_missing_nick() {
        let path = temp_file("missing_nick.json");
        fs::write(&path, r#"[{"id": 1}]"#).unwrap();
        let store = fresh_store();

        let (outcome, _) = run_load(path, store.clone()).await;
        assert_eq!((outcome.success, outcome.total), (0, 1));
        assert!(store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_reports_no_players_found() {
        let path = temp_file("absent.json");
        let _ = fs::remove_file(&path);
        let store = fresh_store();

        let (outcome, _) = run_load(path, store.clone()).await;
        assert_eq!(outcome.message, "no players found");
        assert_eq!((outcome.success, outcome.total), (0, 0));
        assert!(store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn parse_error_downgrades_to_no_players_found() {
        let path = temp_file("broken.json");
        fs::write(&path, "[{ this is not json").unwrap();
        let store = fresh_store();

        let (outcome, _) = run_load(path, store).await;
        assert_eq!(outcome.message, "no players found");
    }

    #[tokio::test]
    async fn existing_record_with_same_id_is_not_overwritten() {
        let path = temp_file("collide.json");
        fs::write(&path, r#"[{"id": 5, "nick": "FromFile"}]"#).unwrap();
        let store = fresh_store();
        store
            .lock()
            .unwrap()
            .add(PlayerRecord::new(5, "Existing"))
            .unwrap();

        let (outcome, _) = run_load(path, store.clone()).await;
        assert_eq!((outcome.success, outcome.total), (0, 1));
        assert_eq!(store.lock().unwrap().get(0).unwrap().nickname, "Existing");
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_bounded() {
        let path = temp_file("many.json");
        fs::write(
            &path,
            r#"[{"id": 1, "nick": "a"}, {"id": 2, "nick": "b"}, {"id": 3, "nick": "c"}]"#,
        )
        .unwrap();

        let (_, events) = run_load(path, fresh_store()).await;
        let mut last = 0;
        for event in &events {
            if let TaskEvent::Progress {
                current, maximum, ..
            } = event
            {
                assert!(*current >= last, "progress went backwards");
                assert!(current <= maximum);
                last = *current;
            }
        }
        assert_eq!(last, 3);
    }
}
