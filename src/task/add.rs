// Add-one-player task: append, fetch once, persist.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::api::ApiClient;
use crate::protocol::{RowState, TaskOutcome};
use crate::store::{self, PlayerRecord, SharedStore};
use crate::task::refresh::fetch_and_apply;
use crate::task::{Task, TaskContext};

/// Appends a new record, fetches its profile exactly once (no pacing
/// pre-sleep, since there is no prior call in this task), and persists the
/// store. A failed fetch still leaves the record appended and persisted,
/// flagged with its error.
///
/// Id uniqueness is a precondition checked by the caller before the task
/// is constructed.
pub struct AddTask {
    store: SharedStore,
    api: Arc<ApiClient>,
    path: PathBuf,
    id: i64,
    nickname: String,
}

impl AddTask {
    pub fn new(
        store: SharedStore,
        api: Arc<ApiClient>,
        path: PathBuf,
        id: i64,
        nickname: String,
    ) -> Self {
        AddTask {
            store,
            api,
            path,
            id,
            nickname,
        }
    }
}

#[async_trait]
impl Task for AddTask {
    fn label(&self) -> String {
        format!("adding player {}", self.id)
    }

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
        if ctx.is_cancelled() {
            return TaskOutcome::new("add cancelled", 0, 0);
        }

        let record = PlayerRecord::new(self.id, self.nickname.clone());
        let index = match store::lock(&self.store).add(record) {
            Ok(index) => index,
            Err(err) => return TaskOutcome::new(err.to_string(), 0, 1),
        };

        ctx.row(index, RowState::Pending).await;
        let ok = fetch_and_apply(&self.api, &self.store, self.id, ctx).await;
        ctx.row(index, if ok { RowState::Updated } else { RowState::Failed })
            .await;
        ctx.progress(1, 1).await;

        let save_result = {
            let guard = store::lock(&self.store);
            store::save_players(&self.path, &guard)
        };

        let mut message = if ok {
            format!("added player {} ({})", self.id, self.nickname)
        } else {
            format!("added player {} with errors", self.id)
        };
        if let Err(e) = save_result {
            warn!("failed to save player file {}: {e}", self.path.display());
            message.push_str("; failed to save player file");
        }

        TaskOutcome::new(message, usize::from(ok), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::TaskEvent;
    use crate::store::PlayerStore;
    use crate::task::{run_task, CancelToken};
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn one_shot_server(response: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });
        addr
    }

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rosterwatch_add_tests");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    async fn run_add(
        addr: std::net::SocketAddr,
        path: PathBuf,
        store: SharedStore,
        id: i64,
        nickname: &str,
    ) -> TaskOutcome {
        let api = Arc::new(
            ApiClient::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap(),
        );
        let config = Config::default();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = crate::task::TaskContext::new(&config, tx, CancelToken::new(), 1);
        run_task(
            Box::new(AddTask::new(store, api, path, id, nickname.to_string())),
            ctx,
        )
        .await;

        let mut outcome = None;
        while let Some(event) = rx.recv().await {
            if let TaskEvent::Finished { outcome: o, .. } = event {
                outcome = Some(o);
            }
        }
        outcome.expect("task must finish")
    }

    #[tokio::test]
    async fn add_fetch_failure_still_appends_and_persists() {
        // Remote answers 404; the record must land in both the store and
        // the file, flagged with the reason phrase.
        let addr = one_shot_server(concat!(
            "HTTP/1.1 404 Not Found\r\n",
            "Content-Length: 0\r\n",
            "\r\n",
        ))
        .await;
        let path = temp_file("add_404.json");
        let _ = fs::remove_file(&path);
        let store: SharedStore = Arc::new(Mutex::new(PlayerStore::new()));

        let outcome = run_add(addr, path.clone(), store.clone(), 42, "Bar").await;
        assert_eq!((outcome.success, outcome.total), (0, 1));

        {
            let guard = store.lock().unwrap();
            let record = guard.get_by_id(42).expect("record appended");
            assert_eq!(record.nickname, "Bar");
            assert_eq!(record.error.as_deref(), Some("Not Found"));
            assert!(record.current_name.is_none());
        }

        let (records, total) = store::load_players(&path);
        assert_eq!(total, 1);
        assert_eq!(records[0].id, 42);
    }

    #[tokio::test]
    async fn add_success_reports_one_of_one() {
        let addr = one_shot_server(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Length: 49\r\n",
            "\r\n",
            "{\"name\":\"Bar\",\"last_seen\":\"2020-01-01T00:00:00Z\"}",
        ))
        .await;
        let path = temp_file("add_ok.json");
        let _ = fs::remove_file(&path);
        let store: SharedStore = Arc::new(Mutex::new(PlayerStore::new()));

        let outcome = run_add(addr, path, store.clone(), 7, "Bar").await;
        assert_eq!((outcome.success, outcome.total), (1, 1));
        let guard = store.lock().unwrap();
        assert_eq!(
            guard.get_by_id(7).unwrap().current_name.as_deref(),
            Some("Bar")
        );
    }
}
