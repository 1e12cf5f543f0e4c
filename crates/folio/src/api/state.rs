//! Application state shared across handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::store::BookstoreService;
use crate::worker::WorkerStatus;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: BookstoreService,
    /// Latest backend process status, published by the supervisor.
    pub worker: watch::Receiver<WorkerStatus>,
    /// Origins allowed to call the API cross-site. Empty denies all.
    pub allowed_origins: Arc<[String]>,
}

impl AppState {
    pub fn new(
        store: BookstoreService,
        worker: watch::Receiver<WorkerStatus>,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            store,
            worker,
            allowed_origins: allowed_origins.into(),
        }
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.worker.borrow().clone()
    }
}
