//! Worker registration: at most one active and one waiting worker.
//!
//! A newly installed worker waits while pages are open under the current
//! active worker, unless it asked to skip waiting. Promotion runs the new
//! worker's activation (stale partition purge) before it starts serving.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::events::{MessageOutcome, WorkerMessage};
use crate::network::{HttpNetwork, Network};
use crate::request::Request;
use crate::stats::WorkerStats;
use crate::storage::{CacheStorage, DiskCacheStorage};
use crate::worker::{FetchOutcome, OfflineWorker, WorkerState};

/// Where a successfully installed worker ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReport {
    /// Activated and now serving fetches.
    Activated,
    /// Installed, waiting for open pages to close.
    Waiting,
}

/// Serializable view of a registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub active: Option<WorkerStatus>,
    pub waiting: Option<WorkerStatus>,
    pub clients: usize,
}

/// Serializable view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: u64,
    pub state: WorkerState,
    pub static_cache: String,
    pub dynamic_cache: String,
    pub stats: WorkerStats,
}

impl WorkerStatus {
    fn of<N: Network, S: CacheStorage + 'static>(worker: &OfflineWorker<N, S>) -> Self {
        Self {
            id: worker.id(),
            state: worker.state(),
            static_cache: worker.cache_names().static_name.clone(),
            dynamic_cache: worker.cache_names().dynamic_name.clone(),
            stats: worker.stats(),
        }
    }
}

type Slot<N, S> = Option<Arc<OfflineWorker<N, S>>>;

/// Owns the active and waiting workers for one scope.
pub struct Registration<N: Network = HttpNetwork, S: CacheStorage = DiskCacheStorage> {
    active: RwLock<Slot<N, S>>,
    waiting: Mutex<Slot<N, S>>,
    clients: AtomicUsize,
    /// Serializes install and promotion.
    lifecycle: Mutex<()>,
}

impl<N: Network, S: CacheStorage> Default for Registration<N, S> {
    fn default() -> Self {
        Self {
            active: RwLock::new(None),
            waiting: Mutex::new(None),
            clients: AtomicUsize::new(0),
            lifecycle: Mutex::new(()),
        }
    }
}

impl<N: Network, S: CacheStorage + 'static> Registration<N, S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `worker` and activates it if nothing holds it back.
    ///
    /// On install failure the worker is discarded and the current active
    /// worker keeps serving.
    ///
    /// # Errors
    ///
    /// Returns the install or activation error.
    pub async fn install(&self, worker: OfflineWorker<N, S>) -> Result<InstallReport> {
        let _guard = self.lifecycle.lock().await;
        let worker = Arc::new(worker);

        if let Err(e) = worker.on_install().await {
            log::error!(
                "Install of worker {} failed, keeping current worker: {e}",
                worker.id()
            );
            return Err(e);
        }

        if let Some(previous) = self.waiting.lock().await.replace(Arc::clone(&worker)) {
            log::info!(
                "Worker {} replaces waiting worker {}",
                worker.id(),
                previous.id()
            );
            previous.mark_redundant();
        }

        let no_active = self.active.read().await.is_none();
        let no_clients = self.clients.load(Ordering::SeqCst) == 0;
        if no_active || no_clients || worker.skip_waiting_requested() {
            self.promote().await?;
            Ok(InstallReport::Activated)
        } else {
            log::info!(
                "Worker {} installed and waiting for {} client(s) to close",
                worker.id(),
                self.clients.load(Ordering::SeqCst)
            );
            Ok(InstallReport::Waiting)
        }
    }

    /// Activates the waiting worker, if any. Caller holds the lifecycle lock.
    async fn promote(&self) -> Result<()> {
        let Some(next) = self.waiting.lock().await.take() else {
            return Ok(());
        };

        let mut active = self.active.write().await;
        if let Some(current) = active.as_ref() {
            current.flush_pending_writes().await;
        }

        if let Err(e) = next.on_activate().await {
            *self.waiting.lock().await = Some(next);
            return Err(e);
        }

        if let Some(old) = active.replace(Arc::clone(&next)) {
            old.mark_redundant();
            log::info!("Worker {} replaced worker {}", next.id(), old.id());
        }
        Ok(())
    }

    /// Routes a request through the active worker. Without one, everything
    /// passes through.
    ///
    /// # Errors
    ///
    /// Propagates the active worker's fetch error.
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(worker) => worker.on_fetch(request).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    /// Delivers a message to the waiting worker, or to the active one when
    /// nothing is waiting. `SKIP_WAITING` accepted by a waiting worker
    /// promotes it.
    ///
    /// # Errors
    ///
    /// Returns the activation error if a promotion fails.
    pub async fn post_message(&self, message: &WorkerMessage) -> Result<MessageOutcome> {
        let _guard = self.lifecycle.lock().await;

        let waiting = self.waiting.lock().await.clone();
        if let Some(worker) = waiting {
            let outcome = worker.on_message(message);
            if outcome == MessageOutcome::SkipWaiting {
                self.promote().await?;
            }
            return Ok(outcome);
        }

        let active = self.active.read().await.clone();
        Ok(match active {
            Some(worker) => worker.on_message(message),
            None => {
                log::debug!("No worker to receive message from {}", message.origin);
                MessageOutcome::Ignored
            }
        })
    }

    /// Records an open page controlled by this registration.
    pub fn client_opened(&self) {
        self.clients.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a closed page. Closing the last one promotes a waiting worker.
    ///
    /// # Errors
    ///
    /// Returns the activation error if a promotion fails.
    pub async fn client_closed(&self) -> Result<()> {
        let previous = self
            .clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1 {
            let _guard = self.lifecycle.lock().await;
            if self.clients.load(Ordering::SeqCst) == 0 {
                self.promote().await?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// The worker currently serving fetches.
    pub async fn active(&self) -> Option<Arc<OfflineWorker<N, S>>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineWorker<N, S>>> {
        self.waiting.lock().await.clone()
    }

    pub async fn status(&self) -> RegistrationStatus {
        let active = self.active().await;
        let waiting = self.waiting().await;
        RegistrationStatus {
            active: active.as_deref().map(WorkerStatus::of),
            waiting: waiting.as_deref().map(WorkerStatus::of),
            clients: self.clients(),
        }
    }

    /// Waits for the active worker's detached cache writes.
    pub async fn flush(&self) {
        if let Some(worker) = self.active().await {
            worker.flush_pending_writes().await;
        }
    }
}
