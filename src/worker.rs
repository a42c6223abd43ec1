//! The offline cache manager: install, activate and fetch handling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use reqwest::Url;
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::events::{
    BACKGROUND_SYNC_TAG, EventOutcome, MessageData, MessageOutcome, Notification, PushPayload,
    WorkerEvent, WorkerMessage,
};
use crate::manifest::{AssetManifest, CacheNames};
use crate::network::{HttpNetwork, Network};
use crate::request::{CacheKey, Method, Request, RequestKind, Response};
use crate::stats::{ResponseSource, StatsTracker, WorkerStats};
use crate::storage::{CacheStorage, DiskCacheStorage};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, install not started.
    Parsed,
    Installing,
    /// Installed and waiting to take control.
    Installed,
    Activating,
    /// Controlling pages and serving fetches.
    Activated,
    /// Failed to install, or replaced by a newer worker.
    Redundant,
}

/// Result of a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Number of manifest assets written to the static partition.
    pub cached: usize,
    /// Whether the worker asked to skip the waiting phase.
    pub skip_waiting: bool,
}

/// Result of activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Stale partitions removed, in enumeration order.
    pub deleted: Vec<String>,
    /// Whether open pages are now controlled by this worker.
    pub claimed: bool,
}

/// What the worker did with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs its default network fetch.
    Passthrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

impl FetchOutcome {
    /// Returns the response if the request was intercepted.
    #[must_use]
    pub const fn response(&self) -> Option<&Response> {
        match self {
            Self::Passthrough => None,
            Self::Respond { response, .. } => Some(response),
        }
    }

    #[must_use]
    pub const fn source(&self) -> Option<ResponseSource> {
        match self {
            Self::Passthrough => None,
            Self::Respond { source, .. } => Some(*source),
        }
    }
}

/// Offline cache manager for one origin and one cache version.
///
/// Holds a static partition populated at install from the asset manifest and
/// a dynamic partition filled as pages are fetched. Navigations are served
/// network-first, everything else cache-first.
pub struct OfflineWorker<N: Network = HttpNetwork, S: CacheStorage = DiskCacheStorage> {
    id: u64,
    names: CacheNames,
    manifest: AssetManifest,
    origin: Url,
    offline_url: Url,
    skip_waiting_on_install: bool,
    network: N,
    storage: Arc<S>,
    state: Mutex<WorkerState>,
    skip_waiting: AtomicBool,
    writes: TaskTracker,
    stats: Arc<StatsTracker>,
}

impl<N: Network, S: CacheStorage + 'static> OfflineWorker<N, S> {
    /// Creates a worker from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &WorkerConfig, network: N, storage: Arc<S>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            names: config.cache_names(),
            manifest: config.asset_manifest()?,
            origin: config.origin_url()?,
            offline_url: config.resolve(&config.offline_page)?,
            skip_waiting_on_install: config.skip_waiting_on_install,
            network,
            storage,
            state: Mutex::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            writes: TaskTracker::new(),
            stats: Arc::new(StatsTracker::new()),
        })
    }

    /// Process-unique worker id, used in log lines.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn cache_names(&self) -> &CacheNames {
        &self.names
    }

    #[must_use]
    pub const fn manifest(&self) -> &AssetManifest {
        &self.manifest
    }

    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        log::debug!("Worker {}: {:?} -> {next:?}", self.id, *state);
        *state = next;
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Asks to leave the waiting phase as soon as possible.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    /// Waits until every detached cache write has finished.
    ///
    /// Fetch results never depend on this; it exists for shutdown and for
    /// callers that need to observe the partitions afterwards.
    pub async fn flush_pending_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Fetches every manifest asset and stores them in the static partition.
    ///
    /// All assets are fetched before anything is written: if any fetch fails
    /// or returns a non-200 status, nothing is stored and the worker becomes
    /// redundant. A storage failure while writing removes the static
    /// partition again if this attempt created it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] listing the failed paths, or a storage error.
    pub async fn on_install(&self) -> Result<InstallOutcome> {
        self.set_state(WorkerState::Installing);
        log::info!(
            "Worker {}: installing, caching {} static assets into {}",
            self.id,
            self.manifest.len(),
            self.names.static_name
        );

        match self.populate_static().await {
            Ok(cached) => {
                self.set_state(WorkerState::Installed);
                if self.skip_waiting_on_install {
                    self.skip_waiting();
                }
                log::info!("Worker {}: static assets cached successfully", self.id);
                Ok(InstallOutcome {
                    cached,
                    skip_waiting: self.skip_waiting_requested(),
                })
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                log::error!("Worker {}: failed to cache static assets: {e}", self.id);
                Err(e)
            }
        }
    }

    async fn populate_static(&self) -> Result<usize> {
        let mut requests = Vec::with_capacity(self.manifest.len());
        for path in self.manifest.paths() {
            let url = self
                .origin
                .join(path)
                .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
            requests.push((path.as_str(), Request::from_url(url)));
        }

        let results = join_all(requests.iter().map(|(_, req)| self.network.fetch(req))).await;

        let mut fetched = Vec::with_capacity(requests.len());
        let mut failed = Vec::new();
        for ((path, req), result) in requests.iter().zip(results) {
            match result {
                Ok(resp) if resp.is_cacheable() => fetched.push((req.cache_key(), resp)),
                Ok(resp) => {
                    log::warn!("Worker {}: {path} returned {}", self.id, resp.status);
                    failed.push((*path).to_string());
                }
                Err(e) => {
                    log::warn!("Worker {}: {path} failed: {e}", self.id);
                    failed.push((*path).to_string());
                }
            }
        }
        if !failed.is_empty() {
            return Err(Error::Install { failed });
        }

        let existed = self.storage.has(&self.names.static_name).await?;
        let cached = fetched.len();
        if let Err(e) = self.write_static(fetched).await {
            if !existed {
                self.discard_static().await;
            }
            return Err(e);
        }
        Ok(cached)
    }

    async fn write_static(&self, entries: Vec<(CacheKey, Response)>) -> Result<()> {
        self.storage.open(&self.names.static_name).await?;
        for (key, resp) in entries {
            self.storage.put(&self.names.static_name, &key, resp).await?;
        }
        Ok(())
    }

    /// Removes a static partition this install attempt created.
    async fn discard_static(&self) {
        if let Err(e) = self.storage.delete(&self.names.static_name).await {
            log::warn!(
                "Worker {}: could not remove partial {}: {e}",
                self.id,
                self.names.static_name
            );
        }
    }

    // =========================================================================
    // Activate
    // =========================================================================

    /// Deletes every partition not belonging to this version, then claims
    /// open pages. Deletion fully completes before the claim.
    ///
    /// # Errors
    ///
    /// Returns a storage error if partitions cannot be listed or deleted; the
    /// worker is then left installed.
    pub async fn on_activate(&self) -> Result<ActivateOutcome> {
        self.set_state(WorkerState::Activating);
        log::info!("Worker {}: activating", self.id);

        let purged = self.purge_stale().await;
        let deleted = match purged {
            Ok(deleted) => deleted,
            Err(e) => {
                self.set_state(WorkerState::Installed);
                log::error!("Worker {}: activation failed: {e}", self.id);
                return Err(e);
            }
        };

        self.set_state(WorkerState::Activated);
        log::info!("Worker {}: activated and ready", self.id);
        Ok(ActivateOutcome {
            deleted,
            claimed: true,
        })
    }

    async fn purge_stale(&self) -> Result<Vec<String>> {
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|name| !self.names.is_current(name))
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

        let mut deleted = Vec::with_capacity(stale.len());
        for (name, result) in stale.into_iter().zip(results) {
            if result? {
                log::info!("Worker {}: deleted old cache {name}", self.id);
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Handles one intercepted request.
    ///
    /// Non-GET and cross-origin requests are passed through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFallback`] when cache and network both fail for a
    /// request that has no offline substitute.
    pub async fn on_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if request.method != Method::Get || !request.is_same_origin(&self.origin) {
            self.stats.record_passthrough();
            return Ok(FetchOutcome::Passthrough);
        }

        let kind = request.classify(&self.manifest);
        let result = match kind {
            RequestKind::Navigation => self.network_first(request, kind).await,
            RequestKind::StaticAsset => {
                self.cache_first(request, kind, &self.names.static_name)
                    .await
            }
            RequestKind::Other => {
                self.cache_first(request, kind, &self.names.dynamic_name)
                    .await
            }
        };

        match result {
            Ok((response, source)) => {
                self.stats.record_served(source, response.body.len());
                Ok(FetchOutcome::Respond { response, source })
            }
            Err(e) => {
                self.stats.record_failure();
                Err(e)
            }
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        kind: RequestKind,
    ) -> Result<(Response, ResponseSource)> {
        let key = request.cache_key();
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_detached(&self.names.dynamic_name, key, response.clone());
                }
                Ok((response, ResponseSource::Network))
            }
            Err(e) if e.is_network() => {
                log::debug!("Worker {}: network failed for {}: {e}", self.id, request.url);
                if let Some(cached) = self.lookup(&key).await {
                    return Ok((cached, ResponseSource::Cache));
                }
                self.offline_fallback(request, kind).await
            }
            Err(e) => Err(e),
        }
    }

    async fn cache_first(
        &self,
        request: &Request,
        kind: RequestKind,
        partition: &str,
    ) -> Result<(Response, ResponseSource)> {
        let key = request.cache_key();
        if let Some(cached) = self.lookup(&key).await {
            return Ok((cached, ResponseSource::Cache));
        }
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_detached(partition, key, response.clone());
                }
                Ok((response, ResponseSource::Network))
            }
            Err(e) if e.is_network() => {
                log::debug!(
                    "Worker {}: request failed, serving from cache or offline fallback: {}",
                    self.id,
                    request.url
                );
                self.offline_fallback(request, kind).await
            }
            Err(e) => Err(e),
        }
    }

    /// The offline document stands in for navigations only.
    async fn offline_fallback(
        &self,
        request: &Request,
        kind: RequestKind,
    ) -> Result<(Response, ResponseSource)> {
        if kind == RequestKind::Navigation {
            let key = CacheKey::new(&Method::Get, &self.offline_url);
            if let Some(doc) = self.lookup(&key).await {
                return Ok((doc, ResponseSource::OfflineFallback));
            }
            log::warn!(
                "Worker {}: offline page {} is not cached",
                self.id,
                self.offline_url
            );
        }
        Err(Error::NoFallback {
            url: request.url.to_string(),
        })
    }

    /// Cache lookup across all partitions; storage errors count as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        match self.storage.match_any(key).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("Worker {}: cache lookup for {key} failed: {e}", self.id);
                None
            }
        }
    }

    /// Writes `response` on a detached task; the caller never observes it.
    fn store_detached(&self, partition: &str, key: CacheKey, response: Response) {
        let storage = Arc::clone(&self.storage);
        let stats = Arc::clone(&self.stats);
        let partition = partition.to_string();
        let id = self.id;
        self.writes.spawn(async move {
            match storage.put(&partition, &key, response).await {
                Ok(()) => {
                    stats.record_write(true);
                    log::debug!("Worker {id}: cached {key} in {partition}");
                }
                Err(e) => {
                    stats.record_write(false);
                    log::warn!("Worker {id}: failed to cache {key} in {partition}: {e}");
                }
            }
        });
    }

    // =========================================================================
    // Messages, sync, push
    // =========================================================================

    /// Handles a control message. Messages from other origins are ignored.
    pub fn on_message(&self, message: &WorkerMessage) -> MessageOutcome {
        let same_origin = Url::parse(&message.origin)
            .is_ok_and(|origin| origin.origin() == self.origin.origin());
        if !same_origin {
            log::warn!(
                "Worker {}: ignoring message from unauthorized origin: {}",
                self.id,
                message.origin
            );
            return MessageOutcome::Rejected;
        }

        match &message.data {
            MessageData::SkipWaiting => {
                self.skip_waiting();
                MessageOutcome::SkipWaiting
            }
            MessageData::LogSecurityEvent { payload } => {
                log::info!("Worker {}: security event logged: {payload}", self.id);
                MessageOutcome::Logged
            }
            MessageData::Unknown => MessageOutcome::Ignored,
        }
    }

    /// Handles a background sync. Returns whether the tag was recognized.
    pub fn on_sync(&self, tag: &str) -> bool {
        if tag == BACKGROUND_SYNC_TAG {
            log::info!("Worker {}: background sync triggered", self.id);
            true
        } else {
            log::debug!("Worker {}: ignoring sync tag {tag}", self.id);
            false
        }
    }

    /// Turns a push payload into a notification. An empty push shows nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload is not valid JSON.
    pub fn on_push(&self, payload: Option<&[u8]>) -> Result<Option<Notification>> {
        let Some(bytes) = payload.filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        let payload: PushPayload = serde_json::from_slice(bytes)?;
        Ok(Some(Notification::from_push(payload)))
    }

    /// Returns the URL to open for a clicked notification.
    pub fn on_notification_click(&self, notification: &Notification) -> String {
        log::info!("Worker {}: notification clicked", self.id);
        notification.target_url().to_string()
    }

    /// Routes an event to its handler.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        Ok(match event {
            WorkerEvent::Install => EventOutcome::Installed(self.on_install().await?),
            WorkerEvent::Activate => EventOutcome::Activated(self.on_activate().await?),
            WorkerEvent::Fetch(request) => EventOutcome::Fetched(self.on_fetch(&request).await?),
            WorkerEvent::Message(message) => EventOutcome::Message(self.on_message(&message)),
            WorkerEvent::Sync { tag } => EventOutcome::Synced(self.on_sync(&tag)),
            WorkerEvent::Push { payload } => EventOutcome::Push(self.on_push(payload.as_deref())?),
            WorkerEvent::NotificationClick(notification) => {
                EventOutcome::OpenWindow(self.on_notification_click(&notification))
            }
        })
    }
}

impl<N: Network, S: CacheStorage> std::fmt::Debug for OfflineWorker<N, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("names", &self.names)
            .field("origin", &self.origin.as_str())
            .finish_non_exhaustive()
    }
}
