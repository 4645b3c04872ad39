//! Owns the client-side view over the server event log and sequences the
//! three page-producing operations against it.
//!
//! Every operation captures a generation number when it is issued. Issuing a
//! new operation bumps the generation, and a response is only applied if its
//! generation is still current, so a late answer can never clobber newer state.

use std::{
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{EventKind, NormalizedEvent},
    error::QueryError,
    protocol::{PageResult, QueryFilter, QueryRequest, TimeWindow, TypeCounts, DEFAULT_PAGE_LIMIT},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    normalize::normalize_batch,
    pagination::{PageFallback, PaginationState},
    service::QueryService,
    store::{EventStore, MergeStats, DEFAULT_STORE_CAPACITY},
};

/// Which page-producing operation currently owns the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    Idle,
    Searching,
    LoadingMore,
    Refreshing,
}

/// The filters the user has entered, independent of the last issued query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSelection {
    pub types: Vec<EventKind>,
    pub processes: Vec<String>,
    pub pids: Vec<u32>,
    pub cgroup_ids: Vec<String>,
    pub time_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl FilterSelection {
    /// Whether any list filter is set. The time window alone does not count.
    pub fn is_constrained(&self) -> bool {
        !self.types.is_empty() || !self.processes.is_empty() || !self.pids.is_empty()
    }

    pub fn to_query_filter(&self) -> QueryFilter {
        QueryFilter {
            types: self.types.clone(),
            processes: self.processes.clone(),
            pids: self.pids.clone(),
            cgroup_ids: self.cgroup_ids.clone(),
            time_window: self
                .time_window
                .map(|(start, end)| TimeWindow::between(start, end)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Events carried by the response.
    pub received: usize,
    /// Events from the response that ended up in the store.
    pub applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied(BatchSummary),
    /// The guard for this operation refused to start it.
    Skipped,
    /// A newer operation was issued before the response arrived.
    Superseded,
    /// Refresh only: the round-trip failed and the view was left alone.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Replaced { count: usize },
    Appended { added: usize },
    Merged(MergeStats),
    Failed(String),
}

/// Read-only copy of the view handed to presentation code.
#[derive(Debug, Clone)]
pub struct InvestigationView {
    pub events: Vec<NormalizedEvent>,
    pub activity: Activity,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub error: Option<String>,
    pub pagination: PaginationState,
    pub type_counts: TypeCounts,
    pub filters: FilterSelection,
    pub has_filters: bool,
    pub selected_event: Option<NormalizedEvent>,
    pub last_query: Option<QueryRequest>,
}

/// Which operation owns the view, and the generation it was issued under.
/// Kept behind a synchronous lock so an abandoned operation can release it
/// from `Drop`.
#[derive(Debug, Default)]
struct Ownership {
    activity: Activity,
    generation: u64,
}

fn lock_ownership(ownership: &StdMutex<Ownership>) -> MutexGuard<'_, Ownership> {
    ownership.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by an operation while its request is in flight. Dropping it, whether
/// the operation finished or its future was cancelled, returns the view to
/// `Idle` unless a newer operation has taken over.
struct InFlight<'a> {
    ownership: &'a StdMutex<Ownership>,
    generation: u64,
}

impl InFlight<'_> {
    fn current_generation(&self) -> u64 {
        lock_ownership(self.ownership).generation
    }

    /// Releases the view if this operation still owns it.
    fn settle(&self) -> bool {
        let mut ownership = lock_ownership(self.ownership);
        if ownership.generation != self.generation {
            return false;
        }
        ownership.activity = Activity::Idle;
        true
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.settle();
    }
}

struct CoordinatorState {
    filters: FilterSelection,
    last_query: Option<QueryRequest>,
    store: EventStore,
    pagination: PaginationState,
    type_counts: TypeCounts,
    error: Option<String>,
    selected_event_id: Option<String>,
}

impl CoordinatorState {
    fn lineage_filter(&self) -> Option<QueryFilter> {
        match &self.last_query {
            Some(query) => query.filter.clone(),
            None => Some(self.filters.to_query_filter()),
        }
    }

    fn record_type_counts(&mut self, response: &PageResult) {
        if let Some(counts) = response.type_counts {
            self.type_counts = counts;
        }
    }
}

pub struct QueryCoordinator {
    service: Arc<dyn QueryService>,
    ownership: StdMutex<Ownership>,
    inner: Mutex<CoordinatorState>,
    events: broadcast::Sender<ViewEvent>,
}

impl QueryCoordinator {
    pub fn new(service: Arc<dyn QueryService>) -> Arc<Self> {
        Self::with_options(service, DEFAULT_PAGE_LIMIT, DEFAULT_STORE_CAPACITY)
    }

    pub fn from_settings(service: Arc<dyn QueryService>, settings: &Settings) -> Arc<Self> {
        Self::with_options(service, settings.page_limit, settings.store_capacity)
    }

    pub fn with_options(
        service: Arc<dyn QueryService>,
        page_limit: u32,
        store_capacity: usize,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            service,
            ownership: StdMutex::new(Ownership::default()),
            inner: Mutex::new(CoordinatorState {
                filters: FilterSelection::default(),
                last_query: None,
                store: EventStore::with_capacity(store_capacity),
                pagination: PaginationState::new(page_limit),
                type_counts: TypeCounts::default(),
                error: None,
                selected_event_id: None,
            }),
            events,
        })
    }

    fn current_activity(&self) -> Activity {
        lock_ownership(&self.ownership).activity
    }

    /// Bumps the generation and hands `activity` the view. Callers hold the
    /// state lock so the guard checks and the hand-over are one step.
    fn begin(&self, activity: Activity) -> InFlight<'_> {
        let mut ownership = lock_ownership(&self.ownership);
        ownership.generation += 1;
        ownership.activity = activity;
        InFlight {
            ownership: &self.ownership,
            generation: ownership.generation,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> InvestigationView {
        let guard = self.inner.lock().await;
        let activity = self.current_activity();
        InvestigationView {
            events: guard.store.events().to_vec(),
            activity,
            loading: activity == Activity::Searching,
            loading_more: activity == Activity::LoadingMore,
            has_more: guard.pagination.has_more(),
            error: guard.error.clone(),
            pagination: guard.pagination,
            type_counts: guard.type_counts,
            filters: guard.filters.clone(),
            has_filters: guard.filters.is_constrained(),
            selected_event: guard
                .selected_event_id
                .as_deref()
                .and_then(|id| guard.store.get(id))
                .cloned(),
            last_query: guard.last_query.clone(),
        }
    }

    pub async fn events(&self) -> Vec<NormalizedEvent> {
        self.inner.lock().await.store.events().to_vec()
    }

    pub async fn activity(&self) -> Activity {
        let _guard = self.inner.lock().await;
        self.current_activity()
    }

    pub async fn has_more(&self) -> bool {
        self.inner.lock().await.pagination.has_more()
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn pagination(&self) -> PaginationState {
        self.inner.lock().await.pagination
    }

    pub async fn filters(&self) -> FilterSelection {
        self.inner.lock().await.filters.clone()
    }

    pub async fn set_filters(&self, filters: FilterSelection) {
        self.inner.lock().await.filters = filters;
    }

    /// Resets the filter selection. The stored events stay until the next search.
    pub async fn clear_filters(&self) {
        self.inner.lock().await.filters = FilterSelection::default();
    }

    pub async fn has_filters(&self) -> bool {
        self.inner.lock().await.filters.is_constrained()
    }

    pub async fn select_event(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().await;
        if !guard.store.contains(id) {
            return false;
        }
        guard.selected_event_id = Some(id.to_string());
        true
    }

    pub async fn clear_selection(&self) {
        self.inner.lock().await.selected_event_id = None;
    }

    /// Starts a new query lineage. With no query, one is built from the current
    /// filters. On success the store is replaced by the returned page.
    pub async fn search(&self, query: Option<QueryRequest>) -> Result<Outcome, QueryError> {
        let (flight, request) = {
            let mut guard = self.inner.lock().await;
            let limit = guard.pagination.effective_limit();
            let request = match query {
                Some(query) => QueryRequest {
                    filter: query.filter,
                    page: 1,
                    limit: if query.limit == 0 { limit } else { query.limit },
                },
                None => QueryRequest::first_page(Some(guard.filters.to_query_filter()), limit),
            };
            guard.error = None;
            (self.begin(Activity::Searching), request)
        };

        info!(
            "query: search issued generation={} limit={}",
            flight.generation, request.limit
        );
        let result = self.service.query(&request).await;
        let received_at = Utc::now().timestamp_millis();

        let mut guard = self.inner.lock().await;
        if !flight.settle() {
            debug!(
                "query: discarding stale search response generation={} current={}",
                flight.generation,
                flight.current_generation()
            );
            return Ok(Outcome::Superseded);
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("query: search failed: {err}");
                guard.error = Some(err.to_string());
                drop(guard);
                let _ = self.events.send(ViewEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        let batch = normalize_batch(&response.events, received_at);
        let received = batch.len();
        guard.store.replace(batch);
        guard.pagination = PaginationState::new(request.limit);
        guard.pagination.record(
            &response,
            received,
            PageFallback {
                page: 1,
                total: received as u64,
            },
        );
        guard.record_type_counts(&response);
        guard.last_query = Some(request);
        let applied = guard.store.len();
        drop(guard);

        let _ = self.events.send(ViewEvent::Replaced { count: applied });
        Ok(Outcome::Applied(BatchSummary { received, applied }))
    }

    /// Fetches the page after the current one and appends the events the store
    /// does not already hold.
    pub async fn load_more(&self) -> Result<Outcome, QueryError> {
        let (flight, request) = {
            let mut guard = self.inner.lock().await;
            let activity = self.current_activity();
            if matches!(activity, Activity::LoadingMore | Activity::Searching) {
                debug!("query: load more skipped while {activity:?}");
                return Ok(Outcome::Skipped);
            }
            if !guard.pagination.has_more() {
                return Ok(Outcome::Skipped);
            }
            guard.error = None;
            let request = QueryRequest {
                filter: guard.lineage_filter(),
                page: guard.pagination.current_page.saturating_add(1),
                limit: guard.pagination.effective_limit(),
            };
            (self.begin(Activity::LoadingMore), request)
        };

        info!(
            "query: load more issued generation={} page={}",
            flight.generation, request.page
        );
        let result = self.service.query(&request).await;
        let received_at = Utc::now().timestamp_millis();

        let mut guard = self.inner.lock().await;
        if !flight.settle() {
            debug!(
                "query: discarding stale load more response generation={} current={}",
                flight.generation,
                flight.current_generation()
            );
            return Ok(Outcome::Superseded);
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("query: load more failed: {err}");
                guard.error = Some(err.to_string());
                drop(guard);
                let _ = self.events.send(ViewEvent::Failed(err.to_string()));
                return Err(err);
            }
        };

        let batch = normalize_batch(&response.events, received_at);
        let received = batch.len();
        let applied = guard.store.append_unique(batch);
        let fallback = PageFallback {
            page: request.page,
            total: guard.pagination.total,
        };
        guard.pagination.record(&response, received, fallback);
        guard.record_type_counts(&response);
        guard.last_query = Some(QueryRequest {
            filter: request.filter,
            page: guard.pagination.current_page,
            limit: guard.pagination.current_limit,
        });
        drop(guard);

        let _ = self.events.send(ViewEvent::Appended { added: applied });
        Ok(Outcome::Applied(BatchSummary { received, applied }))
    }

    /// Re-fetches page one under the last query and merges it into the store.
    /// Never surfaces errors: a failed refresh leaves the view untouched.
    pub async fn refresh(&self) -> Outcome {
        let (flight, request) = {
            let guard = self.inner.lock().await;
            if self.current_activity() != Activity::Idle {
                return Outcome::Skipped;
            }
            let request =
                QueryRequest::first_page(guard.lineage_filter(), guard.pagination.effective_limit());
            (self.begin(Activity::Refreshing), request)
        };

        let result = self.service.query(&request).await;
        let received_at = Utc::now().timestamp_millis();

        let mut guard = self.inner.lock().await;
        if !flight.settle() {
            debug!(
                "query: discarding stale refresh response generation={}",
                flight.generation
            );
            return Outcome::Superseded;
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("query: refresh failed, keeping current view: {err}");
                return Outcome::Failed;
            }
        };

        let page_one = normalize_batch(&response.events, received_at);
        let received = page_one.len();
        let window = usize::try_from(guard.pagination.effective_limit()).unwrap_or(usize::MAX);
        let stats = guard.store.merge_first_page(page_one, window);
        let fallback = PageFallback {
            page: 1,
            total: guard.pagination.total,
        };
        guard.pagination.record(&response, received, fallback);
        guard.record_type_counts(&response);
        drop(guard);

        debug!(
            "query: refresh merged incoming={} replaced={} kept_deep={} evicted={}",
            stats.incoming, stats.replaced, stats.kept_deep, stats.evicted
        );
        let _ = self.events.send(ViewEvent::Merged(stats));
        Outcome::Applied(BatchSummary {
            received,
            applied: stats.incoming,
        })
    }

    /// Runs [`QueryCoordinator::refresh`] every `every` on a background task.
    /// The task only holds a weak reference and ends once the coordinator is
    /// dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let coordinator = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if let Outcome::Applied(summary) = coordinator.refresh().await {
                    debug!("query: auto refresh received={}", summary.received);
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
