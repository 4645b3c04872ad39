//! Client-held, bounded, continuously refreshed view over the server event log.

pub mod config;
pub mod coordinator;
pub mod normalize;
pub mod pagination;
pub mod service;
pub mod store;

pub use config::{load_settings, Settings};
pub use coordinator::{
    Activity, BatchSummary, FilterSelection, InvestigationView, Outcome, QueryCoordinator,
    ViewEvent,
};
pub use normalize::{normalize, normalize_batch};
pub use pagination::{PageFallback, PaginationState};
pub use service::{HttpQueryService, QueryService};
pub use store::{EventStore, MergeStats, DEFAULT_STORE_CAPACITY};
