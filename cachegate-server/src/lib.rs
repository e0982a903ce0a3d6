pub mod config;
pub mod core;
pub mod metrics;
pub mod persistence;
pub mod server;

// Re-export commonly used types
pub use config::ServerConfig;
pub use core::{
    CacheConfig, CacheGateError, CachePartition, CacheStats, CacheStorage, Classifier,
    Dispatcher, FetchRequest, Fetcher, HttpFetcher, Outcome, RequestKey, Served, ServiceWorker,
    StoredResponse, Strategy, StrategyEngine, WorkerRegistry, WorkerState,
};
pub use persistence::{SnapshotConfig, SnapshotManager};
pub use server::{AppState, create_router, init_metrics};
