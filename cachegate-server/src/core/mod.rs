pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod partition;
pub mod storage;
pub mod strategy;
pub mod types;

pub use classifier::{Classifier, Matcher, RouteRule};
pub use dispatcher::Dispatcher;
pub use error::CacheGateError;
pub use fetcher::{Fetcher, HttpFetcher};
pub use lifecycle::{ServiceWorker, WorkerRegistry, WorkerState};
pub use partition::CachePartition;
pub use storage::{CacheStorage, PartitionInfo};
pub use strategy::StrategyEngine;
pub use types::{
    CacheConfig, CacheStats, FetchRequest, Outcome, PatternConfig, RequestKey, Served, Strategy,
    StoredResponse,
};
