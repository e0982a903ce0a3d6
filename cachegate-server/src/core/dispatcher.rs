use super::classifier::Classifier;
use super::error::Result;
use super::strategy::StrategyEngine;
use super::types::{FetchRequest, Served, Strategy};
use tracing::debug;

/// Routes each intercepted request to exactly one strategy
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Classifier,
    engine: StrategyEngine,
}

impl Dispatcher {
    pub fn new(classifier: Classifier, engine: StrategyEngine) -> Self {
        Self { classifier, engine }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    /// Strategy that `handle` would use for this request
    pub fn strategy_for(&self, request: &FetchRequest) -> Strategy {
        self.classifier.classify(&request.method, &request.url)
    }

    pub async fn handle(&self, request: &FetchRequest) -> Result<Served> {
        let strategy = self.strategy_for(request);
        debug!("{} {} -> {}", request.method, request.url, strategy);
        self.engine.run(strategy, request).await
    }
}
