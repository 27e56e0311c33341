//! Construction of the discoverer and fetcher a connector drives

use crate::broker::BrokerClient;
use crate::config::TopicsDescriptor;
use crate::fetcher::{BrokerFetcher, FetchCoordinator, FetcherConfig};
use crate::partition::{BrokerPartitionDiscoverer, PartitionDiscoverer};
use crate::state::CheckpointLock;
use std::sync::Arc;

/// Creates the components of a [`SourceConnector`](super::SourceConnector)
pub trait ComponentFactory: Send + Sync {
    /// Discoverer for the subscribed topics
    fn create_discoverer(&self, topics: &TopicsDescriptor) -> Box<dyn PartitionDiscoverer>;

    /// Fetcher working on the offset state behind `state`
    fn create_fetcher(
        &self,
        state: CheckpointLock,
        config: FetcherConfig,
    ) -> Arc<dyn FetchCoordinator>;
}

/// Factory sharing one [`BrokerClient`] between discoverer and fetcher
pub struct BrokerComponentFactory<C: BrokerClient> {
    client: Arc<C>,
}

impl<C: BrokerClient> BrokerComponentFactory<C> {
    /// Create a factory over `client`
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

impl<C: BrokerClient + 'static> ComponentFactory for BrokerComponentFactory<C> {
    fn create_discoverer(&self, topics: &TopicsDescriptor) -> Box<dyn PartitionDiscoverer> {
        Box::new(BrokerPartitionDiscoverer::new(
            Arc::clone(&self.client),
            topics.clone(),
        ))
    }

    fn create_fetcher(
        &self,
        state: CheckpointLock,
        config: FetcherConfig,
    ) -> Arc<dyn FetchCoordinator> {
        Arc::new(BrokerFetcher::new(Arc::clone(&self.client), state, config))
    }
}
