//! Gateway server lifecycle

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use polygate_bridge::queue::TableOperationQueue;
use polygate_rdbc::registry::PoolRegistry;

use crate::config::ConfigHandle;
use crate::object_store::{MemoryObjectStore, ObjectStore};
use crate::proto::GatewayServer;
use crate::service::GatewayService;

/// Shared state behind the gRPC service
pub struct GatewayDaemon {
    config: ConfigHandle,
    registry: Arc<PoolRegistry>,
    queue: Arc<TableOperationQueue>,
    objects: Arc<dyn ObjectStore>,
}

impl GatewayDaemon {
    /// Daemon with the built-in driver factories and an in-memory object store
    pub fn new(config: ConfigHandle) -> Self {
        let snapshot = config.snapshot();
        let registry = Arc::new(PoolRegistry::with_default_factories(snapshot.pool_config()));
        Self::with_parts(config, registry, Arc::new(MemoryObjectStore::new()))
    }

    pub fn with_parts(
        config: ConfigHandle,
        registry: Arc<PoolRegistry>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let queue = Arc::new(TableOperationQueue::new(config.snapshot().queue.clone()));
        Self {
            config,
            registry,
            queue,
            objects,
        }
    }

    pub fn queue(&self) -> &Arc<TableOperationQueue> {
        &self.queue
    }

    /// The service over this daemon's state; starts the operation queue
    pub fn service(&self) -> GatewayService {
        self.queue.start();
        GatewayService::new(
            self.config.clone(),
            self.registry.clone(),
            self.queue.clone(),
            self.objects.clone(),
        )
    }

    /// Serve until `shutdown` fires, then drain the queue and close pools
    pub async fn serve(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let snapshot = self.config.snapshot();
        let addr = snapshot.server.bind;
        let limit = snapshot.server.max_message_bytes;
        let service = GatewayServer::new(self.service())
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        info!("polygate gateway listening on {}", addr);
        let result = Server::builder()
            .add_service(service)
            .serve_with_shutdown(addr, shutdown.cancelled_owned())
            .await;

        info!("Stopping table operation queue");
        self.queue.stop().await;
        self.registry.close_all().await;
        result.map_err(Into::into)
    }
}
