//! Assembles the concrete runtime components from a [`RuntimeConfig`]: the
//! in-memory storage backends, the scheme-routed transport manager, the
//! handler registry, and the job queue. Both `serve` and `consume` build
//! their own `RuntimeState` from the same config so the wiring logic is
//! shared rather than duplicated per subcommand.

use std::sync::Arc;

use semflow_consumer::InMemoryMessageBroker;
use semflow_core::config::RuntimeConfig;
use semflow_core::repository::{ActionRepository, EventRepository, ProcessStateStore};
use semflow_handlers::{ActionHandler, Dispatcher, HandlerRegistry, HttpDispatchHandler};
use semflow_queue::{InMemoryJobQueue, JobQueue};
use semflow_storage::{InMemoryActionRepository, InMemoryEventRepository, InMemoryProcessStateStore};
use semflow_transport::{DirectTransport, SshTransport, TransportKind, TransportManager, ZitiTransport};
use tracing::{info, warn};

use crate::executor::DispatchExecutor;

/// The standard Schema.org Action types the HTTP dispatch handler is
/// registered for (spec §4.8); custom `additionalType` discriminators resolve
/// to the same handler unless a caller later registers something more specific.
const STANDARD_ACTION_TYPES: &[&str] = &[
    "SearchAction",
    "CreateAction",
    "UpdateAction",
    "DeleteAction",
    "CommunicateAction",
    "TransferAction",
    "CheckAction",
];

pub struct RuntimeState {
    pub action_repository: Arc<dyn ActionRepository>,
    pub event_repository: Arc<dyn EventRepository>,
    pub process_state_store: Arc<dyn ProcessStateStore>,
    pub transport: Arc<TransportManager>,
    pub queue: Arc<dyn JobQueue>,
    pub broker: Arc<InMemoryMessageBroker>,
    pub executor: Arc<DispatchExecutor>,
}

impl RuntimeState {
    pub async fn build(config: &RuntimeConfig) -> anyhow::Result<Self> {
        let action_repository: Arc<dyn ActionRepository> = Arc::new(InMemoryActionRepository::new());
        let event_repository: Arc<dyn EventRepository> = Arc::new(InMemoryEventRepository::new());
        let process_state_store: Arc<dyn ProcessStateStore> = Arc::new(InMemoryProcessStateStore::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let broker = Arc::new(InMemoryMessageBroker::new());

        let transport = Arc::new(TransportManager::new());
        transport
            .register(TransportKind::Direct, Arc::new(DirectTransport::new(&config.http)?))
            .await;
        info!("direct transport registered");

        if let Some(ssh_config) = &config.ssh {
            match SshTransport::new(ssh_config) {
                Ok(ssh) => {
                    transport.register(TransportKind::Ssh, Arc::new(ssh)).await;
                    info!(host = %ssh_config.host, "ssh transport registered");
                }
                Err(e) => warn!(error = %e, "ssh transport configured but failed to dial; ssh:// requests will fail"),
            }
        }

        if let Some(ziti_config) = &config.ziti {
            let ziti = ZitiTransport::new(ziti_config)?;
            transport.register(TransportKind::Ziti, Arc::new(ziti)).await;
            info!("ziti transport registered");
        }

        let registry = HandlerRegistry::new();
        let http_handler = Arc::new(HttpDispatchHandler::new());
        for action_type in STANDARD_ACTION_TYPES {
            registry.register(*action_type, Arc::clone(&http_handler) as Arc<dyn ActionHandler>);
        }
        let dispatcher = Dispatcher::new(registry);

        let executor = Arc::new(DispatchExecutor::new(
            Arc::clone(&action_repository),
            Arc::clone(&event_repository),
            Arc::clone(&transport),
            dispatcher,
            Arc::clone(&broker),
        ));

        Ok(Self {
            action_repository,
            event_repository,
            process_state_store,
            transport,
            queue,
            broker,
            executor,
        })
    }
}
