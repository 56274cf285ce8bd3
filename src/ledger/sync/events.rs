//! Event system for ledger synchronization.
//!
//! Sync components emit events which are handled by registered event
//! handlers; this keeps presentation concerns (logging, "data changed"
//! notifications to UI callers) out of the sync logic itself. Handler
//! failures are logged and never stop other handlers or the sync pass.

use crate::ledger::types::{AddressId, NetworkId, SyncError};

use tracing::info;

/// Events that occur while keeping the local mirror consistent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Forward header sync advanced the mirrored tip.
    HeadersAdvanced { network: NetworkId, new_tip: u64 },
    /// A fork was detected and the mirror rolled back to the fork point.
    ForkResolved { network: NetworkId, fork_height: u64 },
    /// An address's box set was reconciled up to the given height.
    AddressSynced {
        network: NetworkId,
        address_id: AddressId,
        height: u64,
    },
    /// Something in the mirror changed during the pass.
    DataChanged { network: NetworkId },
    /// A sync attempt aborted; the mirror keeps its last committed state.
    SyncFailed { network: NetworkId, error: String },
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in registration order for every event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from
    /// running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Handler that writes every event to the log.
pub struct LogHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LogHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::HeadersAdvanced { network, new_tip } => {
                info!("[{}] headers advanced to {}", network, new_tip)
            }
            SyncEvent::ForkResolved {
                network,
                fork_height,
            } => info!("[{}] fork resolved, rolled back to {}", network, fork_height),
            SyncEvent::AddressSynced {
                network,
                address_id,
                height,
            } => info!("[{}] address {} synced to {}", network, address_id, height),
            SyncEvent::DataChanged { network } => info!("[{}] mirror data changed", network),
            SyncEvent::SyncFailed { network, error } => {
                info!("[{}] sync attempt failed: {}", network, error)
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogHandler"
    }
}
