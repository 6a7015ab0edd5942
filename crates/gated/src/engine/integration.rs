use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Event channel from integrations into the engine. Bounded so a fast
/// integration cannot outrun the engine's event loop.
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Command channel from the engine to an integration. Unbounded: command
/// dispatch must never block the engine.
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// What a registry constructor produces: a ready integration, or `None`
/// when the configuration does not enable it.
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

/// Everything a constructor gets to decide whether and how to build its
/// integration.
pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

/// Integration constructors, collected at link time. Each integration
/// module contributes one entry.
#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// A source of cover entities managed by the engine.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Identifier used for command routing and logs
    fn name(&self) -> &str;

    /// Start the integration's background work. The sender is how it
    /// reports discovery and state changes back to the engine.
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>>;

    /// Dispatch a command from the engine to the owning device
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Stop background work and release any held sessions
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}
