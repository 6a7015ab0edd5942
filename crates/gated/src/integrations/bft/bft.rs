use std::collections::HashMap;
use std::error::Error;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing::warn;

use super::client::CloudClient;
use super::client::UControlClient;
use super::controller::GateController;
use super::controller::MIN_TIME_BETWEEN_UPDATES;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::GateCommand;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// BFT u-Control integration for gated
///
/// Exposes each configured cloud gate as a cover entity. Every gate gets its
/// own device task owning the controller and session, so polling and command
/// dispatch for one device never overlap while distinct gates stay fully
/// independent.
pub struct BftIntegration {
    /// Controllers waiting for setup() to spawn their device tasks
    pending: Vec<(String, GateController<UControlClient>)>,

    /// Per-entity command channels into the device tasks
    command_txs: HashMap<String, mpsc::UnboundedSender<GateCommand>>,

    /// Handles for the device tasks
    tasks: Vec<JoinHandle<()>>,
}

impl BftIntegration {
    /// Create the integration and its per-cover controllers from configuration
    pub fn new(config: &crate::config::BftConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut pending = Vec::new();
        for (slug, cover) in &config.covers {
            let client = UControlClient::new(cover)
                .with_context(|| format!("failed to create cloud client for cover '{}'", slug))?;

            let entity_id = format!("cover.{}", slug);
            info!(
                "Configured BFT cover '{}' (device: {}, timeout: {}s, retries: {}, skip_initial: {})",
                entity_id, cover.device, cover.timeout, cover.retry_count, cover.skip_initial_update
            );

            pending.push((entity_id, GateController::new(client, cover)));
        }

        Ok(Self {
            pending,
            command_txs: HashMap::new(),
            tasks: Vec::new(),
        })
    }
}

/// Per-device task: resolve identity, announce the entity, then serve the
/// poll timer and the command channel from one loop. After every cycle the
/// resulting state and availability are published to the engine. On exit the
/// client session is revoked and the entity withdrawn.
async fn run_device<C: CloudClient>(
    mut controller: GateController<C>,
    entity_id: String,
    to_engine: FromIntegrationSender,
    mut commands: mpsc::UnboundedReceiver<GateCommand>,
) {
    controller.resolve_identity().await;

    let discovered = FromIntegrationMessage::EntityDiscovered {
        entity_id: entity_id.clone(),
        unique_id: controller.unique_id().to_string(),
        integration_name: "bft".to_string(),
    };
    if to_engine.send(discovered).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(MIN_TIME_BETWEEN_UPDATES);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => controller.execute(cmd).await,
                    // Channel closed: the integration is shutting down
                    None => break,
                }
            }
            _ = ticker.tick() => {
                // The controller's own throttle suppresses the immediate
                // first tick when skip_initial_update is set
                controller.poll_if_due().await;
            }
        }

        let update = FromIntegrationMessage::CoverStateChanged {
            entity_id: entity_id.clone(),
            state: controller.state(),
            available: controller.is_available(),
        };
        if to_engine.send(update).await.is_err() {
            break;
        }
    }

    controller.shutdown().await;

    let removed = FromIntegrationMessage::EntityRemoved { entity_id };
    to_engine.send(removed).await.ok();
}

#[async_trait]
impl Integration for BftIntegration {
    fn name(&self) -> &str {
        "bft"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        for (entity_id, controller) in self.pending.drain(..) {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            self.command_txs.insert(entity_id.clone(), command_tx);

            let to_engine = tx.clone();
            let handle = tokio::spawn(async move {
                run_device(controller, entity_id, to_engine, command_rx).await;
            });
            self.tasks.push(handle);
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::CoverCommand { entity_id, command } => {
                let tx = self.command_txs.get(&entity_id).ok_or_else(
                    || -> Box<dyn Error + Send> {
                        Box::new(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("No BFT cover for entity: {}", entity_id),
                        ))
                    },
                )?;

                tx.send(command)
                    .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        // Closing the command channels lets the device tasks exit their
        // loops, revoke their sessions, and withdraw their entities
        self.command_txs.clear();

        for handle in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("BFT device task ended abnormally: {}", e);
                }
            }
        }

        Ok(())
    }
}
