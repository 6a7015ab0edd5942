#[allow(clippy::module_inception)]
mod bft;
mod client;
mod controller;
mod resolver;

pub use bft::BftIntegration;
use linkme::distributed_slice;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_bft(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let bft_config = if let Some(c) = &ctx.config.integrations.bft {
        c
    } else {
        return Ok(None);
    };

    Ok(Some(Box::new(BftIntegration::new(bft_config)?)))
}
