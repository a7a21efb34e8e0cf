//! Channels — the external I/O surfaces over the chain.
//!
//! Each channel (console, HTTP) implements [`Component`] and is spawned as
//! an independent concurrent task by [`start`] via
//! [`runtime::spawn_components`]. Channels capture their shared
//! [`Arc<Chain>`] at construction time — no state is passed through the
//! generic `Component::run` signature.
//!
//! [`start`] is synchronous — it returns a [`ChannelSet`] as soon as the
//! tasks are spawned. The caller decides when (or whether) to await it.

pub mod console;
#[cfg(feature = "channel-http")]
pub mod http;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chain::Chain;
use crate::config::Config;
use crate::runtime::{self, ChannelSet, Component};

/// Spawn all configured channels and return a [`ChannelSet`].
///
/// Channels start immediately. If any channel exits with an error the shared
/// `shutdown` token is cancelled so siblings stop cooperatively. The set
/// resolves when all channels have exited.
pub fn start(config: &Config, chain: Arc<Chain>, shutdown: CancellationToken) -> ChannelSet {
    let mut components: Vec<Box<dyn Component>> = Vec::new();

    if config.console.enabled {
        info!("loading console channel");
        components.push(Box::new(console::ConsoleChannel::new("console0", chain.clone())));
    }

    #[cfg(feature = "channel-http")]
    {
        if config.api.enabled {
            info!("loading http channel");
            components.push(Box::new(http::HttpChannel::new(
                "http0",
                config.api.bind.clone(),
                chain.clone(),
                config.api_token.clone(),
                config.api.debug,
            )));
        }
    }

    #[cfg(not(feature = "channel-http"))]
    if config.api.enabled {
        info!("http api configured but not compiled in");
    }

    if components.is_empty() {
        info!("no channels configured — waiting for shutdown");
    }

    runtime::spawn_components(components, shutdown)
}
