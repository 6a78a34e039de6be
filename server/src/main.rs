use std::sync::Once;

use anyhow::Context;
use config::load_config;
use config::shared::EspipeConfig;
use telemetry::tracing::init_tracing;
use tracing::error;

use crate::startup::start_espipe;

mod response;
mod routes;
mod startup;

static INIT_CRYPTO: Once = Once::new();

/// Installs the aws-lc-rs provider as the process wide rustls default.
///
/// Feature unification enables more than one provider, so one has to be picked before
/// the first TLS connection is made.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        // Fails only when another provider was installed first, which is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn main() -> anyhow::Result<()> {
    install_crypto_provider();

    let config =
        load_config::<EspipeConfig>().context("loading espipe configuration for startup")?;
    config
        .validate()
        .context("validating espipe configuration")?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: EspipeConfig) -> anyhow::Result<()> {
    if let Err(err) = start_espipe(config).await {
        error!("{err:#}");
        return Err(err);
    }

    Ok(())
}
