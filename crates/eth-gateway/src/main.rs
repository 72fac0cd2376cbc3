//! Dev node: the gateway over an in-memory chain that produces a tipset
//! every few seconds, each carrying one event-emitting contract call.

use anyhow::{Context, Result};
use eth_gateway::adapters::fixtures::{produce_with_events, topic_event};
use eth_gateway::adapters::MemoryChain;
use eth_gateway::domain::config::LoggingConfig;
use eth_gateway::eth::address::{masked_id, to_delegated};
use eth_gateway::ports::outbound::ActorKind;
use eth_gateway::{Address, GatewayConfig, GatewayService};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEV_BLOCK_INTERVAL: Duration = Duration::from_secs(5);
const DEV_ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const DEV_BALANCE: u128 = 1_000_000_000_000_000_000_000;

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log filter")?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

fn load_config() -> Result<GatewayConfig> {
    let mut config = match std::env::var("ETH_GATEWAY_CONFIG") {
        Ok(path) => GatewayConfig::from_toml_file(&path)
            .with_context(|| format!("failed to load {}", path))?,
        Err(_) => GatewayConfig::default(),
    };
    config
        .apply_env(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    Ok(config)
}

/// Produce dev tipsets until shutdown.
async fn produce_blocks(chain: Arc<MemoryChain>, mut shutdown: watch::Receiver<bool>) {
    let sender = chain.create_actor(ActorKind::Account, DEV_BALANCE, None);
    let contract = chain.create_actor(ActorKind::Evm, 0, None);
    chain.set_bytecode(contract, vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    info!(contract = %format!("{:#x}", masked_id(contract)), "dev contract deployed");

    let mut ticker = tokio::time::interval(DEV_BLOCK_INTERVAL);
    ticker.tick().await;
    let mut round: u8 = 0;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        round = round.wrapping_add(1);
        let event = topic_event(contract, &[round], b"dev");
        match produce_with_events(&chain, sender, contract, vec![vec![event]]).await {
            Ok(ts) => debug!(height = ts.height(), "dev tipset produced"),
            Err(e) => warn!(error = %e, "dev tipset failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging)?;

    let chain = MemoryChain::new();
    let dev_account = Address::from_str(DEV_ACCOUNT).context("dev account")?;
    chain.create_actor(ActorKind::EthAccount, DEV_BALANCE, Some(to_delegated(&dev_account)));

    let service = Arc::new(GatewayService::new(config, chain.upstream())?);
    let (stop_tx, stop_rx) = watch::channel(false);
    let producer = tokio::spawn(produce_blocks(Arc::clone(&chain), stop_rx));
    let mut server = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };

    info!("gateway is running. Press Ctrl+C to stop.");
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            service.shutdown();
            (&mut server).await
        }
        // Startup failures, such as a port already in use, end the server early
        finished = &mut server => finished,
    };

    let _ = stop_tx.send(true);
    let _ = producer.await;
    outcome.context("server task panicked")??;
    Ok(())
}
