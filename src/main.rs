mod explorer;
mod ledger;
mod utils;

use crate::explorer::ExplorerClient;
use crate::ledger::NetworkId;
use crate::ledger::coverage::{CoverageSelector, CoverageSource};
use crate::ledger::store::{
    AddressRepository, BoxRepository, LedgerStore, MemoryLedgerStore, StoreError,
};
use crate::ledger::sync::SyncService;
use crate::ledger::sync::events::LogHandler;
use crate::utils::format_erg_amount;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Runtime configuration, read from the environment with hard defaults.
struct Config {
    explorer_url: String,
    network: NetworkId,
    data_dir: PathBuf,
    poll_interval: Duration,
    wallet_name: String,
    watch_addresses: Vec<String>,
}

impl Config {
    fn from_env() -> Self {
        let explorer_url = std::env::var("ERGO_EXPLORER_URL")
            .unwrap_or_else(|_| "https://api.ergoplatform.com".to_string());
        let network = match std::env::var("ERGO_NETWORK").as_deref() {
            Ok("testnet") => NetworkId::Testnet,
            _ => NetworkId::Mainnet,
        };
        let data_dir = std::env::var("ERGO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let poll_interval = std::env::var("ERGO_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(120));
        let wallet_name =
            std::env::var("ERGO_WALLET_NAME").unwrap_or_else(|_| "default".to_string());
        let watch_addresses = std::env::var("ERGO_WATCH_ADDRESSES")
            .map(|raw| {
                raw.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            explorer_url,
            network,
            data_dir,
            poll_interval,
            wallet_name,
            watch_addresses,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    info!("Starting ledger mirror service");
    let config = Config::from_env();

    if let Err(e) = tokio::fs::create_dir_all(&config.data_dir).await {
        error!("Failed to create data directory {:?}: {}", config.data_dir, e);
        return;
    }

    let store = match MemoryLedgerStore::load(&config.data_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load ledger snapshot: {}", e);
            return;
        }
    };

    if let Err(e) = ensure_watched(&store, &config).await {
        error!("Failed to register watched addresses: {}", e);
        return;
    }

    let client = Arc::new(ExplorerClient::new(config.explorer_url.clone()));
    let service = SyncService::new(store.clone() as Arc<dyn LedgerStore>, client);
    service.register_handler(Box::new(LogHandler)).await;

    // One-shot submission of a pre-signed transaction, then back to mirroring.
    if let Ok(path) = std::env::var("ERGO_SUBMIT_TX") {
        match tokio::fs::read(&path).await {
            Ok(raw) => match service.submit_transaction(config.network, &raw).await {
                Ok(tx_id) => info!("Submitted transaction {} from {}", tx_id, path),
                Err(e) => error!("Failed to submit transaction from {}: {}", path, e),
            },
            Err(e) => error!("Failed to read transaction file {}: {}", path, e),
        }
    }

    info!(
        "Polling {} for {} every {:?}",
        config.explorer_url, config.network, config.poll_interval
    );

    let mut interval = tokio::time::interval(config.poll_interval);
    loop {
        interval.tick().await;

        let report = service.sync_pass(config.network).await;
        info!("{}", report.summary());

        if let Err(e) = log_balances(&store, &config).await {
            error!("Failed to read balances: {}", e);
        }
        if let Err(e) = store.save(&config.data_dir).await {
            error!("Failed to save ledger snapshot: {}", e);
        }
    }
}

/// Make sure the configured wallet and its watched addresses exist.
async fn ensure_watched(store: &MemoryLedgerStore, config: &Config) -> Result<(), StoreError> {
    if config.watch_addresses.is_empty() {
        return Ok(());
    }

    let wallet = match store
        .wallets(config.network)
        .await?
        .into_iter()
        .find(|wallet| wallet.name == config.wallet_name)
    {
        Some(wallet) => wallet,
        None => {
            store
                .create_wallet(&config.wallet_name, config.network)
                .await?
        }
    };

    for address in &config.watch_addresses {
        if store
            .find_address(config.network, address)
            .await?
            .is_none()
        {
            let record = store.create_address(wallet.id, address).await?;
            info!("Tracking address {} (id {})", record.address, record.id);
        }
    }
    Ok(())
}

/// Log per-wallet balances and, when requested, a covering-box dry run.
async fn log_balances(store: &Arc<MemoryLedgerStore>, config: &Config) -> Result<(), StoreError> {
    let cover_amount: Option<u64> = std::env::var("ERGO_COVER_AMOUNT")
        .ok()
        .and_then(|raw| raw.parse().ok());

    for wallet in store.wallets(config.network).await? {
        let balance = store.wallet_balance(wallet.id).await?;
        info!(
            "Wallet {} holds {} ERG across {} token kinds",
            wallet.name,
            format_erg_amount(balance.value),
            balance.tokens.len()
        );

        for address in store.addresses_for_wallet(wallet.id).await? {
            let balance = store.address_balance(address.id).await?;
            info!(
                "  address {} holds {} ERG (synced to {})",
                address.address,
                format_erg_amount(balance.value),
                address.process_height
            );
        }

        if let Some(amount) = cover_amount {
            let source = match std::env::var("ERGO_COVER_ADDRESSES") {
                Ok(raw) => CoverageSource::Addresses(
                    raw.split(',').filter_map(|part| part.trim().parse().ok()).collect(),
                ),
                Err(_) => CoverageSource::Wallet(wallet.id),
            };
            let selector = CoverageSelector::new(store.clone() as Arc<dyn LedgerStore>);
            let result = selector
                .get_covering_box(amount, source, &HashMap::new())
                .await?;
            info!(
                "Coverage dry run for {} ERG: covered={} with {} boxes",
                format_erg_amount(amount),
                result.covered,
                result.boxes.len()
            );
        }
    }
    Ok(())
}
