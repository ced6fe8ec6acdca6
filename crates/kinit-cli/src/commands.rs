use crate::AppContext;
use kinit_rpc::{RemoteService, RpcClient, RpcConfig};
use kinit_types::LedgerVersion;
use kinit_wallet::engine::{
    AccountEngine, EngineDeps, ImportWalletResult, MigrationEvent, OnboardingResult, SendRequest,
    TransactionKind,
};
use kinit_wallet::{
    DataLoader, EngineConfig, FetchResult, FileStore, GatewayLedger, KeyValueStore,
    MigrationState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

const EVENT_CAPACITY: usize = 16;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn prompt_password(prompt: &str) -> std::result::Result<String, Box<dyn std::error::Error>> {
    let pass = rpassword::prompt_password(prompt)?;
    if pass.is_empty() {
        return Err("passphrase cannot be empty".into());
    }
    Ok(pass)
}

fn prompt_password_confirm() -> std::result::Result<String, Box<dyn std::error::Error>> {
    let pass = prompt_password("Backup passphrase: ")?;
    let confirm = prompt_password("Confirm passphrase: ")?;
    if pass != confirm {
        return Err("passphrases do not match".into());
    }
    Ok(pass)
}

/// Backend connections shared by every command.
struct Services {
    preferences: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteService>,
}

fn open_services(ctx: &AppContext) -> std::result::Result<Services, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&ctx.data_dir)?;
    let preferences = FileStore::open(ctx.data_dir.join("preferences.json"))?;
    let remote = RpcClient::with_config(RpcConfig {
        url: ctx.backend_url.clone(),
        user_id: ctx.user.user_id.clone(),
        auth_token: ctx.auth_token.clone(),
        ..Default::default()
    })?;
    Ok(Services {
        preferences: Arc::new(preferences),
        remote: Arc::new(remote),
    })
}

async fn open_engine(
    ctx: &AppContext,
    services: &Services,
    events: Option<broadcast::Sender<MigrationEvent>>,
) -> std::result::Result<AccountEngine, Box<dyn std::error::Error>> {
    let keychain = FileStore::open(ctx.data_dir.join("keychain.json"))?;
    let legacy = GatewayLedger::for_version(LedgerVersion::Legacy, &ctx.legacy_ledger_url)?;
    let current = GatewayLedger::for_version(LedgerVersion::Current, &ctx.current_ledger_url)?;

    let mut deps = EngineDeps::new(
        services.preferences.clone(),
        Arc::new(keychain),
        services.remote.clone(),
        Arc::new(legacy),
        Arc::new(current),
    )
    .with_user(ctx.user.clone());
    if let Some(events) = events {
        deps = deps.with_events(events);
    }

    let config = EngineConfig {
        network: ctx.network,
        ..Default::default()
    };
    Ok(AccountEngine::new(config, deps).await?)
}

fn describe_state(state: &MigrationState) -> String {
    match state {
        MigrationState::NotEvaluated => "not evaluated".to_string(),
        MigrationState::NotNeeded => "not needed".to_string(),
        MigrationState::InProgress => "in progress".to_string(),
        MigrationState::Succeeded => "succeeded".to_string(),
        MigrationState::Failed(reason) => format!("failed ({})", reason),
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub async fn wallet_info(ctx: &AppContext) -> Result {
    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;

    println!("Network:        {}", ctx.network);
    println!("Address:        {}", engine.public_address());
    println!("Ledger:         {}", engine.active_version());
    println!("Migration:      {}", describe_state(&engine.migration_state()));
    println!("Cached balance: {} KIN", engine.balance());
    println!(
        "Backup:         {}",
        if engine.performed_backup() { "performed" } else { "not performed" }
    );
    println!("Data dir:       {}", ctx.data_dir.display());
    Ok(())
}

pub async fn show_balance(ctx: &AppContext) -> Result {
    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;
    let balance = engine.refresh_balance().await?;
    println!("Balance: {} KIN", balance);
    Ok(())
}

pub async fn onboard(ctx: &AppContext) -> Result {
    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;
    match engine.perform_onboarding_if_needed().await {
        OnboardingResult::Success => {
            println!("Account {} is ready on the {} ledger.", engine.public_address(), engine.active_version());
            Ok(())
        }
        OnboardingResult::Failure(reason) => Err(format!("onboarding failed: {}", reason).into()),
    }
}

pub async fn send(
    ctx: &AppContext,
    to: &str,
    amount: u64,
    order_id: &str,
    memo: Option<String>,
    p2p: bool,
) -> Result {
    if amount == 0 {
        return Err("amount must be greater than zero".into());
    }

    let services = open_services(ctx)?;
    let engine = open_engine(ctx, &services, None).await?;
    let kind = if p2p { TransactionKind::PeerToPeer } else { TransactionKind::Spend };

    println!("Sending {} KIN to {}...", amount, to);
    let tx_id = engine
        .send(SendRequest {
            amount,
            order_id: order_id.to_string(),
            destination: to.to_string(),
            memo,
            kind,
        })
        .await?;
    println!("Transaction: {}", tx_id);

    if p2p {
        let loader = DataLoader::new(services.remote, services.preferences);
        if let Err(e) = loader.report_p2p_transaction(&tx_id, amount, to).await {
            log::warn!("failed to report p2p transaction {}: {}", tx_id, e);
            println!("Warning: the payment went through but could not be reported.");
        }
    }

    println!("Balance: {} KIN", engine.balance());
    Ok(())
}

pub async fn export_wallet(ctx: &AppContext, out: Option<PathBuf>) -> Result {
    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;
    let passphrase = prompt_password_confirm()?;
    let blob = engine.export_wallet(&passphrase)?;

    match out {
        Some(path) => {
            std::fs::write(&path, &blob)?;
            println!("Backup written to {}", path.display());
        }
        None => println!("{}", blob),
    }

    engine.set_performed_backup(true)?;
    Ok(())
}

pub async fn import_wallet(ctx: &AppContext, file: &Path) -> Result {
    let blob = std::fs::read_to_string(file)?;
    // Fail before prompting on files that are clearly not backups.
    serde_json::from_str::<serde_json::Value>(&blob)
        .map_err(|e| format!("{} is not a wallet backup: {}", file.display(), e))?;

    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;
    let passphrase = prompt_password("Backup passphrase: ")?;

    match engine.import_wallet(&blob, &passphrase).await {
        ImportWalletResult::Success { migration_needed } => {
            println!("Imported {}", engine.public_address());
            if migration_needed {
                println!("This account is still on the legacy ledger. Run `kinit-wallet-cli migrate` to move it.");
            }
            Ok(())
        }
        ImportWalletResult::DecryptFailed(e) => Err(format!("could not open backup: {}", e).into()),
        ImportWalletResult::MigrationCheckFailed(e) => {
            Err(format!("backup opened but the migration check failed: {}", e).into())
        }
    }
}

pub async fn reset(ctx: &AppContext, yes: bool) -> Result {
    if !yes {
        return Err("reset destroys every stored key; pass --yes once a backup exists".into());
    }

    let engine = open_engine(ctx, &open_services(ctx)?, None).await?;
    let previous = engine.public_address();
    engine.reset_key_store()?;
    println!("Deleted keys for {}", previous);
    println!("New address: {}", engine.public_address());
    Ok(())
}

pub async fn migrate(ctx: &AppContext) -> Result {
    if !ctx.user.has_identity() {
        return Err("migration needs --user-id and --phone-verified".into());
    }

    // Subscribe before the engine exists so a migration started during
    // construction is not missed.
    let (events, early) = broadcast::channel(EVENT_CAPACITY);
    let engine = open_engine(ctx, &open_services(ctx)?, Some(events)).await?;

    let mut events = match engine.migration_state() {
        MigrationState::InProgress => early,
        _ if engine.active_version() == LedgerVersion::Current => {
            println!("Account {} is already on the current ledger.", engine.public_address());
            return Ok(());
        }
        _ => {
            let receiver = engine.subscribe_migration_events();
            engine.start_migration()?;
            receiver
        }
    };

    loop {
        match events.recv().await {
            Ok(MigrationEvent::Started { address }) => println!("Migrating {}...", address),
            Ok(MigrationEvent::Succeeded { address }) => {
                println!("Migrated {} to the current ledger.", address);
                return Ok(());
            }
            Ok(MigrationEvent::Failed { reason }) => {
                return Err(format!("migration failed: {}", reason).into());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("skipped {} migration events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err("migration ended without a result".into());
            }
        }
    }
}

pub async fn show_offers(ctx: &AppContext) -> Result {
    let services = open_services(ctx)?;
    let loader = DataLoader::new(services.remote, services.preferences);
    loader.load_offers().await;

    let offers = match loader.offers.value() {
        FetchResult::Present(offers) => offers,
        FetchResult::Absent(Some(e)) => return Err(format!("failed to load offers: {}", e).into()),
        FetchResult::Absent(None) => Vec::new(),
    };

    if offers.is_empty() {
        println!("No offers available.");
        return Ok(());
    }

    println!("{:<12} {:>10}  {:<10} Title", "Id", "Price", "Type");
    println!("{}", "-".repeat(60));
    for offer in &offers {
        println!(
            "{:<12} {:>10}  {:<10} {}",
            offer.id, offer.price, offer.offer_type, offer.title
        );
    }
    Ok(())
}

pub async fn show_history(ctx: &AppContext, limit: usize) -> Result {
    let services = open_services(ctx)?;
    let loader = DataLoader::new(services.remote, services.preferences);
    loader.load_transactions().await;

    let transactions = match loader.transactions.value() {
        FetchResult::Present(list) => list,
        FetchResult::Absent(Some(e)) => {
            return Err(format!("failed to load history: {}", e).into())
        }
        FetchResult::Absent(None) => Vec::new(),
    };

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!("{:<20} {:>4} {:>10}  Title", "Date", "Dir", "Amount");
    println!("{}", "-".repeat(60));
    for tx in transactions.iter().take(limit) {
        let direction = if tx.client_received { "IN" } else { "OUT" };
        println!("{:<20} {:>4} {:>10}  {}", tx.date, direction, tx.amount, tx.title);
    }
    if transactions.len() > limit {
        println!("... {} more", transactions.len() - limit);
    }
    Ok(())
}
