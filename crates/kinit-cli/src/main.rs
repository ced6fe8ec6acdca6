use clap::{Parser, Subcommand};
use kinit_types::{LedgerVersion, Network};
use kinit_wallet::engine::UserProfile;
use std::path::PathBuf;

mod commands;

/// Kinit wallet command-line interface.
#[derive(Parser)]
#[command(name = "kinit-wallet-cli")]
#[command(about = "Command-line wallet for Kinit accounts on the legacy and current ledgers")]
#[command(version)]
struct Cli {
    /// Network to use.
    #[arg(long, env = "KINIT_NETWORK", default_value = "testnet")]
    network: NetworkArg,

    /// Backend base URL.
    #[arg(long, env = "KINIT_BACKEND_URL", default_value = "http://localhost:8000")]
    backend: String,

    /// Legacy ledger gateway URL (overrides default for the selected network).
    #[arg(long, env = "KINIT_LEGACY_LEDGER_URL")]
    legacy_ledger: Option<String>,

    /// Current ledger gateway URL (overrides default for the selected network).
    #[arg(long, env = "KINIT_CURRENT_LEDGER_URL")]
    current_ledger: Option<String>,

    /// Directory holding preferences and keys.
    #[arg(long, env = "KINIT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Backend user id.
    #[arg(long, env = "KINIT_USER_ID")]
    user_id: Option<String>,

    /// Backend auth token.
    #[arg(long, env = "KINIT_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// The user has verified a phone number.
    #[arg(long, env = "KINIT_PHONE_VERIFIED")]
    phone_verified: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug)]
enum NetworkArg {
    Mainnet,
    Testnet,
}

impl std::fmt::Display for NetworkArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_network())
    }
}

impl std::str::FromStr for NetworkArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            _ => Err(format!("unknown network: {} (use mainnet or testnet)", s)),
        }
    }
}

impl NetworkArg {
    fn to_network(self) -> Network {
        match self {
            Self::Mainnet => Network::Mainnet,
            Self::Testnet => Network::Testnet,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active account, ledger and migration state.
    Info,
    /// Fetch the balance from the ledger.
    Balance,
    /// Make sure the active account exists on its ledger.
    Onboard,
    /// Send KIN through the cosigning backend.
    Send {
        /// Destination address.
        #[arg(long)]
        to: String,
        /// Amount in whole KIN.
        #[arg(long)]
        amount: u64,
        /// Backend order id for this payment.
        #[arg(long)]
        order_id: String,
        /// Optional memo text.
        #[arg(long)]
        memo: Option<String>,
        /// Report as a peer-to-peer payment instead of a spend.
        #[arg(long)]
        p2p: bool,
    },
    /// Export the active account as a passphrase-encrypted backup.
    Export {
        /// Write the backup to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a passphrase-encrypted backup.
    Import {
        /// Backup file to read.
        file: PathBuf,
    },
    /// Delete every stored key and create a fresh account.
    Reset {
        /// Confirm that a backup of the current keys exists.
        #[arg(long)]
        yes: bool,
    },
    /// Migrate the active legacy account to the current ledger.
    Migrate,
    /// List offers.
    Offers,
    /// Show transaction history.
    History {
        /// Maximum number of entries to show.
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Shared context passed to all command handlers.
pub struct AppContext {
    pub network: Network,
    pub backend_url: String,
    pub legacy_ledger_url: String,
    pub current_ledger_url: String,
    pub data_dir: PathBuf,
    pub auth_token: Option<String>,
    pub user: UserProfile,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Self {
        let network = cli.network.to_network();
        let legacy_ledger_url = cli
            .legacy_ledger
            .clone()
            .unwrap_or_else(|| LedgerVersion::Legacy.default_ledger_url(network).to_string());
        let current_ledger_url = cli
            .current_ledger
            .clone()
            .unwrap_or_else(|| LedgerVersion::Current.default_ledger_url(network).to_string());
        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| default_data_dir(cli.network));

        Self {
            network,
            backend_url: cli.backend.clone(),
            legacy_ledger_url,
            current_ledger_url,
            data_dir,
            auth_token: cli.auth_token.clone(),
            user: UserProfile {
                user_id: cli.user_id.clone(),
                phone_verified: cli.phone_verified,
                public_address: None,
            },
        }
    }
}

fn default_data_dir(network: NetworkArg) -> PathBuf {
    let base = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kinit");
    match network {
        NetworkArg::Mainnet => base,
        NetworkArg::Testnet => base.join("testnet"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let ctx = AppContext::from_cli(&cli);
    log::debug!("network {}, data dir {}", cli.network, ctx.data_dir.display());

    let result = match cli.command {
        Commands::Info => commands::wallet_info(&ctx).await,
        Commands::Balance => commands::show_balance(&ctx).await,
        Commands::Onboard => commands::onboard(&ctx).await,
        Commands::Send {
            to,
            amount,
            order_id,
            memo,
            p2p,
        } => commands::send(&ctx, &to, amount, &order_id, memo, p2p).await,
        Commands::Export { out } => commands::export_wallet(&ctx, out).await,
        Commands::Import { file } => commands::import_wallet(&ctx, &file).await,
        Commands::Reset { yes } => commands::reset(&ctx, yes).await,
        Commands::Migrate => commands::migrate(&ctx).await,
        Commands::Offers => commands::show_offers(&ctx).await,
        Commands::History { limit } => commands::show_history(&ctx, limit).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
