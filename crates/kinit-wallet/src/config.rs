//! Engine configuration.

use crate::encryption::KdfParams;
use crate::migration::MigrationConfig;
use kinit_types::{LedgerVersion, Network, DEFAULT_APP_ID};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub network: Network,
    /// Application id embedded in every payment memo.
    pub app_id: String,
    /// Ledger the engine should end up on.
    pub target_version: LedgerVersion,
    pub kdf: KdfParams,
    pub migration: MigrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            app_id: DEFAULT_APP_ID.to_string(),
            target_version: LedgerVersion::Current,
            kdf: KdfParams::default(),
            migration: MigrationConfig::default(),
        }
    }
}
