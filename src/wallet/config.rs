use crate::ledger::LedgerConfig;
use crate::network::NetworkConfig;
use crate::sync::SyncConfig;
use crate::wallet::WalletError;

/// Configuration for a wallet runtime
#[derive(Clone, Debug, Default)]
pub struct WalletConfig {
    pub ledger: LedgerConfig,
    pub sync: SyncConfig,
    pub network: NetworkConfig,
}

impl WalletConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        self.ledger.validate()?;
        self.sync.validate()?;
        self.network.validate().map_err(WalletError::InvalidConfig)?;
        Ok(())
    }
}
