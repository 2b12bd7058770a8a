// bot/src/allowance.rs
// Per (token, spender) serialisation of allowance-dependent writes.

use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

use crate::errors::ChainError;
use crate::gateway::ChainGateway;
use crate::state::TxOutcome;

#[derive(Debug, Default)]
pub struct AllowanceGuard {
    locks: DashMap<(Address, Address), Arc<Mutex<()>>>,
}

impl AllowanceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the `(token, spender)` slot until the guard is dropped. At most
    /// one conversion touches a given allowance at a time.
    pub async fn lock(&self, token: Address, spender: Address) -> OwnedMutexGuard<()> {
        let slot = self.locks.entry((token, spender)).or_default().clone();
        slot.lock_owned().await
    }

    /// Approves exactly `amount` when the current allowance falls short.
    /// Returns `None` when nothing had to be sent.
    #[instrument(skip(self, gateway), fields(token = ?token, spender = ?spender, amount = %amount))]
    pub async fn ensure_allowance<G: ChainGateway + ?Sized>(
        &self,
        gateway: &G,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Option<TxOutcome>, ChainError> {
        let current = gateway.allowance(token, owner, spender).await?;
        if current >= amount {
            debug!(%current, "Allowance already sufficient");
            return Ok(None);
        }
        let outcome = gateway.approve(token, spender, amount).await?;
        info!(tx_hash = ?outcome.hash, "Allowance approved");
        Ok(Some(outcome))
    }
}
