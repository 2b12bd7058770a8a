// bot/src/transaction.rs

use crate::errors::ChainError;
use crate::gas::{buffered_gas_limit, fetch_gas_price, GasSettings};
use crate::state::TxOutcome;

use ethers::{
    core::types::{transaction::eip2718::TypedTransaction, Address, BlockNumber, U256, U64},
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::LocalWallet,
};
use eyre::{eyre, Result};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

// --- Constants ---
const TX_SUBMISSION_TIMEOUT_SECS: u64 = 15;
const TX_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
const GAS_ESTIMATION_TIMEOUT_SECS: u64 = 20;
const TX_SUCCESS_STATUS: U64 = U64([1]);

// --- NonceManager ---
#[derive(Debug)]
pub struct NonceManager {
    current_nonce: Mutex<Option<U256>>,
    wallet_address: Address,
}

impl NonceManager {
    pub fn new(wallet_address: Address) -> Self {
        Self { current_nonce: Mutex::new(None), wallet_address }
    }

    pub async fn get_next_nonce<M: Middleware>(&self, client: Arc<M>) -> Result<U256>
    where
        <M as Middleware>::Error: StdError + Send + Sync + 'static,
    {
        let mut nonce_guard = self.current_nonce.lock().await;
        if let Some(nonce) = *nonce_guard {
            let next_nonce = nonce + U256::one();
            *nonce_guard = Some(next_nonce);
            Ok(next_nonce)
        } else {
            match client
                .get_transaction_count(self.wallet_address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(initial_nonce) => {
                    *nonce_guard = Some(initial_nonce);
                    Ok(initial_nonce)
                }
                Err(e) => Err(eyre!(e).wrap_err("Failed to fetch initial nonce")),
            }
        }
    }

    pub async fn handle_nonce_error(&self) {
        warn!("Nonce error detected. Resetting internal nonce to re-fetch from network.");
        let mut nonce_guard = self.current_nonce.lock().await;
        *nonce_guard = None;
    }
}

/// Signs, submits and confirms every keeper write through one nonce sequence.
///
/// A nonce handed out for a transaction the node never accepted, or one that
/// never confirmed, is returned by resyncing with the pending count so later
/// writes do not queue behind a gap.
#[derive(Debug)]
pub struct TxSender<M = SignerClient> {
    client: Arc<M>,
    wallet: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    gas: GasSettings,
    confirmations: usize,
}

impl<M> TxSender<M>
where
    M: Middleware + 'static,
    <M as Middleware>::Error: StdError + Send + Sync + 'static,
{
    pub fn new(client: Arc<M>, wallet: Address, chain_id: u64, gas: GasSettings, confirmations: usize) -> Self {
        Self { client, wallet, chain_id, nonce_manager: NonceManager::new(wallet), gas, confirmations }
    }

    /// `eth_estimateGas` from the keeper wallet, with revert reasons decoded.
    #[instrument(skip(self, tx), level = "debug")]
    pub async fn estimate(&self, tx: &TypedTransaction) -> Result<U256, ChainError> {
        let mut tx = tx.clone();
        tx.set_from(self.wallet);
        let estimate = timeout(
            Duration::from_secs(GAS_ESTIMATION_TIMEOUT_SECS),
            self.client.estimate_gas(&tx, None),
        )
        .await
        .map_err(|_| ChainError::Rpc("gas estimation timed out".to_string()))?
        .map_err(ChainError::from_middleware)?;
        debug!(%estimate, "Gas estimation successful");
        Ok(estimate)
    }

    /// Submits `tx` and waits for the configured number of confirmations.
    /// A missing gas limit is estimated and buffered first.
    #[instrument(skip(self, tx), fields(label = label))]
    pub async fn send(&self, mut tx: TypedTransaction, label: &str) -> Result<TxOutcome, ChainError> {
        tx.set_from(self.wallet);
        tx.set_chain_id(self.chain_id);
        let gas_limit = match tx.gas() {
            Some(limit) => *limit,
            None => buffered_gas_limit(self.estimate(&tx).await?, &self.gas),
        };
        tx.set_gas(gas_limit);

        let gas_info = fetch_gas_price(self.client.clone(), &self.gas)
            .await
            .map_err(|e| ChainError::Rpc(format!("{e:#}")))?;
        gas_info.apply(&mut tx);

        let nonce = self
            .nonce_manager
            .get_next_nonce(self.client.clone())
            .await
            .map_err(|e| ChainError::Rpc(format!("{e:#}")))?;
        tx.set_nonce(nonce);

        let submission = timeout(
            Duration::from_secs(TX_SUBMISSION_TIMEOUT_SECS),
            self.client.send_transaction(tx, None),
        )
        .await;
        let pending = match submission {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                let err = ChainError::from_middleware(e);
                warn!(%nonce, error = %err, "Submission rejected, nonce not consumed");
                self.nonce_manager.handle_nonce_error().await;
                return Err(err);
            }
            Err(_) => {
                // The node may still have the transaction; resync before the next write.
                self.nonce_manager.handle_nonce_error().await;
                return Err(ChainError::Rpc(format!("{label}: submission timed out")));
            }
        };
        let hash = pending.tx_hash();
        info!(tx_hash = ?hash, %nonce, %gas_limit, "Transaction submitted, awaiting confirmation.");

        let receipt = match timeout(
            Duration::from_secs(TX_CONFIRMATION_TIMEOUT_SECS),
            pending.confirmations(self.confirmations),
        )
        .await
        {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Err(e)) => return Err(ChainError::Rpc(e.to_string())),
            Ok(Ok(None)) | Err(_) => {
                warn!(tx_hash = ?hash, %nonce, "Transaction dropped before confirmation");
                self.nonce_manager.handle_nonce_error().await;
                return Err(ChainError::Dropped(hash));
            }
        };

        if receipt.status != Some(TX_SUCCESS_STATUS) {
            warn!(tx_hash = ?hash, "Transaction reverted on-chain.");
            return Err(ChainError::Reverted(hash));
        }
        info!(tx_hash = ?hash, block = ?receipt.block_number, "Transaction confirmed.");
        Ok(TxOutcome { hash, block_number: receipt.block_number })
    }
}
