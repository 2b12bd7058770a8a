// bot/src/gas.rs
// Fee pricing and gas-limit policy for keeper writes.

use ethers::{
    prelude::Middleware,
    types::{transaction::eip2718::TypedTransaction, U256},
};
use eyre::{Result, WrapErr};
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::config::Config;

/// The slice of `Config` the gas policy reads.
#[derive(Debug, Clone, Copy)]
pub struct GasSettings {
    pub max_priority_fee_per_gas_gwei: f64,
    pub gas_limit_buffer_percentage: u64,
    pub min_gas_limit: u64,
    pub legacy_transactions: bool,
}

impl From<&Config> for GasSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_priority_fee_per_gas_gwei: config.max_priority_fee_per_gas_gwei,
            gas_limit_buffer_percentage: config.gas_limit_buffer_percentage,
            min_gas_limit: config.min_gas_limit,
            legacy_transactions: config.legacy_transactions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasInfo {
    Eip1559 { max_fee_per_gas: U256, max_priority_fee_per_gas: U256 },
    Legacy { gas_price: U256 },
}

impl GasInfo {
    /// Writes the fee fields into a transaction. EIP-1559 fees on a legacy
    /// request fall back to `max_fee_per_gas` as the gas price.
    pub fn apply(&self, tx: &mut TypedTransaction) {
        match (*self, tx) {
            (
                GasInfo::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas },
                TypedTransaction::Eip1559(inner),
            ) => {
                inner.max_fee_per_gas = Some(max_fee_per_gas);
                inner.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
            }
            (GasInfo::Eip1559 { max_fee_per_gas, .. }, other) => {
                other.set_gas_price(max_fee_per_gas);
            }
            (GasInfo::Legacy { gas_price }, other) => {
                other.set_gas_price(gas_price);
            }
        }
    }
}

/// `max(estimate * (100 + buffer) / 100, min_gas_limit)`.
pub fn buffered_gas_limit(estimate: U256, settings: &GasSettings) -> U256 {
    let buffered = estimate * U256::from(100 + settings.gas_limit_buffer_percentage) / U256::from(100u64);
    buffered.max(U256::from(settings.min_gas_limit))
}

fn gwei_to_wei(gwei: f64) -> Result<U256> {
    Ok(ethers::utils::parse_units(gwei.to_string(), "gwei")
        .wrap_err_with(|| format!("invalid gwei amount {gwei}"))?
        .into())
}

#[instrument(skip(client, settings), level = "debug")]
pub async fn fetch_gas_price<M: Middleware>(client: Arc<M>, settings: &GasSettings) -> Result<GasInfo>
where
    <M as Middleware>::Error: StdError + Send + Sync + 'static,
{
    if settings.legacy_transactions {
        let gas_price = client.get_gas_price().await.wrap_err("Failed to fetch legacy gas price")?;
        debug!(%gas_price, "Using legacy gas price.");
        return Ok(GasInfo::Legacy { gas_price });
    }

    let max_prio_wei = gwei_to_wei(settings.max_priority_fee_per_gas_gwei)?;
    match client.estimate_eip1559_fees(None).await {
        Ok((max_fee, max_priority_fee)) => {
            let final_max_priority_fee = max_priority_fee.min(max_prio_wei);
            let final_max_fee = max_fee.max(final_max_priority_fee);
            debug!(%final_max_fee, %final_max_priority_fee, "EIP-1559 fees estimated.");
            Ok(GasInfo::Eip1559 {
                max_fee_per_gas: final_max_fee,
                max_priority_fee_per_gas: final_max_priority_fee,
            })
        }
        Err(e) => {
            warn!(error = ?e, "EIP-1559 fee estimation failed, falling back to legacy gas price.");
            match client.get_gas_price().await {
                Ok(gas_price) => Ok(GasInfo::Legacy { gas_price }),
                Err(e_legacy) => {
                    error!(error_eip1559 = ?e, error_legacy = ?e_legacy, "Both EIP-1559 and legacy gas price fetch failed.");
                    Err(eyre::eyre!(e_legacy).wrap_err("Gas price unavailable"))
                }
            }
        }
    }
}

// END OF FILE: bot/src/gas.rs
