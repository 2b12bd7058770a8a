// bot/src/executor.rs

use ethers::types::{Address, H256, I256, U256, U64};
use eyre::{Result, WrapErr};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::allowance::AllowanceGuard;
use crate::config::Config;
use crate::encoding::validate_path;
use crate::errors::ChainError;
use crate::events::{ArbitrageContext, Event, EventContext, EventSink};
use crate::gateway::{short_hex, ChainGateway};
use crate::state::{ArbitrageOrder, TradeRoute, TxOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Validation and gas estimation; nothing has been sent.
    Simulation,
    /// A transaction was (or was being) submitted.
    Execution,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Simulation => f.write_str("simulation"),
            Phase::Execution => f.write_str("Execution"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Confirmed(TxOutcome),
    DryRun { gas_estimate: U256 },
    Failed { phase: Phase, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub operator: Address,
    pub dry_run: bool,
    pub deadline_grace_secs: u64,
}

impl From<&Config> for ExecutorSettings {
    fn from(config: &Config) -> Self {
        Self {
            operator: config.operator_address,
            dry_run: config.dry_run,
            deadline_grace_secs: config.deadline_grace_secs,
        }
    }
}

/// Turns negotiated trades into operator `convert` calls.
///
/// The allowance slot for `(receive token, operator)` is held for the whole
/// run, from the block read to confirmation, so concurrent conversions of the
/// same token queue behind each other.
pub struct ConversionExecutor {
    gateway: Arc<dyn ChainGateway>,
    allowances: Arc<AllowanceGuard>,
    sink: Arc<dyn EventSink>,
    settings: ExecutorSettings,
}

impl ConversionExecutor {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        allowances: Arc<AllowanceGuard>,
        sink: Arc<dyn EventSink>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { gateway, allowances, sink, settings }
    }

    fn context(&self, order: &ArbitrageOrder) -> ArbitrageContext {
        ArbitrageContext {
            converter: order.converter,
            token_to_receive_from_converter: order.token_to_receive_from_converter(),
            token_to_send_to_converter: order.token_to_send_to_converter(),
            amount: order.amount,
            min_income: order.min_income.to_string(),
            path: order.route.path.clone(),
            beneficiary: order.beneficiary,
            deadline: Some(order.deadline),
            gas_estimate: None,
            dry_run: self.settings.dry_run,
        }
    }

    fn failed(
        &self,
        ctx: ArbitrageContext,
        phase: Phase,
        reason: String,
        trx: Option<H256>,
        block: Option<U64>,
    ) -> ExecutionOutcome {
        let message = format!("{phase}: {reason}");
        warn!(converter = ?ctx.converter, error = %message, "Conversion failed");
        let mut event = Event::new(EventContext::Arbitrage(ctx)).with_error(message).at_block(block);
        event.trx = trx;
        self.sink.on_event(&event);
        ExecutionOutcome::Failed { phase, reason }
    }

    /// Validates, approves, estimates and (outside dry-run) submits one
    /// conversion. Every outcome is published as an `Arbitrage` event; only a
    /// failed block read is returned as an error.
    #[instrument(skip(self, route), fields(path = %short_hex(&route.path), dry_run = self.settings.dry_run))]
    pub async fn arbitrage(
        &self,
        converter: Address,
        route: TradeRoute,
        amount: U256,
        min_income: I256,
        beneficiary: Address,
    ) -> Result<ExecutionOutcome> {
        let receive_token = route.input.token;
        let _slot = self.allowances.lock(receive_token, self.settings.operator).await;

        let block = self.gateway.latest_block().await.wrap_err("Failed to read latest block")?;
        let order = ArbitrageOrder {
            converter,
            route,
            amount,
            min_income,
            beneficiary,
            deadline: block.timestamp + U256::from(self.settings.deadline_grace_secs),
        };
        let mut ctx = self.context(&order);

        if let Err(e) =
            validate_path(&order.route.path, order.token_to_receive_from_converter(), order.token_to_send_to_converter())
        {
            return Ok(self.failed(ctx, Phase::Simulation, e.to_string(), None, None));
        }

        if let (Some(shortfall), false) = (order.shortfall(), self.settings.dry_run) {
            let owner = self.gateway.wallet_address();
            if let Err(e) = self
                .allowances
                .ensure_allowance(self.gateway.as_ref(), receive_token, owner, self.settings.operator, shortfall)
                .await
            {
                let trx = tx_of(&e);
                return Ok(self.failed(ctx, Phase::Execution, e.reason(), trx, None));
            }
        }

        let gas_estimate = match self.gateway.estimate_conversion(&order).await {
            Ok(gas) => gas,
            Err(e) => return Ok(self.failed(ctx, Phase::Simulation, e.reason(), None, None)),
        };
        ctx.gas_estimate = Some(gas_estimate);

        if self.settings.dry_run {
            info!(%gas_estimate, "Dry run: conversion simulated, not submitted");
            self.sink.on_event(&Event::new(EventContext::Arbitrage(ctx)));
            return Ok(ExecutionOutcome::DryRun { gas_estimate });
        }

        match self.gateway.submit_conversion(&order, gas_estimate).await {
            Ok(outcome) => {
                info!(tx_hash = ?outcome.hash, block = ?outcome.block_number, "Conversion confirmed");
                self.sink.on_event(
                    &Event::new(EventContext::Arbitrage(ctx)).with_trx(outcome.hash).at_block(outcome.block_number),
                );
                Ok(ExecutionOutcome::Confirmed(outcome))
            }
            Err(e) => {
                let trx = tx_of(&e);
                Ok(self.failed(ctx, Phase::Execution, e.reason(), trx, None))
            }
        }
    }
}

/// Hash of a transaction that made it on-chain before failing.
fn tx_of(error: &ChainError) -> Option<H256> {
    match error {
        ChainError::Reverted(hash) | ChainError::Dropped(hash) => Some(*hash),
        _ => None,
    }
}
