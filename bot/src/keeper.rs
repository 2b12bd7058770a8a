// bot/src/keeper.rs
//! One orchestration pass: maintenance, discovery, then negotiate-and-execute
//! for every opportunity.

use ethers::types::{Address, U256};
use eyre::Result;
use futures_util::{stream, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::allowance::AllowanceGuard;
use crate::config::Config;
use crate::discovery::MarketDiscovery;
use crate::events::{ArbitrageContext, Event, EventContext, EventSink};
use crate::executor::{ConversionExecutor, ExecutionOutcome, ExecutorSettings};
use crate::gateway::ChainGateway;
use crate::index::{ConfigIndex, ConversionFilter};
use crate::maintenance::Maintenance;
use crate::negotiator::{NegotiatorSettings, TradeNegotiator};
use crate::path_optimizer::RouteOptimizer;
use crate::state::BalanceResult;

pub const INSUFFICIENT_WALLET_BALANCE: &str = "Insufficient wallet balance to cover loss";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub negotiated: usize,
    pub executed: usize,
    pub dry_runs: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// `(comptroller, asset)` pairs already released during the current cycle.
type ReleasedPairs = Mutex<HashSet<(Address, Address)>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Handled {
    Skipped,
    Executed(ExecutionOutcome),
}

pub struct Keeper {
    config: Config,
    gateway: Arc<dyn ChainGateway>,
    sink: Arc<dyn EventSink>,
    discovery: MarketDiscovery,
    negotiator: TradeNegotiator,
    executor: ConversionExecutor,
    maintenance: Maintenance,
}

impl Keeper {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ChainGateway>,
        index: Arc<dyn ConfigIndex>,
        optimizer: Arc<dyn RouteOptimizer>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let discovery = MarketDiscovery::new(gateway.clone(), index, sink.clone(), config.pre_release);
        let negotiator =
            TradeNegotiator::new(gateway.clone(), optimizer, sink.clone(), NegotiatorSettings::from(&config));
        let executor = ConversionExecutor::new(
            gateway.clone(),
            Arc::new(AllowanceGuard::new()),
            sink.clone(),
            ExecutorSettings::from(&config),
        );
        let maintenance = Maintenance::new(gateway.clone(), sink.clone());
        Self { config, gateway, sink, discovery, negotiator, executor, maintenance }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn beneficiary(&self) -> Address {
        self.config.beneficiary.unwrap_or_else(|| self.gateway.wallet_address())
    }

    async fn accrue_targets(&self) -> Result<Vec<Address>> {
        if !self.config.accrue_markets.is_empty() {
            return Ok(self.config.accrue_markets.clone());
        }
        Ok(self.discovery.markets().await?.iter().map(|m| m.vtoken).collect())
    }

    /// Runs maintenance (unless skipped) and processes every opportunity the
    /// filter yields. Per-opportunity failures are reported as events; only
    /// transport failures end the cycle early.
    #[instrument(skip(self), fields(dry_run = self.config.dry_run))]
    pub async fn run_cycle(&self, filter: &ConversionFilter, with_maintenance: bool) -> Result<CycleReport> {
        if with_maintenance {
            let markets = self.accrue_targets().await?;
            self.maintenance.accrue_interest(&markets).await;
            self.maintenance.reduce_reserves(self.config.reserves_market).await;
        }

        let opportunities = self.discovery.discover(filter).await?;
        let mut report = CycleReport { discovered: opportunities.len(), ..Default::default() };

        let released = &ReleasedPairs::default();
        let handled: Vec<Result<Handled>> = stream::iter(opportunities)
            .map(move |opportunity| self.handle(opportunity, released))
            .buffer_unordered(self.config.max_concurrent_conversions.max(1))
            .collect()
            .await;

        for result in handled {
            match result? {
                Handled::Skipped => report.skipped += 1,
                Handled::Executed(outcome) => {
                    report.negotiated += 1;
                    match outcome {
                        ExecutionOutcome::Confirmed(_) => report.executed += 1,
                        ExecutionOutcome::DryRun { .. } => report.dry_runs += 1,
                        ExecutionOutcome::Failed { .. } => report.failed += 1,
                    }
                }
            }
        }
        info!(?report, "Cycle complete");
        Ok(report)
    }

    /// Negotiation then execution for one opportunity, strictly in order.
    async fn handle(&self, opportunity: BalanceResult, released: &ReleasedPairs) -> Result<Handled> {
        let converter = opportunity.converter;
        let receive = opportunity.asset_out.token.address;
        let send = opportunity.asset_in.address;

        let Ok(trade) = self.negotiator.best_trade(converter, receive, send, opportunity.asset_out.balance).await
        else {
            return Ok(Handled::Skipped);
        };

        if trade.min_income.is_negative() {
            let shortfall: U256 = trade.min_income.unsigned_abs();
            if shortfall > opportunity.asset_out.wallet_balance {
                warn!(converter = ?converter, %shortfall, wallet = %opportunity.asset_out.wallet_balance, "Cannot cover conversion loss");
                let ctx = ArbitrageContext {
                    converter,
                    token_to_receive_from_converter: receive,
                    token_to_send_to_converter: send,
                    amount: trade.amount,
                    min_income: trade.min_income.to_string(),
                    path: trade.route.path.clone(),
                    beneficiary: self.beneficiary(),
                    deadline: None,
                    gas_estimate: None,
                    dry_run: self.config.dry_run,
                };
                self.sink.on_event(&Event::new(EventContext::Arbitrage(ctx)).with_error(INSUFFICIENT_WALLET_BALANCE));
                return Ok(Handled::Skipped);
            }
        }

        if self.config.pre_release && !self.config.dry_run {
            self.release_once(opportunity.release_plan(), released).await;
        }

        let outcome = self
            .executor
            .arbitrage(converter, trade.route, trade.amount, trade.min_income, self.beneficiary())
            .await?;
        Ok(Handled::Executed(outcome))
    }

    /// Sends `releaseFunds` for the pairs of `plan` not yet released this
    /// cycle. The lock is held until the write settles so a concurrent
    /// opportunity on the same asset never converts ahead of its release.
    async fn release_once(&self, plan: BTreeMap<Address, Vec<Address>>, released: &ReleasedPairs) {
        let mut released = released.lock().await;
        let mut pending = BTreeMap::new();
        for (comptroller, assets) in plan {
            let fresh: Vec<Address> = assets.into_iter().filter(|asset| released.insert((comptroller, *asset))).collect();
            if !fresh.is_empty() {
                pending.insert(comptroller, fresh);
            }
        }
        if pending.is_empty() {
            debug!("Funds already released this cycle");
            return;
        }
        self.maintenance.release_funds(&pending).await;
    }

    /// Runs a cycle every `poll_interval_secs`. A failed cycle is logged and
    /// the next one starts on schedule.
    pub async fn run_forever(&self, filter: ConversionFilter, with_maintenance: bool) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle(&filter, with_maintenance).await {
                error!(error = ?e, "Keeper cycle aborted");
            }
        }
    }
}
