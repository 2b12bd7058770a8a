// bot/src/maintenance.rs
// Batch upkeep that runs before discovery.

use ethers::types::{Address, U256};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::events::{AccrueInterestContext, Event, EventContext, EventSink, ReduceReservesContext};
use crate::gateway::ChainGateway;

pub struct Maintenance {
    gateway: Arc<dyn ChainGateway>,
    sink: Arc<dyn EventSink>,
}

impl Maintenance {
    pub fn new(gateway: Arc<dyn ChainGateway>, sink: Arc<dyn EventSink>) -> Self {
        Self { gateway, sink }
    }

    /// One `accrueInterest` per market, all in flight together. Emits a single
    /// event whose error list holds every failure; empty on full success.
    #[instrument(skip(self, markets), fields(markets = markets.len()))]
    pub async fn accrue_interest(&self, markets: &[Address]) -> Vec<String> {
        let results = join_all(markets.iter().map(|market| self.gateway.accrue_interest(*market))).await;

        let mut errors = Vec::new();
        let mut last_block = None;
        for (market, result) in markets.iter().zip(results) {
            match result {
                Ok(outcome) => last_block = last_block.max(outcome.block_number),
                Err(e) => {
                    warn!(market = ?market, error = %e, "accrueInterest failed");
                    errors.push(format!("{market:?}: {}", e.reason()));
                }
            }
        }
        info!(ok = markets.len() - errors.len(), failed = errors.len(), "Interest accrued");
        self.sink.on_event(
            &Event::new(EventContext::AccrueInterest(AccrueInterestContext { markets: markets.to_vec() }))
                .with_errors(errors.clone())
                .at_block(last_block),
        );
        errors
    }

    /// Moves `min(totalReserves, cash)` out of `market`. With no market
    /// configured this does nothing; with nothing to move it emits a clean
    /// event and sends no transaction.
    #[instrument(skip(self))]
    pub async fn reduce_reserves(&self, market: Option<Address>) {
        let Some(market) = market else {
            return;
        };
        let (total_reserves, cash) = match self.gateway.reserves_and_cash(market).await {
            Ok(values) => values,
            Err(e) => {
                let ctx = ReduceReservesContext { market, total_reserves: U256::zero(), cash: U256::zero(), amount: U256::zero() };
                self.sink.on_event(&Event::new(EventContext::ReduceReserves(ctx)).with_error(e.reason()));
                return;
            }
        };
        let amount = total_reserves.min(cash);
        let ctx = ReduceReservesContext { market, total_reserves, cash, amount };
        if amount.is_zero() {
            info!(%total_reserves, %cash, "Nothing to reduce");
            self.sink.on_event(&Event::new(EventContext::ReduceReserves(ctx)));
            return;
        }

        let event = match self.gateway.reduce_reserves(market, amount).await {
            Ok(outcome) => Event::new(EventContext::ReduceReserves(ctx))
                .with_trx(outcome.hash)
                .at_block(outcome.block_number),
            Err(e) => {
                warn!(error = %e, "reduceReserves failed");
                Event::new(EventContext::ReduceReserves(ctx)).with_error(e.reason())
            }
        };
        self.sink.on_event(&event);
    }

    /// One `releaseFunds` per comptroller, each reported on its own.
    #[instrument(skip(self, plan), fields(pools = plan.len()))]
    pub async fn release_funds(&self, plan: &BTreeMap<Address, Vec<Address>>) {
        for (comptroller, assets) in plan {
            let context = EventContext::ReleaseFunds((*comptroller, assets.clone()));
            let event = match self.gateway.release_funds(*comptroller, assets).await {
                Ok(outcome) => Event::new(context).with_trx(outcome.hash).at_block(outcome.block_number),
                Err(e) => {
                    warn!(comptroller = ?comptroller, error = %e, "releaseFunds failed");
                    Event::new(context).with_error(e.reason())
                }
            };
            self.sink.on_event(&event);
        }
    }
}
