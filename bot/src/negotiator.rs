// bot/src/negotiator.rs
//! Prices a conversion against external liquidity and derives the income
//! bound the operator contract enforces.

use ethers::types::{Address, I256, U256};
use num_traits::One;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::errors::NegotiationError;
use crate::events::{Event, EventContext, EventSink, TradeContext};
use crate::fraction::Fraction;
use crate::gateway::ChainGateway;
use crate::path_optimizer::{RouteOptimizer, TradeType};
use crate::state::TradeRoute;

pub const HIGH_PRICE_IMPACT: &str = "High price impact";

#[derive(Debug, Clone, Copy)]
pub struct NegotiatorSettings {
    pub max_price_impact: Fraction,
    /// Share of the previous amount kept on each retry.
    pub backoff: Fraction,
    pub max_retries: u32,
    pub min_amount: U256,
    pub slippage: Fraction,
}

impl From<&Config> for NegotiatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_price_impact: Fraction::from_bps(config.max_price_impact_bps),
            backoff: Fraction::from_bps(config.impact_backoff_bps),
            max_retries: config.max_impact_retries,
            min_amount: U256::from(config.min_conversion_amount),
            slippage: Fraction::from_bps(config.slippage_tolerance_bps),
        }
    }
}

/// An accepted trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub route: TradeRoute,
    /// Converter amount the trade was priced for, after any back-off.
    pub amount: U256,
    /// Receive-token amount the converter hands over.
    pub amount_out: U256,
    /// Send-token amount the converter requires.
    pub amount_in: U256,
    pub min_income: I256,
    pub price_impact: Fraction,
    pub attempts: u32,
}

/// `amount_out - trade_input * (1 + slippage)`, truncated toward zero.
pub fn min_income(amount_out: U256, trade_input: U256, slippage: Fraction) -> I256 {
    let max_input = Fraction::from_amount(trade_input) * (Fraction::one() + slippage);
    (Fraction::from_amount(amount_out) - max_input).to_integer_toward_zero()
}

pub struct TradeNegotiator {
    gateway: Arc<dyn ChainGateway>,
    optimizer: Arc<dyn RouteOptimizer>,
    sink: Arc<dyn EventSink>,
    settings: NegotiatorSettings,
}

impl TradeNegotiator {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        optimizer: Arc<dyn RouteOptimizer>,
        sink: Arc<dyn EventSink>,
        settings: NegotiatorSettings,
    ) -> Self {
        Self { gateway, optimizer, sink, settings }
    }

    fn fail(&self, ctx: TradeContext, error: NegotiationError) -> NegotiationError {
        warn!(converter = ?ctx.converter, amount = %ctx.amount, %error, "Trade negotiation failed");
        self.sink.on_event(&Event::new(EventContext::GetBestTrade(ctx)).with_error(error.to_string()));
        error
    }

    /// Finds a route that turns the converter's `want_to_receive` payout into
    /// the `want_to_send` amount it asks for. When the route's price impact is
    /// above the limit the converter amount is scaled down and retried, up to
    /// `max_retries` times and never below `min_amount`.
    #[instrument(skip(self))]
    pub async fn best_trade(
        &self,
        converter: Address,
        want_to_receive: Address,
        want_to_send: Address,
        amount: U256,
    ) -> Result<Negotiation, NegotiationError> {
        let mut amount = amount;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut ctx = TradeContext::new(converter, want_to_receive, want_to_send, amount);

            let (amount_out, amount_in) =
                match self.gateway.updated_amount_in(converter, amount, want_to_send, want_to_receive).await {
                    Ok(amounts) => amounts,
                    Err(e) => return Err(self.fail(ctx, NegotiationError::Converter(e.reason()))),
                };
            ctx.amount_out = Some(amount_out);
            ctx.amount_in = Some(amount_in);

            let route = match self
                .optimizer
                .best_route(amount_in, want_to_receive, want_to_send, TradeType::ExactOutput)
                .await
            {
                Ok(Some(route)) => route,
                Ok(None) => return Err(self.fail(ctx, NegotiationError::NoTradeFound)),
                Err(e) => return Err(self.fail(ctx, NegotiationError::Optimizer(format!("{e:#}")))),
            };
            ctx.trade_input = Some(route.input.amount);
            ctx.path = Some(route.path.clone());

            let impact = match self.optimizer.price_impact(&route).await {
                Ok(impact) => impact,
                Err(e) => return Err(self.fail(ctx, NegotiationError::Optimizer(format!("{e:#}")))),
            };
            ctx.price_impact = Some(impact.percent_string());

            if impact > self.settings.max_price_impact {
                warn!(impact = %impact.percent_string(), %amount, attempts, "Price impact above limit");
                self.sink.on_event(&Event::new(EventContext::GetBestTrade(ctx.clone())).with_error(HIGH_PRICE_IMPACT));

                let next = self.settings.backoff.apply_to(amount);
                if attempts > self.settings.max_retries || next.is_zero() || next < self.settings.min_amount {
                    let error = NegotiationError::ImpactNotReduced { attempts, last_impact: impact.percent_string() };
                    return Err(self.fail(ctx, error));
                }
                debug!(%next, "Retrying with a smaller amount");
                amount = next;
                continue;
            }

            let min_income = min_income(amount_out, route.input.amount, self.settings.slippage);
            ctx.min_income = Some(min_income.to_string());
            info!(%amount, %amount_out, %amount_in, trade_input = %route.input.amount, %min_income, impact = %impact.percent_string(), "Trade negotiated");
            self.sink.on_event(&Event::new(EventContext::GetBestTrade(ctx)));

            return Ok(Negotiation { route, amount, amount_out, amount_in, min_income, price_impact: impact, attempts });
        }
    }
}
