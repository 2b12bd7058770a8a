// bot/src/path_optimizer.rs

use crate::bindings::{IUniswapV3Factory, QuoterV2, UniswapV3Pool};
use crate::config::Config;
use crate::encoding::{encode_path, encode_reversed_path};
use crate::fraction::Fraction;
use crate::state::{TokenAmount, TradeRoute};
use crate::utils::quote_at_sqrt_price;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::{
    contract::ContractError,
    providers::Middleware,
    types::{Address, U256},
};
use eyre::{eyre, Result, WrapErr};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    /// `amount` is what goes in; maximise what comes out.
    ExactInput,
    /// `amount` is what must come out; minimise what goes in.
    ExactOutput,
}

#[async_trait]
pub trait RouteOptimizer: Send + Sync {
    /// `Ok(None)` when no route can fill the trade.
    async fn best_route(
        &self,
        amount: U256,
        token_in: Address,
        token_out: Address,
        trade_type: TradeType,
    ) -> Result<Option<TradeRoute>>;

    /// Fractional gap between the route's execution price and the pools'
    /// mid price. Positive means the trade is worse than mid.
    async fn price_impact(&self, route: &TradeRoute) -> Result<Fraction>;
}

/// One candidate hop sequence with a resolved pool per hop.
#[derive(Debug, Clone)]
struct Candidate {
    tokens: Vec<Address>,
    fees: Vec<u32>,
}

/// Routes over V3 pools via QuoterV2: the direct pair, and one intermediate
/// hop through each configured base token, for every fee tier.
#[derive(Debug)]
pub struct QuoterRouter<M> {
    client: Arc<M>,
    quoter: Address,
    factory: Address,
    fee_tiers: Vec<u32>,
    base_tokens: Vec<Address>,
    pools: DashMap<(Address, Address, u32), Address>,
}

impl<M: Middleware + 'static> QuoterRouter<M> {
    pub fn new(client: Arc<M>, config: &Config) -> Self {
        Self {
            client,
            quoter: config.quoter_address,
            factory: config.v3_factory_address,
            fee_tiers: config.fee_tiers.clone(),
            base_tokens: config.base_tokens.clone(),
            pools: DashMap::new(),
        }
    }

    /// Pool for an unordered pair and fee; the zero address when none exists.
    async fn pool(&self, a: Address, b: Address, fee: u32) -> Result<Address> {
        let key = if a < b { (a, b, fee) } else { (b, a, fee) };
        if let Some(pool) = self.pools.get(&key) {
            return Ok(*pool);
        }
        let factory = IUniswapV3Factory::new(self.factory, self.client.clone());
        let call = factory.get_pool(key.0, key.1, fee);
        let pool = call.call().await.wrap_err("getPool failed")?;
        self.pools.insert(key, pool);
        Ok(pool)
    }

    async fn hop_exists(&self, a: Address, b: Address, fee: u32) -> Result<bool> {
        Ok(!self.pool(a, b, fee).await?.is_zero())
    }

    async fn candidates(&self, token_in: Address, token_out: Address) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        for &fee in &self.fee_tiers {
            if self.hop_exists(token_in, token_out, fee).await? {
                out.push(Candidate { tokens: vec![token_in, token_out], fees: vec![fee] });
            }
        }
        for &base in &self.base_tokens {
            if base == token_in || base == token_out {
                continue;
            }
            for &first in &self.fee_tiers {
                if !self.hop_exists(token_in, base, first).await? {
                    continue;
                }
                for &second in &self.fee_tiers {
                    if self.hop_exists(base, token_out, second).await? {
                        out.push(Candidate { tokens: vec![token_in, base, token_out], fees: vec![first, second] });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Quotes one candidate. `Ok(None)` when the quoter reverts, which is how
    /// it reports insufficient liquidity.
    async fn quote(&self, candidate: &Candidate, amount: U256, trade_type: TradeType) -> Result<Option<U256>> {
        let quoter = QuoterV2::new(self.quoter, self.client.clone());
        let result = match trade_type {
            TradeType::ExactOutput => {
                let path = encode_reversed_path(&candidate.tokens, &candidate.fees)?;
                let call = quoter.quote_exact_output(path, amount);
                call.call().await.map(|(amount_in, _, _, _)| amount_in)
            }
            TradeType::ExactInput => {
                let path = encode_path(&candidate.tokens, &candidate.fees)?;
                let call = quoter.quote_exact_input(path, amount);
                call.call().await.map(|(amount_out, _, _, _)| amount_out)
            }
        };
        match result {
            Ok(quoted) => Ok(Some(quoted)),
            Err(e @ ContractError::Revert(_)) => {
                trace!(tokens = ?candidate.tokens, fees = ?candidate.fees, error = %e, "Quote reverted");
                Ok(None)
            }
            Err(e) => Err(eyre!("quoter call failed: {e}")),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> RouteOptimizer for QuoterRouter<M> {
    #[instrument(skip(self), level = "debug")]
    async fn best_route(
        &self,
        amount: U256,
        token_in: Address,
        token_out: Address,
        trade_type: TradeType,
    ) -> Result<Option<TradeRoute>> {
        let candidates = self.candidates(token_in, token_out).await?;
        if candidates.is_empty() {
            debug!("No pools connect the pair");
            return Ok(None);
        }

        let quotes = join_all(candidates.iter().map(|c| self.quote(c, amount, trade_type))).await;
        let mut best: Option<(usize, U256)> = None;
        let mut first_error = None;
        for (i, quote) in quotes.into_iter().enumerate() {
            match quote {
                Ok(Some(quoted)) => {
                    let better = match (trade_type, best) {
                        (_, None) => true,
                        (TradeType::ExactOutput, Some((_, current))) => quoted < current,
                        (TradeType::ExactInput, Some((_, current))) => quoted > current,
                    };
                    if better {
                        best = Some((i, quoted));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let Some((index, quoted)) = best else {
            return match first_error {
                Some(e) => Err(e),
                None => Ok(None),
            };
        };
        let chosen = candidates[index].clone();
        let (input, output) = match trade_type {
            TradeType::ExactOutput => (
                TokenAmount { token: token_in, amount: quoted },
                TokenAmount { token: token_out, amount },
            ),
            TradeType::ExactInput => (
                TokenAmount { token: token_in, amount },
                TokenAmount { token: token_out, amount: quoted },
            ),
        };
        debug!(tokens = ?chosen.tokens, fees = ?chosen.fees, input = %input.amount, output = %output.amount, "Best route selected");
        Ok(Some(TradeRoute::new(input, output, chosen.tokens, chosen.fees)?))
    }

    #[instrument(skip(self, route), level = "debug", fields(route = %route))]
    async fn price_impact(&self, route: &TradeRoute) -> Result<Fraction> {
        let mut mid_amount = route.input.amount;
        for (i, &fee) in route.fees.iter().enumerate() {
            let (from, to) = (route.tokens[i], route.tokens[i + 1]);
            let pool_address = self.pool(from, to, fee).await?;
            if pool_address.is_zero() {
                return Err(eyre!("no pool for {:?}/{:?} at fee {}", from, to, fee));
            }
            let pool = UniswapV3Pool::new(pool_address, self.client.clone());
            let slot0_call = pool.slot_0();
            let token0_call = pool.token_0();
            let ((sqrt_price_x96, ..), token0) = tokio::try_join!(slot0_call.call(), token0_call.call())
                .wrap_err_with(|| format!("failed to read pool {:?}", pool_address))?;
            mid_amount = quote_at_sqrt_price(mid_amount, sqrt_price_x96, from == token0)?;
        }
        if mid_amount.is_zero() {
            return Err(eyre!("mid price quote is zero"));
        }
        let gap = Fraction::from_amount(mid_amount) - Fraction::from_amount(route.output.amount);
        let mid = Fraction::from_amount(mid_amount);
        Fraction::new(gap.numerator() * mid.denominator(), gap.denominator() * mid.numerator())
            .ok_or_else(|| eyre!("mid price quote is zero"))
    }
}
