// tests/common/mod.rs
// In-memory chain, index and router used by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use converter_keeper::{
    errors::ChainError,
    fraction::Fraction,
    gateway::{BalanceReadout, BalanceRequest, ChainGateway, ChainResult},
    index::{ConfigIndex, ConfigQuery, IndexError},
    path_optimizer::{RouteOptimizer, TradeType},
    state::{ArbitrageOrder, BlockInfo, ConversionConfig, MarketRef, TokenAmount, TokenInfo, TradeRoute, TxOutcome},
};
use ethers::types::{Address, H256, U256, U64};
use eyre::{eyre, Result};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::Level;

pub const WALLET: u8 = 0xAA;
pub const OPERATOR: u8 = 0x0B;
pub const BLOCK: u64 = 1_000;
pub const TIMESTAMP: u64 = 1_700_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().try_init();
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn u(value: u64) -> U256 {
    U256::from(value)
}

/// Single-hop route starting at `receive` and ending at `send`.
pub fn route(receive: Address, send: Address, input: U256, output: U256) -> TradeRoute {
    TradeRoute::new(
        TokenAmount { token: receive, amount: input },
        TokenAmount { token: send, amount: output },
        vec![receive, send],
        vec![500],
    )
    .expect("valid single-hop path")
}

/// A gateway call as the fake saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Approve { token: Address, spender: Address, amount: U256 },
    Estimate { converter: Address },
    Submit { converter: Address, amount: U256 },
    AccrueInterest(Address),
    ReduceReserves { market: Address, amount: U256 },
    ReleaseFunds { comptroller: Address, assets: Vec<Address> },
    ReadBalances { entries: usize, release: usize },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    next_hash: u64,
}

/// Scripted chain. Configure the public fields before sharing it.
pub struct FakeGateway {
    pub wallet: Address,
    pub block: BlockInfo,
    pub markets: Vec<MarketRef>,
    /// `(converter, token) -> (converter_balance, wallet_balance)`
    pub balances: HashMap<(Address, Address), (U256, U256)>,
    /// `(converter, amount) -> (amount_out, amount_in)`; unlisted amounts echo back 1:1.
    pub updated_amounts: HashMap<(Address, U256), (U256, U256)>,
    pub allowance: U256,
    pub failing_markets: HashSet<Address>,
    pub failing_comptrollers: HashSet<Address>,
    pub reserves: HashMap<Address, (U256, U256)>,
    pub gas_estimate: U256,
    pub estimate_error: Option<String>,
    pub submit_error: Option<ChainError>,
    state: Mutex<FakeState>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            wallet: addr(WALLET),
            block: BlockInfo { number: U64::from(BLOCK), timestamp: u(TIMESTAMP) },
            markets: Vec::new(),
            balances: HashMap::new(),
            updated_amounts: HashMap::new(),
            allowance: U256::zero(),
            failing_markets: HashSet::new(),
            failing_comptrollers: HashSet::new(),
            reserves: HashMap::new(),
            gas_estimate: u(250_000),
            estimate_error: None,
            submit_error: None,
            state: Mutex::new(FakeState::default()),
        }
    }
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: Call) -> TxOutcome {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.next_hash += 1;
        TxOutcome { hash: H256::from_low_u64_be(state.next_hash), block_number: Some(self.block.number + 1) }
    }

    fn push(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ChainGateway for FakeGateway {
    fn wallet_address(&self) -> Address {
        self.wallet
    }

    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        Ok(self.block)
    }

    async fn token_metadata(&self, tokens: &[Address]) -> ChainResult<Vec<TokenInfo>> {
        Ok(tokens
            .iter()
            .map(|t| TokenInfo { address: *t, symbol: format!("T{:02x}", t.as_bytes()[0]), decimals: 18 })
            .collect())
    }

    async fn market_directory(&self) -> ChainResult<Vec<MarketRef>> {
        Ok(self.markets.clone())
    }

    async fn read_balances(&self, request: &BalanceRequest) -> ChainResult<BalanceReadout> {
        self.push(Call::ReadBalances { entries: request.entries.len(), release: request.release.len() });
        let balances = request
            .entries
            .iter()
            .map(|key| self.balances.get(key).copied().unwrap_or_default())
            .collect();
        Ok(BalanceReadout { block_number: self.block.number, balances })
    }

    async fn updated_amount_in(
        &self,
        converter: Address,
        amount_out: U256,
        _token_in: Address,
        _token_out: Address,
    ) -> ChainResult<(U256, U256)> {
        Ok(self.updated_amounts.get(&(converter, amount_out)).copied().unwrap_or((amount_out, amount_out)))
    }

    async fn allowance(&self, _token: Address, _owner: Address, _spender: Address) -> ChainResult<U256> {
        Ok(self.allowance)
    }

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> ChainResult<TxOutcome> {
        Ok(self.record(Call::Approve { token, spender, amount }))
    }

    async fn estimate_conversion(&self, order: &ArbitrageOrder) -> ChainResult<U256> {
        self.push(Call::Estimate { converter: order.converter });
        match &self.estimate_error {
            Some(reason) => Err(ChainError::revert(reason.clone())),
            None => Ok(self.gas_estimate),
        }
    }

    async fn submit_conversion(&self, order: &ArbitrageOrder, _gas_estimate: U256) -> ChainResult<TxOutcome> {
        if let Some(error) = &self.submit_error {
            self.push(Call::Submit { converter: order.converter, amount: order.amount });
            return Err(error.clone());
        }
        Ok(self.record(Call::Submit { converter: order.converter, amount: order.amount }))
    }

    async fn accrue_interest(&self, market: Address) -> ChainResult<TxOutcome> {
        if self.failing_markets.contains(&market) {
            self.push(Call::AccrueInterest(market));
            return Err(ChainError::revert("accrue failed"));
        }
        Ok(self.record(Call::AccrueInterest(market)))
    }

    async fn reserves_and_cash(&self, market: Address) -> ChainResult<(U256, U256)> {
        self.reserves.get(&market).copied().ok_or_else(|| ChainError::Rpc("unknown market".into()))
    }

    async fn reduce_reserves(&self, market: Address, amount: U256) -> ChainResult<TxOutcome> {
        Ok(self.record(Call::ReduceReserves { market, amount }))
    }

    async fn release_funds(&self, comptroller: Address, assets: &[Address]) -> ChainResult<TxOutcome> {
        let call = Call::ReleaseFunds { comptroller, assets: assets.to_vec() };
        if self.failing_comptrollers.contains(&comptroller) {
            self.push(call);
            return Err(ChainError::revert("release failed"));
        }
        Ok(self.record(call))
    }
}

/// Returns routes and impacts in the order they were queued.
#[derive(Default)]
pub struct FakeOptimizer {
    routes: Mutex<VecDeque<Result<Option<TradeRoute>, String>>>,
    impacts: Mutex<VecDeque<Fraction>>,
    /// Amounts `best_route` was asked for, in call order.
    pub requests: Mutex<Vec<(U256, Address, Address, TradeType)>>,
}

impl FakeOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, route: TradeRoute, impact: Fraction) -> &Self {
        self.routes.lock().unwrap().push_back(Ok(Some(route)));
        self.impacts.lock().unwrap().push_back(impact);
        self
    }

    pub fn queue_none(&self) -> &Self {
        self.routes.lock().unwrap().push_back(Ok(None));
        self
    }

    pub fn queue_error(&self, message: &str) -> &Self {
        self.routes.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn requested_amounts(&self) -> Vec<U256> {
        self.requests.lock().unwrap().iter().map(|r| r.0).collect()
    }
}

#[async_trait]
impl RouteOptimizer for FakeOptimizer {
    async fn best_route(
        &self,
        amount: U256,
        token_in: Address,
        token_out: Address,
        trade_type: TradeType,
    ) -> Result<Option<TradeRoute>> {
        self.requests.lock().unwrap().push((amount, token_in, token_out, trade_type));
        match self.routes.lock().unwrap().pop_front() {
            Some(Ok(route)) => Ok(route),
            Some(Err(message)) => Err(eyre!(message)),
            None => Ok(None),
        }
    }

    async fn price_impact(&self, _route: &TradeRoute) -> Result<Fraction> {
        self.impacts.lock().unwrap().pop_front().ok_or_else(|| eyre!("no impact queued"))
    }
}

/// Applies the same precedence as the subgraph query to a fixed list.
#[derive(Default)]
pub struct FakeIndex {
    pub configs: Vec<ConversionConfig>,
    pub queries: Mutex<Vec<ConfigQuery>>,
}

impl FakeIndex {
    pub fn new(configs: Vec<ConversionConfig>) -> Self {
        Self { configs, queries: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ConfigIndex for FakeIndex {
    async fn configs_for(&self, query: ConfigQuery) -> Result<Vec<ConversionConfig>, IndexError> {
        self.queries.lock().unwrap().push(query);
        let keep = |c: &&ConversionConfig| match query {
            ConfigQuery::ByPair { asset_in, asset_out } => c.asset_in == asset_in && c.asset_out == asset_out,
            ConfigQuery::ByAssetIn(token) => c.asset_in == token,
            ConfigQuery::ByAssetOut(token) => c.asset_out == token,
            ConfigQuery::ByConverter(converter) => c.converter == converter,
            ConfigQuery::All => true,
        };
        Ok(self.configs.iter().filter(keep).cloned().collect())
    }
}

pub fn conversion(converter: u8, asset_in: u8, asset_out: u8) -> ConversionConfig {
    ConversionConfig {
        converter: addr(converter),
        asset_in: addr(asset_in),
        asset_out: addr(asset_out),
        incentive: U256::zero(),
    }
}

pub fn market(comptroller: u8, vtoken: u8, underlying: u8) -> MarketRef {
    MarketRef { comptroller: addr(comptroller), vtoken: addr(vtoken), underlying: addr(underlying), core: false }
}

pub fn release_calls(calls: &[Call]) -> BTreeMap<Address, Vec<Address>> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::ReleaseFunds { comptroller, assets } => Some((*comptroller, assets.clone())),
            _ => None,
        })
        .collect()
}
