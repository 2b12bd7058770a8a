// bot/src/state.rs

// --- Imports ---
use crate::encoding::{self, PathError};
use ethers::types::{Address, Bytes, I256, U256, U64, H256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ERC-20 identity as reported by the token itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    /// Placeholder for tokens whose metadata calls revert.
    pub fn unknown(address: Address) -> Self {
        Self { address, symbol: format!("{:?}", address), decimals: 18 }
    }
}

impl fmt::Display for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.symbol, self.address)
    }
}

/// A converter and the ordered pair it is willing to trade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub converter: Address,
    pub asset_in: Address,
    pub asset_out: Address,
    pub incentive: U256,
}

/// Lending market whose idle reserves can be released into the shared reserve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketRef {
    pub comptroller: Address,
    pub vtoken: Address,
    pub underlying: Address,
    pub core: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    #[serde(flatten)]
    pub token: TokenInfo,
    /// Converter's balance of this token.
    pub balance: U256,
    /// Operator wallet's own balance of this token.
    pub wallet_balance: U256,
}

/// One discovered opportunity. Only built when `asset_out.balance > 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub converter: Address,
    pub asset_in: TokenInfo,
    pub asset_out: AssetBalance,
    pub markets: Vec<MarketRef>,
}

impl BalanceResult {
    /// `comptroller -> assets` pairs that need `releaseFunds` before conversion.
    pub fn release_plan(&self) -> BTreeMap<Address, Vec<Address>> {
        release_plan(self.markets.iter())
    }
}

/// Groups markets by comptroller, deduplicating underlying assets.
pub fn release_plan<'a>(markets: impl IntoIterator<Item = &'a MarketRef>) -> BTreeMap<Address, Vec<Address>> {
    let mut plan: BTreeMap<Address, Vec<Address>> = BTreeMap::new();
    for market in markets {
        let assets = plan.entry(market.comptroller).or_default();
        if !assets.contains(&market.underlying) {
            assets.push(market.underlying);
        }
    }
    plan
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

/// A negotiated swap: what goes in, what comes out and the packed path.
/// `tokens[0]` is the swap input and the last token is the swap output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRoute {
    pub input: TokenAmount,
    pub output: TokenAmount,
    pub tokens: Vec<Address>,
    pub fees: Vec<u32>,
    pub path: Bytes,
}

impl TradeRoute {
    pub fn new(input: TokenAmount, output: TokenAmount, tokens: Vec<Address>, fees: Vec<u32>) -> Result<Self, PathError> {
        let path = encoding::encode_path(&tokens, &fees)?;
        Ok(Self { input, output, tokens, fees, path })
    }
}

impl fmt::Display for TradeRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, " -[{}]-> ", self.fees[i - 1])?;
            }
            write!(f, "{:?}", token)?;
        }
        Ok(())
    }
}

/// Execution-ready conversion, consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitrageOrder {
    pub converter: Address,
    pub route: TradeRoute,
    pub amount: U256,
    pub min_income: I256,
    pub beneficiary: Address,
    pub deadline: U256,
}

impl ArbitrageOrder {
    pub fn token_to_receive_from_converter(&self) -> Address {
        self.route.input.token
    }

    pub fn token_to_send_to_converter(&self) -> Address {
        self.route.output.token
    }

    /// Amount the wallet must cover when the conversion runs at a loss.
    pub fn shortfall(&self) -> Option<U256> {
        self.min_income.is_negative().then(|| self.min_income.unsigned_abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: U64,
    pub timestamp: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub hash: H256,
    pub block_number: Option<U64>,
}
