// bot/src/gateway.rs
//! Typed access to the chain: batched reads through Multicall3 and signed
//! writes through [`TxSender`].

use async_trait::async_trait;
use ethers::{
    abi::Token,
    contract::{ContractCall, Multicall},
    prelude::{Http, LocalWallet, Middleware, Provider, Signer, SignerMiddleware},
    types::{Address, BlockNumber, Bytes, U256, U64},
};
use eyre::{Result as EyreResult, WrapErr};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::bindings::{
    token_converter_operator::ConversionParameters, Comptroller, PoolRegistry, ProtocolShareReserve,
    TokenConverter, TokenConverterOperator, VToken, IERC20,
};
use crate::config::Config;
use crate::errors::ChainError;
use crate::gas::{buffered_gas_limit, GasSettings};
use crate::state::{ArbitrageOrder, BlockInfo, MarketRef, TokenInfo, TxOutcome};
use crate::transaction::{SignerClient, TxSender};

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// One batched balance read, optionally preceded by best-effort
/// `releaseFunds` calls evaluated in the same round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceRequest {
    pub wallet: Address,
    /// `(converter, token)` pairs; the converter's and the wallet's balance of
    /// `token` are read for each.
    pub entries: Vec<(Address, Address)>,
    pub release: BTreeMap<Address, Vec<Address>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceReadout {
    pub block_number: U64,
    /// `(converter_balance, wallet_balance)` in `entries` order.
    pub balances: Vec<(U256, U256)>,
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    fn wallet_address(&self) -> Address;

    async fn latest_block(&self) -> ChainResult<BlockInfo>;

    /// Symbol and decimals for each token, in input order.
    async fn token_metadata(&self, tokens: &[Address]) -> ChainResult<Vec<TokenInfo>>;

    /// Every core and isolated market with an ERC-20 underlying.
    async fn market_directory(&self) -> ChainResult<Vec<MarketRef>>;

    async fn read_balances(&self, request: &BalanceRequest) -> ChainResult<BalanceReadout>;

    /// Converter quote for `amount_out` of `token_out`: `(amount_out, amount_in)`.
    async fn updated_amount_in(
        &self,
        converter: Address,
        amount_out: U256,
        token_in: Address,
        token_out: Address,
    ) -> ChainResult<(U256, U256)>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256>;

    async fn approve(&self, token: Address, spender: Address, amount: U256) -> ChainResult<TxOutcome>;

    async fn estimate_conversion(&self, order: &ArbitrageOrder) -> ChainResult<U256>;

    async fn submit_conversion(&self, order: &ArbitrageOrder, gas_estimate: U256) -> ChainResult<TxOutcome>;

    async fn accrue_interest(&self, market: Address) -> ChainResult<TxOutcome>;

    /// `(totalReserves, getCash)` of a market.
    async fn reserves_and_cash(&self, market: Address) -> ChainResult<(U256, U256)>;

    async fn reduce_reserves(&self, market: Address, amount: U256) -> ChainResult<TxOutcome>;

    async fn release_funds(&self, comptroller: Address, assets: &[Address]) -> ChainResult<TxOutcome>;
}

fn multicall_err<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Rpc(format!("multicall failed: {e}"))
}

fn token_to_u256(token: Token) -> ChainResult<U256> {
    token.into_uint().ok_or_else(|| ChainError::Rpc("multicall returned a non-integer".into()))
}

#[derive(Debug)]
pub struct EthersGateway<M = SignerClient> {
    client: Arc<M>,
    sender: TxSender<M>,
    wallet: Address,
    chain_id: u64,
    operator: Address,
    protocol_share_reserve: Address,
    core_comptroller: Address,
    pool_registry: Address,
    multicall: Address,
    gas: GasSettings,
}

impl EthersGateway<SignerClient> {
    #[instrument(skip(config), level = "info")]
    pub async fn connect(config: &Config) -> EyreResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .wrap_err_with(|| format!("invalid RPC_URL {}", config.rpc_url))?;
        let chain_id = match config.chain_id {
            Some(id) => id,
            None => provider.get_chainid().await.wrap_err("Failed to query chain id")?.as_u64(),
        };
        let wallet = config
            .private_key
            .parse::<LocalWallet>()
            .wrap_err("PRIVATE_KEY is not a valid key")?
            .with_chain_id(chain_id);
        let address = wallet.address();
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(Self::with_client(client, address, chain_id, config))
    }
}

impl<M> EthersGateway<M>
where
    M: Middleware + 'static,
    <M as Middleware>::Error: StdError + Send + Sync + 'static,
{
    /// Wraps an already-connected middleware that signs as `wallet`.
    pub fn with_client(client: Arc<M>, wallet: Address, chain_id: u64, config: &Config) -> Self {
        let mut resolved = config.clone();
        resolved.chain_id = Some(chain_id);
        let gas = GasSettings::from(config);
        let sender = TxSender::new(client.clone(), wallet, chain_id, gas, resolved.confirmations());
        info!(chain_id, wallet = ?wallet, confirmations = resolved.confirmations(), "Chain gateway connected");

        Self {
            client,
            sender,
            wallet,
            chain_id,
            operator: config.operator_address,
            protocol_share_reserve: config.protocol_share_reserve_address,
            core_comptroller: config.core_comptroller_address,
            pool_registry: config.pool_registry_address,
            multicall: config.multicall_address,
            gas,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn client(&self) -> Arc<M> {
        self.client.clone()
    }

    async fn multicall(&self) -> ChainResult<Multicall<M>> {
        Multicall::new(self.client.clone(), Some(self.multicall)).await.map_err(multicall_err)
    }

    fn conversion_call(&self, order: &ArbitrageOrder) -> ContractCall<M, ()> {
        let operator = TokenConverterOperator::new(self.operator, self.client.clone());
        operator.convert(ConversionParameters {
            beneficiary: order.beneficiary,
            token_to_receive_from_converter: order.token_to_receive_from_converter(),
            amount: order.amount,
            min_income: order.min_income,
            token_to_send_to_converter: order.token_to_send_to_converter(),
            converter: order.converter,
            path: order.route.path.clone(),
            deadline: order.deadline,
        })
    }

    async fn comptroller_markets(&self, comptroller: Address) -> ChainResult<Vec<Address>> {
        let contract = Comptroller::new(comptroller, self.client.clone());
        let call = contract.get_all_markets();
        call.call().await.map_err(ChainError::from_contract)
    }
}

#[async_trait]
impl<M> ChainGateway for EthersGateway<M>
where
    M: Middleware + 'static,
    <M as Middleware>::Error: StdError + Send + Sync + 'static,
{
    fn wallet_address(&self) -> Address {
        self.wallet
    }

    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let block = self
            .client
            .get_block(BlockNumber::Latest)
            .await
            .map_err(ChainError::from_middleware)?
            .ok_or_else(|| ChainError::Rpc("latest block unavailable".into()))?;
        let number = block.number.ok_or_else(|| ChainError::Rpc("latest block has no number".into()))?;
        Ok(BlockInfo { number, timestamp: block.timestamp })
    }

    #[instrument(skip(self, tokens), fields(count = tokens.len()), level = "debug")]
    async fn token_metadata(&self, tokens: &[Address]) -> ChainResult<Vec<TokenInfo>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut multicall = self.multicall().await?;
        for token in tokens {
            let erc20 = IERC20::new(*token, self.client.clone());
            multicall.add_call(erc20.symbol(), true);
            multicall.add_call(erc20.decimals(), true);
        }
        let results = multicall.call_raw().await.map_err(multicall_err)?;

        let mut out = Vec::with_capacity(tokens.len());
        for (token, pair) in tokens.iter().zip(results.chunks(2)) {
            let mut info = TokenInfo::unknown(*token);
            if let Some(Ok(Token::String(symbol))) = pair.first() {
                info.symbol = symbol.clone();
            }
            if let Some(Ok(Token::Uint(decimals))) = pair.get(1) {
                info.decimals = decimals.low_u32().min(u8::MAX as u32) as u8;
            } else {
                warn!(token = ?token, "decimals() failed, assuming 18");
            }
            out.push(info);
        }
        Ok(out)
    }

    #[instrument(skip(self), level = "debug")]
    async fn market_directory(&self) -> ChainResult<Vec<MarketRef>> {
        let mut listed: Vec<(Address, Address, bool)> = self
            .comptroller_markets(self.core_comptroller)
            .await?
            .into_iter()
            .map(|vtoken| (self.core_comptroller, vtoken, true))
            .collect();

        let registry = PoolRegistry::new(self.pool_registry, self.client.clone());
        let pools_call = registry.get_all_pools();
        let pools = pools_call.call().await.map_err(ChainError::from_contract)?;
        // `VenusPool` decodes as (name, creator, comptroller, blockPosted, timestampPosted).
        for (_, _, comptroller, _, _) in pools {
            for vtoken in self.comptroller_markets(comptroller).await? {
                listed.push((comptroller, vtoken, false));
            }
        }
        if listed.is_empty() {
            return Ok(Vec::new());
        }

        let mut multicall = self.multicall().await?;
        for (_, vtoken, _) in &listed {
            multicall.add_call(VToken::new(*vtoken, self.client.clone()).underlying(), true);
        }
        let underlyings = multicall.call_raw().await.map_err(multicall_err)?;

        let markets: Vec<MarketRef> = listed
            .into_iter()
            .zip(underlyings)
            .filter_map(|((comptroller, vtoken, core), underlying)| match underlying {
                Ok(Token::Address(underlying)) => Some(MarketRef { comptroller, vtoken, underlying, core }),
                // Native-asset markets have no `underlying()`.
                _ => None,
            })
            .collect();
        debug!(markets = markets.len(), "Market directory loaded");
        Ok(markets)
    }

    #[instrument(skip(self, request), fields(entries = request.entries.len(), release = request.release.len()))]
    async fn read_balances(&self, request: &BalanceRequest) -> ChainResult<BalanceReadout> {
        let block_number = self.client.get_block_number().await.map_err(ChainError::from_middleware)?;
        if request.entries.is_empty() {
            return Ok(BalanceReadout { block_number, balances: Vec::new() });
        }

        let mut multicall = self.multicall().await?.block(block_number);
        let psr = ProtocolShareReserve::new(self.protocol_share_reserve, self.client.clone());
        for (comptroller, assets) in &request.release {
            multicall.add_call(psr.release_funds(*comptroller, assets.clone()), true);
        }
        for (converter, token) in &request.entries {
            let erc20 = IERC20::new(*token, self.client.clone());
            multicall.add_call(erc20.balance_of(*converter), false);
            multicall.add_call(erc20.balance_of(request.wallet), false);
        }
        let results = multicall.call_raw().await.map_err(multicall_err)?;

        // `releaseFunds` returns nothing, so its slots carry no data either way.
        let released = request.release.len();
        if released > 0 {
            debug!(released, "Optimistic releaseFunds calls evaluated");
        }
        let mut balances = Vec::with_capacity(request.entries.len());
        for pair in results[released..].chunks(2) {
            let converter_balance = match pair.first() {
                Some(Ok(token)) => token_to_u256(token.clone())?,
                _ => return Err(ChainError::Rpc("converter balance read failed".into())),
            };
            let wallet_balance = match pair.get(1) {
                Some(Ok(token)) => token_to_u256(token.clone())?,
                _ => return Err(ChainError::Rpc("wallet balance read failed".into())),
            };
            balances.push((converter_balance, wallet_balance));
        }
        Ok(BalanceReadout { block_number, balances })
    }

    #[instrument(skip(self), level = "debug")]
    async fn updated_amount_in(
        &self,
        converter: Address,
        amount_out: U256,
        token_in: Address,
        token_out: Address,
    ) -> ChainResult<(U256, U256)> {
        let contract = TokenConverter::new(converter, self.client.clone());
        let call = contract.get_updated_amount_in(amount_out, token_in, token_out);
        call.call().await.map_err(ChainError::from_contract)
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256> {
        let erc20 = IERC20::new(token, self.client.clone());
        let call = erc20.allowance(owner, spender);
        call.call().await.map_err(ChainError::from_contract)
    }

    #[instrument(skip(self))]
    async fn approve(&self, token: Address, spender: Address, amount: U256) -> ChainResult<TxOutcome> {
        let erc20 = IERC20::new(token, self.client.clone());
        let call = erc20.approve(spender, amount);
        self.sender.send(call.tx, "approve").await
    }

    #[instrument(skip(self, order), fields(converter = ?order.converter, amount = %order.amount))]
    async fn estimate_conversion(&self, order: &ArbitrageOrder) -> ChainResult<U256> {
        let call = self.conversion_call(order);
        self.sender.estimate(&call.tx).await
    }

    #[instrument(skip(self, order), fields(converter = ?order.converter, amount = %order.amount))]
    async fn submit_conversion(&self, order: &ArbitrageOrder, gas_estimate: U256) -> ChainResult<TxOutcome> {
        let mut tx = self.conversion_call(order).tx;
        tx.set_gas(buffered_gas_limit(gas_estimate, &self.gas));
        self.sender.send(tx, "convert").await
    }

    #[instrument(skip(self))]
    async fn accrue_interest(&self, market: Address) -> ChainResult<TxOutcome> {
        let vtoken = VToken::new(market, self.client.clone());
        let call = vtoken.accrue_interest();
        self.sender.send(call.tx, "accrueInterest").await
    }

    async fn reserves_and_cash(&self, market: Address) -> ChainResult<(U256, U256)> {
        let vtoken = VToken::new(market, self.client.clone());
        let reserves_call = vtoken.total_reserves();
        let cash_call = vtoken.get_cash();
        tokio::try_join!(reserves_call.call(), cash_call.call()).map_err(ChainError::from_contract)
    }

    #[instrument(skip(self))]
    async fn reduce_reserves(&self, market: Address, amount: U256) -> ChainResult<TxOutcome> {
        let vtoken = VToken::new(market, self.client.clone());
        let call = vtoken.reduce_reserves(amount);
        self.sender.send(call.tx, "reduceReserves").await
    }

    #[instrument(skip(self, assets), fields(assets = assets.len()))]
    async fn release_funds(&self, comptroller: Address, assets: &[Address]) -> ChainResult<TxOutcome> {
        let psr = ProtocolShareReserve::new(self.protocol_share_reserve, self.client.clone());
        let call = psr.release_funds(comptroller, assets.to_vec());
        self.sender.send(call.tx, "releaseFunds").await
    }
}

/// Keeps `Bytes` paths printable in logs.
pub fn short_hex(bytes: &Bytes) -> String {
    let hex = hex::encode(bytes);
    if hex.len() <= 18 {
        format!("0x{hex}")
    } else {
        format!("0x{}..{}", &hex[..8], &hex[hex.len() - 8..])
    }
}
