// bot/src/discovery.rs

use dashmap::DashMap;
use ethers::types::Address;
use eyre::{eyre, Result, WrapErr};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::events::{Event, EventContext, EventSink, PotentialConversionsContext};
use crate::gateway::{BalanceRequest, ChainGateway};
use crate::index::{ConfigIndex, ConfigQuery, ConversionFilter};
use crate::state::{release_plan, AssetBalance, BalanceResult, MarketRef, TokenInfo};

/// Finds converters holding a redeemable balance.
pub struct MarketDiscovery {
    gateway: Arc<dyn ChainGateway>,
    index: Arc<dyn ConfigIndex>,
    sink: Arc<dyn EventSink>,
    pre_release: bool,
    tokens: DashMap<Address, TokenInfo>,
    markets: OnceCell<Vec<MarketRef>>,
}

impl MarketDiscovery {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        index: Arc<dyn ConfigIndex>,
        sink: Arc<dyn EventSink>,
        pre_release: bool,
    ) -> Self {
        Self { gateway, index, sink, pre_release, tokens: DashMap::new(), markets: OnceCell::new() }
    }

    /// Market directory, loaded once per process.
    pub async fn markets(&self) -> Result<&[MarketRef]> {
        let markets = self
            .markets
            .get_or_try_init(|| async {
                self.gateway.market_directory().await.wrap_err("Failed to load market directory")
            })
            .await?;
        Ok(markets.as_slice())
    }

    async fn token_infos(&self, tokens: &[Address]) -> Result<()> {
        let mut missing: Vec<Address> = tokens.iter().copied().filter(|t| !self.tokens.contains_key(t)).collect();
        missing.sort();
        missing.dedup();
        if missing.is_empty() {
            return Ok(());
        }
        let infos = self.gateway.token_metadata(&missing).await.wrap_err("Failed to read token metadata")?;
        for info in infos {
            self.tokens.insert(info.address, info);
        }
        Ok(())
    }

    fn token(&self, address: Address) -> TokenInfo {
        self.tokens.get(&address).map(|t| t.value().clone()).unwrap_or_else(|| TokenInfo::unknown(address))
    }

    /// Resolves `filter`, batch-reads balances and returns the configs whose
    /// converter holds a positive balance of `asset_out`, in index order.
    /// Emits `PotentialConversions` with the block the read was pinned to.
    #[instrument(skip(self), fields(pre_release = self.pre_release))]
    pub async fn discover(&self, filter: &ConversionFilter) -> Result<Vec<BalanceResult>> {
        let query = ConfigQuery::from_filter(filter);
        let configs = self.index.configs_for(query).await.wrap_err("Config index query failed")?;
        debug!(?query, configs = configs.len(), "Conversion configs resolved");

        let markets = self.markets().await?;
        let per_config: Vec<Vec<MarketRef>> = configs
            .iter()
            .map(|c| markets.iter().filter(|m| m.underlying == c.asset_out).cloned().collect())
            .collect();

        let release: BTreeMap<Address, Vec<Address>> = if self.pre_release {
            release_plan(per_config.iter().flatten())
        } else {
            BTreeMap::new()
        };
        let request = BalanceRequest {
            wallet: self.gateway.wallet_address(),
            entries: configs.iter().map(|c| (c.converter, c.asset_out)).collect(),
            release,
        };
        let readout = self.gateway.read_balances(&request).await.wrap_err("Balance batch read failed")?;
        if readout.balances.len() != configs.len() {
            return Err(eyre!(
                "balance read returned {} entries for {} configs",
                readout.balances.len(),
                configs.len()
            ));
        }

        let positive: Vec<usize> = readout
            .balances
            .iter()
            .enumerate()
            .filter(|(_, (converter_balance, _))| !converter_balance.is_zero())
            .map(|(i, _)| i)
            .collect();
        let tokens: Vec<Address> =
            positive.iter().flat_map(|&i| [configs[i].asset_in, configs[i].asset_out]).collect();
        self.token_infos(&tokens).await?;

        let results: Vec<BalanceResult> = positive
            .into_iter()
            .map(|i| {
                let config = &configs[i];
                let (balance, wallet_balance) = readout.balances[i];
                BalanceResult {
                    converter: config.converter,
                    asset_in: self.token(config.asset_in),
                    asset_out: AssetBalance { token: self.token(config.asset_out), balance, wallet_balance },
                    markets: per_config[i].clone(),
                }
            })
            .collect();

        info!(block = %readout.block_number, found = results.len(), scanned = configs.len(), "Discovery complete");
        self.sink.on_event(
            &Event::new(EventContext::PotentialConversions(PotentialConversionsContext { results: results.clone() }))
                .at_block(Some(readout.block_number)),
        );
        Ok(results)
    }
}
