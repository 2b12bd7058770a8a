// bot/src/index.rs
//! Conversion configurations from the token-converter subgraph.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::state::ConversionConfig;

const PAGE_SIZE: usize = 1_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const CONVERSION_CONFIGS_QUERY: &str = r#"
query ConversionConfigs($first: Int!, $skip: Int!, $where: ConversionConfig_filter) {
  conversionConfigs(first: $first, skip: $skip, where: $where) {
    id
    tokenConverter { id }
    tokenAddressIn
    tokenAddressOut
    incentive
    access
  }
}
"#;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("subgraph request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subgraph returned errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),
    #[error("malformed subgraph response: {0}")]
    Decode(String),
}

/// Optional discovery filter. Any combination of fields may be set;
/// [`ConfigQuery::from_filter`] decides which lookup runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFilter {
    pub converter: Option<Address>,
    pub asset_in: Option<Address>,
    pub asset_out: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigQuery {
    ByPair { asset_in: Address, asset_out: Address },
    ByAssetIn(Address),
    ByAssetOut(Address),
    ByConverter(Address),
    All,
}

impl ConfigQuery {
    /// Pair beats a single asset, a single asset beats the converter, and
    /// the converter beats "everything".
    pub fn from_filter(filter: &ConversionFilter) -> Self {
        match (filter.asset_in, filter.asset_out, filter.converter) {
            (Some(asset_in), Some(asset_out), _) => ConfigQuery::ByPair { asset_in, asset_out },
            (Some(asset_in), None, _) => ConfigQuery::ByAssetIn(asset_in),
            (None, Some(asset_out), _) => ConfigQuery::ByAssetOut(asset_out),
            (None, None, Some(converter)) => ConfigQuery::ByConverter(converter),
            (None, None, None) => ConfigQuery::All,
        }
    }

    /// The subgraph `where` clause. Addresses are stored lower-case.
    pub fn where_clause(&self) -> Value {
        let hex = |a: &Address| Value::String(format!("{a:#x}"));
        let mut clause = Map::new();
        match self {
            ConfigQuery::ByPair { asset_in, asset_out } => {
                clause.insert("tokenAddressIn".into(), hex(asset_in));
                clause.insert("tokenAddressOut".into(), hex(asset_out));
            }
            ConfigQuery::ByAssetIn(asset_in) => {
                clause.insert("tokenAddressIn".into(), hex(asset_in));
            }
            ConfigQuery::ByAssetOut(asset_out) => {
                clause.insert("tokenAddressOut".into(), hex(asset_out));
            }
            ConfigQuery::ByConverter(converter) => {
                clause.insert("tokenConverter".into(), hex(converter));
            }
            ConfigQuery::All => {}
        }
        Value::Object(clause)
    }
}

#[async_trait]
pub trait ConfigIndex: Send + Sync {
    async fn configs_for(&self, query: ConfigQuery) -> Result<Vec<ConversionConfig>, IndexError>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ConfigsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigsData {
    conversion_configs: Vec<RawConversionConfig>,
}

#[derive(Debug, Deserialize)]
struct EntityId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversionConfig {
    id: String,
    token_converter: EntityId,
    token_address_in: String,
    token_address_out: String,
    incentive: String,
    access: String,
}

impl RawConversionConfig {
    fn is_enabled(&self) -> bool {
        !self.access.eq_ignore_ascii_case("NONE")
    }

    fn into_config(self) -> Result<ConversionConfig, IndexError> {
        let address = |field: &str, value: &str| {
            value
                .parse::<Address>()
                .map_err(|e| IndexError::Decode(format!("config {}: {field} '{value}': {e}", self.id)))
        };
        let incentive = U256::from_dec_str(&self.incentive)
            .map_err(|e| IndexError::Decode(format!("config {}: incentive '{}': {e}", self.id, self.incentive)))?;
        Ok(ConversionConfig {
            converter: address("tokenConverter", &self.token_converter.id)?,
            asset_in: address("tokenAddressIn", &self.token_address_in)?,
            asset_out: address("tokenAddressOut", &self.token_address_out)?,
            incentive,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubgraphIndex {
    client: Client,
    url: String,
}

impl SubgraphIndex {
    pub fn new(url: impl Into<String>) -> Result<Self, IndexError> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, url: url.into() })
    }

    async fn page(&self, clause: &Value, skip: usize) -> Result<Vec<RawConversionConfig>, IndexError> {
        let body = json!({
            "query": CONVERSION_CONFIGS_QUERY,
            "variables": { "first": PAGE_SIZE, "skip": skip, "where": clause },
        });
        let response: GraphQlResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.errors.is_empty() {
            return Err(IndexError::GraphQl(response.errors.into_iter().map(|e| e.message).collect()));
        }
        response
            .data
            .map(|d| d.conversion_configs)
            .ok_or_else(|| IndexError::Decode("response has neither data nor errors".into()))
    }
}

#[async_trait]
impl ConfigIndex for SubgraphIndex {
    #[instrument(skip(self), level = "debug")]
    async fn configs_for(&self, query: ConfigQuery) -> Result<Vec<ConversionConfig>, IndexError> {
        let clause = query.where_clause();
        let mut configs = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.page(&clause, skip).await?;
            let fetched = page.len();
            for raw in page.into_iter().filter(RawConversionConfig::is_enabled) {
                configs.push(raw.into_config()?);
            }
            if fetched < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        debug!(count = configs.len(), "Conversion configs fetched");
        Ok(configs)
    }
}
