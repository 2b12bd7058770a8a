// bot/src/config.rs

use ethers::types::Address;
use eyre::{Result, WrapErr};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use dotenv::dotenv;
use tracing::info;

/// Multicall3 is deployed at the same address on every supported chain.
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";
pub const DEFAULT_FEE_TIERS: [u32; 4] = [100, 500, 2_500, 10_000];

const ETHEREUM_CHAIN_ID: u64 = 1;
const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug, Clone)]
pub struct Config {
    // Network & Keys
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: Option<u64>,
    pub confirmations: Option<usize>,

    // Contract Addresses
    pub operator_address: Address,
    pub protocol_share_reserve_address: Address,
    pub core_comptroller_address: Address,
    pub pool_registry_address: Address,
    pub quoter_address: Address,
    pub v3_factory_address: Address,
    pub multicall_address: Address,
    pub subgraph_url: String,

    // Run Mode
    pub dry_run: bool,
    pub pre_release: bool,
    pub beneficiary: Option<Address>,
    pub max_concurrent_conversions: usize,
    pub poll_interval_secs: u64,
    pub event_log_path: Option<PathBuf>,

    // Negotiation
    pub max_price_impact_bps: u32,
    pub impact_backoff_bps: u32,
    pub max_impact_retries: u32,
    pub min_conversion_amount: u64,
    pub slippage_tolerance_bps: u32,
    pub deadline_grace_secs: u64,
    pub fee_tiers: Vec<u32>,
    pub base_tokens: Vec<Address>,

    // Maintenance
    pub reserves_market: Option<Address>,
    pub accrue_markets: Vec<Address>,

    // Gas Pricing Options
    pub max_priority_fee_per_gas_gwei: f64,
    pub gas_limit_buffer_percentage: u64,
    pub min_gas_limit: u64,
    pub legacy_transactions: bool,
}

impl Config {
    /// Confirmations to wait for on writes. Ethereum mainnet and Sepolia get
    /// 12, faster chains 4, unless overridden.
    pub fn confirmations(&self) -> usize {
        if let Some(n) = self.confirmations {
            return n;
        }
        match self.chain_id {
            Some(ETHEREUM_CHAIN_ID) | Some(SEPOLIA_CHAIN_ID) => 12,
            _ => 4,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            private_key: String::new(),
            chain_id: None,
            confirmations: None,
            operator_address: Address::zero(),
            protocol_share_reserve_address: Address::zero(),
            core_comptroller_address: Address::zero(),
            pool_registry_address: Address::zero(),
            quoter_address: Address::zero(),
            v3_factory_address: Address::zero(),
            multicall_address: Address::from_str(MULTICALL3_ADDRESS).unwrap_or_default(),
            subgraph_url: String::new(),
            dry_run: false,
            pre_release: false,
            beneficiary: None,
            max_concurrent_conversions: 1,
            poll_interval_secs: 60,
            event_log_path: None,
            max_price_impact_bps: 500,
            impact_backoff_bps: 7_500,
            max_impact_retries: 5,
            min_conversion_amount: 1,
            slippage_tolerance_bps: 0,
            deadline_grace_secs: 60,
            fee_tiers: DEFAULT_FEE_TIERS.to_vec(),
            base_tokens: Vec::new(),
            reserves_market: None,
            accrue_markets: Vec::new(),
            max_priority_fee_per_gas_gwei: 1.0,
            gas_limit_buffer_percentage: 20,
            min_gas_limit: 200_000,
            legacy_transactions: false,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Comma-separated list; blank entries are ignored.
fn parse_list<T: FromStr>(value: &str) -> Result<Vec<T>>
where
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().wrap_err_with(|| format!("invalid list entry '{s}'")))
        .collect()
}

/// Parses an optional raw setting. Unset or blank yields `None`; anything
/// else must parse, so a typo never silently becomes the default.
fn parse_setting<T: FromStr>(var_name: &str, raw: Option<&str>) -> Result<Option<T>>
where
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .wrap_err_with(|| format!("{var_name} has an invalid value '{value}'")),
    }
}

fn env_setting<T: FromStr>(var_name: &str) -> Result<Option<T>>
where
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    parse_setting(var_name, env::var(var_name).ok().as_deref())
}

pub fn load_config() -> Result<Config> {
    dotenv().ok();
    let defaults = Config::default();

    let parse_bool_env = |var_name: &str| -> bool {
        env::var(var_name).map(|s| parse_bool(&s)).unwrap_or(false)
    };
    let parse_f64_env = |var_name: &str, default: f64| -> Result<f64> {
        Ok(env_setting(var_name)?.unwrap_or(default))
    };
    let parse_u32_env = |var_name: &str, default: u32| -> Result<u32> {
        Ok(env_setting(var_name)?.unwrap_or(default))
    };
    let parse_u64_env = |var_name: &str, default: u64| -> Result<u64> {
        Ok(env_setting(var_name)?.unwrap_or(default))
    };
    let required = |var_name: &str| -> Result<String> {
        match env::var(var_name) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => eyre::bail!("{var_name} must be set"),
        }
    };
    let required_address = |var_name: &str| -> Result<Address> {
        required(var_name)?
            .parse::<Address>()
            .wrap_err_with(|| format!("{var_name} is not a valid address"))
    };
    let parse_optional_address = |var_name: &str| -> Result<Option<Address>> {
        match env::var(var_name) {
            Ok(addr_str) if !addr_str.trim().is_empty() => Ok(Some(
                addr_str
                    .trim()
                    .parse::<Address>()
                    .wrap_err_with(|| format!("{var_name} is not a valid address"))?,
            )),
            _ => Ok(None),
        }
    };
    let parse_address_list = |var_name: &str| -> Result<Vec<Address>> {
        match env::var(var_name) {
            Ok(value) => parse_list(&value).wrap_err_with(|| format!("{var_name} is malformed")),
            Err(_) => Ok(Vec::new()),
        }
    };

    // --- Load vars ---
    let rpc_url = required("RPC_URL")?;
    let private_key = required("PRIVATE_KEY")?;
    let operator_address = required_address("OPERATOR_ADDRESS")?;
    let subgraph_url = required("SUBGRAPH_URL")?;
    let protocol_share_reserve_address = required_address("PROTOCOL_SHARE_RESERVE_ADDRESS")?;
    let core_comptroller_address = required_address("CORE_COMPTROLLER_ADDRESS")?;
    let pool_registry_address = required_address("POOL_REGISTRY_ADDRESS")?;
    let quoter_address = required_address("QUOTER_ADDRESS")?;
    let v3_factory_address = required_address("V3_FACTORY_ADDRESS")?;

    let chain_id = env_setting::<u64>("CHAIN_ID")?;
    let confirmations = env_setting::<usize>("CONFIRMATIONS")?;
    let multicall_address =
        parse_optional_address("MULTICALL_ADDRESS")?.unwrap_or(defaults.multicall_address);
    let beneficiary = parse_optional_address("BENEFICIARY")?;
    let reserves_market = parse_optional_address("RESERVES_MARKET")?;
    let accrue_markets = parse_address_list("ACCRUE_MARKETS")?;
    let base_tokens = parse_address_list("BASE_TOKENS")?;
    let fee_tiers = match env::var("FEE_TIERS") {
        Ok(value) => parse_list::<u32>(&value).wrap_err("FEE_TIERS is malformed")?,
        Err(_) => defaults.fee_tiers.clone(),
    };
    if fee_tiers.is_empty() {
        eyre::bail!("FEE_TIERS must name at least one fee tier");
    }

    let max_price_impact_bps = parse_u32_env("MAX_PRICE_IMPACT_BPS", defaults.max_price_impact_bps)?;
    let impact_backoff_bps = parse_u32_env("IMPACT_BACKOFF_BPS", defaults.impact_backoff_bps)?;
    if impact_backoff_bps == 0 || impact_backoff_bps >= 10_000 {
        eyre::bail!("IMPACT_BACKOFF_BPS must be between 1 and 9999, got {impact_backoff_bps}");
    }

    let config = Config {
        rpc_url,
        private_key,
        chain_id,
        confirmations,
        operator_address,
        protocol_share_reserve_address,
        core_comptroller_address,
        pool_registry_address,
        quoter_address,
        v3_factory_address,
        multicall_address,
        subgraph_url,
        dry_run: parse_bool_env("DRY_RUN"),
        pre_release: parse_bool_env("PRE_RELEASE"),
        beneficiary,
        max_concurrent_conversions: parse_u64_env("MAX_CONCURRENT_CONVERSIONS", 1)?.max(1) as usize,
        poll_interval_secs: parse_u64_env("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
        event_log_path: env::var("EVENT_LOG_PATH").ok().filter(|s| !s.is_empty()).map(PathBuf::from),
        max_price_impact_bps,
        impact_backoff_bps,
        max_impact_retries: parse_u32_env("MAX_IMPACT_RETRIES", defaults.max_impact_retries)?,
        min_conversion_amount: parse_u64_env("MIN_CONVERSION_AMOUNT", defaults.min_conversion_amount)?.max(1),
        slippage_tolerance_bps: parse_u32_env("SLIPPAGE_TOLERANCE_BPS", defaults.slippage_tolerance_bps)?,
        deadline_grace_secs: parse_u64_env("DEADLINE_GRACE_SECS", defaults.deadline_grace_secs)?,
        fee_tiers,
        base_tokens,
        reserves_market,
        accrue_markets,
        max_priority_fee_per_gas_gwei: parse_f64_env(
            "MAX_PRIORITY_FEE_PER_GAS_GWEI",
            defaults.max_priority_fee_per_gas_gwei,
        )?,
        gas_limit_buffer_percentage: parse_u64_env(
            "GAS_LIMIT_BUFFER_PERCENTAGE",
            defaults.gas_limit_buffer_percentage,
        )?,
        min_gas_limit: parse_u64_env("MIN_GAS_LIMIT", defaults.min_gas_limit)?,
        legacy_transactions: parse_bool_env("LEGACY_TRANSACTIONS"),
    };

    info!(
        operator = ?config.operator_address,
        dry_run = config.dry_run,
        pre_release = config.pre_release,
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmations_depend_on_chain() {
        let mut config = Config::default();
        assert_eq!(config.confirmations(), 4);
        config.chain_id = Some(1);
        assert_eq!(config.confirmations(), 12);
        config.chain_id = Some(11_155_111);
        assert_eq!(config.confirmations(), 12);
        config.chain_id = Some(56);
        assert_eq!(config.confirmations(), 4);
        config.confirmations = Some(1);
        assert_eq!(config.confirmations(), 1);
    }

    #[test]
    fn lists_skip_blanks() {
        let tiers: Vec<u32> = parse_list("100, 500,,3000 ").unwrap();
        assert_eq!(tiers, vec![100, 500, 3000]);
        assert!(parse_list::<u32>("100,abc").is_err());
        let addrs: Vec<Address> =
            parse_list("0x0000000000000000000000000000000000000001").unwrap();
        assert_eq!(addrs, vec![Address::from_low_u64_be(1)]);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = parse_setting::<u32>("MAX_PRICE_IMPACT_BPS", Some("5%")).unwrap_err();
        assert!(format!("{err:#}").contains("MAX_PRICE_IMPACT_BPS has an invalid value '5%'"), "{err:#}");
        assert!(parse_setting::<u64>("CHAIN_ID", Some("abc")).is_err());
        assert!(parse_setting::<f64>("MAX_PRIORITY_FEE_PER_GAS_GWEI", Some("1,5")).is_err());
    }

    #[test]
    fn unset_or_blank_numbers_fall_back() {
        assert_eq!(parse_setting::<u64>("CHAIN_ID", None).unwrap(), None);
        assert_eq!(parse_setting::<u64>("CHAIN_ID", Some("  ")).unwrap(), None);
        assert_eq!(parse_setting::<u64>("CHAIN_ID", Some(" 56 ")).unwrap(), Some(56));
    }

    #[test]
    fn bool_flags() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("yes"));
    }
}
// END OF FILE: bot/src/config.rs
