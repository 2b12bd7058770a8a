// bot/src/errors.rs
// Typed failures that cross component boundaries.

use ethers::{
    abi::{self, ParamType, Token},
    contract::ContractError,
    providers::{Middleware, MiddlewareError},
    types::H256,
    utils::id,
};
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

/// `Error(string)`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)`
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

const KNOWN_CUSTOM_ERRORS: &[&str] = &[
    "InvalidSwapStart(address,address)",
    "InvalidSwapEnd(address,address)",
    "DeadlinePassed(uint256,uint256)",
    "MinIncomeNotMet(int256,int256)",
    "AmountInHigherThanMax(uint256,uint256)",
    "AmountOutLowerThanMinRequired(uint256,uint256)",
    "AmountInMismatched()",
    "AmountOutMismatched()",
    "ConversionConfigNotEnabled()",
    "ConversionEnabledOnlyForPrivateConversions()",
    "ConversionTokensPaused()",
    "InsufficientInputAmount()",
    "InsufficientOutputAmount()",
    "InsufficientPoolLiquidity()",
    "ZeroAddressNotAllowed()",
    "ZeroValueNotAllowed()",
    "Unauthorized(address,address,string)",
];

lazy_static! {
    static ref CUSTOM_ERROR_NAMES: HashMap<[u8; 4], &'static str> = KNOWN_CUSTOM_ERRORS
        .iter()
        .map(|signature| {
            let name = signature.split('(').next().unwrap_or(signature);
            (id(signature), name)
        })
        .collect();
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Structured revert reason decoded from the node's response.
    #[error("{reason}")]
    Revert { reason: String },
    #[error("transaction {0:?} reverted")]
    Reverted(H256),
    #[error("transaction {0:?} was dropped before confirmation")]
    Dropped(H256),
    #[error("{0}")]
    Rpc(String),
}

impl ChainError {
    pub fn revert(reason: impl Into<String>) -> Self {
        ChainError::Revert { reason: reason.into() }
    }

    /// The text that goes into an event's error field.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    pub fn is_nonce_error(&self) -> bool {
        match self {
            ChainError::Rpc(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("nonce too low") || msg.contains("replacement transaction underpriced")
            }
            _ => false,
        }
    }

    pub fn from_contract<M: Middleware>(err: ContractError<M>) -> Self {
        if let Some(data) = err.as_revert() {
            if let Some(reason) = decode_revert_data(data) {
                return ChainError::Revert { reason };
            }
        }
        ChainError::Rpc(err.to_string())
    }

    pub fn from_middleware<E: MiddlewareError>(err: E) -> Self {
        let reason = err
            .as_error_response()
            .and_then(|resp| resp.as_revert_data())
            .and_then(|data| decode_revert_data(&data));
        match reason {
            Some(reason) => ChainError::Revert { reason },
            None => ChainError::Rpc(err.to_string()),
        }
    }
}

/// Decodes `Error(string)`, `Panic(uint256)` and the custom errors the
/// converter contracts are known to raise. Unknown selectors yield `None`.
pub fn decode_revert_data(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, body) = data.split_at(4);
    let selector: [u8; 4] = selector.try_into().ok()?;
    match selector {
        ERROR_STRING_SELECTOR => match abi::decode(&[ParamType::String], body).ok()?.pop()? {
            Token::String(reason) => Some(reason),
            _ => None,
        },
        PANIC_SELECTOR => match abi::decode(&[ParamType::Uint(256)], body).ok()?.pop()? {
            Token::Uint(code) => Some(format!("Panic(0x{code:x})")),
            _ => None,
        },
        other => CUSTOM_ERROR_NAMES.get(&other).map(|name| name.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("No trade found")]
    NoTradeFound,
    #[error("Error getting best trade - {0}")]
    Optimizer(String),
    #[error("Error getting converter amounts - {0}")]
    Converter(String),
    #[error("Price impact could not be reduced")]
    ImpactNotReduced { attempts: u32, last_impact: String },
}
