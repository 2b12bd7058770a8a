// bot/src/encoding.rs
// Packed V3 swap paths: token (20 bytes) followed by repeated
// fee (3 bytes) + token (20 bytes) hops.

use ethers::types::{Address, Bytes};
use thiserror::Error;

pub const ADDR_SIZE: usize = 20;
pub const FEE_SIZE: usize = 3;
pub const HOP_SIZE: usize = ADDR_SIZE + FEE_SIZE;
const MAX_FEE: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path needs one more token than fees, got {tokens} tokens and {fees} fees")]
    Shape { tokens: usize, fees: usize },
    #[error("fee tier {0} does not fit in uint24")]
    FeeOutOfRange(u32),
    #[error("invalid path length {0}")]
    InvalidLength(usize),
    #[error("InvalidSwapStart: expected {expected:?}, found {found:?}")]
    InvalidSwapStart { expected: Address, found: Address },
    #[error("InvalidSwapEnd: expected {expected:?}, found {found:?}")]
    InvalidSwapEnd { expected: Address, found: Address },
}

/// Packs `tokens[0], fees[0], tokens[1], ..., tokens[n]` the way the V3
/// router and quoter read it. `ethers::abi::encode_packed` pads `uint24` to a
/// full word, so the bytes are laid out by hand.
pub fn encode_path(tokens: &[Address], fees: &[u32]) -> Result<Bytes, PathError> {
    if tokens.len() < 2 || tokens.len() != fees.len() + 1 {
        return Err(PathError::Shape { tokens: tokens.len(), fees: fees.len() });
    }
    let mut packed = Vec::with_capacity(ADDR_SIZE + HOP_SIZE * fees.len());
    packed.extend_from_slice(tokens[0].as_bytes());
    for (fee, token) in fees.iter().zip(&tokens[1..]) {
        if *fee > MAX_FEE {
            return Err(PathError::FeeOutOfRange(*fee));
        }
        packed.extend_from_slice(&fee.to_be_bytes()[1..]);
        packed.extend_from_slice(token.as_bytes());
    }
    Ok(Bytes::from(packed))
}

/// Exact-output quotes walk the path backwards: output token first.
pub fn encode_reversed_path(tokens: &[Address], fees: &[u32]) -> Result<Bytes, PathError> {
    let tokens: Vec<Address> = tokens.iter().rev().copied().collect();
    let fees: Vec<u32> = fees.iter().rev().copied().collect();
    encode_path(&tokens, &fees)
}

/// Splits a packed path back into its tokens and fee tiers.
pub fn decode_path(path: &[u8]) -> Result<(Vec<Address>, Vec<u32>), PathError> {
    if path.len() < ADDR_SIZE + HOP_SIZE || (path.len() - ADDR_SIZE) % HOP_SIZE != 0 {
        return Err(PathError::InvalidLength(path.len()));
    }
    let hops = (path.len() - ADDR_SIZE) / HOP_SIZE;
    let mut tokens = Vec::with_capacity(hops + 1);
    let mut fees = Vec::with_capacity(hops);
    tokens.push(Address::from_slice(&path[..ADDR_SIZE]));
    for hop in 0..hops {
        let start = ADDR_SIZE + hop * HOP_SIZE;
        let fee = &path[start..start + FEE_SIZE];
        fees.push(u32::from_be_bytes([0, fee[0], fee[1], fee[2]]));
        tokens.push(Address::from_slice(&path[start + FEE_SIZE..start + HOP_SIZE]));
    }
    Ok((tokens, fees))
}

/// Mirrors the operator contract's path check so a bad route fails before
/// any gas is spent: the swap must start with the token received from the
/// converter and end with the token sent to it.
pub fn validate_path(
    path: &[u8],
    token_to_receive_from_converter: Address,
    token_to_send_to_converter: Address,
) -> Result<(), PathError> {
    let (tokens, _) = decode_path(path)?;
    let first = tokens[0];
    if first != token_to_receive_from_converter {
        return Err(PathError::InvalidSwapStart {
            expected: token_to_receive_from_converter,
            found: first,
        });
    }
    let last = tokens[tokens.len() - 1];
    if last != token_to_send_to_converter {
        return Err(PathError::InvalidSwapEnd { expected: token_to_send_to_converter, found: last });
    }
    Ok(())
}
