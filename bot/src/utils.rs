// bot/src/utils.rs

// --- Imports ---
use ethers::types::U256;
use eyre::{eyre, Result};
use uniswap_v3_math::full_math::mul_div;

lazy_static::lazy_static! {
    /// 2^96, the fixed-point scale of `sqrtPriceX96`.
    pub static ref Q96: U256 = U256::one() << 96;
}

// --- Price Calculation Helpers ---

/// Converts `amount` of the pool's input token at the mid price encoded by
/// `sqrt_price_x96`, ignoring fees and liquidity depth.
///
/// `zero_for_one` means the input is token0, so the price applied is
/// token1/token0 = (sqrtP / 2^96)^2. The two `mul_div` steps keep the
/// 512-bit intermediate exact.
pub fn quote_at_sqrt_price(amount: U256, sqrt_price_x96: U256, zero_for_one: bool) -> Result<U256> {
    if sqrt_price_x96.is_zero() {
        return Err(eyre!("sqrt_price_x96 cannot be zero"));
    }
    let q96 = *Q96;
    let step = |a: U256, b: U256, d: U256| mul_div(a, b, d).map_err(|e| eyre!("mul_div overflow: {e}"));
    if zero_for_one {
        let half = step(amount, sqrt_price_x96, q96)?;
        step(half, sqrt_price_x96, q96)
    } else {
        let half = step(amount, q96, sqrt_price_x96)?;
        step(half, q96, sqrt_price_x96)
    }
}
