// bot/src/bindings.rs
#![allow(clippy::all)]
use ethers::prelude::abigen;

abigen!(
    IERC20,
    r#"[
        event Approval(address indexed owner, address indexed spender, uint256 value)
        event Transfer(address indexed from, address indexed to, uint256 value)
        function approve(address spender, uint256 amount) external returns (bool)
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
        function allowance(address owner, address spender) external view returns (uint256)
    ]"#,
    event_derives(serde::Deserialize, serde::Serialize)
);

abigen!(
    TokenConverter,
    r#"[
        function getUpdatedAmountIn(uint256 amountOutMantissa, address tokenAddressIn, address tokenAddressOut) external returns (uint256 amountOutMantissa, uint256 amountInMantissa)
    ]"#
);

abigen!(
    TokenConverterOperator,
    r#"[
        struct ConversionParameters { address beneficiary; address tokenToReceiveFromConverter; uint256 amount; int256 minIncome; address tokenToSendToConverter; address converter; bytes path; uint256 deadline; }
        function convert(ConversionParameters calldata params) external
    ]"#
);

abigen!(
    VToken,
    r#"[
        function accrueInterest() external returns (uint256)
        function totalReserves() external view returns (uint256)
        function getCash() external view returns (uint256)
        function reduceReserves(uint256 reduceAmount) external returns (uint256)
        function underlying() external view returns (address)
    ]"#
);

abigen!(
    Comptroller,
    r#"[
        function getAllMarkets() external view returns (address[])
    ]"#
);

abigen!(
    PoolRegistry,
    r#"[
        struct VenusPool { string name; address creator; address comptroller; uint256 blockPosted; uint256 timestampPosted; }
        function getAllPools() external view returns (VenusPool[])
    ]"#
);

abigen!(
    ProtocolShareReserve,
    r#"[
        function releaseFunds(address comptroller, address[] assets) external
    ]"#
);

abigen!(
    QuoterV2,
    r#"[
        function quoteExactInput(bytes path, uint256 amountIn) external returns (uint256 amountOut, uint160[] sqrtPriceX96AfterList, uint32[] initializedTicksCrossedList, uint256 gasEstimate)
        function quoteExactOutput(bytes path, uint256 amountOut) external returns (uint256 amountIn, uint160[] sqrtPriceX96AfterList, uint32[] initializedTicksCrossedList, uint256 gasEstimate)
    ]"#
);

abigen!(
    IUniswapV3Factory,
    r#"[
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool)
    ]"#
);

abigen!(
    UniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function token0() external view returns (address)
    ]"#
);

// END OF FILE: bot/src/bindings.rs
