// bot/src/lib.rs
// Library interface shared by the binary and integration tests.

pub mod allowance;
pub mod bindings;
pub mod config;
pub mod discovery;
pub mod encoding;
pub mod errors;
pub mod events;
pub mod executor;
pub mod fraction;
pub mod gas;
pub mod gateway;
pub mod index;
pub mod keeper;
pub mod maintenance;
pub mod negotiator;
pub mod path_optimizer;
pub mod state;
pub mod status;
pub mod transaction;
pub mod utils;

// Public types re-exported for convenience
pub use config::{load_config, Config};
pub use errors::{ChainError, NegotiationError};
pub use events::{Event, EventContext, EventError, EventKind, EventSink};
pub use fraction::Fraction;
pub use gateway::{ChainGateway, EthersGateway};
pub use index::{ConfigIndex, ConfigQuery, ConversionFilter, SubgraphIndex};
pub use keeper::{CycleReport, Keeper};
pub use path_optimizer::{QuoterRouter, RouteOptimizer, TradeType};
pub use state::{ArbitrageOrder, BalanceResult, ConversionConfig, TradeRoute};
pub use status::RunStatus;
pub use transaction::NonceManager;
