//! Production implementations of the engine's outbound collaborators.
pub mod casino_gateway;
pub mod commission;
pub mod telegram;

pub use casino_gateway::{CasinoApiError, CasinoGatewayClient};
pub use commission::LoggingCommission;
pub use telegram::{TelegramError, TelegramNotifier};
