//! Refresh-token grant service.
//!
//! [`ExchangeCoordinator`] runs each request through an ordered list of
//! [`ExchangeHandler`](refresh_flow_types::ExchangeHandler)s; the reference
//! handlers, token strategies and the tarpc surface live alongside it.

pub mod coordinator;
pub mod handlers;
pub mod rpc;
pub mod strategy;

pub use coordinator::{DEFAULT_CONCURRENCY, ExchangeCoordinator, ExchangeState};
pub use handlers::{OAuthRefreshHandler, OidcRefreshHandler};
pub use rpc::{MAX_FRAME_LEN, RefreshFlow, RefreshFlowClient, RefreshFlowServer, serve};
pub use strategy::{HmacRefreshTokenStrategy, Hs256Signer};
