//! Core types and traits for the refresh-flow workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! refresh-token grant service: the error taxonomy, the refresh-token session
//! model, the exchange wire types, the bounded worker pool, and the async
//! traits that the store and the service layers implement.

pub mod error;
pub mod exchange;
pub mod pool;
pub mod session;
pub mod traits;

pub use error::{OAuthError, RefreshError};
pub use exchange::{
    ExchangeContext, ExchangeRequest, ExchangeResponse, Failure, TokenPayload, TokenResponse,
};
pub use pool::WorkerPool;
pub use session::{Claims, OAuthSession, OidcSession, RefreshTokenSession, Session, SessionKind};
pub use traits::{
    AccessTokenStore, ExchangeHandler, RefreshTokenStore, RefreshTokenStrategy, TokenSigner,
};
