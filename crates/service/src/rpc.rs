//! tarpc surface of the refresh flow.
//!
//! Every outcome, including server errors, travels inside
//! [`ExchangeResponse`]; transport errors only mean the call never ran.

use crate::coordinator::ExchangeCoordinator;
use futures::{StreamExt, future};
use refresh_flow_types::{ExchangeRequest, ExchangeResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio_util::sync::CancellationToken;

/// Largest frame accepted from a client.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[tarpc::service]
pub trait RefreshFlow {
    /// Exchanges a refresh token for a new set of tokens.
    async fn exchange(request: ExchangeRequest) -> ExchangeResponse;
}

/// Serves [`RefreshFlow`] by delegating to a shared coordinator.
#[derive(Clone)]
pub struct RefreshFlowServer {
    coordinator: Arc<ExchangeCoordinator>,
}

impl RefreshFlowServer {
    #[must_use]
    pub fn new(coordinator: Arc<ExchangeCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl RefreshFlow for RefreshFlowServer {
    async fn exchange(self, _: context::Context, request: ExchangeRequest) -> ExchangeResponse {
        self.coordinator.exchange(request).await
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Listens on `addr` with the JSON transport until `shutdown` fires.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound.
pub async fn serve(
    addr: SocketAddr,
    server: RefreshFlowServer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
    listener.config_mut().max_frame_length(MAX_FRAME_LEN);
    tracing::info!(addr = %listener.local_addr(), "refresh flow listening");

    let connections = listener
        .filter_map(|conn| {
            if let Err(e) = &conn {
                tracing::warn!(error = %e, "failed to accept connection");
            }
            future::ready(conn.ok())
        })
        .map(server::BaseChannel::with_defaults)
        .for_each_concurrent(None, |channel| {
            let server = server.clone();
            channel.execute(server.serve()).for_each(spawn)
        });

    tokio::select! {
        () = connections => tracing::warn!("listener closed"),
        () = shutdown.cancelled() => tracing::info!("refresh flow shutting down"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use refresh_flow_types::{
        ExchangeContext, ExchangeHandler, OAuthError, SessionKind, TokenResponse, traits::Result,
    };
    use secrecy::ExposeSecret;
    use tarpc::client;

    /// Accepts only the refresh token `tok-123`.
    struct Fixed;

    #[async_trait]
    impl ExchangeHandler for Fixed {
        async fn update_session(&self, ctx: &mut ExchangeContext) -> Result<()> {
            if ctx.refresh_token.expose_secret() == "tok-123" {
                Ok(())
            } else {
                Err(OAuthError::invalid_grant().into())
            }
        }

        async fn handle_access_request(
            &self,
            _ctx: &ExchangeContext,
            response: &mut TokenResponse,
        ) -> Result<()> {
            response.access_token = Some("at".into());
            response.expires_in = 60;
            Ok(())
        }
    }

    fn coordinator() -> Arc<ExchangeCoordinator> {
        Arc::new(ExchangeCoordinator::new(
            vec![Arc::new(Fixed)],
            SessionKind::Oidc,
            2,
        ))
    }

    fn client() -> RefreshFlowClient {
        let coordinator = coordinator();
        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        let server = server::BaseChannel::with_defaults(server_transport);
        tokio::spawn(
            server
                .execute(RefreshFlowServer::new(coordinator).serve())
                .for_each(spawn),
        );
        RefreshFlowClient::new(client::Config::default(), client_transport).spawn()
    }

    fn request(token: &str) -> ExchangeRequest {
        ExchangeRequest {
            refresh_token: token.into(),
            client_id: "client-1".into(),
            ..ExchangeRequest::default()
        }
    }

    #[tokio::test]
    async fn test_exchange_over_channel() {
        let client = client();
        let resp = client
            .exchange(context::current(), request("tok-123"))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.token.unwrap().access_token, "at");
    }

    #[tokio::test]
    async fn test_failure_is_a_response_not_a_fault() {
        let client = client();
        let resp = client
            .exchange(context::current(), request("tok-missing"))
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.failure.unwrap().error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_tcp_rejects_oversized_frame() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(
            addr,
            RefreshFlowServer::new(coordinator()),
            shutdown.clone(),
        ));

        let mut transport = None;
        for _ in 0..100 {
            if let Ok(t) = tarpc::serde_transport::tcp::connect(addr, Json::default).await {
                transport = Some(t);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let client =
            RefreshFlowClient::new(client::Config::default(), transport.unwrap()).spawn();

        let resp = client
            .exchange(context::current(), request("tok-123"))
            .await
            .unwrap();
        assert!(resp.success);

        let mut oversized = request("tok-123");
        oversized.scopes = vec!["s".repeat(MAX_FRAME_LEN)];
        assert!(
            client
                .exchange(context::current(), oversized)
                .await
                .is_err()
        );

        shutdown.cancel();
    }
}
