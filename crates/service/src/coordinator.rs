//! Two-phase exchange pipeline with per-call cancellation and error mapping.
//!
//! Every call runs every handler's `update_session` in list order, then every
//! handler's `handle_access_request` in list order. The first failure ends
//! the run; nothing already done is rolled back. Whatever happens, the caller
//! receives exactly one [`ExchangeResponse`].

use refresh_flow_types::{
    ExchangeContext, ExchangeHandler, ExchangeRequest, ExchangeResponse, OAuthError, RefreshError,
    SessionKind, TokenPayload, TokenResponse, WorkerPool, traits::Result,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default number of exchanges running at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Received,
    RunningUpdatePhase,
    RunningIssuancePhase,
    Completed { success: bool },
}

/// Sends the single response of a run.
///
/// Dropped without [`complete`](Self::complete) (a panic or an abandoned run),
/// it answers with a generic `server_error`.
struct Completion {
    tx: Option<oneshot::Sender<ExchangeResponse>>,
}

impl Completion {
    fn new(tx: oneshot::Sender<ExchangeResponse>) -> Self {
        Self { tx: Some(tx) }
    }

    fn complete(mut self, response: ExchangeResponse) {
        if let Some(tx) = self.tx.take() {
            // The caller may have gone away; nothing left to tell.
            let _ = tx.send(response);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::error!("exchange ended without a response");
            let _ = tx.send(ExchangeResponse::failure(&OAuthError::server_error()));
        }
    }
}

/// Runs exchange requests through an ordered list of handlers.
pub struct ExchangeCoordinator {
    handlers: Arc<[Arc<dyn ExchangeHandler>]>,
    session_kind: SessionKind,
    pool: WorkerPool,
}

impl ExchangeCoordinator {
    /// Creates a coordinator with its own pool of `concurrency` workers.
    #[must_use]
    pub fn new(
        handlers: Vec<Arc<dyn ExchangeHandler>>,
        session_kind: SessionKind,
        concurrency: usize,
    ) -> Self {
        Self::with_pool(
            handlers,
            session_kind,
            WorkerPool::new("exchange", concurrency),
        )
    }

    #[must_use]
    pub fn with_pool(
        handlers: Vec<Arc<dyn ExchangeHandler>>,
        session_kind: SessionKind,
        pool: WorkerPool,
    ) -> Self {
        Self {
            handlers: handlers.into(),
            session_kind,
            pool,
        }
    }

    #[must_use]
    pub fn session_kind(&self) -> SessionKind {
        self.session_kind
    }

    pub async fn exchange(&self, request: ExchangeRequest) -> ExchangeResponse {
        self.exchange_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Runs one exchange; cancelling `cancel` or dropping the returned future
    /// stops the run at its next suspension point.
    pub async fn exchange_with_cancellation(
        &self,
        request: ExchangeRequest,
        cancel: CancellationToken,
    ) -> ExchangeResponse {
        let ctx = ExchangeContext::new(request, self.session_kind);
        let span = tracing::info_span!(
            "exchange",
            request_id = %ctx.request_id,
            client_id = %ctx.client_id,
        );

        let scope = cancel.child_token();
        let _abandon = scope.clone().drop_guard();
        let (tx, rx) = oneshot::channel();
        let completion = Completion::new(tx);
        let handlers = Arc::clone(&self.handlers);

        self.pool
            .spawn(run(handlers, ctx, scope, completion).instrument(span));

        rx.await.unwrap_or_else(|_| {
            tracing::error!("exchange run vanished");
            ExchangeResponse::failure(&OAuthError::server_error())
        })
    }
}

fn advance(state: &mut ExchangeState, next: ExchangeState) {
    tracing::debug!(from = ?state, to = ?next, "exchange state");
    *state = next;
}

async fn run(
    handlers: Arc<[Arc<dyn ExchangeHandler>]>,
    mut ctx: ExchangeContext,
    scope: CancellationToken,
    completion: Completion,
) {
    let mut state = ExchangeState::Received;
    tracing::debug!(?state, "exchange received");

    let outcome = tokio::select! {
        biased;
        () = scope.cancelled() => Err(RefreshError::Cancelled),
        result = phases(&handlers, &mut ctx, &mut state) => result,
    };

    let response = match outcome {
        Ok(payload) => {
            advance(&mut state, ExchangeState::Completed { success: true });
            tracing::info!("exchange succeeded");
            ExchangeResponse::success(payload)
        }
        Err(e) => {
            scope.cancel();
            advance(&mut state, ExchangeState::Completed { success: false });
            let oauth = match e {
                RefreshError::OAuth(oauth) => {
                    tracing::info!(error = oauth.code(), "exchange rejected");
                    oauth
                }
                other => {
                    tracing::error!(error = %other, "exchange failed");
                    OAuthError::server_error()
                }
            };
            ExchangeResponse::failure(&oauth)
        }
    };
    completion.complete(response);
}

async fn phases(
    handlers: &[Arc<dyn ExchangeHandler>],
    ctx: &mut ExchangeContext,
    state: &mut ExchangeState,
) -> Result<TokenPayload> {
    advance(state, ExchangeState::RunningUpdatePhase);
    for handler in handlers {
        handler.update_session(ctx).await?;
    }

    advance(state, ExchangeState::RunningIssuancePhase);
    let mut response = TokenResponse::default();
    for handler in handlers {
        handler.handle_access_request(ctx, &mut response).await?;
    }

    Ok(response.into_payload()?)
}
