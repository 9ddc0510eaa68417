//! Per-operation execution context.
//!
//! A [`Context`] carries the caller's tenant (populated upstream by request
//! authentication) and a cancellation token. Every store operation takes one;
//! reads and writes are filtered by its tenant, and cancelling its token aborts
//! connection waits and interrupts the in-flight statement.

use crate::ids::TenantId;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
    tenant: TenantId,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(tenant: TenantId, cancel: CancellationToken) -> Self {
        Self { tenant, cancel }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Same tenant, cancelled together with `self` but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            tenant: self.tenant,
            cancel: self.cancel.child_token(),
        }
    }

    /// Same tenant with an independent token.
    ///
    /// Used for bookkeeping that must still land after the caller gave up,
    /// such as flagging a run whose trajectory could not be written.
    pub fn detached(&self) -> Self {
        Self::new(self.tenant)
    }
}
