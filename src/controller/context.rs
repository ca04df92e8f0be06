use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::backoff::RetryTimings;
use super::store::ServiceStore;
use crate::cloud::LoadBalancerApi;

/// Collaborators shared by every reconcile pass
#[derive(Clone)]
pub struct Engine {
    pub cloud: Arc<dyn LoadBalancerApi>,
    pub store: Arc<dyn ServiceStore>,
    pub timings: RetryTimings,
    /// Cancelled on shutdown; every backoff honours it
    pub cancel: CancellationToken,
}

impl Engine {
    pub fn new(cloud: Arc<dyn LoadBalancerApi>, store: Arc<dyn ServiceStore>) -> Self {
        Self {
            cloud,
            store,
            timings: RetryTimings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timings(mut self, timings: RetryTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Copy of this engine whose token is cancelled together with the parent
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }
}
