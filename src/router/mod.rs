//! Router Layer
//!
//! Responsibilities:
//! - Retry policy: rebuild the route and dial again on retryable errors
//! - Deadline for each whole attempt
//!
//! Hop traversal itself lives in [`Route`]; the router never retries inside
//! a route.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bind::Binding;
use crate::chain::{Chain, Conn, Route};
use crate::common::{Network, Result};
use crate::error::Error;
use crate::udp::ListenerConfig;

/// Default deadline of one dial attempt
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Extra attempts after the first one
    pub retries: usize,
    /// Deadline per attempt
    pub timeout: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout: Some(DEFAULT_DIAL_TIMEOUT),
        }
    }
}

/// Dials through an optional chain; no chain means direct.
#[derive(Debug, Clone, Default)]
pub struct Router {
    chain: Option<Arc<Chain>>,
    options: RouterOptions,
}

impl Router {
    pub fn new(chain: Option<Arc<Chain>>, options: RouterOptions) -> Self {
        Self { chain, options }
    }

    pub fn chain(&self) -> Option<&Arc<Chain>> {
        self.chain.as_ref()
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    fn route(&self) -> Result<Route> {
        match &self.chain {
            Some(chain) => chain.route(),
            None => Ok(Route::direct()),
        }
    }

    pub async fn dial(&self, network: Network, address: &str) -> Result<Conn> {
        self.retry("dial", network, address, |route| async move {
            route.dial(network, address).await
        })
        .await
    }

    pub async fn bind(&self, network: Network, address: &str, config: &ListenerConfig) -> Result<Binding> {
        self.retry("bind", network, address, |route| async move {
            route.bind(network, address, config).await
        })
        .await
    }

    async fn retry<T, F, Fut>(&self, op: &str, network: Network, address: &str, attempt: F) -> Result<T>
    where
        F: Fn(Route) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.options.retries + 1;
        let mut n = 1;
        loop {
            let route = self.route()?;
            debug!("router: {} {} {} via {} hop(s)", op, network, address, route.len());

            let result = match self.options.timeout {
                Some(timeout) => tokio::time::timeout(timeout, attempt(route))
                    .await
                    .map_err(Error::from)
                    .and_then(|r| r),
                None => attempt(route).await,
            };

            match result {
                Err(e) if e.is_retryable() && n < attempts => {
                    warn!("router: {} {} {} failed ({}/{}): {}", op, network, address, n, attempts, e);
                    n += 1;
                }
                result => return result,
            }
        }
    }
}
