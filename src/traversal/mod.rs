//! STUN/TURN traversal configuration
//!
//! Resolves the ICE server list used when building peer transports. The
//! configured source can fail or return nothing; the provider always falls
//! back to a pair of default public STUN servers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default public STUN servers, always prepended to the fetched set
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// A STUN or TURN server descriptor handed to the peer transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceDescriptor {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceDescriptor {
    /// A plain STUN descriptor with no credentials
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// A row in the traversal configuration source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalRow {
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
    pub is_active: bool,
}

/// Errors from the traversal configuration source
#[derive(Error, Debug)]
pub enum TraversalError {
    #[error("Traversal config fetch failed: {0}")]
    FetchFailed(String),
}

/// External source of STUN/TURN configuration rows
#[async_trait]
pub trait TraversalConfigSource: Send + Sync {
    /// All configured rows; inactive rows are filtered by the provider
    async fn rows(&self) -> Result<Vec<TraversalRow>, TraversalError>;
}

/// A source with no rows, for hosts that rely on the default STUN set
pub struct StaticTraversalSource {
    rows: Vec<TraversalRow>,
}

impl StaticTraversalSource {
    pub fn new(rows: Vec<TraversalRow>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }
}

#[async_trait]
impl TraversalConfigSource for StaticTraversalSource {
    async fn rows(&self) -> Result<Vec<TraversalRow>, TraversalError> {
        Ok(self.rows.clone())
    }
}

/// Resolves and caches the ICE server list for one session
///
/// `fetch` never fails: a source error is logged and the default STUN
/// descriptors are returned alone. The result is cached for the lifetime of
/// the provider (one per join, not one per connection).
pub struct TraversalConfigProvider {
    source: std::sync::Arc<dyn TraversalConfigSource>,
    cached: Mutex<Option<Vec<IceDescriptor>>>,
}

impl TraversalConfigProvider {
    pub fn new(source: std::sync::Arc<dyn TraversalConfigSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }

    /// The ordered ICE server list: defaults first, then active source rows
    pub async fn fetch(&self) -> Vec<IceDescriptor> {
        let mut cached = self.cached.lock().await;
        if let Some(ref descriptors) = *cached {
            return descriptors.clone();
        }

        let mut descriptors: Vec<IceDescriptor> = DEFAULT_STUN_SERVERS
            .iter()
            .map(|url| IceDescriptor::stun(url))
            .collect();

        match self.source.rows().await {
            Ok(rows) => {
                for row in rows.into_iter().filter(|r| r.is_active) {
                    descriptors.push(IceDescriptor {
                        urls: vec![row.url],
                        username: row.username,
                        credential: row.credential,
                    });
                }
                debug!("Resolved {} ICE descriptors", descriptors.len());
            }
            Err(e) => {
                warn!("Traversal config fetch failed, using defaults: {}", e);
            }
        }

        *cached = Some(descriptors.clone());
        descriptors
    }
}
