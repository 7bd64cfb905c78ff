//! Event enrichment
//!
//! Attaches the results of named lookups (user profiles, IP geolocation,
//! account tier, ...) to an event. Lookup providers are supplied by the
//! host application through the [`LookupProvider`] interface; the core
//! implements none of them.
//!
//! An enrichment spec maps target field paths to registered lookup names:
//!
//! ```json
//! {"data.user_profile": "user_profile", "metadata.geo": "ip_geo"}
//! ```

use crate::event::Event;
use crate::transform::assign_field;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Enrichment error types.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// No provider registered under the requested name
    #[error("Unknown lookup provider: {0}")]
    UnknownProvider(String),

    /// Provider failed to produce a value
    #[error("Lookup {name:?} failed: {reason}")]
    LookupFailed {
        /// The provider name
        name: String,
        /// Provider diagnostic
        reason: String,
    },

    /// Enrichment spec entry was not a lookup name
    #[error("Invalid enrichment spec for {0:?}: expected a lookup name string")]
    InvalidSpec(String),
}

/// A named lookup supplied by the host application.
#[async_trait]
pub trait LookupProvider: Send + Sync {
    /// Produce the enrichment value for an event.
    async fn lookup(&self, event: &Event) -> Result<Value, EnrichError>;
}

/// Applies named lookups to events.
///
/// Providers are registered once at startup and shared across concurrent
/// enrichments.
pub struct EnrichmentEngine {
    providers: RwLock<HashMap<String, Arc<dyn LookupProvider>>>,
}

impl EnrichmentEngine {
    /// Create an engine with no providers.
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a lookup provider under a name, replacing any previous one.
    pub async fn register(&self, name: impl Into<String>, provider: Arc<dyn LookupProvider>) {
        let name = name.into();
        debug!(provider = %name, "Registering lookup provider");
        self.providers.write().await.insert(name, provider);
    }

    /// Apply an enrichment spec, returning the enriched copy.
    ///
    /// The source event is never mutated. Lookups run sequentially in spec
    /// order; the first failure aborts the enrichment.
    pub async fn enrich(
        &self,
        event: &Event,
        spec: &Map<String, Value>,
    ) -> Result<Event, EnrichError> {
        let mut out = event.clone();
        for (target, lookup) in spec {
            let name = lookup
                .as_str()
                .ok_or_else(|| EnrichError::InvalidSpec(target.clone()))?;
            let provider = {
                let providers = self.providers.read().await;
                providers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EnrichError::UnknownProvider(name.to_string()))?
            };
            let value = provider.lookup(event).await?;
            assign_field(&mut out, target, value);
        }
        Ok(out)
    }
}

impl Default for EnrichmentEngine {
    fn default() -> Self {
        Self::new()
    }
}
