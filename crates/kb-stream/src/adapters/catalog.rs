use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{Fetch, publish_failure, run_session};
use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::session::{Merge, Phase, Projection, StreamView};
use crate::transport::{StreamRequest, Transport};

/// One catalog item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub icon: String,
}

/// Ordered catalog list. Each content event carries one whole entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cached full list.
#[derive(Deserialize)]
pub struct CachedCatalog {
    #[serde(alias = "products", alias = "items")]
    entries: Vec<CatalogEntry>,
}

impl Projection for Catalog {
    type Snapshot = CachedCatalog;

    fn append_text(&mut self, text: &str) -> Merge {
        match serde_json::from_str::<CatalogEntry>(text) {
            Ok(entry) => {
                self.entries.push(entry);
                Merge::Applied
            }
            Err(e) => Merge::ignored(format!("content is not a catalog entry: {e}")),
        }
    }

    fn reset(&mut self) -> Merge {
        self.entries.clear();
        Merge::Applied
    }

    fn replace(&mut self, snapshot: CachedCatalog) {
        self.entries = snapshot.entries;
    }
}

/// Catalog adapter parameterized by how many entries to request.
pub struct CatalogAdapter {
    transport: Arc<dyn Transport>,
    endpoint: String,
    cardinality: Option<usize>,
    view: watch::Sender<StreamView<Catalog>>,
}

impl CatalogAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            endpoint: config.catalog_url(),
            cardinality: None,
            view: watch::channel(StreamView::default()).0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamView<Catalog>> {
        self.view.subscribe()
    }

    /// Latest published list.
    pub fn catalog(&self) -> Catalog {
        self.view.borrow().projection.clone()
    }

    /// Cardinality of the latest request, including one that failed; this is
    /// what [`reload`](Self::reload) re-issues.
    pub fn cardinality(&self) -> Option<usize> {
        self.cardinality
    }

    /// Loads `cardinality` entries.
    ///
    /// Asking again for the cardinality already loaded is suppressed. A
    /// different cardinality discards the current list and issues a fresh
    /// request.
    pub async fn load(&mut self, cardinality: usize) -> Result<Fetch<Catalog>, ClientError> {
        if cardinality == 0 {
            return Err(ClientError::Validation(
                "cardinality must be greater than 0".into(),
            ));
        }
        if self.cardinality == Some(cardinality) && self.view.borrow().phase == Phase::Complete {
            debug!(cardinality, "catalog already loaded; suppressed");
            return Ok(Fetch::Suppressed);
        }
        self.fetch(cardinality).await
    }

    /// Discards the current list and re-issues the request with the current
    /// cardinality.
    pub async fn reload(&mut self) -> Result<Fetch<Catalog>, ClientError> {
        let Some(cardinality) = self.cardinality else {
            return Err(ClientError::Validation("no catalog loaded yet".into()));
        };
        self.fetch(cardinality).await
    }

    async fn fetch(&mut self, cardinality: usize) -> Result<Fetch<Catalog>, ClientError> {
        self.cardinality = Some(cardinality);
        self.view.send_replace(StreamView::default());

        let request = StreamRequest::get(self.endpoint.clone()).query("count", cardinality);
        match run_session(self.transport.as_ref(), request, Catalog::default(), &self.view).await
        {
            Ok(catalog) => {
                if catalog.len() != cardinality {
                    debug!(cardinality, received = catalog.len(), "catalog size differs from request");
                }
                Ok(Fetch::Completed(catalog))
            }
            Err(err) => {
                warn!(cardinality, error = %err, "catalog stream failed");
                publish_failure(&self.view, &err);
                Err(err.into())
            }
        }
    }
}
