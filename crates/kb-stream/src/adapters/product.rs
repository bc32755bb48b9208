use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{Fetch, publish_failure, run_session};
use crate::config::ClientConfig;
use crate::errors::{ClientError, StreamError};
use crate::session::{Merge, Projection, StreamView};
use crate::transport::{StreamRequest, Transport};

/// The four named sections of a product writeup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    Overview,
    Features,
    Benefits,
    Pricing,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Overview,
        Section::Features,
        Section::Benefits,
        Section::Pricing,
    ];

    /// Wire key of the section.
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Overview => "overview",
            Section::Features => "features",
            Section::Benefits => "benefits",
            Section::Pricing => "pricing",
        }
    }

    /// Looks up a wire key; unknown keys yield `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == key)
    }
}

/// Product writeup. The four sections grow independently.
///
/// Also the cache-snapshot shape: a typeless object must carry all four
/// sections to replace the projection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub overview: String,
    pub features: String,
    pub benefits: String,
    pub pricing: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ProductDetail {
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Overview => &self.overview,
            Section::Features => &self.features,
            Section::Benefits => &self.benefits,
            Section::Pricing => &self.pricing,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut String {
        match section {
            Section::Overview => &mut self.overview,
            Section::Features => &mut self.features,
            Section::Benefits => &mut self.benefits,
            Section::Pricing => &mut self.pricing,
        }
    }
}

impl Projection for ProductDetail {
    type Snapshot = ProductDetail;

    fn append_section(&mut self, section: &str, text: &str) -> Merge {
        match Section::from_key(section) {
            Some(section) => {
                self.section_mut(section).push_str(text);
                Merge::Applied
            }
            None => Merge::ignored(format!("unknown section `{section}`")),
        }
    }

    fn replace_sources(&mut self, sources: Vec<String>) -> Merge {
        self.sources = sources;
        Merge::Applied
    }

    fn reset(&mut self) -> Merge {
        for section in Section::ALL {
            self.section_mut(section).clear();
        }
        Merge::Applied
    }

    fn replace(&mut self, snapshot: ProductDetail) {
        *self = snapshot;
    }
}

/// Held for the duration of one load. On drop, whether the load finished or
/// was cancelled, releases the product's view if nobody subscribes to it and
/// then clears the in-flight mark.
struct InFlight<'a> {
    adapter: &'a ProductDetailAdapter,
    product: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.adapter
            .views
            .remove_if(&self.product, |_, view| view.receiver_count() == 0);
        self.adapter.in_flight.remove(&self.product);
    }
}

/// Product-detail adapter. Loads for different products may run concurrently;
/// a second load for a product already in flight is suppressed.
///
/// A product's view exists while a load for it runs or a receiver from
/// [`subscribe`](Self::subscribe) is alive; subscribe before loading to
/// observe the final phase.
pub struct ProductDetailAdapter {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    in_flight: DashSet<String>,
    views: DashMap<String, Arc<watch::Sender<StreamView<ProductDetail>>>>,
}

impl ProductDetailAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            config: config.clone(),
            in_flight: DashSet::new(),
            views: DashMap::new(),
        }
    }

    /// Receives snapshots for `product`.
    pub fn subscribe(&self, product: &str) -> watch::Receiver<StreamView<ProductDetail>> {
        self.view(product).subscribe()
    }

    /// True while a load for `product` is running.
    pub fn is_loading(&self, product: &str) -> bool {
        self.in_flight.contains(product)
    }

    fn view(&self, product: &str) -> Arc<watch::Sender<StreamView<ProductDetail>>> {
        self.views
            .entry(product.to_string())
            .or_insert_with(|| Arc::new(watch::channel(StreamView::default()).0))
            .clone()
    }

    /// Streams the writeup for `product`.
    ///
    /// On failure the view switches to `Failed` with the error message.
    pub async fn load(&self, product: &str) -> Result<Fetch<ProductDetail>, ClientError> {
        let product = product.trim();
        if product.is_empty() {
            return Err(ClientError::Validation("product name must not be empty".into()));
        }
        let request = StreamRequest::get(self.config.product_url(product)?);
        if !self.in_flight.insert(product.to_string()) {
            debug!(product, "load already in flight; suppressed");
            return Ok(Fetch::Suppressed);
        }
        let _latch = InFlight {
            adapter: self,
            product: product.to_string(),
        };

        let view = self.view(product);
        match run_session(
            self.transport.as_ref(),
            request,
            ProductDetail::default(),
            &view,
        )
        .await
        {
            Ok(detail) => Ok(Fetch::Completed(detail)),
            Err(err) => Err(self.fail(product, &view, err)),
        }
    }

    fn fail(
        &self,
        product: &str,
        view: &watch::Sender<StreamView<ProductDetail>>,
        err: StreamError,
    ) -> ClientError {
        warn!(product, error = %err, "product detail stream failed");
        publish_failure(view, &err);
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use crate::transport::testing::ScriptedTransport;

    fn adapter(transport: ScriptedTransport) -> (ProductDetailAdapter, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let adapter = ProductDetailAdapter::new(transport.clone(), &ClientConfig::default());
        (adapter, transport)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn view_is_released_once_unwatched() {
        let (adapter, _) = adapter(
            ScriptedTransport::default()
                .with_chunks(&["data: {\"type\":\"stop\"}\n\n"])
                .with_chunks(&["data: {\"type\":\"stop\"}\n\n"])
                .with_chunks(&["data: {\"type\":\"stop\"}\n\n"]),
        );
        adapter.load("lamp").await.expect("load");
        assert!(adapter.views.is_empty());

        let updates = adapter.subscribe("desk");
        adapter.load("desk").await.expect("load");
        assert_eq!(adapter.views.len(), 1);
        assert_eq!(updates.borrow().phase, Phase::Complete);

        drop(updates);
        adapter.load("lamp").await.expect("load");
        assert_eq!(adapter.views.len(), 1);
        assert!(adapter.views.contains_key("desk"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sections_grow_independently() {
        let (adapter, transport) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\"A smart \"}\n\n",
            "data: {\"type\":\"content\",\"section\":\"features\",\"content\":\"Dimmable\"}\n\n",
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\"lamp\"}\n\n",
            "data: {\"type\":\"stop\"}\n\n",
        ]));
        let updates = adapter.subscribe("Smart Lamp");
        let detail = adapter
            .load("Smart Lamp")
            .await
            .expect("load")
            .completed()
            .expect("completed");
        assert_eq!(detail.overview, "A smart lamp");
        assert_eq!(detail.features, "Dimmable");
        assert_eq!(detail.section(Section::Benefits), "");
        assert_eq!(detail.section(Section::Pricing), "");
        assert_eq!(
            transport.recorded()[0].url,
            "http://localhost:5000/product-details/Smart%20Lamp"
        );
        assert!(!adapter.is_loading("Smart Lamp"));
        assert_eq!(updates.borrow().phase, Phase::Complete);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_section_and_plain_content_are_ignored() {
        let (adapter, _) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"type\":\"content\",\"section\":\"warranty\",\"content\":\"x\"}\n\n",
            "data: {\"type\":\"content\",\"content\":\"y\"}\n\n",
            "data: {\"type\":\"content\",\"section\":\"pricing\",\"content\":\"$5\"}\n\n",
            "data: {\"type\":\"stop\"}\n\n",
        ]));
        let detail = adapter.load("lamp").await.expect("load").completed().expect("done");
        assert_eq!(
            detail,
            ProductDetail {
                pricing: "$5".into(),
                ..ProductDetail::default()
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cache_snapshot_short_circuits_growth() {
        let (adapter, _) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"overview\":\"o\",\"features\":\"f\",\"benefits\":\"b\",\"pricing\":\"p\"}\n\n",
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\" more\"}\n\n",
        ]));
        let detail = adapter.load("lamp").await.expect("load").completed().expect("done");
        assert_eq!(detail.overview, "o");
        assert_eq!(detail.pricing, "p");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn initial_event_resets_sections_but_keeps_sources() {
        let (adapter, _) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\"stale\"}\n\n",
            "data: {\"type\":\"metadata\",\"sources\":[\"https://kb/lamp\"]}\n\n",
            "data: {\"type\":\"initial\"}\n\n",
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\"fresh\"}\n\n",
            "data: {\"type\":\"stop\"}\n\n",
        ]));
        let detail = adapter.load("lamp").await.expect("load").completed().expect("done");
        assert_eq!(detail.overview, "fresh");
        assert_eq!(detail.sources, vec!["https://kb/lamp".to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_load_while_in_flight_is_suppressed() {
        let (adapter, transport) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"type\":\"stop\"}\n\n",
        ]));
        adapter.in_flight.insert("lamp".to_string());
        assert_eq!(adapter.load("lamp").await.expect("load"), Fetch::Suppressed);
        assert!(transport.recorded().is_empty());

        adapter.in_flight.remove("lamp");
        assert!(matches!(
            adapter.load("lamp").await.expect("load"),
            Fetch::Completed(_)
        ));
        assert_eq!(transport.recorded().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_loads_for_same_product_issue_one_request() {
        let (adapter, transport) = adapter(ScriptedTransport::default().with_chunks(&[
            "data: {\"type\":\"content\",\"section\":\"overview\",\"content\":\"x\"}\n\ndata: {\"type\":\"stop\"}\n\n",
        ]));
        let (first, second) = tokio::join!(adapter.load("lamp"), adapter.load("lamp"));
        let outcomes = [first.expect("first"), second.expect("second")];
        assert_eq!(
            outcomes.iter().filter(|o| **o == Fetch::Suppressed).count(),
            1
        );
        assert_eq!(transport.recorded().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn transport_failure_publishes_error_and_releases_latch() {
        let (adapter, _) = adapter(ScriptedTransport::default().with_script(Err(
            StreamError::transport("/product-details/lamp", "status 500", Some(500)),
        )));
        let updates = adapter.subscribe("lamp");
        let err = adapter.load("lamp").await.expect_err("should fail");
        assert!(matches!(err, ClientError::Stream(StreamError::Transport { .. })));
        let phase = updates.borrow().phase.clone();
        assert!(matches!(phase, Phase::Failed(msg) if msg.contains("status 500")));
        assert!(!adapter.is_loading("lamp"));
    }
}
