//! Consumer adapters: each pairs a projection shape with an endpoint and
//! exposes published snapshots through a `watch` channel.

mod catalog;
mod chat;
mod product;

pub use catalog::{Catalog, CatalogAdapter, CatalogEntry};
pub use chat::{Author, ChatAdapter, ChatTurn, DEFAULT_PROMPT_MODIFIER, Transcript};
pub use product::{ProductDetail, ProductDetailAdapter, Section};

use tokio::sync::watch;
use tracing::info;

use crate::errors::StreamError;
use crate::session::{Phase, Projection, StreamSession, StreamView, reconcile};
use crate::transport::{StreamRequest, Transport};

/// Result of asking an adapter to load something.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetch<P> {
    /// A session ran to completion and produced this projection.
    Completed(P),
    /// No request was issued: an identical one is in flight or already loaded.
    Suppressed,
}

impl<P> Fetch<P> {
    /// Returns the projection if a session completed.
    pub fn completed(self) -> Option<P> {
        match self {
            Self::Completed(projection) => Some(projection),
            Self::Suppressed => None,
        }
    }
}

/// Opens `request` and reconciles it into `initial`, publishing to `view`.
///
/// The view is marked `Streaming` before the request is issued, so a
/// transport failure at any point leaves it `Streaming` with whatever partial
/// projection was published.
pub(crate) async fn run_session<P: Projection>(
    transport: &dyn Transport,
    request: StreamRequest,
    initial: P,
    view: &watch::Sender<StreamView<P>>,
) -> Result<P, StreamError> {
    let mut session = StreamSession::new(initial);
    view.send_modify(|v| {
        v.projection = session.projection().clone();
        v.phase = Phase::Streaming;
        v.session_id = Some(session.id());
    });
    info!(session_id = %session.id(), url = %request.url, "session opened");

    let bytes = match transport.open(request).await {
        Ok(bytes) => bytes,
        Err(err) => {
            session.fail(&err);
            return Err(err);
        }
    };
    reconcile(&mut session, bytes, view).await?;
    Ok(session.into_projection())
}

/// Marks `view` failed with a user-facing message.
pub(crate) fn publish_failure<P>(view: &watch::Sender<StreamView<P>>, err: &StreamError) {
    let message = err.to_string();
    view.send_modify(|v| v.phase = Phase::Failed(message));
}
