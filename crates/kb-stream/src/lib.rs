//! Client-side engine for long-lived, chunked event-stream responses.
//!
//! Bytes are split into frames by [`decoder`], frames become typed
//! [`event::Event`]s, and a [`session::StreamSession`] folds them into a
//! projection, publishing a snapshot after every change. Three adapters
//! configure that pipeline for a chat transcript, a sectioned product
//! writeup, and a catalog list.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kb_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let config = ClientConfig::from_env()?;
//! let transport = Arc::new(HttpTransport::new(config.clone())?);
//! let mut chat = ChatAdapter::new(transport, &config);
//!
//! let mut updates = chat.subscribe();
//! tokio::spawn(async move {
//!     while updates.changed().await.is_ok() {
//!         let view = updates.borrow_and_update().clone();
//!         if let Some(reply) = view.projection.last_reply() {
//!             eprintln!("{} chars so far", reply.text.len());
//!         }
//!     }
//! });
//!
//! if let Some(reply) = chat.ask("What does the starter plan include?").await? {
//!     println!("{}", reply.text);
//! }
//! # Ok(())
//! # }
//! ```

/// Chat, product-detail and catalog adapters.
pub mod adapters;
/// Client configuration and endpoint layout.
pub mod config;
/// Frame splitting over arbitrary chunk boundaries.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Typed events and payload parsing.
pub mod event;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Stream sessions, merge hooks and snapshot publishing.
pub mod session;
/// Transport boundary and the HTTP implementation.
pub mod transport;

pub use adapters::{
    Author, Catalog, CatalogAdapter, CatalogEntry, ChatAdapter, ChatTurn, Fetch, ProductDetail,
    ProductDetailAdapter, Section, Transcript,
};
pub use config::ClientConfig;
pub use decoder::{EventFrame, FrameDecoder};
pub use errors::{ClientError, StreamError};
pub use event::{Event, Visualization, parse_event};
pub use observability::{LogSettings, LogSink, init_logging};
pub use session::{
    CloseReason, Merge, Outcome, Phase, Projection, SessionState, StreamSession, StreamView,
    reconcile,
};
pub use transport::{ByteStream, HttpTransport, Method, StreamRequest, Transport};
