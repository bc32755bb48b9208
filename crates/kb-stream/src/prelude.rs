//! Common imports for typical adapter usage.
pub use crate::{
    Author, Catalog, CatalogAdapter, CatalogEntry, ChatAdapter, ChatTurn, ClientConfig,
    ClientError, Fetch, HttpTransport, Phase, ProductDetail, ProductDetailAdapter, Section,
    StreamError, StreamView, Transcript, Transport,
};
