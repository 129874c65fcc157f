//! Rate-limited access to the external document source.

mod client;

pub use client::{
    DocumentSource, HttpDocumentSource, RetryConfig, SourceClientConfig, SourceError, SourcePage,
    SourceQuery,
};
