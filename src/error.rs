//! Top-level error type for the chitragupta core.
//!
//! Each subsystem defines its own error enum with miette diagnostics;
//! this wrapper preserves the full diagnostic chain (codes, help text,
//! sources) through to the embedder.

use miette::Diagnostic;
use thiserror::Error;

/// Any error the core can surface.
#[derive(Debug, Error, Diagnostic)]
pub enum ChitraguptaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Rta(#[from] crate::rta::RtaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] crate::smriti::store::StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] crate::smriti::embedding::EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Streams(#[from] crate::smriti::streams::StreamError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Route(#[from] crate::niyanta::RouteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tantra(#[from] crate::tantra::TantraError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Anveshi(#[from] crate::anveshi::AnveshiError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Paths(#[from] crate::paths::PathError),
}

/// Convenience alias for functions returning core results.
pub type ChitraguptaResult<T> = std::result::Result<T, ChitraguptaError>;
