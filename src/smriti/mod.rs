//! Smriti: the memory layer.
//!
//! A bi-temporal knowledge graph ([`graph`]), embedded vector search
//! ([`embedding`], [`recall`], [`pagerank`]), the stigmergic trace field
//! ([`akasha`]), hierarchical consolidation search ([`consolidation`]),
//! Sinkhorn-Knopp budget compaction into four memory streams
//! ([`sinkhorn`], [`streams`]), and the SQLite persistence manager that
//! everything durable flows through ([`store`]).

pub mod akasha;
pub mod consolidation;
pub mod embedding;
pub mod graph;
pub mod pagerank;
pub mod recall;
pub mod sinkhorn;
pub mod store;
pub mod streams;
