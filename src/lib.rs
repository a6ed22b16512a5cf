//! # itq-lsh
//!
//! Approximate nearest-neighbor search with an Iterative Quantization
//! variant of locality-sensitive hashing.
//!
//! An [`ItqLsh`] index learns, per hash table, a PCA projection and an
//! orthogonal rotation that map vectors to short binary codes. Vectors
//! sharing a code land in the same bucket; queries probe the query's
//! bucket (optionally expanded by a Hamming radius) and rank the
//! candidates with a distance metric.
//!
//! Queries can run against an in-memory [`MemorySource`], a file-backed
//! [`FileSource`], or — for databases that exceed memory — against bucket
//! shard files written by [`ItqLsh::save_sharded`] and cached by a
//! [`ShardStore`].
pub mod code;
pub mod data;
pub mod dist;
mod error;
pub mod hamming;
mod index;
mod itq;
pub mod prelude;
pub mod source;
pub mod stats;
mod store;
pub mod topk;
pub mod utils;

mod test;

pub use crate::code::Code;
pub use crate::dist::Metric;
pub use crate::error::{Error, Result};
pub use crate::index::{ItqLsh, Params};
pub use crate::itq::ItqHash;
pub use crate::source::{FileSource, MemorySource, VectorSource};
pub use crate::stats::Stat;
pub use crate::store::ShardStore;
pub use crate::topk::{recall, Neighbour, Scanner, TopK};
