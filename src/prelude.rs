//! Re-export of the public api of itq-lsh.
pub use crate::{
    code::Code,
    dist::Metric,
    error::{Error, Result},
    hamming,
    index::{ItqLsh, Params},
    itq::ItqHash,
    source::{FileSource, MemorySource, VectorSource},
    stats::Stat,
    store::ShardStore,
    topk::{recall, Neighbour, Scanner, TopK},
};
