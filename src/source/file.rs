//! File-backed vector source split over fixed-size binary shards.
use crate::data::Numeric;
use crate::source::meta::{self, Sidecar};
use crate::source::VectorSource;
use crate::{Error, Result};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;

/// Vectors stored as raw little-endian scalars across `data_<i>.bin`
/// shards of `batch` vectors each, described by a `data.meta` sidecar.
///
/// Open shard handles are cached for the lifetime of the source. Seeking
/// a shared handle makes the type unsuited to concurrent access, so it is
/// deliberately not `Sync`; give each query thread its own source.
#[derive(Debug)]
pub struct FileSource<N> {
    dim: usize,
    size: usize,
    batch: usize,
    shards: RefCell<Vec<File>>,
    _element: PhantomData<N>,
}

impl<N: Numeric> FileSource<N> {
    /// Open the dataset in `dir`, reading `dir/data.meta` for its shape.
    pub fn open(dir: &Path) -> Result<FileSource<N>> {
        let meta = Sidecar::load(&dir.join("data.meta"))?;
        let dim = meta.get_usize(meta::DIMENSIONS)?;
        let size = meta.get_usize(meta::TOTAL_SIZE)?;
        let batch = meta.get_usize(meta::BATCH_SIZE)?;
        if dim == 0 || batch == 0 {
            return Err(Error::Format(
                "sidecar DIMENSIONS and BATCH_SIZE must be positive".to_string(),
            ));
        }

        let shard_count = size.div_ceil(batch);
        let mut shards = Vec::with_capacity(shard_count);
        for i in 0..shard_count {
            shards.push(File::open(dir.join(format!("data_{}.bin", i)))?);
        }
        Ok(FileSource {
            dim,
            size,
            batch,
            shards: RefCell::new(shards),
            _element: PhantomData,
        })
    }

    /// Vectors per shard file.
    pub fn batch(&self) -> usize {
        self.batch
    }
}

impl<N: Numeric> VectorSource<N> for FileSource<N> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn size(&self) -> usize {
        self.size
    }

    fn get(&self, key: u32) -> Result<Cow<'_, [N]>> {
        let key = key as usize;
        if key >= self.size {
            return Err(Error::Param(format!("vector key {} is out of range", key)));
        }
        let shard = key / self.batch;
        let offset = (key % self.batch) * self.dim * N::WIDTH;

        let mut shards = self.shards.borrow_mut();
        let file = &mut shards[shard];
        file.seek(SeekFrom::Start(offset as u64))?;

        let mut vec = vec![N::zero(); self.dim];
        N::read_slice(&mut *file, &mut vec).map_err(Error::from_read)?;
        Ok(Cow::Owned(vec))
    }
}
