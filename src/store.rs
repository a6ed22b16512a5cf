//! File-backed query mode: bucket shard files and the bounded shard cache.
//!
//! When the database does not fit in memory, buckets sharing a code prefix
//! are packed into shard files at save time. Touching any bucket then loads
//! its whole shard once; the other buckets in the shard come for free until
//! the cache evicts it.
use crate::code::Code;
use crate::data::Numeric;
use crate::hamming;
use crate::index::{read_u32, ItqLsh};
use crate::source::VectorSource;
use crate::topk::{Neighbour, Scanner};
use crate::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use fnv::{FnvHashMap, FnvHashSet};
use lru::LruCache;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PARAM_FILE: &str = "hash.param";
const POSITION_FILE: &str = "hash.file.pos";

type PositionMap = FnvHashMap<Code, (Code, u32)>;
type SizeMap = FnvHashMap<Code, u32>;

impl ItqLsh {
    /// Write the index and its vectors to `root` as bucket shard files.
    ///
    /// Each table's buckets are appended in ascending code order to
    /// `<root>/L_<k>/<prefix>.hash`, where the prefix is the first
    /// `fit_split_bits` bits of the bucket code, chosen so a shard holds
    /// roughly `single_max` MiB of vectors. The index itself goes to
    /// `<root>/hash.param` and the shard position maps to
    /// `<root>/hash.file.pos`.
    pub fn save_sharded<N, S>(&self, root: &Path, source: &S, single_max: u32) -> Result<()>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        if self.hashed_size == 0 {
            return Err(Error::Param(
                "nothing to save: no vectors were hashed".to_string(),
            ));
        }
        if single_max == 0 {
            return Err(Error::Param(
                "target shard size must be at least one MiB".to_string(),
            ));
        }
        self.check_query(source.dim(), 0)?;

        let dim = self.params.dim;
        let each_mb_vectors = (1u64 << 20) as f64 / (N::WIDTH as f64 * dim as f64);
        let ratio = self.hashed_size as f64 / each_mb_vectors / single_max as f64;
        let fit_split_bits =
            (ratio.log2().ceil() as i64).clamp(1, self.params.n_bits as i64) as usize;
        info!(
            fit_split_bits,
            single_max, vectors = self.hashed_size, "writing bucket shards"
        );

        fs::create_dir_all(root)?;
        let mut positions: Vec<PositionMap> = Vec::with_capacity(self.tables.len());
        let mut shard_sizes: Vec<SizeMap> = Vec::with_capacity(self.tables.len());
        for (k, table) in self.tables.iter().enumerate() {
            let dir = root.join(format!("L_{}", k));
            fs::create_dir_all(&dir)?;

            let mut pos = PositionMap::default();
            let mut sizes = SizeMap::default();
            let mut touched: FnvHashSet<Code> = FnvHashSet::default();

            let mut codes: Vec<&Code> = table.keys().collect();
            codes.sort();
            for code in codes {
                let keys = &table[code];
                let prefix = code.prefix(fit_split_bits);
                let offset = *sizes.entry(prefix).or_insert(0);
                pos.insert(*code, (prefix, offset));

                let path = dir.join(format!("{}.hash", prefix));
                let file = if touched.insert(prefix) {
                    File::create(&path)?
                } else {
                    OpenOptions::new().append(true).open(&path)?
                };
                let mut out = BufWriter::new(file);
                for &key in keys {
                    let v = source.get(key)?;
                    N::write_slice(&mut out, v.as_ref())?;
                }
                out.flush()?;
                sizes.insert(prefix, offset + keys.len() as u32);
            }
            debug!(table = k, shards = sizes.len(), "wrote table shards");
            positions.push(pos);
            shard_sizes.push(sizes);
        }

        self.save(root.join(PARAM_FILE))?;
        save_positions(
            &root.join(POSITION_FILE),
            self.hashed_size,
            single_max,
            fit_split_bits,
            &positions,
            &shard_sizes,
        )
    }

    /// Load an index previously written by [`save_sharded`](ItqLsh::save_sharded).
    ///
    /// Returns the index together with a [`ShardStore`] holding at most
    /// `max_memory_mib / single_max` shard buffers.
    pub fn load_sharded<N: Numeric>(
        root: &Path,
        max_memory_mib: u32,
    ) -> Result<(ItqLsh, ShardStore<N>)> {
        let index = ItqLsh::load(root.join(PARAM_FILE))?;
        let store = ShardStore::open(root, &index, max_memory_mib)?;
        Ok((index, store))
    }

    /// Query against shard files instead of a vector source.
    ///
    /// Identical results to [`query`](ItqLsh::query) over the same data;
    /// only the vector bytes come from the store's shard buffers.
    pub fn query_sharded<N: Numeric>(
        &self,
        store: &mut ShardStore<N>,
        query: &[N],
        scanner: &mut Scanner<N>,
        radius: usize,
    ) -> Result<Vec<Neighbour>> {
        self.check_query(query.len(), radius)?;
        if store.dim != self.params.dim {
            return Err(Error::Param(
                "shard store was built for a different dimension".to_string(),
            ));
        }
        scanner.reset(query, self.hashed_size as usize);
        for k in 0..self.params.n_hash_tables {
            let code = self.hashers[k].hash(query);
            self.scan_shard_bucket(store, k, &code, scanner)?;
            if radius > 0 {
                for probe in hamming::expand(code, radius) {
                    self.scan_shard_bucket(store, k, &probe, scanner)?;
                }
            }
        }
        Ok(scanner.finish())
    }

    fn scan_shard_bucket<N: Numeric>(
        &self,
        store: &mut ShardStore<N>,
        table: usize,
        code: &Code,
        scanner: &mut Scanner<N>,
    ) -> Result<()> {
        let keys = match self.tables[table].get(code) {
            Some(keys) => keys,
            None => return Ok(()),
        };
        let (prefix, base) = match store.position(table, code) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let dim = self.params.dim;
        let buf = store.fetch(table, prefix)?;
        if (base as usize + keys.len()) * dim > buf.len() {
            return Err(Error::Format(format!(
                "bucket {} overruns shard {}",
                code, prefix
            )));
        }
        for (i, &key) in keys.iter().enumerate() {
            if scanner.mark(key) {
                let off = (base as usize + i) * dim;
                scanner.score(key, &buf[off..off + dim]);
            }
        }
        Ok(())
    }
}

/// Shard position maps plus a bounded LRU cache of shard buffers.
///
/// The cache is per query thread; share the index, not the store.
pub struct ShardStore<N: Numeric> {
    root: PathBuf,
    dim: usize,
    hashed_size: u32,
    single_max: u32,
    fit_split_bits: usize,
    /// Per table: bucket code → (shard prefix, offset into the shard, in vectors).
    positions: Vec<PositionMap>,
    /// Per table: shard prefix → total vectors in the shard file.
    shard_sizes: Vec<SizeMap>,
    cache: LruCache<(usize, Code), Vec<N>>,
    loads: u64,
}

impl<N: Numeric> ShardStore<N> {
    /// Open the position maps under `root` for `index`.
    ///
    /// `max_memory_mib` bounds the memory spent on cached shard buffers;
    /// the cache keeps at least one shard regardless.
    pub fn open(root: &Path, index: &ItqLsh, max_memory_mib: u32) -> Result<ShardStore<N>> {
        let n_bits = index.params().n_bits;
        let n_tables = index.params().n_hash_tables;

        let mut r = BufReader::new(File::open(root.join(POSITION_FILE))?);
        let hashed_size = read_u32(&mut r)?;
        let single_max = read_u32(&mut r)?;
        let fit_split_bits = read_u32(&mut r)? as usize;
        if single_max == 0 || fit_split_bits == 0 || fit_split_bits > n_bits {
            return Err(Error::Format(format!(
                "implausible shard header: single_max={} fit_split_bits={}",
                single_max, fit_split_bits
            )));
        }
        if hashed_size != index.hashed_size() {
            return Err(Error::Format(format!(
                "shard positions cover {} vectors but the index hashed {}",
                hashed_size,
                index.hashed_size()
            )));
        }

        let mut positions = Vec::with_capacity(n_tables);
        let mut shard_sizes = Vec::with_capacity(n_tables);
        for _ in 0..n_tables {
            let count = read_u32(&mut r)? as usize;
            let mut pos = PositionMap::default();
            for _ in 0..count {
                let code = Code::read_ascii(&mut r, n_bits)?;
                let shard = Code::read_ascii(&mut r, fit_split_bits)?;
                let offset = read_u32(&mut r)?;
                pos.insert(code, (shard, offset));
            }
            let count = read_u32(&mut r)? as usize;
            let mut sizes = SizeMap::default();
            for _ in 0..count {
                let shard = Code::read_ascii(&mut r, fit_split_bits)?;
                let total = read_u32(&mut r)?;
                sizes.insert(shard, total);
            }
            positions.push(pos);
            shard_sizes.push(sizes);
        }

        let capacity = ((max_memory_mib / single_max) as usize).max(1);
        Ok(ShardStore {
            root: root.to_path_buf(),
            dim: index.params().dim,
            hashed_size,
            single_max,
            fit_split_bits,
            positions,
            shard_sizes,
            cache: LruCache::new(NonZeroUsize::new(capacity).expect("capacity is at least one")),
            loads: 0,
        })
    }

    pub fn hashed_size(&self) -> u32 {
        self.hashed_size
    }

    /// Target shard size in MiB chosen at save time.
    pub fn single_max(&self) -> u32 {
        self.single_max
    }

    /// Length of shard name prefixes, in bits.
    pub fn fit_split_bits(&self) -> usize {
        self.fit_split_bits
    }

    /// Number of shard buffers the cache may hold.
    pub fn cache_capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Number of shard files read since the store was opened.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Resident shards, most recently used first.
    pub fn resident(&self) -> Vec<(usize, Code)> {
        self.cache.iter().map(|(key, _)| *key).collect()
    }

    /// Shard assignment of a bucket, if the bucket exists.
    pub fn position(&self, table: usize, code: &Code) -> Option<(Code, u32)> {
        self.positions.get(table)?.get(code).copied()
    }

    fn shard_total(&self, table: usize, prefix: &Code) -> Result<u32> {
        self.shard_sizes[table].get(prefix).copied().ok_or_else(|| {
            Error::Format(format!("no size recorded for shard {} of table {}", prefix, table))
        })
    }

    /// The shard buffer for `prefix` in `table`, reading the shard file on
    /// a cache miss. The buffer holds `shard_total × dim` scalars.
    pub fn fetch(&mut self, table: usize, prefix: Code) -> Result<&[N]> {
        let key = (table, prefix);
        if self.cache.get(&key).is_none() {
            let total = self.shard_total(table, &prefix)? as usize;
            let path = self
                .root
                .join(format!("L_{}", table))
                .join(format!("{}.hash", prefix));
            let mut file = File::open(&path)?;
            let mut buf = vec![N::zero(); total * self.dim];
            N::read_slice(&mut file, &mut buf).map_err(Error::from_read)?;
            self.loads += 1;
            debug!(table, shard = %prefix, vectors = total, "loaded shard");
            self.cache.put(key, buf);
        }
        Ok(self
            .cache
            .get(&key)
            .expect("shard buffer was just cached")
            .as_slice())
    }
}

fn save_positions(
    path: &Path,
    hashed_size: u32,
    single_max: u32,
    fit_split_bits: usize,
    positions: &[PositionMap],
    shard_sizes: &[SizeMap],
) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(hashed_size)?;
    w.write_u32::<LittleEndian>(single_max)?;
    w.write_u32::<LittleEndian>(fit_split_bits as u32)?;
    for (pos, sizes) in positions.iter().zip(shard_sizes) {
        w.write_u32::<LittleEndian>(pos.len() as u32)?;
        let mut codes: Vec<&Code> = pos.keys().collect();
        codes.sort();
        for code in codes {
            let (shard, offset) = &pos[code];
            code.write_ascii(&mut w)?;
            shard.write_ascii(&mut w)?;
            w.write_u32::<LittleEndian>(*offset)?;
        }

        w.write_u32::<LittleEndian>(sizes.len() as u32)?;
        let mut shards: Vec<&Code> = sizes.keys().collect();
        shards.sort();
        for shard in shards {
            shard.write_ascii(&mut w)?;
            w.write_u32::<LittleEndian>(sizes[shard])?;
        }
    }
    w.flush()?;
    Ok(())
}
