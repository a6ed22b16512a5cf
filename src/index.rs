//! The ITQ-LSH index: `L` independent hash tables over binary codes.
use crate::code::{Code, MAX_BITS};
use crate::data::Numeric;
use crate::dist::Metric;
use crate::hamming;
use crate::itq::ItqHash;
use crate::source::VectorSource;
use crate::stats::Stat;
use crate::topk::{Neighbour, Scanner};
use crate::utils::create_rng;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fnv::FnvHashMap;
use ndarray::prelude::*;
use rand::Rng;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Index parameters, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Number of hash tables. `L` in literature.
    pub n_hash_tables: usize,
    /// Bits per bucket code. `N` in literature.
    pub n_bits: usize,
    /// Dimension of the data points.
    pub dim: usize,
    /// Number of vectors sampled for training each table.
    pub train_size: usize,
    /// Rotation refinement iterations.
    pub train_iters: usize,
}

impl Params {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.n_hash_tables == 0 {
            return Err(Error::Param("need at least one hash table".to_string()));
        }
        if self.n_bits == 0 || self.n_bits > MAX_BITS {
            return Err(Error::Param(format!(
                "code length must be in 1..={}, got {}",
                MAX_BITS, self.n_bits
            )));
        }
        if self.n_bits > self.dim {
            return Err(Error::Param(format!(
                "code length {} exceeds the vector dimension {}",
                self.n_bits, self.dim
            )));
        }
        if self.train_size < 2 {
            return Err(Error::Param(
                "need at least two training samples".to_string(),
            ));
        }
        Ok(())
    }
}

/// ITQ locality-sensitive hashing index.
///
/// Build order is `new` → [`train`](ItqLsh::train) →
/// [`hash_all`](ItqLsh::hash_all) (or repeated [`insert`](ItqLsh::insert)),
/// after which the index is read-only: it can be queried, saved with
/// [`save`](ItqLsh::save), or written out as shard files with
/// [`save_sharded`](ItqLsh::save_sharded) for datasets that do not fit in
/// memory.
///
/// # Example
///
/// ```
/// use itq_lsh::prelude::*;
///
/// let source = MemorySource::from_vec(4, vec![
///     1., 0., 0., 0.,
///     0., 1., 0., 0.,
///     -1., 0., 0., 0.,
///     0., -1., 0., 0.,
/// ]).unwrap();
/// let params = Params {
///     n_hash_tables: 1,
///     n_bits: 2,
///     dim: 4,
///     train_size: 4,
///     train_iters: 5,
/// };
/// let mut index = ItqLsh::new(params).unwrap().seed(1);
/// index.train(&source).unwrap();
/// index.hash_all(&source).unwrap();
///
/// let mut scanner = Scanner::new(Metric::SquaredL2, 2).unwrap();
/// let top = index.query(&source, &[1., 0., 0., 0.], &mut scanner, 0).unwrap();
/// assert_eq!(top[0].key, 0);
/// ```
pub struct ItqLsh {
    pub(crate) params: Params,
    seed: u64,
    pub(crate) hashers: Vec<ItqHash>,
    /// Per table: bucket code → keys in insertion order.
    pub(crate) tables: Vec<FnvHashMap<Code, Vec<u32>>>,
    /// Total number of inserted vectors (not per table).
    pub(crate) hashed_size: u32,
}

impl ItqLsh {
    pub fn new(params: Params) -> Result<ItqLsh> {
        params.validate()?;
        let tables = (0..params.n_hash_tables)
            .map(|_| FnvHashMap::default())
            .collect();
        Ok(ItqLsh {
            params,
            seed: 0,
            hashers: Vec::new(),
            tables,
            hashed_size: 0,
        })
    }

    /// Set the training seed. A seed of 0 (the default) seeds from the OS.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Number of vectors inserted so far.
    pub fn hashed_size(&self) -> u32 {
        self.hashed_size
    }

    pub fn is_trained(&self) -> bool {
        !self.hashers.is_empty()
    }

    /// Train every table on a sample of `source`.
    ///
    /// Each table draws its own seed from the master RNG so the learned
    /// hashes are decorrelated but reproducible.
    pub fn train<N, S>(&mut self, source: &S) -> Result<()>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        if source.dim() != self.params.dim {
            return Err(Error::Param(format!(
                "data dimension {} does not match the configured dimension {}",
                source.dim(),
                self.params.dim
            )));
        }
        if self.params.train_size > source.size() {
            return Err(Error::Param(format!(
                "train sample of {} exceeds the {} vectors available",
                self.params.train_size,
                source.size()
            )));
        }
        let mut rng = create_rng(self.seed);
        self.hashers.clear();
        for k in 0..self.params.n_hash_tables {
            debug!(table = k, "training hash table");
            let table_seed = rng.gen();
            self.hashers
                .push(ItqHash::fit(source, &self.params, table_seed)?);
        }
        info!(
            tables = self.params.n_hash_tables,
            bits = self.params.n_bits,
            "trained index"
        );
        Ok(())
    }

    /// Hash one vector into every table under `key`.
    ///
    /// Keys are expected to be inserted once each; the index does not
    /// deduplicate.
    pub fn insert<N: Numeric>(&mut self, key: u32, v: &[N]) -> Result<()> {
        self.check_vec(v.len())?;
        for (hasher, table) in self.hashers.iter().zip(&mut self.tables) {
            let code = hasher.hash(v);
            table.entry(code).or_default().push(key);
        }
        self.hashed_size += 1;
        Ok(())
    }

    /// Insert every vector of `source` under its own key.
    pub fn hash_all<N, S>(&mut self, source: &S) -> Result<()>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        self.check_vec(source.dim())?;
        for key in 0..source.size() as u32 {
            let v = source.get(key)?;
            self.insert(key, v.as_ref())?;
        }
        info!(vectors = self.hashed_size, "hashed dataset");
        Ok(())
    }

    /// The bucket code of `v` in table `table`.
    pub fn hash<N: Numeric>(&self, table: usize, v: &[N]) -> Result<Code> {
        self.check_vec(v.len())?;
        Ok(self.hashers[table].hash(v))
    }

    /// Keys in the bucket for `code` in table `table`, if any.
    pub fn bucket_keys(&self, table: usize, code: &Code) -> Option<&[u32]> {
        self.tables[table].get(code).map(|keys| keys.as_slice())
    }

    /// Bucket codes present in table `table`, in no particular order.
    pub fn table_codes(&self, table: usize) -> impl Iterator<Item = &Code> {
        self.tables[table].keys()
    }

    /// Query the index: probe each table's bucket for `query`, optionally
    /// expanded by `radius` bit flips, and return the top-K candidates by
    /// the scanner's metric, ascending.
    pub fn query<N, S>(
        &self,
        source: &S,
        query: &[N],
        scanner: &mut Scanner<N>,
        radius: usize,
    ) -> Result<Vec<Neighbour>>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        self.check_query(query.len(), radius)?;
        if source.dim() != self.params.dim {
            return Err(Error::Param(format!(
                "data dimension {} does not match the index dimension {}",
                source.dim(),
                self.params.dim
            )));
        }
        scanner.reset(query, source.size());
        for k in 0..self.params.n_hash_tables {
            let code = self.hashers[k].hash(query);
            self.scan_bucket(source, k, &code, scanner)?;
            if radius > 0 {
                for probe in hamming::expand(code, radius) {
                    self.scan_bucket(source, k, &probe, scanner)?;
                }
            }
        }
        Ok(scanner.finish())
    }

    fn scan_bucket<N, S>(
        &self,
        source: &S,
        table: usize,
        code: &Code,
        scanner: &mut Scanner<N>,
    ) -> Result<()>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        // missing buckets simply contribute no candidates
        let keys = match self.tables[table].get(code) {
            Some(keys) => keys,
            None => return Ok(()),
        };
        for &key in keys {
            if scanner.mark(key) {
                let v = source.get(key)?;
                scanner.score(key, v.as_ref());
            }
        }
        Ok(())
    }

    /// Query a batch of vectors sequentially.
    pub fn query_batch<N, S>(
        &self,
        source: &S,
        queries: &[Vec<N>],
        metric: Metric,
        k: usize,
        radius: usize,
    ) -> Result<Vec<Vec<Neighbour>>>
    where
        N: Numeric,
        S: VectorSource<N>,
    {
        let mut scanner = Scanner::new(metric, k)?;
        queries
            .iter()
            .map(|q| self.query(source, q, &mut scanner, radius))
            .collect()
    }

    /// Query a batch of vectors in parallel, one scanner per worker.
    pub fn query_batch_par<N, S>(
        &self,
        source: &S,
        queries: &[Vec<N>],
        metric: Metric,
        k: usize,
        radius: usize,
    ) -> Result<Vec<Vec<Neighbour>>>
    where
        N: Numeric,
        S: VectorSource<N> + Sync,
    {
        queries
            .par_iter()
            .map(|q| {
                let mut scanner = Scanner::new(metric, k)?;
                self.query(source, q, &mut scanner, radius)
            })
            .collect()
    }

    /// Bucket-occupancy statistics for tuning.
    pub fn describe(&self) -> String {
        let mut lengths = Stat::new();
        let mut min_len = usize::MAX;
        let mut max_len = 0;
        let mut buckets = 0;
        for table in &self.tables {
            buckets += table.len();
            for keys in table.values() {
                lengths.push(keys.len() as f64);
                min_len = min_len.min(keys.len());
                max_len = max_len.max(keys.len());
            }
        }
        if buckets == 0 {
            min_len = 0;
        }
        format!(
            "No. of tables: {}\nNo. of buckets: {}\nHashed vectors: {}\n\
             Bucket sizes:\navg:\t{:.2}\nstd-dev:\t{:.2}\nmin:\t{}\nmax:\t{}\n",
            self.params.n_hash_tables,
            buckets,
            self.hashed_size,
            lengths.mean(),
            lengths.std_dev(),
            min_len,
            max_len,
        )
    }

    /// Write the index (header, tables, projections, rotations) to `path`.
    ///
    /// Buckets are written in ascending code order, so saving the same
    /// index twice produces identical bytes.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::Param("cannot save an untrained index".to_string()));
        }
        let mut w = BufWriter::new(File::create(path)?);
        w.write_u32::<LittleEndian>(self.params.n_hash_tables as u32)?;
        w.write_u32::<LittleEndian>(self.params.dim as u32)?;
        w.write_u32::<LittleEndian>(self.params.n_bits as u32)?;
        w.write_u32::<LittleEndian>(self.params.train_size as u32)?;
        for (table, hasher) in self.tables.iter().zip(&self.hashers) {
            w.write_u32::<LittleEndian>(table.len() as u32)?;
            let mut codes: Vec<&Code> = table.keys().collect();
            codes.sort();
            for code in codes {
                code.write_ascii(&mut w)?;
                let keys = &table[code];
                w.write_u32::<LittleEndian>(keys.len() as u32)?;
                for &key in keys {
                    w.write_u32::<LittleEndian>(key)?;
                }
            }
            for i in 0..self.params.n_bits {
                for j in 0..self.params.dim {
                    w.write_f32::<LittleEndian>(hasher.projection()[(j, i)])?;
                }
                for j in 0..self.params.n_bits {
                    w.write_f32::<LittleEndian>(hasher.rotation()[(j, i)])?;
                }
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Load an index written by [`save`](ItqLsh::save).
    ///
    /// The training iteration count is not persisted; the loaded index is
    /// ready for queries but not for retraining.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ItqLsh> {
        let mut r = BufReader::new(File::open(path)?);
        let n_hash_tables = read_u32(&mut r)? as usize;
        let dim = read_u32(&mut r)? as usize;
        let n_bits = read_u32(&mut r)? as usize;
        let train_size = read_u32(&mut r)? as usize;
        if n_hash_tables == 0 || n_bits == 0 || n_bits > MAX_BITS || n_bits > dim {
            return Err(Error::Format(format!(
                "implausible header: L={} D={} N={}",
                n_hash_tables, dim, n_bits
            )));
        }

        let mut tables = Vec::with_capacity(n_hash_tables);
        let mut hashers = Vec::with_capacity(n_hash_tables);
        for _ in 0..n_hash_tables {
            let bucket_count = read_u32(&mut r)? as usize;
            let mut table =
                FnvHashMap::with_capacity_and_hasher(bucket_count, Default::default());
            for _ in 0..bucket_count {
                let code = Code::read_ascii(&mut r, n_bits)?;
                let key_count = read_u32(&mut r)? as usize;
                let mut keys = vec![0u32; key_count];
                r.read_u32_into::<LittleEndian>(&mut keys)
                    .map_err(Error::from_read)?;
                if table.insert(code, keys).is_some() {
                    return Err(Error::Format("duplicate bucket code".to_string()));
                }
            }

            let mut projection = Array2::zeros((dim, n_bits));
            let mut rotation = Array2::zeros((n_bits, n_bits));
            let mut p_col = vec![0.0f32; dim];
            let mut r_col = vec![0.0f32; n_bits];
            for i in 0..n_bits {
                r.read_f32_into::<LittleEndian>(&mut p_col)
                    .map_err(Error::from_read)?;
                for (j, &x) in p_col.iter().enumerate() {
                    projection[(j, i)] = x;
                }
                r.read_f32_into::<LittleEndian>(&mut r_col)
                    .map_err(Error::from_read)?;
                for (j, &x) in r_col.iter().enumerate() {
                    rotation[(j, i)] = x;
                }
            }
            hashers.push(ItqHash::from_parts(projection, rotation));
            tables.push(table);
        }

        let hashed_size = tables[0].values().map(|keys| keys.len() as u32).sum();
        info!(tables = n_hash_tables, vectors = hashed_size, "loaded index");
        Ok(ItqLsh {
            params: Params {
                n_hash_tables,
                n_bits,
                dim,
                train_size,
                train_iters: 0,
            },
            seed: 0,
            hashers,
            tables,
            hashed_size,
        })
    }

    fn check_vec(&self, dim: usize) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::Param("the index is not trained".to_string()));
        }
        if dim != self.params.dim {
            return Err(Error::Param(format!(
                "data point of dimension {} does not match the index dimension {}",
                dim, self.params.dim
            )));
        }
        Ok(())
    }

    pub(crate) fn check_query(&self, dim: usize, radius: usize) -> Result<()> {
        self.check_vec(dim)?;
        if radius > self.params.n_bits {
            return Err(Error::Param(format!(
                "hamming radius {} exceeds the code length {}",
                radius, self.params.n_bits
            )));
        }
        Ok(())
    }
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    r.read_u32::<LittleEndian>().map_err(Error::from_read)
}
