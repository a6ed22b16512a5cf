#![cfg(test)]
use crate::prelude::*;
use crate::utils::create_rng;
use rand::Rng;

fn random_source(size: usize, dim: usize, seed: u64) -> MemorySource<f32> {
    let mut rng = create_rng(seed);
    let data: Vec<f32> = (0..size * dim).map(|_| rng.gen::<f32>() - 0.5).collect();
    MemorySource::from_vec(dim, data).unwrap()
}

fn random_queries(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = create_rng(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect())
        .collect()
}

/// Exact top-k over an explicit candidate pool.
fn exact_top_k(
    source: &MemorySource<f32>,
    query: &[f32],
    pool: impl Iterator<Item = u32>,
    k: usize,
) -> Vec<Neighbour> {
    let mut topk = TopK::new(k);
    for key in pool {
        let v = source.get(key).unwrap();
        topk.push(key, Metric::SquaredL2.distance(query, v.as_ref()));
    }
    topk.finish()
}

fn build(source: &MemorySource<f32>, params: Params, seed: u64) -> ItqLsh {
    let mut index = ItqLsh::new(params).unwrap().seed(seed);
    index.train(source).unwrap();
    index.hash_all(source).unwrap();
    index
}

#[test]
fn test_tiny_deterministic() {
    // signed basis vectors of R^4
    let mut data = Vec::new();
    for sign in [1.0f32, -1.0] {
        for axis in 0..4 {
            let mut v = [0.0f32; 4];
            v[axis] = sign;
            data.extend_from_slice(&v);
        }
    }
    let source = MemorySource::from_vec(4, data).unwrap();
    let params = Params {
        n_hash_tables: 1,
        n_bits: 2,
        dim: 4,
        train_size: 8,
        train_iters: 10,
    };
    let index = build(&source, params, 1);

    let query = [1.0f32, 0.0, 0.0, 0.0];
    let mut scanner = Scanner::new(Metric::SquaredL2, 2).unwrap();
    let top = index.query(&source, &query, &mut scanner, 0).unwrap();

    // the query vector itself is key 0 and must be rank one at distance zero
    assert_eq!(top[0].key, 0);
    assert_eq!(top[0].distance, 0.0);

    // the rest of the result is the exact top-2 of the probed bucket
    let code = index.hash(0, &query).unwrap();
    let pool = index.bucket_keys(0, &code).unwrap();
    let expected = exact_top_k(&source, &query, pool.iter().copied(), 2);
    assert_eq!(top, expected);
}

#[test]
fn test_bucket_partition() {
    let source = random_source(10_000, 16, 5);
    let params = Params {
        n_hash_tables: 3,
        n_bits: 8,
        dim: 16,
        train_size: 500,
        train_iters: 5,
    };
    let index = build(&source, params, 7);
    assert_eq!(index.hashed_size(), 10_000);

    for table in 0..3 {
        let mut seen = vec![0u32; 10_000];
        let mut total = 0;
        for code in index.table_codes(table) {
            let keys = index.bucket_keys(table, code).unwrap();
            total += keys.len();
            for &key in keys {
                seen[key as usize] += 1;
            }
        }
        assert_eq!(total, 10_000, "table {} lost or duplicated keys", table);
        assert!(seen.iter().all(|&count| count == 1));
    }
}

#[test]
fn test_query_matches_exact_top_k_of_candidates() {
    let source = random_source(2_000, 16, 11);
    let params = Params {
        n_hash_tables: 2,
        n_bits: 6,
        dim: 16,
        train_size: 400,
        train_iters: 10,
    };
    let index = build(&source, params, 13);

    let mut scanner = Scanner::new(Metric::SquaredL2, 5).unwrap();
    for query in random_queries(20, 16, 17) {
        let top = index.query(&source, &query, &mut scanner, 1).unwrap();

        // rebuild the candidate pool the probes reach
        let mut pool = Vec::new();
        for table in 0..2 {
            let code = index.hash(table, &query).unwrap();
            if let Some(keys) = index.bucket_keys(table, &code) {
                pool.extend_from_slice(keys);
            }
            for probe in hamming::expand(code, 1) {
                if let Some(keys) = index.bucket_keys(table, &probe) {
                    pool.extend_from_slice(keys);
                }
            }
        }
        pool.sort_unstable();
        pool.dedup();
        let expected = exact_top_k(&source, &query, pool.iter().copied(), 5);
        assert_eq!(top, expected);
        assert_eq!(scanner.cnt(), pool.len(), "candidates scored exactly once");
    }
}

#[test]
fn test_save_load_round_trip() {
    let source = random_source(1_000, 32, 19);
    let params = Params {
        n_hash_tables: 4,
        n_bits: 8,
        dim: 32,
        train_size: 200,
        train_iters: 20,
    };
    let index = build(&source, params, 23);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hash.param");
    index.save(&path).unwrap();
    let loaded = ItqLsh::load(&path).unwrap();
    assert_eq!(loaded.hashed_size(), 1_000);
    assert_eq!(loaded.params().n_bits, 8);

    let mut scanner = Scanner::new(Metric::SquaredL2, 10).unwrap();
    for query in random_queries(100, 32, 29) {
        let before = index.query(&source, &query, &mut scanner, 1).unwrap();
        let after = loaded.query(&source, &query, &mut scanner, 1).unwrap();
        assert_eq!(before, after);
    }
}

#[test]
fn test_save_is_byte_stable() {
    let source = random_source(200, 8, 31);
    let params = Params {
        n_hash_tables: 2,
        n_bits: 4,
        dim: 8,
        train_size: 100,
        train_iters: 5,
    };
    let index = build(&source, params, 37);

    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.param");
    let b = dir.path().join("b.param");
    index.save(&a).unwrap();
    index.save(&b).unwrap();
    assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
}

#[test]
fn test_shard_store_equivalence() {
    let source = random_source(1_000, 32, 41);
    let params = Params {
        n_hash_tables: 4,
        n_bits: 8,
        dim: 32,
        train_size: 200,
        train_iters: 20,
    };
    let index = build(&source, params, 43);

    let dir = tempfile::tempdir().unwrap();
    index.save_sharded(dir.path(), &source, 1).unwrap();
    let (loaded, mut store) = ItqLsh::load_sharded::<f32>(dir.path(), 4).unwrap();
    assert_eq!(store.single_max(), 1);
    assert!(store.fit_split_bits() >= 1);

    let mut scanner = Scanner::new(Metric::SquaredL2, 10).unwrap();
    for query in random_queries(100, 32, 47) {
        let in_memory = index.query(&source, &query, &mut scanner, 1).unwrap();
        let sharded = loaded
            .query_sharded(&mut store, &query, &mut scanner, 1)
            .unwrap();
        assert_eq!(in_memory, sharded);
    }
    assert!(store.resident().len() <= store.cache_capacity());
}

#[test]
fn test_sharded_cache_stays_bounded() {
    let source = random_source(600, 16, 53);
    let params = Params {
        n_hash_tables: 2,
        n_bits: 6,
        dim: 16,
        train_size: 300,
        train_iters: 10,
    };
    let index = build(&source, params, 59);

    let dir = tempfile::tempdir().unwrap();
    index.save_sharded(dir.path(), &source, 1).unwrap();
    // max_memory == single_max: room for exactly one shard buffer
    let (loaded, mut store) = ItqLsh::load_sharded::<f32>(dir.path(), 1).unwrap();
    assert_eq!(store.cache_capacity(), 1);

    let mut scanner = Scanner::new(Metric::SquaredL2, 5).unwrap();
    for query in random_queries(10, 16, 61) {
        // full-radius probing touches every shard of every table
        loaded
            .query_sharded(&mut store, &query, &mut scanner, 6)
            .unwrap();
        assert_eq!(store.resident().len(), 1);
    }
    assert!(store.loads() > 1, "expected cache churn across shards");
}

#[test]
fn test_recall_monotone_in_radius() {
    let source = random_source(500, 32, 67);
    let params = Params {
        n_hash_tables: 4,
        n_bits: 16,
        dim: 32,
        train_size: 250,
        train_iters: 15,
    };
    let index = build(&source, params, 71);

    let queries = random_queries(50, 32, 73);
    let mut means = Vec::new();
    for radius in 0..=2 {
        let mut stat = Stat::new();
        let mut scanner = Scanner::new(Metric::SquaredL2, 20).unwrap();
        for query in &queries {
            let truth = exact_top_k(&source, query, 0..source.size() as u32, 20);
            let found = index.query(&source, query, &mut scanner, radius).unwrap();
            stat.push(recall(&found, &truth) as f64);
        }
        means.push(stat.mean());
    }
    assert!(means[1] >= means[0], "recall fell from r=0 to r=1: {:?}", means);
    assert!(means[2] >= means[1], "recall fell from r=1 to r=2: {:?}", means);
}

#[test]
fn test_query_batch_matches_sequential() {
    let source = random_source(300, 8, 79);
    let params = Params {
        n_hash_tables: 2,
        n_bits: 5,
        dim: 8,
        train_size: 150,
        train_iters: 10,
    };
    let index = build(&source, params, 83);

    let queries = random_queries(16, 8, 89);
    let sequential = index
        .query_batch(&source, &queries, Metric::SquaredL2, 3, 1)
        .unwrap();
    let parallel = index
        .query_batch_par(&source, &queries, Metric::SquaredL2, 3, 1)
        .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn test_file_source_round_trip() {
    use crate::data::Numeric;
    use std::io::Write;

    // write the dataset in the sidecar + data_<i>.bin layout, then verify
    // queries through a FileSource match the in-memory ones
    let source = random_source(200, 8, 97);
    let dir = tempfile::tempdir().unwrap();
    let batch = 64;
    let mut meta = std::fs::File::create(dir.path().join("data.meta")).unwrap();
    writeln!(meta, "DIMENSIONS = 8\nTOTAL_SIZE = 200\nBATCH_SIZE = {}", batch).unwrap();
    for shard in 0..200usize.div_ceil(batch) {
        let mut f = std::fs::File::create(dir.path().join(format!("data_{}.bin", shard))).unwrap();
        for key in (shard * batch)..((shard + 1) * batch).min(200) {
            let v = source.get(key as u32).unwrap();
            f32::write_slice(&mut f, v.as_ref()).unwrap();
        }
    }
    let file_source: FileSource<f32> = FileSource::open(dir.path()).unwrap();

    let params = Params {
        n_hash_tables: 2,
        n_bits: 4,
        dim: 8,
        train_size: 100,
        train_iters: 10,
    };
    let index = build(&source, params, 101);

    let mut scanner = Scanner::new(Metric::SquaredL2, 5).unwrap();
    for query in random_queries(20, 8, 103) {
        let mem = index.query(&source, &query, &mut scanner, 1).unwrap();
        let file = index.query(&file_source, &query, &mut scanner, 1).unwrap();
        assert_eq!(mem, file);
    }
}
