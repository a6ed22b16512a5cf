//! Hamming-ball expansion of bucket codes.
//!
//! Probing only the exact bucket of a query misses near neighbors whose
//! codes differ in a few bits. Expanding the probe to every code within a
//! small Hamming radius trades scan cost for recall.
use crate::code::Code;
use itertools::Itertools;
use statrs::function::factorial::binomial;

/// All distinct codes at Hamming distance `1..=radius` from `code`.
///
/// Codes are enumerated radius-first (all single-bit flips, then all
/// two-bit flips, and so on), without duplicates. The iterator is pure:
/// calling `expand` again yields the same sequence.
///
/// # Examples
///
/// ```
/// use itq_lsh::hamming::expand;
/// let code = "000".parse().unwrap();
/// let probes: Vec<String> = expand(code, 1).map(|c| c.to_string()).collect();
/// assert_eq!(probes, ["100", "010", "001"]);
/// ```
pub fn expand(code: Code, radius: usize) -> impl Iterator<Item = Code> {
    let n = code.len();
    (1..=radius).flat_map(move |r| {
        (0..n).combinations(r).map(move |flips| {
            let mut probe = code;
            for i in flips {
                probe.flip(i);
            }
            probe
        })
    })
}

/// Number of codes [`expand`] yields: `sum_{i=1..=radius} C(n, i)`.
pub fn ball_size(n: usize, radius: usize) -> usize {
    (1..=radius.min(n))
        .map(|r| binomial(n as u64, r as u64) as usize)
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;
    use fnv::FnvHashSet;

    #[test]
    fn test_expansion_counts() {
        for (n, r) in [(4, 1), (4, 2), (8, 2), (8, 3), (16, 2)] {
            let code = Code::zeros(n);
            let probes: Vec<Code> = expand(code, r).collect();
            assert_eq!(probes.len(), ball_size(n, r), "n={} r={}", n, r);

            let distinct: FnvHashSet<Code> = probes.iter().copied().collect();
            assert_eq!(distinct.len(), probes.len(), "duplicate probes");

            for probe in &probes {
                let d = probe.hamming(&code) as usize;
                assert!(d >= 1 && d <= r);
            }
        }
    }

    #[test]
    fn test_ball_size_64_2() {
        assert_eq!(ball_size(64, 2), 64 + 64 * 63 / 2);
    }

    #[test]
    fn test_zero_radius_is_empty() {
        assert_eq!(expand(Code::zeros(8), 0).count(), 0);
    }

    #[test]
    fn test_restartable() {
        let code: Code = "1010".parse().unwrap();
        let a: Vec<Code> = expand(code, 2).collect();
        let b: Vec<Code> = expand(code, 2).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_radius_capped_by_length() {
        // radius beyond the bit length yields every other code exactly once
        let probes: Vec<Code> = expand(Code::zeros(3), 5).collect();
        assert_eq!(probes.len(), 7);
    }
}
