//! The key-recovery engine: histogram passes over the codebook,
//! nibble-level merging of per-pattern statistics, and orchestration
//! of the five round subkeys.

use fnv::FnvHashMap;
use indexmap::IndexMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::cipher::{self, Spn, NUM_SUBKEYS, ROUNDS};
use crate::codebook::{Codebook, SIZE};
use crate::pattern::{self, ActivePattern};
use crate::search::{self, Path};
use crate::utility::ProgressBar;

lazy_static! {
    static ref THREADS: usize = num_cpus::get();
}

/// A count of matching ciphertext pairs per candidate subkey.
pub type Histogram = FnvHashMap<u16, usize>;

/// A histogram argmax entry.
#[derive(Clone, Copy, Debug)]
pub struct HistEntry {
    pub key: u16,
    pub count: usize,
}

/// The entries of a histogram attaining the maximum count, smallest
/// candidate first so that ties resolve deterministically.
fn max_entries(hist: &Histogram) -> Vec<HistEntry> {
    let max = hist.values().copied().max().unwrap_or(0);

    let mut entries: Vec<HistEntry> = hist
        .iter()
        .filter(|&(_, &count)| count == max)
        .map(|(&key, &count)| HistEntry { key, count })
        .collect();

    entries.sort_by_key(|entry| entry.key);

    entries
}

/// Recovers the five round subkeys of the cipher from a complete
/// chosen-plaintext codebook.
pub struct KeyFinder {
    spn: Spn,
    codebook: Codebook,
    subkeys: [u16; NUM_SUBKEYS],
    threads: usize,
    three_active: bool,
    four_active: bool,
    verbose: u8,
}

impl KeyFinder {
    /// Creates a finder over an unkeyed cipher and its codebook.
    /// `threads` defaults to the number of logical CPUs; the
    /// 3/4-active-pattern heuristics widen the middle-round searches
    /// at a steep cost in running time.
    pub fn new(
        spn: Spn,
        codebook: Codebook,
        threads: Option<usize>,
        three_active: bool,
        four_active: bool,
    ) -> KeyFinder {
        KeyFinder {
            spn,
            codebook,
            subkeys: [0; NUM_SUBKEYS],
            threads: threads.unwrap_or(*THREADS).max(1),
            three_active,
            four_active,
            verbose: 0,
        }
    }

    pub fn set_verbose(&mut self, level: u8) {
        self.verbose = level;
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The subkeys accumulated so far; unrecovered rounds are zero.
    pub fn subkeys(&self) -> &[u16; NUM_SUBKEYS] {
        &self.subkeys
    }

    /// Seeds an already known subkey, e.g. when resuming recovery of
    /// a single middle round.
    pub fn set_subkey(&mut self, index: usize, subkey: u16) {
        self.subkeys[index] = subkey;
    }

    /// The accumulated subkeys as a 20-character hex key string.
    pub fn key_str(&self) -> String {
        cipher::format_key(&self.subkeys)
    }

    /// Runs the full pipeline: the last subkey, the middle subkeys in
    /// decreasing round order (so peeling always uses recovered outer
    /// keys), the first subkey, and finally the second subkey by
    /// exhaustive search.
    pub fn recover_all(&mut self) -> Result<String, String> {
        let start = Instant::now();
        eprintln!("starting full key recovery..");

        let last = self.recover_last_subkey()?;
        self.subkeys[ROUNDS] = last;

        for round in (2..ROUNDS).rev() {
            let subkey = self.recover_round_subkey(round)?;
            self.subkeys[round] = subkey;
        }

        let first = self.recover_first_subkey()?;
        self.subkeys[0] = first;

        let second = self.recover_second_subkey()?;
        self.subkeys[1] = second;

        eprintln!("full recovery took: {:?}", start.elapsed());

        Ok(self.key_str())
    }

    /// Recovers the whitening subkey.
    pub fn recover_first_subkey(&mut self) -> Result<u16, String> {
        self.recover_outer_subkey(0)
    }

    /// Recovers the final round subkey.
    pub fn recover_last_subkey(&mut self) -> Result<u16, String> {
        self.recover_outer_subkey(ROUNDS)
    }

    /// The outer subkeys are pinned to patterns of one and two active
    /// S-boxes; wider patterns slow these passes down enormously
    /// without sharpening them.
    fn recover_outer_subkey(&mut self, round_num: usize) -> Result<u16, String> {
        let (three, four) = (self.three_active, self.four_active);

        if three || four {
            if self.verbose >= 1 {
                eprintln!("restricting key[{}] recovery to 2 active s-boxes", round_num);
            }

            self.three_active = false;
            self.four_active = false;
        }

        let subkey = self.recover_round_subkey(round_num);

        self.three_active = three;
        self.four_active = four;

        subkey
    }

    /// Recovers the subkey of a given round nibble by nibble,
    /// combining histograms from every admissible active pattern.
    ///
    /// Round 1 cannot be recovered this way: its round input is only
    /// one substitution away from the whitening key, leaving no slack
    /// for a differential. Use `recover_second_subkey` once the other
    /// four rounds are known.
    pub fn recover_round_subkey(&self, round_num: usize) -> Result<u16, String> {
        if round_num == 1 {
            return Err(String::from(
                "round 1 is not recoverable by the histogram engine; \
                 use the exhaustive second-subkey search",
            ));
        }

        if round_num > ROUNDS {
            return Err(format!("round {} out of range", round_num));
        }

        eprintln!("guessing key[{}]..", round_num);
        let start = Instant::now();

        let mut pattern_hists = IndexMap::new();

        for state in 1..=0xf {
            let pattern = ActivePattern::new(state);

            let admissible = match pattern.active_count() {
                1 | 2 => true,
                3 => self.three_active,
                4 => self.four_active,
                _ => false,
            };

            if admissible {
                if pattern.active_count() >= 3 && self.verbose >= 1 {
                    eprintln!(
                        "doing {} active s-boxes for key[{}]",
                        pattern.active_count(),
                        round_num
                    );
                }

                pattern_hists.insert(state, self.probable_subkey(round_num, &pattern));
            }
        }

        eprintln!("histograms took: {:?}", start.elapsed());

        let mut subkey = 0;

        for sbox_index in 0..4 {
            let entries = self.probable_sbox_bits(sbox_index, &pattern_hists);

            match entries.len() {
                0 => {
                    return Err(format!(
                        "no candidate for nibble {} of key[{}]; \
                         the S-box is pathologically weak or this is a bug",
                        sbox_index, round_num
                    ));
                }
                1 => {
                    if self.verbose >= 1 {
                        eprintln!(
                            "found key[{}] nibble {}: {:04x}",
                            round_num, sbox_index, entries[0].key
                        );
                    }
                }
                _ => {
                    if self.verbose >= 1 {
                        eprintln!(
                            "key[{}] nibble {} is ambiguous, using the first of:",
                            round_num, sbox_index
                        );

                        for entry in &entries {
                            eprintln!("\tkey={:04x}, count={}", entry.key, entry.count);
                        }
                    }
                }
            }

            subkey |= entries[0].key;
        }

        eprintln!("guessed key[{}] = {:04x}", round_num, subkey);

        Ok(subkey)
    }

    /// Recovers the second subkey by exhaustive search once the other
    /// four are fixed. Each candidate is probed with a single
    /// codebook pair and confirmed against the full codebook before
    /// being accepted.
    pub fn recover_second_subkey(&self) -> Result<u16, String> {
        eprintln!("looking for key[1]..");
        let start = Instant::now();

        let mut subkeys = self.subkeys;

        for x in 0..=0xffff_u16 {
            subkeys[1] = x;

            let ct = self.codebook.forward()[x as usize];

            if self.spn.decrypt_with_keys(ct, &subkeys) != x {
                continue;
            }

            if self.verify_subkeys(&subkeys) {
                eprintln!("found key[1] = {:04x}", x);
                eprintln!("took: {:?}", start.elapsed());

                return Ok(x);
            }
        }

        // The search covers all 2^16 values against a complete
        // codebook; a miss means at least one of the other recovered
        // subkeys is not the real one.
        Err(String::from(
            "no second subkey matches the codebook; \
             an earlier recovered subkey must be wrong",
        ))
    }

    /// Checks a full subkey array against every codebook entry.
    fn verify_subkeys(&self, subkeys: &[u16; NUM_SUBKEYS]) -> bool {
        self.codebook
            .forward()
            .iter()
            .enumerate()
            .all(|(pt, &ct)| self.spn.encrypt_with_keys(pt as u16, subkeys) == ct)
    }

    /// Verifies a 20-hex-character candidate key against the
    /// codebook.
    pub fn test_key(&self, key: &str) -> Result<bool, String> {
        let subkeys = cipher::parse_key(key)?;

        Ok(self.verify_subkeys(&subkeys))
    }

    /// Merges the histograms of every pattern containing an S-box
    /// into the histogram of the pattern where it is the only active
    /// one, then returns the argmax entries of the merged counts.
    ///
    /// A wider pattern votes with its own argmax keys, masked down to
    /// the nibble in question, so paths with overlapping active
    /// positions sharpen the single-nibble estimate.
    fn probable_sbox_bits(
        &self,
        sbox_index: usize,
        pattern_hists: &IndexMap<u16, Histogram>,
    ) -> Vec<HistEntry> {
        let singleton: u16 = 1 << (3 - sbox_index);

        let mut main = match pattern_hists.get(&singleton) {
            Some(hist) => hist.clone(),
            None => return Vec::new(),
        };

        for (&state, hist) in pattern_hists {
            let pattern = ActivePattern::new(state);

            if pattern.active_count() < 2 || !pattern.contains(sbox_index) {
                continue;
            }

            for entry in max_entries(hist) {
                *main
                    .entry(entry.key & pattern::nibble_mask(sbox_index))
                    .or_insert(0) += entry.count;
            }
        }

        max_entries(&main)
    }

    /// Collects the key histogram for one round and one active
    /// pattern, summing the argmax votes of every best path that
    /// terminates in the pattern.
    fn probable_subkey(&self, round_num: usize, wanted: &ActivePattern) -> Histogram {
        let forward = round_num == 0;
        // The first subkey is attacked from the plaintext side, so
        // its paths span all rounds.
        let path_round = if forward { ROUNDS } else { round_num };

        let paths = search::best_paths(search::gen_paths(
            &self.spn,
            path_round,
            wanted,
            forward,
            self.verbose,
        ));

        if self.verbose >= 1 {
            eprintln!(
                "processing paths to s-boxes {:04x} in round {}: {}",
                wanted.mask(),
                round_num,
                paths.len()
            );
        }

        let mut progress = ProgressBar::new(paths.len(), self.verbose >= 1);
        let mut probable_keys = Histogram::default();

        for path in &paths {
            if self.verbose >= 2 {
                eprintln!(
                    "path input={:04x}, output={:04x}, mask={:04x}, prob={}",
                    path.input_diff,
                    path.output_diff,
                    pattern::active_mask(path.output_diff),
                    path.probability
                );
            }

            let hist = match round_num {
                4 => self.probable_last_subkey(path),
                2 | 3 => self.probable_middle_subkey(round_num, path),
                0 => self.probable_first_subkey(path),
                _ => unreachable!("round 1 is rejected before path processing"),
            };

            for entry in max_entries(&hist) {
                *probable_keys.entry(entry.key).or_insert(0) += entry.count;
            }

            progress.increment();
        }

        probable_keys
    }

    /// Histogram pass for the final round: partially decrypt the last
    /// substitution under every candidate and count the pairs that
    /// reproduce the path's output difference.
    fn probable_last_subkey(&self, path: &Path) -> Histogram {
        let partners = self.codebook.partners(path.input_diff, false);
        let output_mask = pattern::active_mask(path.output_diff);
        let candidates = pattern::subkey_candidates(output_mask);

        let mut hist = Histogram::default();
        let mut pairs = 0;

        for (i, &ct1) in self.codebook.forward().iter().enumerate() {
            let ct2 = partners[i];

            // Pairs disagreeing outside the active nibbles cannot
            // follow the path.
            if (ct1 ^ ct2) & !output_mask != 0 {
                continue;
            }

            pairs += 1;

            for &sk in &candidates {
                let u1 = self.spn.isubst(ct1 ^ sk);
                let u2 = self.spn.isubst(ct2 ^ sk);

                if (u1 ^ u2) & output_mask == path.output_diff {
                    *hist.entry(sk).or_insert(0) += 1;
                }
            }
        }

        if self.verbose >= 2 {
            eprintln!("valid pc pairs: {}", pairs);
        }

        hist
    }

    /// Histogram pass for the whitening key, run from the plaintext
    /// side: iterate over ciphertexts, look the plaintexts up in the
    /// inverse codebook, and push each trial key forward through the
    /// first substitution.
    fn probable_first_subkey(&self, path: &Path) -> Histogram {
        let partners = self.codebook.partners(path.input_diff, true);
        let output_mask = pattern::active_mask(path.output_diff);
        let candidates = pattern::subkey_candidates(output_mask);

        let mut hist = Histogram::default();
        let mut pairs = 0;

        for (i, &pt1) in self.codebook.inverse().iter().enumerate() {
            let pt2 = partners[i];

            if (pt1 ^ pt2) & !output_mask != 0 {
                continue;
            }

            pairs += 1;

            for &sk in &candidates {
                let u1 = self.spn.subst(pt1 ^ sk);
                let u2 = self.spn.subst(pt2 ^ sk);

                if (u1 ^ u2) & output_mask == path.output_diff {
                    *hist.entry(sk).or_insert(0) += 1;
                }
            }
        }

        if self.verbose >= 2 {
            eprintln!("valid pc pairs: {}", pairs);
        }

        hist
    }

    /// Histogram pass for a middle round. The recovered outer
    /// subkeys peel the rounds above the target; the codebook scan is
    /// split into contiguous chunks across worker threads, each with
    /// a private histogram merged into a shared one under a single
    /// lock on completion. The merge is a commutative sum, so worker
    /// ordering cannot change the result.
    fn probable_middle_subkey(&self, round_num: usize, path: &Path) -> Histogram {
        let partners = self.codebook.partners(path.input_diff, false);
        let output_mask = pattern::active_mask(path.output_diff);
        let output_diff = path.output_diff;
        let candidates = pattern::subkey_candidates(output_mask);

        let ciphertexts = self.codebook.forward();
        let shared = Mutex::new(Histogram::default());
        let chunk = SIZE / self.threads;

        crossbeam_utils::thread::scope(|scope| {
            for t in 0..self.threads {
                let start = t * chunk;
                let end = if t + 1 == self.threads {
                    SIZE
                } else {
                    start + chunk
                };

                let partners = &partners;
                let candidates = &candidates;
                let shared = &shared;

                scope.spawn(move |_| {
                    let mut hist = Histogram::default();

                    for i in start..end {
                        let mut c1 = self.spn.isubst(ciphertexts[i] ^ self.subkeys[ROUNDS]);
                        let mut c2 = self.spn.isubst(partners[i] ^ self.subkeys[ROUNDS]);

                        for j in (round_num + 1..ROUNDS).rev() {
                            c1 = self.spn.isubst(self.spn.itransp(c1 ^ self.subkeys[j]));
                            c2 = self.spn.isubst(self.spn.itransp(c2 ^ self.subkeys[j]));
                        }

                        if (c1 ^ c2) & !output_mask != 0 {
                            continue;
                        }

                        for &sk in candidates {
                            let u1 = self.spn.isubst(self.spn.itransp(c1 ^ sk));
                            let u2 = self.spn.isubst(self.spn.itransp(c2 ^ sk));

                            if (u1 ^ u2) & output_mask == output_diff {
                                *hist.entry(sk).or_insert(0) += 1;
                            }
                        }
                    }

                    let mut merged = shared.lock().expect("histogram lock poisoned");

                    for (key, count) in hist {
                        *merged.entry(key).or_insert(0) += count;
                    }
                });
            }
        })
        .expect("worker threads failed to join");

        shared.into_inner().expect("histogram lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbox::Sbox;

    const TUTORIAL_SBOX: &str = "14 4 13 1 2 15 11 8 3 10 6 12 5 9 0 7";
    const KEY: &str = "3a94d63fbca987654321";

    fn finder_for(key: &str, threads: usize) -> KeyFinder {
        let mut keyed = Spn::new(Sbox::from_spec(TUTORIAL_SBOX).unwrap());
        keyed.set_key(key).unwrap();

        let codebook = Codebook::from_cipher(&keyed).unwrap();

        // The finder only ever sees the unkeyed cipher; recovery
        // works from the codebook alone.
        let clean = Spn::new(Sbox::from_spec(TUTORIAL_SBOX).unwrap());

        KeyFinder::new(clean, codebook, Some(threads), false, false)
    }

    #[test]
    fn max_entries_break_ties_by_smallest_key() {
        let mut hist = Histogram::default();
        hist.insert(0x0300, 7);
        hist.insert(0x0100, 7);
        hist.insert(0x0200, 3);

        let entries = max_entries(&hist);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, 0x0100);
        assert_eq!(entries[1].key, 0x0300);
        assert_eq!(entries[0].count, 7);

        assert!(max_entries(&Histogram::default()).is_empty());
    }

    #[test]
    fn round_one_is_rejected() {
        let finder = finder_for(KEY, 1);

        assert!(finder.recover_round_subkey(1).is_err());
        assert!(finder.recover_round_subkey(5).is_err());
    }

    #[test]
    fn recovers_the_last_subkey() {
        let mut finder = finder_for(KEY, 1);

        assert_eq!(finder.recover_last_subkey().unwrap(), 0x4321);
    }

    #[test]
    fn recovers_the_first_subkey() {
        let mut finder = finder_for(KEY, 1);

        assert_eq!(finder.recover_first_subkey().unwrap(), 0x3a94);
    }

    #[test]
    fn second_subkey_search_needs_the_right_outer_keys() {
        let mut finder = finder_for(KEY, 1);
        finder.set_subkey(0, 0x3a94);
        finder.set_subkey(2, 0xbca9);
        finder.set_subkey(3, 0x8765);
        finder.set_subkey(4, 0x4321);

        assert_eq!(finder.recover_second_subkey().unwrap(), 0xd63f);

        // A wrong outer key must surface as a diagnosis, not a key.
        finder.set_subkey(4, 0x4322);
        assert!(finder.recover_second_subkey().is_err());
    }

    #[test]
    fn test_key_checks_the_codebook() {
        let finder = finder_for(KEY, 1);

        assert!(finder.test_key(KEY).unwrap());
        assert!(!finder.test_key("00000000000000000000").unwrap());
        assert!(finder.test_key("not a key").is_err());
    }

    #[test]
    fn parallel_pass_is_deterministic() {
        let reference = {
            let mut finder = finder_for(KEY, 1);
            finder.set_subkey(4, 0x4321);
            middle_histogram(&finder)
        };

        for &threads in &[2, 4, 8] {
            let mut finder = finder_for(KEY, threads);
            finder.set_subkey(4, 0x4321);

            assert_eq!(middle_histogram(&finder), reference);
        }
    }

    fn middle_histogram(finder: &KeyFinder) -> Histogram {
        let wanted = ActivePattern::new(0b0100);
        let paths = crate::search::best_paths(crate::search::gen_paths(
            &finder.spn,
            3,
            &wanted,
            false,
            0,
        ));

        finder.probable_middle_subkey(3, &paths[0])
    }

    #[test]
    fn recovers_the_full_key() {
        let mut finder = finder_for(KEY, *THREADS);

        assert_eq!(finder.recover_all().unwrap(), KEY);
        assert_eq!(finder.subkeys(), &[0x3a94, 0xd63f, 0xbca9, 0x8765, 0x4321]);
    }
}
