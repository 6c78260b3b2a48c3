//! Differential path search through the round structure.

use crate::cipher::Spn;
use crate::pattern::{self, ActivePattern};

/// A multi-round differential: the difference fed to the first
/// round, the difference at the target round, and the joint
/// probability of the chain under round independence.
#[derive(Clone, Debug)]
pub struct Path {
    pub input_diff: u16,
    pub output_diff: u16,
    pub probability: f64,
}

/// Enumerates the differentials terminating at round `from_round`
/// with exactly the requested active pattern: every difference with
/// that exact support is taken as a terminal and propagated round by
/// round to the input of the first round.
pub fn gen_paths(
    spn: &Spn,
    from_round: usize,
    wanted: &ActivePattern,
    forward: bool,
    verbose: u8,
) -> Vec<Path> {
    // Candidates cover all values supported inside the mask; the
    // per-nibble masks cut this down to exact support, so a pattern
    // with two active S-boxes never yields a one-nibble difference.
    let mut terminals: Vec<u16> = pattern::subkey_candidates(wanted.mask())
        .into_iter()
        .filter(|&u| wanted.nibble_masks().iter().all(|&m| u & m != 0))
        .collect();

    terminals.sort_unstable();

    let mut paths = Vec::with_capacity(terminals.len());

    for u in terminals {
        let mut prev_round_in_diff = u;
        let mut probability = 1.0;

        // The terminal difference already fixes its own round.
        for r in (1..from_round).rev() {
            prev_round_in_diff =
                find_path_for_round(spn, r, prev_round_in_diff, &mut probability, forward, verbose);
        }

        if verbose >= 3 {
            eprintln!(
                "path candidate: input={:04x} output={:04x} probability={}",
                prev_round_in_diff, u, probability
            );
        }

        paths.push(Path {
            input_diff: prev_round_in_diff,
            output_diff: u,
            probability,
        });
    }

    paths
}

/// Extends a differential one round toward the input: undoes the
/// transposition, then picks for every active S-box a maximum-count
/// difference from the distribution table, breaking ties toward the
/// candidate that leaves the fewest S-boxes active one round further
/// on.
fn find_path_for_round(
    spn: &Spn,
    round_num: usize,
    prev_round_in_diff: u16,
    probability: &mut f64,
    forward: bool,
    verbose: u8,
) -> u16 {
    let table = if forward {
        spn.sbox().ddt_transposed()
    } else {
        spn.sbox().ddt()
    };

    let round_out_diff = spn.itransp(prev_round_in_diff);
    let mut round_in_diff = 0;

    for sbox_index in pattern::active_positions(round_out_diff) {
        let dy = pattern::nibble_value(sbox_index, round_out_diff) as usize;

        let max_count = (1..16).map(|dx| table[dx][dy]).max().unwrap_or(0);
        *probability *= f64::from(max_count) / 16.0;

        let candidates: Vec<usize> = (1..16).filter(|&dx| table[dx][dy] == max_count).collect();

        // Whichever candidate lands here decides which S-boxes the
        // round before has to cover; take the narrowest. The scan is
        // kept even though the first candidate tends to win.
        let mut lowest_active = 5;

        for dx in candidates {
            let extended = round_in_diff | pattern::place_nibble(sbox_index, dx as u16);
            let next_round_out = spn.itransp(extended);
            let next_active = pattern::active_count(next_round_out);

            if verbose >= 3 {
                eprintln!(
                    "\tround {}: sbox={} dx={} dy={} count={} next_out={:04x} next_active={}",
                    round_num, sbox_index, dx, dy, max_count, next_round_out, next_active
                );
            }

            if next_active < lowest_active {
                lowest_active = next_active;
                round_in_diff = extended;
            }
        }
    }

    round_in_diff
}

/// Keeps the paths attaining the maximum probability.
pub fn best_paths(paths: Vec<Path>) -> Vec<Path> {
    let best = paths.iter().map(|p| p.probability).fold(0.0, f64::max);

    paths
        .into_iter()
        .filter(|p| p.probability == best)
        .collect()
}
