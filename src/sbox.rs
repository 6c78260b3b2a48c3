//! The 4-bit substitution box and its difference distribution tables.

/// A 4-bit S-box together with its inverse and both orientations of
/// its difference distribution table.
#[derive(Clone)]
pub struct Sbox {
    table: [u16; 16],
    inverse: [u16; 16],
    ddt: [[u16; 16]; 16],
    ddt_transposed: [[u16; 16]; 16],
}

impl Sbox {
    /// Parses an S-box description: 16 space-separated decimal values
    /// forming a permutation of 0..15, e.g.
    /// `"6 10 11 15 12 2 13 5 3 8 0 1 14 7 4 9"`. Position `i` of the
    /// list is the image of `i`.
    pub fn from_spec(spec: &str) -> Result<Sbox, String> {
        let mut table = [0u16; 16];
        let mut count = 0;

        for part in spec.split_whitespace() {
            if count == 16 {
                return Err(String::from("S-box description has more than 16 entries"));
            }

            let value: u16 = part
                .parse()
                .map_err(|_| format!("could not parse S-box entry '{}'", part))?;

            if value > 0xf {
                return Err(format!("S-box entry {} out of range", value));
            }

            table[count] = value;
            count += 1;
        }

        if count != 16 {
            return Err(format!("S-box description has {} entries, expected 16", count));
        }

        let mut inverse = [0u16; 16];
        let mut seen = [false; 16];

        for (x, &y) in table.iter().enumerate() {
            if seen[y as usize] {
                return Err(format!("S-box is not a permutation: {} occurs twice", y));
            }

            seen[y as usize] = true;
            inverse[y as usize] = x as u16;
        }

        let (ddt, ddt_transposed) = Sbox::generate_ddt(&table);

        Ok(Sbox {
            table,
            inverse,
            ddt,
            ddt_transposed,
        })
    }

    /// Generates the DDT and its transpose. `ddt[dx][dy]` counts the
    /// inputs `x` with `S(x) ^ S(x ^ dx) = dy`.
    fn generate_ddt(table: &[u16; 16]) -> ([[u16; 16]; 16], [[u16; 16]; 16]) {
        let mut ddt = [[0u16; 16]; 16];
        let mut ddt_transposed = [[0u16; 16]; 16];

        for x in 0..16 {
            let y = table[x];

            for dx in 0..16 {
                let dy = y ^ table[x ^ dx];

                ddt[dx][dy as usize] += 1;
                ddt_transposed[dy as usize][dx] += 1;
            }
        }

        (ddt, ddt_transposed)
    }

    /// Applies the S-box to a 4-bit value.
    pub fn apply(&self, x: u16) -> u16 {
        self.table[(x & 0xf) as usize]
    }

    /// Applies the inverse S-box to a 4-bit value.
    pub fn apply_inv(&self, x: u16) -> u16 {
        self.inverse[(x & 0xf) as usize]
    }

    /// The difference distribution table, indexed `[dx][dy]`.
    pub fn ddt(&self) -> &[[u16; 16]; 16] {
        &self.ddt
    }

    /// The same counts indexed `[dy][dx]`.
    pub fn ddt_transposed(&self) -> &[[u16; 16]; 16] {
        &self.ddt_transposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUTORIAL_SBOX: &str = "14 4 13 1 2 15 11 8 3 10 6 12 5 9 0 7";

    #[test]
    fn parses_a_description() {
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        assert_eq!(sbox.apply(0x0), 0xe);
        assert_eq!(sbox.apply(0x6), 0xb);
        assert_eq!(sbox.apply(0xf), 0x7);
    }

    #[test]
    fn rejects_bad_descriptions() {
        assert!(Sbox::from_spec("").is_err());
        assert!(Sbox::from_spec("1 2 3").is_err());
        assert!(Sbox::from_spec("0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 16").is_err());
        assert!(Sbox::from_spec("0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 14").is_err());
        assert!(Sbox::from_spec("0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 0").is_err());
        assert!(Sbox::from_spec("0 1 2 three 4 5 6 7 8 9 10 11 12 13 14 15").is_err());
    }

    #[test]
    fn inverse_undoes_the_table() {
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        for v in 0..16 {
            assert_eq!(sbox.apply_inv(sbox.apply(v)), v);
        }
    }

    #[test]
    fn ddt_rows_sum_to_sixteen() {
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        for dx in 0..16 {
            let sum: u16 = sbox.ddt()[dx].iter().sum();
            assert_eq!(sum, 16);
        }
    }

    #[test]
    fn zero_row_is_degenerate() {
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        assert_eq!(sbox.ddt()[0][0], 16);

        for dy in 1..16 {
            assert_eq!(sbox.ddt()[0][dy], 0);
        }
    }

    #[test]
    fn known_high_probability_differentials() {
        // The classic differentials of this S-box: 0xb -> 0x2 holds
        // for 8 of 16 inputs, 0x4 -> 0x6 and 0x2 -> 0x5 for 6 of 16.
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        assert_eq!(sbox.ddt()[0xb][0x2], 8);
        assert_eq!(sbox.ddt()[0x4][0x6], 6);
        assert_eq!(sbox.ddt()[0x2][0x5], 6);
    }

    #[test]
    fn transposed_table_swaps_indices() {
        let sbox = Sbox::from_spec(TUTORIAL_SBOX).unwrap();

        for dx in 0..16 {
            for dy in 0..16 {
                assert_eq!(sbox.ddt()[dx][dy], sbox.ddt_transposed()[dy][dx]);
            }
        }
    }
}
