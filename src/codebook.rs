//! Chosen-plaintext codebook handling: loading, generation and the
//! partner-ciphertext tables consumed by the histogram passes.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};

use crate::cipher::Spn;

/// Number of 16-bit blocks, and thus of codebook entries.
pub const SIZE: usize = 1 << 16;

/// The complete plaintext-to-ciphertext mapping for a fixed key,
/// together with its inverse.
pub struct Codebook {
    forward: Vec<u16>,
    inverse: Vec<u16>,
}

impl Codebook {
    /// Reads a codebook from a file holding one 4-digit hexadecimal
    /// ciphertext per line, line `i` being the ciphertext of
    /// plaintext `i`. The file must have exactly 65536 lines.
    pub fn from_file(path: &str) -> Result<Codebook, String> {
        let file = File::open(path).map_err(|e| format!("could not open {}: {}", path, e))?;

        let mut forward = Vec::with_capacity(SIZE);
        let mut inverse = vec![0u16; SIZE];

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| format!("could not read {}: {}", path, e))?;

            if forward.len() == SIZE {
                return Err(format!("{} has more than {} lines", path, SIZE));
            }

            let ct = u16::from_str_radix(line.trim(), 16)
                .map_err(|_| format!("could not parse line {} of {}: '{}'", i, path, line))?;

            inverse[ct as usize] = forward.len() as u16;
            forward.push(ct);
        }

        if forward.len() != SIZE {
            return Err(format!(
                "{} has {} lines, expected {}",
                path,
                forward.len(),
                SIZE
            ));
        }

        Ok(Codebook { forward, inverse })
    }

    /// Builds the codebook by encrypting every plaintext under the
    /// keyed cipher. Every block is round-tripped through decryption
    /// to catch a broken cipher before the codebook is used.
    pub fn from_cipher(spn: &Spn) -> Result<Codebook, String> {
        let mut forward = Vec::with_capacity(SIZE);
        let mut inverse = vec![0u16; SIZE];

        for pt in 0..SIZE {
            let ct = spn.encrypt(pt as u16);

            if spn.decrypt(ct) != pt as u16 {
                return Err(format!("decryption mismatch for block {:04x}", pt));
            }

            inverse[ct as usize] = pt as u16;
            forward.push(ct);
        }

        Ok(Codebook { forward, inverse })
    }

    /// Writes the codebook in the line-per-plaintext format read by
    /// `from_file`.
    pub fn write_to(&self, path: &str) -> Result<(), String> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(path)
            .map_err(|e| format!("could not create {}: {}", path, e))?;

        let mut writer = BufWriter::new(file);

        for &ct in &self.forward {
            writeln!(writer, "{:04x}", ct).map_err(|e| format!("could not write {}: {}", path, e))?;
        }

        Ok(())
    }

    /// The plaintext-to-ciphertext table.
    pub fn forward(&self) -> &[u16] {
        &self.forward
    }

    /// The ciphertext-to-plaintext table.
    pub fn inverse(&self) -> &[u16] {
        &self.inverse
    }

    /// Materialises the partner table for an input difference: entry
    /// `i` is the ciphertext of plaintext `i ^ diff`, or in the
    /// forward direction the plaintext of ciphertext `i ^ diff`.
    pub fn partners(&self, diff: u16, forward: bool) -> Vec<u16> {
        let table = if forward { &self.inverse } else { &self.forward };

        (0..SIZE).map(|i| table[(i as u16 ^ diff) as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbox::Sbox;
    use std::fs;

    const TUTORIAL_SBOX: &str = "14 4 13 1 2 15 11 8 3 10 6 12 5 9 0 7";

    fn keyed_spn() -> Spn {
        let mut spn = Spn::new(Sbox::from_spec(TUTORIAL_SBOX).unwrap());
        spn.set_key("3a94d63fbca987654321").unwrap();
        spn
    }

    #[test]
    fn generation_matches_the_cipher() {
        let spn = keyed_spn();
        let codebook = Codebook::from_cipher(&spn).unwrap();

        assert_eq!(codebook.forward().len(), SIZE);
        assert_eq!(codebook.forward()[0x1234], spn.encrypt(0x1234));
    }

    #[test]
    fn inverse_inverts_forward() {
        let codebook = Codebook::from_cipher(&keyed_spn()).unwrap();

        for ct in (0..SIZE).step_by(97) {
            let pt = codebook.inverse()[ct] as usize;
            assert_eq!(codebook.forward()[pt], ct as u16);
        }
    }

    #[test]
    fn partners_apply_the_difference() {
        let codebook = Codebook::from_cipher(&keyed_spn()).unwrap();
        let partners = codebook.partners(0x0b00, false);

        for i in (0..SIZE).step_by(101) {
            assert_eq!(partners[i], codebook.forward()[i ^ 0x0b00]);
        }

        let partners = codebook.partners(0x0b00, true);

        for i in (0..SIZE).step_by(101) {
            assert_eq!(partners[i], codebook.inverse()[i ^ 0x0b00]);
        }
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join("diffkey-codebook-roundtrip.txt");
        let path = path.to_str().unwrap().to_string();

        let original = Codebook::from_cipher(&keyed_spn()).unwrap();
        original.write_to(&path).unwrap();

        let loaded = Codebook::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(original.forward(), loaded.forward());
        assert_eq!(original.inverse(), loaded.inverse());
    }

    #[test]
    fn rejects_truncated_files() {
        let path = std::env::temp_dir().join("diffkey-codebook-short.txt");
        fs::write(&path, "0001\n0002\n").unwrap();

        let result = Codebook::from_file(path.to_str().unwrap());
        fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_unparseable_lines() {
        let path = std::env::temp_dir().join("diffkey-codebook-bad.txt");
        fs::write(&path, "zzzz\n").unwrap();

        let result = Codebook::from_file(path.to_str().unwrap());
        fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_files() {
        assert!(Codebook::from_file("/nonexistent/diffkey-codebook").is_err());
    }
}
