//! The toy substitution-permutation network under attack.

use crate::sbox::Sbox;

/// Number of cipher rounds.
pub const ROUNDS: usize = 4;

/// Number of 16-bit round subkeys; one more than the round count
/// because of the initial whitening key.
pub const NUM_SUBKEYS: usize = ROUNDS + 1;

/// A five-subkey SPN over 16-bit blocks: four 4-bit S-boxes per
/// round with a bit transposition between rounds. The final round
/// omits the transposition.
#[derive(Clone)]
pub struct Spn {
    sbox: Sbox,
    subkeys: [u16; NUM_SUBKEYS],
}

impl Spn {
    /// Creates the cipher with an all-zero key.
    pub fn new(sbox: Sbox) -> Spn {
        Spn {
            sbox,
            subkeys: [0; NUM_SUBKEYS],
        }
    }

    /// Loads a key given as 20 hexadecimal characters, 4 per subkey,
    /// whitening key first.
    pub fn set_key(&mut self, key: &str) -> Result<(), String> {
        self.subkeys = parse_key(key)?;
        Ok(())
    }

    pub fn sbox(&self) -> &Sbox {
        &self.sbox
    }

    /// Applies the S-box to each nibble of a 16-bit word.
    pub fn subst(&self, x: u16) -> u16 {
        let mut y = self.sbox.apply(x & 0xf);

        y ^= self.sbox.apply((x >> 4) & 0xf) << 4;
        y ^= self.sbox.apply((x >> 8) & 0xf) << 8;
        y ^= self.sbox.apply((x >> 12) & 0xf) << 12;

        y
    }

    /// Applies the inverse S-box to each nibble of a 16-bit word.
    pub fn isubst(&self, x: u16) -> u16 {
        let mut y = self.sbox.apply_inv(x & 0xf);

        y ^= self.sbox.apply_inv((x >> 4) & 0xf) << 4;
        y ^= self.sbox.apply_inv((x >> 8) & 0xf) << 8;
        y ^= self.sbox.apply_inv((x >> 12) & 0xf) << 12;

        y
    }

    /// The bit transposition between rounds: bit `4r + c` moves to
    /// bit `4c + r`, making the permutation an involution.
    pub fn transp(&self, x: u16) -> u16 {
        let mut y = x & 0x8421;

        y ^= (x & 0x0842) << 3;
        y ^= (x & 0x0084) << 6;
        y ^= (x & 0x0008) << 9;
        y ^= (x & 0x1000) >> 9;
        y ^= (x & 0x2100) >> 6;
        y ^= (x & 0x4210) >> 3;

        y
    }

    /// The inverse transposition, which is the transposition itself.
    pub fn itransp(&self, x: u16) -> u16 {
        self.transp(x)
    }

    /// Encrypts a block under the loaded key.
    pub fn encrypt(&self, pt: u16) -> u16 {
        self.encrypt_with_keys(pt, &self.subkeys)
    }

    /// Decrypts a block under the loaded key.
    pub fn decrypt(&self, ct: u16) -> u16 {
        self.decrypt_with_keys(ct, &self.subkeys)
    }

    /// Encryption under an explicit subkey array.
    pub fn encrypt_with_keys(&self, pt: u16, subkeys: &[u16; NUM_SUBKEYS]) -> u16 {
        let mut x = pt ^ subkeys[0];

        for &subkey in subkeys.iter().take(ROUNDS).skip(1) {
            x = self.subst(x);
            x = self.transp(x);
            x ^= subkey;
        }

        x = self.subst(x);

        x ^ subkeys[ROUNDS]
    }

    /// Decryption under an explicit subkey array. The exhaustive
    /// second-subkey search probes thousands of key variants and
    /// must not rekey the cipher for each.
    pub fn decrypt_with_keys(&self, ct: u16, subkeys: &[u16; NUM_SUBKEYS]) -> u16 {
        let mut x = ct ^ subkeys[ROUNDS];
        x = self.isubst(x);

        for i in (1..ROUNDS).rev() {
            x ^= subkeys[i];
            x = self.itransp(x);
            x = self.isubst(x);
        }

        x ^ subkeys[0]
    }
}

/// Parses a 20-character hexadecimal key into five subkeys.
pub fn parse_key(key: &str) -> Result<[u16; NUM_SUBKEYS], String> {
    if !key.is_ascii() || key.len() != 20 {
        return Err(format!("key must be 20 hex characters, got '{}'", key));
    }

    let mut subkeys = [0u16; NUM_SUBKEYS];

    for (i, subkey) in subkeys.iter_mut().enumerate() {
        *subkey = u16::from_str_radix(&key[4 * i..4 * i + 4], 16)
            .map_err(|_| format!("could not parse subkey {} of '{}'", i, key))?;
    }

    Ok(subkeys)
}

/// Formats five subkeys as a 20-character lowercase hex key string.
pub fn format_key(subkeys: &[u16; NUM_SUBKEYS]) -> String {
    subkeys.iter().map(|k| format!("{:04x}", k)).collect()
}
