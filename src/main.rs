//! Diffkey recovers the round subkeys of a toy SPN block cipher by
//! differential cryptanalysis of a complete chosen-plaintext
//! codebook, and can generate such codebooks for a known key.

#[macro_use]
extern crate lazy_static;

mod options;
pub mod cipher;
pub mod codebook;
pub mod finder;
pub mod pattern;
pub mod sbox;
pub mod search;
pub mod utility;

use std::process;

use structopt::StructOpt;

use crate::cipher::{Spn, ROUNDS};
use crate::codebook::Codebook;
use crate::finder::KeyFinder;
use crate::options::DiffkeyOptions;
use crate::sbox::Sbox;

fn main() {
    if let Err(message) = run(DiffkeyOptions::from_args()) {
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn run(options: DiffkeyOptions) -> Result<(), String> {
    match options {
        DiffkeyOptions::Recover {
            codebook,
            sbox,
            threads,
            three_active,
            four_active,
            first,
            last,
            round,
            given,
            all,
            verify,
            ddt,
            verbose,
        } => {
            let sbox = Sbox::from_spec(&sbox)?;

            if ddt {
                for row in sbox.ddt() {
                    let cells: Vec<String> = row.iter().map(|c| format!("{:2}", c)).collect();
                    println!("{}", cells.join(" "));
                }

                return Ok(());
            }

            let spn = Spn::new(sbox);
            let codebook = Codebook::from_file(&codebook)?;
            let three_active = three_active || four_active;

            let mut finder = KeyFinder::new(spn, codebook, threads, three_active, four_active);
            finder.set_verbose(verbose);

            if let Some(key) = verify {
                return if finder.test_key(&key)? {
                    eprintln!("key is ok");
                    Ok(())
                } else {
                    Err(String::from("key is wrong"))
                };
            }

            eprintln!("will use {} thread(s)", finder.threads());

            if first {
                let subkey = finder.recover_first_subkey()?;
                println!("{:04x}", subkey);
            } else if last {
                let subkey = finder.recover_last_subkey()?;
                println!("{:04x}", subkey);
            } else if let Some(round) = round {
                if round > ROUNDS {
                    return Err(format!("round {} out of range", round));
                }

                if round <= 1 {
                    return Err(String::from(
                        "rounds 0 and 1 are not recoverable from given outer keys; \
                         use --first or --find-all",
                    ));
                }

                if given.len() != ROUNDS - round {
                    return Err(format!(
                        "recovering round {} needs {} given outer subkeys, got {}",
                        round,
                        ROUNDS - round,
                        given.len()
                    ));
                }

                for (i, text) in given.iter().enumerate() {
                    let subkey = u16::from_str_radix(text, 16)
                        .map_err(|_| format!("could not parse given subkey '{}'", text))?;

                    eprintln!("using given key[{}] = {:04x}", ROUNDS - i, subkey);
                    finder.set_subkey(ROUNDS - i, subkey);
                }

                let subkey = finder.recover_round_subkey(round)?;
                println!("key[{}] = {:04x}", round, subkey);
            } else if all {
                let key = finder.recover_all()?;
                println!("full key: {}", key);
            } else {
                return Err(String::from("nothing to do; see --help"));
            }

            Ok(())
        }
        DiffkeyOptions::Generate { sbox, key, output } => {
            let mut spn = Spn::new(Sbox::from_spec(&sbox)?);
            spn.set_key(&key)?;

            let codebook = Codebook::from_cipher(&spn)?;
            codebook.write_to(&output)?;

            eprintln!("ok");
            Ok(())
        }
    }
}
