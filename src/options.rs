use structopt::StructOpt;

#[derive(Clone, StructOpt)]
#[structopt(
    name = "diffkey",
    about = "Recover the round subkeys of a toy SPN cipher by differential cryptanalysis \
             of a chosen-plaintext codebook."
)]
pub enum DiffkeyOptions {
    #[structopt(name = "recover")]
    /// Recover subkeys from a codebook.
    Recover {
        /// File with one 4-digit hex ciphertext per line; line i is
        /// the ciphertext of plaintext i.
        codebook: String,

        /// Space-separated decimal S-box values in 0..15, e.g.
        /// "6 10 11 15 12 2 13 5 3 8 0 1 14 7 4 9".
        sbox: String,

        #[structopt(short = "t", long = "threads")]
        /// Number of worker threads for the middle-round passes
        /// (default: all logical CPUs).
        threads: Option<usize>,

        #[structopt(long = "heur3")]
        /// Also use patterns with 3 active S-boxes for the middle
        /// rounds. More accurate, roughly 10x slower.
        three_active: bool,

        #[structopt(long = "heur4")]
        /// Also use patterns with 4 active S-boxes (implies --heur3).
        /// Best accuracy, slowest.
        four_active: bool,

        #[structopt(short = "f", long = "first")]
        /// Recover the first subkey only.
        first: bool,

        #[structopt(short = "l", long = "last")]
        /// Recover the last subkey only.
        last: bool,

        #[structopt(short = "r", long = "round")]
        /// Recover the subkey of the given round; needs --given for
        /// every later round.
        round: Option<usize>,

        #[structopt(long = "given", use_delimiter = true)]
        /// Already known subkeys as 4-digit hex values, last round
        /// first, e.g. --given 4321,8765 to recover round 2.
        given: Vec<String>,

        #[structopt(short = "a", long = "find-all")]
        /// Recover all five subkeys.
        all: bool,

        #[structopt(long = "verify")]
        /// Test a 20-character hex key against the codebook instead
        /// of recovering one.
        verify: Option<String>,

        #[structopt(short = "d", long = "ddt")]
        /// Print the difference distribution table of the S-box and
        /// exit.
        ddt: bool,

        #[structopt(short = "v", parse(from_occurrences))]
        /// Verbosity; repeat for more detail.
        verbose: u8,
    },

    #[structopt(name = "generate")]
    /// Generate the codebook for a known key.
    Generate {
        /// Space-separated decimal S-box values in 0..15.
        sbox: String,

        /// Key as 20 hexadecimal characters, whitening subkey first.
        key: String,

        /// Output file; one ciphertext per line.
        output: String,
    },
}
