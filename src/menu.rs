use argp::FromArgs;

/// Read, write, and convert the binary formats used by EAD titles.
#[derive(FromArgs, Debug)]
pub struct Korok {
    /// Logging verbosity (1 = error .. 5 = trace).
    #[argp(option, short = 'v', default = "0")]
    pub verbose: usize,

    #[argp(subcommand)]
    pub nested: Modules,
}

#[derive(FromArgs, Debug)]
#[argp(subcommand)]
pub enum Modules {
    Yaz0(Yaz0Data),
    Sarc(SarcData),
    Byml(BymlData),
    Aamp(AampData),
}

/// Support for Yaz0 compression
#[derive(FromArgs, Debug)]
#[argp(subcommand, name = "yaz0")]
pub struct Yaz0Data {
    /// Decompress a Yaz0-compressed file
    #[argp(switch, short = 'd')]
    pub decompress: bool,

    /// Compress a file
    #[argp(switch, short = 'c')]
    pub compress: bool,

    /// Compression level, 6-9
    #[argp(option, short = 'l', default = "7")]
    pub level: u8,

    /// Input file to be processed
    #[argp(option, short = 'i')]
    pub input: String,

    /// Output file to write to
    #[argp(option, short = 'o')]
    pub output: Option<String>,
}

/// Support for SARC archives
#[derive(FromArgs, Debug)]
#[argp(subcommand, name = "sarc")]
pub struct SarcData {
    /// Extract all files from the archive
    #[argp(switch, short = 'x')]
    pub extract: bool,

    /// List the files in the archive
    #[argp(switch, short = 'l')]
    pub list: bool,

    /// Archive to be processed
    #[argp(option, short = 'i')]
    pub input: String,

    /// Output directory for extraction
    #[argp(option, short = 'o')]
    pub output: Option<String>,
}

/// Support for binary YAML documents
#[derive(FromArgs, Debug)]
#[argp(subcommand, name = "byml")]
pub struct BymlData {
    /// Convert a binary document to YAML
    #[argp(switch, short = 'y')]
    pub to_yaml: bool,

    /// Convert a YAML document to binary
    #[argp(switch, short = 'b')]
    pub to_binary: bool,

    /// Write big-endian output (Wii U)
    #[argp(switch, short = 'e')]
    pub big_endian: bool,

    /// BYML version for binary output
    #[argp(option, default = "2")]
    pub version: u16,

    /// Input file to be processed
    #[argp(option, short = 'i')]
    pub input: String,

    /// Output file to write to
    #[argp(option, short = 'o')]
    pub output: Option<String>,
}

/// Support for binary parameter archives
#[derive(FromArgs, Debug)]
#[argp(subcommand, name = "aamp")]
pub struct AampData {
    /// Convert a binary archive to YAML
    #[argp(switch, short = 'y')]
    pub to_yaml: bool,

    /// Convert a YAML document to binary
    #[argp(switch, short = 'b')]
    pub to_binary: bool,

    /// Input file to be processed
    #[argp(option, short = 'i')]
    pub input: String,

    /// Output file to write to
    #[argp(option, short = 'o')]
    pub output: Option<String>,
}

pub fn exactly_one_true(bools: &[bool]) -> Option<usize> {
    let mut count = 0;
    let mut index = 0;

    for (i, &val) in bools.iter().enumerate() {
        if val {
            count += 1;
            index = i;
        }

        if count > 1 {
            return None;
        }
    }

    if count == 1 {
        Some(index)
    } else {
        None
    }
}
