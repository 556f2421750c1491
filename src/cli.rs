use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about = "Helper tools for chunking POD5 files before basecalling", long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[clap(about = "Deduplicate read ids and split a POD5 file into bounded chunks")]
    ChunkPod5 {
        #[clap(short, long, parse(from_os_str), default_value = "chunks")]
        /// Output directory for chunk files
        out_dir: PathBuf,

        #[clap(short, long, default_value_t = 1_000_000)]
        /// Maximum number of read ids per chunk
        batch_size: usize,

        #[clap(short, long)]
        /// Chunk file prefix (default is the input file stem)
        prefix: Option<String>,

        #[clap(short, long, default_value_t = 600)]
        /// Per-chunk extraction timeout in seconds
        timeout: u64,

        #[clap(long)]
        /// Treat a chunk read id count mismatch as a hard failure
        strict: bool,

        #[clap(long, default_value = "pod5")]
        /// Name or path of the pod5 executable
        pod5_bin: String,

        #[clap(parse(from_os_str))]
        /// Input POD5 file from MinKNOW
        input_pod5: PathBuf,
    },
    #[clap(about = "Report read ids that occur more than once in a POD5 file")]
    DupReport {
        #[clap(short, long, parse(from_os_str))]
        /// Write the report here instead of stdout
        output: Option<PathBuf>,

        #[clap(long, default_value = "pod5")]
        /// Name or path of the pod5 executable
        pod5_bin: String,

        #[clap(parse(from_os_str))]
        /// Input POD5 file from MinKNOW
        input_pod5: PathBuf,
    },
}
