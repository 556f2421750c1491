mod _chunking;
mod chunk_pod5;
mod cli;
mod dup_report;
mod store;
use crate::cli::{Cli, Commands};
use clap::Parser;
use env_logger::Env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Cli::parse();

    match args.command {
        Commands::ChunkPod5 {
            out_dir,
            batch_size,
            prefix,
            timeout,
            strict,
            pod5_bin,
            input_pod5,
        } => crate::chunk_pod5::run(
            input_pod5, out_dir, batch_size, prefix, timeout, strict, pod5_bin,
        )?,
        Commands::DupReport {
            output,
            pod5_bin,
            input_pod5,
        } => crate::dup_report::run(input_pod5, output, pod5_bin)?,
    }
    Ok(())
}
