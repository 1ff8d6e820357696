use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use log::info;

use pdfmerge::pipeline::human_size;
use pdfmerge::{CancellationToken, Result, compress_bytes, merge_to_bytes};

/// Merge PDF documents and shrink them by recompressing their images.
#[derive(Debug, Parser)]
#[command(version, author, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Concatenate documents, pages in the order the files are given
    Merge {
        #[arg(short, long, value_name = "output file")]
        output: PathBuf,
        #[arg(required = true, value_name = "input files")]
        inputs: Vec<PathBuf>,
    },
    /// Recompress the images of a document as JPEG
    Compress {
        #[arg(short, long, value_name = "input file")]
        input: PathBuf,
        #[arg(short, long, value_name = "output file")]
        output: PathBuf,
        /// JPEG quality, 1 to 100
        #[arg(short, long, default_value_t = 50)]
        quality: u8,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Merge { output, inputs } => {
            let mut sources = vec![];
            for path in &inputs {
                sources.push((path.display().to_string(), std::fs::read(path)?));
            }
            let named: Vec<(&str, &[u8])> = sources
                .iter()
                .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
                .collect();
            let order: Vec<&str> = named.iter().map(|(name, _)| *name).collect();

            info!("merging {} documents", named.len());
            let merged = merge_to_bytes(&named, &order)?;
            std::fs::write(&output, &merged.bytes)?;
            println!("{} ({})", output.display(), human_size(merged.size));
        }
        Command::Compress { input, output, quality } => {
            let bytes = std::fs::read(&input)?;
            info!("compressing {} at quality {}", input.display(), quality);
            let compressed = compress_bytes(&bytes, quality, &CancellationToken::new())?;
            std::fs::write(&output, &compressed.bytes)?;
            let result = compressed.result;
            println!(
                "{} -> {} ({:.1}% smaller)",
                human_size(result.size_before),
                human_size(result.size_after),
                result.reduction_percent
            );
        }
    }
    Ok(())
}
