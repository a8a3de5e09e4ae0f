/*!
# Segmentation Evaluation CLI

Reads two multi-page TIFF label volumes (a ground truth and a
segmentation), casts their samples to `u64`, computes the four agreement
metrics, and writes them to stdout as JSON. Exits with 0 on success and 1
on any I/O or validation failure.
*/

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ndarray::Array3;
use tiff::decoder::{Decoder, DecodingResult};

use aquifer::core::error::{AquiferError, Result};
use aquifer::core::volume::LabelVolume;
use aquifer::metrics::evaluate;

#[derive(Parser)]
#[command(
    name = "evaluateseg",
    about = "Compare a segmentation against a ground truth (Rand and VOI metrics)"
)]
struct Cli {
    /// Ground-truth label volume (multi-page TIFF).
    #[arg(short = 'g', long = "ground-truth", value_name = "GT.tif")]
    ground_truth: PathBuf,

    /// Segmentation label volume (multi-page TIFF).
    #[arg(short = 's', long = "segmentation", value_name = "SEG.tif")]
    segmentation: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("evaluateseg: {}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let ground_truth = read_label_volume(&cli.ground_truth)?;
    let segmentation = read_label_volume(&cli.segmentation)?;
    let scores = evaluate(&segmentation.view(), &ground_truth.view())?;
    println!("{}", serde_json::to_string_pretty(&scores)?);
    Ok(())
}

/// Reads a multi-page TIFF into a `(pages, height, width)` label volume,
/// casting any integer sample format to `u64`.
fn read_label_volume(path: &Path) -> Result<LabelVolume> {
    let file = File::open(path)
        .map_err(|e| AquiferError::io_error(format!("{}: {}", path.display(), e)))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| AquiferError::io_error(format!("{}: {}", path.display(), e)))?;

    let mut pages: Vec<Vec<u64>> = Vec::new();
    let mut dimensions = None;
    loop {
        let (width, height) = decoder
            .dimensions()
            .map_err(|e| AquiferError::io_error(format!("{}: {}", path.display(), e)))?;
        let expected = *dimensions.get_or_insert((width, height));
        if (width, height) != expected {
            return Err(AquiferError::shape_mismatch(format!(
                "{}: page {} is {}x{} but the first page is {}x{}",
                path.display(),
                pages.len(),
                width,
                height,
                expected.0,
                expected.1
            )));
        }
        let image = decoder
            .read_image()
            .map_err(|e| AquiferError::io_error(format!("{}: {}", path.display(), e)))?;
        pages.push(cast_samples(path, image)?);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| AquiferError::io_error(format!("{}: {}", path.display(), e)))?;
    }

    let (width, height) = dimensions.unwrap_or((0, 0));
    let depth = pages.len();
    let flat: Vec<u64> = pages.into_iter().flatten().collect();
    Array3::from_shape_vec((depth, height as usize, width as usize), flat).map_err(|e| {
        AquiferError::shape_mismatch(format!("{}: inconsistent page data: {}", path.display(), e))
    })
}

fn cast_samples(path: &Path, image: DecodingResult) -> Result<Vec<u64>> {
    let samples = match image {
        DecodingResult::U8(v) => v.into_iter().map(u64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(u64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(u64::from).collect(),
        DecodingResult::U64(v) => v,
        DecodingResult::I8(v) => v.into_iter().map(|s| s as u64).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|s| s as u64).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as u64).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as u64).collect(),
        _ => {
            return Err(AquiferError::invalid_input(format!(
                "{}: floating-point samples cannot be used as labels",
                path.display()
            )));
        }
    };
    Ok(samples)
}
