//! Byte-level entry points: PDF bytes in, PDF bytes out.

use log::info;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::recompress::{CancellationToken, Quality, Recompressor};
use crate::{Document, Error, Result, merge_named};

/// A merged document, serialized.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub bytes: Vec<u8>,
    pub size: usize,
}

/// Sizes before and after compression.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompressionResult {
    pub size_before: usize,
    pub size_after: usize,
    /// `(1 - after / before) * 100`, negative when the file grew.
    pub reduction_percent: f64,
}

impl CompressionResult {
    pub fn new(size_before: usize, size_after: usize) -> CompressionResult {
        let reduction_percent = if size_before == 0 {
            0.0
        } else {
            (1.0 - size_after as f64 / size_before as f64) * 100.0
        };
        CompressionResult {
            size_before,
            size_after,
            reduction_percent,
        }
    }
}

/// A compressed document together with its size report.
#[derive(Debug, Clone)]
pub struct CompressionOutput {
    pub bytes: Vec<u8>,
    pub result: CompressionResult,
}

/// Load the named sources, merge them in `order`, drop unreachable objects
/// and serialize the result.
pub fn merge_to_bytes(sources: &[(&str, &[u8])], order: &[&str]) -> Result<MergeOutput> {
    let documents = sources
        .iter()
        .map(|(name, bytes)| Document::load_mem(bytes).map(|doc| (name.to_string(), doc)))
        .collect::<Result<Vec<_>>>()?;

    let mut merged = merge_named(documents, order)?;
    let removed = merged.collect_garbage();
    info!("removed {} unreachable objects after merge", removed.len());

    let bytes = merged.to_bytes()?;
    Ok(MergeOutput {
        size: bytes.len(),
        bytes,
    })
}

/// Recompress the page images of a serialized document at `quality`.
///
/// The quality is checked before anything is parsed. Any failure, including
/// cancellation, yields no output.
pub fn compress_bytes(input: &[u8], quality: u8, cancel: &CancellationToken) -> Result<CompressionOutput> {
    let quality = Quality::new(quality)?;
    let mut doc = Document::load_mem(input)?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let ids = doc.unique_image_ids();
    info!("{} images found on {} pages", ids.len(), doc.get_pages().len());
    Recompressor::new(quality)
        .with_cancellation(cancel.clone())
        .apply(&mut doc, &ids)?;

    doc.compress();
    doc.collect_garbage();
    let bytes = doc.to_bytes()?;

    let result = CompressionResult::new(input.len(), bytes.len());
    info!(
        "{} -> {} ({:.1}% smaller)",
        human_size(result.size_before),
        human_size(result.size_after),
        result.reduction_percent
    );
    Ok(CompressionOutput { bytes, result })
}

/// Format a byte count as kilobytes below one megabyte, megabytes above.
pub fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let bytes = bytes as f64;
    if bytes < MB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{:.2} MB", bytes / MB)
    }
}
