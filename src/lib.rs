#![doc = include_str!("../README.md")]

#[macro_use]
mod object;
pub use crate::object::{Dictionary, Object, ObjectId, Stream, StringFormat};

mod document;
pub use crate::document::{Document, PageTreeIter};

mod creator;
mod error;
pub use crate::error::{DecompressError, Error, ErrorKind, MergeError, ParseError, Result};

pub mod filters;
mod merge;
pub use crate::merge::{merge, merge_named};

mod object_stream;
mod parser;
pub mod pipeline;
pub use crate::pipeline::{CompressionOutput, CompressionResult, MergeOutput, compress_bytes, merge_to_bytes};

mod processor;
mod reader;
pub mod recompress;
pub use crate::recompress::{CancellationToken, Quality, Recompressor, recompress};

mod save_options;
pub use crate::save_options::{SaveOptions, SaveOptionsBuilder};

mod writer;
pub mod xobject;
pub use crate::xobject::{ColorSpace, ImageObject, PageImage};

pub mod xref;
pub use crate::xref::{Xref, XrefEntry};
