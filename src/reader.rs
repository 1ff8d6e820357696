use log::{debug, error, warn};
use std::cmp;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::ParseError;
use crate::object_stream::ObjectStream;
use crate::parser::{self, ParserInput};
use crate::xref::XrefEntry;
use crate::{Document, Error, Object, ObjectId, Result};

impl Document {
    /// Load a PDF document from a specified file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Document> {
        let file = File::open(path)?;
        let capacity = Some(file.metadata()?.len() as usize);
        Self::load_internal(file, capacity)
    }

    /// Load a PDF document from an arbitrary source.
    #[inline]
    pub fn load_from<R: Read>(source: R) -> Result<Document> {
        Self::load_internal(source, None)
    }

    fn load_internal<R: Read>(mut source: R, capacity: Option<usize>) -> Result<Document> {
        let mut buffer = capacity.map(Vec::with_capacity).unwrap_or_default();
        source.read_to_end(&mut buffer)?;

        Self::load_mem(&buffer)
    }

    /// Load a PDF document from a memory slice. The slice is left untouched.
    pub fn load_mem(buffer: &[u8]) -> Result<Document> {
        Reader {
            buffer,
            document: Document::new(),
        }
        .read()
    }
}

impl TryFrom<&[u8]> for Document {
    type Error = Error;

    fn try_from(buffer: &[u8]) -> Result<Document> {
        Document::load_mem(buffer)
    }
}

pub struct Reader<'a> {
    pub buffer: &'a [u8],
    pub document: Document,
}

/// Maximum allowed embedding of literal strings.
pub const MAX_BRACKET: usize = 100;

/// How far into the buffer the `%PDF-` signature may appear.
const HEADER_SEARCH_LIMIT: usize = 1024;

impl Reader<'_> {
    /// Read whole document.
    pub fn read(mut self) -> Result<Document> {
        let search_end = cmp::min(self.buffer.len(), HEADER_SEARCH_LIMIT);
        let offset = self.buffer[..search_end]
            .windows(5)
            .position(|w| w == b"%PDF-")
            .ok_or(ParseError::InvalidFileHeader)?;
        self.buffer = &self.buffer[offset..];

        // The document structure can be expressed in PEG as:
        //   document <- header indirect_object* xref trailer xref_start
        let version =
            parser::header(ParserInput::new_extra(self.buffer, "header")).ok_or(ParseError::InvalidFileHeader)?;

        let xref_start = Self::get_xref_start(self.buffer)?;
        if xref_start > self.buffer.len() {
            return Err(ParseError::XrefStart.into());
        }

        let (mut xref, mut trailer) =
            parser::xref_and_trailer(ParserInput::new_extra(&self.buffer[xref_start..], "xref"), &self)?;

        // Hybrid-reference file: the table is completed by a cross-reference stream.
        if let Some(stream_start) = trailer.remove(b"XRefStm") {
            let (stream_xref, _) = self.read_xref_section(&stream_start, ParseError::StreamStart)?;
            xref.merge(stream_xref);
        }

        // Read previous Xrefs of linearized or incremental updated document.
        let mut already_seen = HashSet::new();
        let mut prev_xref_start = trailer.remove(b"Prev");
        while let Some(prev) = prev_xref_start.take() {
            let Ok(prev_offset) = prev.as_i64() else {
                break;
            };
            if !already_seen.insert(prev_offset) {
                warn!("cycle in Prev chain at offset {}", prev_offset);
                break;
            }

            let (prev_xref, mut prev_trailer) = self.read_xref_section(&prev, ParseError::PrevStart)?;
            xref.merge(prev_xref);

            if let Some(stream_start) = prev_trailer.remove(b"XRefStm") {
                let (stream_xref, _) = self.read_xref_section(&stream_start, ParseError::StreamStart)?;
                xref.merge(stream_xref);
            }

            prev_xref_start = prev_trailer.remove(b"Prev");
        }

        let xref_entry_count = xref.max_id().checked_add(1).ok_or(ParseError::InvalidXref)?;
        if xref.size != xref_entry_count {
            warn!(
                "Size entry of trailer dictionary is {}, correct value is {}.",
                xref.size, xref_entry_count
            );
            xref.size = xref_entry_count;
        }

        if trailer.has(b"Encrypt") {
            return Err(ParseError::Encrypted.into());
        }
        if trailer.get(b"Root").and_then(Object::as_reference).is_err() {
            return Err(ParseError::InvalidTrailer.into());
        }

        self.document.version = version;
        self.document.max_id = xref.size - 1;
        self.document.trailer = trailer;
        self.document.reference_table = xref;

        self.load_objects()?;

        if let Some(&(max_id, _)) = self.document.objects.keys().next_back() {
            self.document.max_id = cmp::max(self.document.max_id, max_id);
        }
        debug!(
            "loaded PDF-{} with {} objects",
            self.document.version,
            self.document.objects.len()
        );

        Ok(self.document)
    }

    fn read_xref_section(
        &self, start: &Object, bad_offset: ParseError,
    ) -> Result<(crate::xref::Xref, crate::Dictionary)> {
        let start = start.as_i64().map_err(|_| ParseError::InvalidTrailer)?;
        let start = usize::try_from(start)
            .ok()
            .filter(|&start| start <= self.buffer.len())
            .ok_or(bad_offset)?;
        parser::xref_and_trailer(ParserInput::new_extra(&self.buffer[start..], "xref"), self)
    }

    fn load_objects(&mut self) -> Result<()> {
        let entries_map = |(_, entry): (&u32, &XrefEntry)| -> Option<Result<(ObjectId, Object)>> {
            if let XrefEntry::Normal { offset, .. } = *entry {
                let result = self.read_object(offset as usize, None, &mut HashSet::new());
                if let Err(err) = &result {
                    error!("Object load error at offset {}: {}", offset, err);
                }
                Some(result)
            } else {
                None
            }
        };

        #[cfg(feature = "rayon")]
        let objects: Result<BTreeMap<ObjectId, Object>> = self
            .document
            .reference_table
            .entries
            .par_iter()
            .filter_map(entries_map)
            .collect();
        #[cfg(not(feature = "rayon"))]
        let objects: Result<BTreeMap<ObjectId, Object>> = self
            .document
            .reference_table
            .entries
            .iter()
            .filter_map(entries_map)
            .collect();
        self.document.objects = objects?;

        let mut compressed = BTreeMap::new();
        let mut zero_length_streams = vec![];
        for (id, object) in self.document.objects.iter_mut() {
            let Object::Stream(stream) = object else {
                continue;
            };
            if stream.dict.has_type(b"ObjStm") {
                let object_stream = ObjectStream::new(stream)?;
                compressed.extend(object_stream.objects);
            } else if stream.content.is_empty() && stream.start_position.is_some() {
                zero_length_streams.push(*id);
            }
        }

        // Only add entries, but never replace entries
        for (id, entry) in compressed {
            let listed = matches!(
                self.document.reference_table.get(id.0),
                Some(XrefEntry::Compressed { .. }) | None
            );
            if listed {
                self.document.objects.entry(id).or_insert(entry);
            }
        }

        for object_id in zero_length_streams {
            self.read_stream_content(object_id)?;
        }

        Ok(())
    }

    fn read_stream_content(&mut self, object_id: ObjectId) -> Result<()> {
        let length = self.get_stream_length(object_id)?;
        let stream = self
            .document
            .get_object_mut(object_id)
            .and_then(Object::as_stream_mut)?;
        let start = stream
            .start_position
            .ok_or_else(|| ParseError::InvalidStream("missing start position".to_string()))?;

        let length =
            usize::try_from(length).map_err(|_| ParseError::InvalidStream("negative stream length".to_string()))?;
        let end = start + length;

        if end > self.buffer.len() {
            return Err(ParseError::InvalidStream("stream extends after document end".to_string()).into());
        }

        stream.set_content(self.buffer[start..end].to_vec());
        Ok(())
    }

    fn get_stream_length(&self, object_id: ObjectId) -> Result<i64> {
        let object = self.document.get_object(object_id)?;
        let stream = object.as_stream()?;
        stream
            .dict
            .get(b"Length")
            .and_then(|value| self.document.dereference(value))
            .and_then(|(_id, obj)| obj.as_i64())
            .inspect_err(|_err| {
                error!(
                    "stream dictionary of '{} {} R' is missing the Length entry",
                    object_id.0, object_id.1
                );
            })
    }

    /// Get object offset by object ID.
    fn get_offset(&self, id: ObjectId) -> Result<u32> {
        let entry = self
            .document
            .reference_table
            .get(id.0)
            .ok_or(Error::ObjectNotFound(id))?;
        match *entry {
            XrefEntry::Normal { offset, generation } if generation == id.1 => Ok(offset),
            _ => Err(Error::ObjectNotFound(id)),
        }
    }

    pub fn get_object(&self, id: ObjectId, already_seen: &mut HashSet<ObjectId>) -> Result<Object> {
        if already_seen.contains(&id) {
            warn!("reference cycle detected resolving object {} {}", id.0, id.1);
            return Err(Error::ReferenceCycle(id));
        }
        already_seen.insert(id);
        let offset = self.get_offset(id)?;
        let (_, obj) = self.read_object(offset as usize, Some(id), already_seen)?;

        Ok(obj)
    }

    fn read_object(
        &self, offset: usize, expected_id: Option<ObjectId>, already_seen: &mut HashSet<ObjectId>,
    ) -> Result<(ObjectId, Object)> {
        if offset > self.buffer.len() {
            return Err(ParseError::InvalidObject { offset }.into());
        }

        parser::indirect_object(
            ParserInput::new_extra(self.buffer, "indirect object"),
            offset,
            expected_id,
            self,
            already_seen,
        )
    }

    fn get_xref_start(buffer: &[u8]) -> Result<usize> {
        let seek_pos = buffer.len() - cmp::min(buffer.len(), 512);
        Self::search_substring(buffer, b"%%EOF", seek_pos)
            .and_then(|eof_pos| if eof_pos > 25 { Some(eof_pos) } else { None })
            .and_then(|eof_pos| Self::search_substring(buffer, b"startxref", eof_pos - 25))
            .ok_or(ParseError::XrefStart)
            .and_then(|xref_pos| {
                if xref_pos <= buffer.len() {
                    match parser::xref_start(ParserInput::new_extra(&buffer[xref_pos..], "xref")) {
                        Some(startxref) if startxref >= 0 => Ok(startxref as usize),
                        _ => Err(ParseError::XrefStart),
                    }
                } else {
                    Err(ParseError::XrefStart)
                }
            })
            .map_err(Error::from)
    }

    fn search_substring(buffer: &[u8], pattern: &[u8], start_pos: usize) -> Option<usize> {
        let mut seek_pos = start_pos;
        let mut index = 0;

        while seek_pos < buffer.len() && index < pattern.len() {
            if buffer[seek_pos] == pattern[index] {
                index += 1;
            } else if index > 0 {
                seek_pos -= index;
                index = 0;
            }
            seek_pos += 1;

            if index == pattern.len() {
                let res = seek_pos - index;
                return Self::search_substring(buffer, pattern, res + 1).or(Some(res));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    /// Assemble a classic file, computing the xref offsets for `objects`.
    fn build_pdf(objects: &[&str], root: u32) -> Vec<u8> {
        let mut buffer = b"%PDF-1.5\n".to_vec();
        let mut offsets = vec![];
        for (index, body) in objects.iter().enumerate() {
            offsets.push(buffer.len());
            buffer.extend(format!("{} 0 obj\n{}\nendobj\n", index + 1, body).as_bytes());
        }
        let xref_start = buffer.len();
        buffer.extend(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            buffer.extend(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        buffer.extend(
            format!(
                "trailer\n<</Size {}/Root {} 0 R>>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                root,
                xref_start
            )
            .as_bytes(),
        );
        buffer
    }

    #[test]
    fn load_short_document() {
        let err = Document::load_mem(b"%PDF-1.5\n%%EOF\n").unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::XrefStart)));
    }

    #[test]
    fn missing_signature() {
        let err = Document::load_mem(b"hello world, this is not a document at all").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(matches!(err, Error::Parse(ParseError::InvalidFileHeader)));
    }

    #[test]
    fn load_small_document() {
        let pdf = build_pdf(
            &[
                "<</Type/Catalog/Pages 2 0 R>>",
                "<</Type/Pages/Kids[3 0 R]/Count 1>>",
                "<</Type/Page/Parent 2 0 R/Contents 4 0 R>>",
                "<</Length 5 0 R>>stream\nBT ET\nendstream",
                "6",
            ],
            1,
        );
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.version, "1.5");
        assert_eq!(doc.objects.len(), 5);
        assert_eq!(doc.max_id, 5);
        let stream = doc.get_object((4, 0)).and_then(Object::as_stream).unwrap();
        assert_eq!(stream.content, b"BT ET\n");
    }

    #[test]
    fn load_document_with_preceding_bytes() {
        let mut content = b"garbage".to_vec();
        content.extend(build_pdf(
            &["<</Type/Catalog/Pages 2 0 R>>", "<</Type/Pages/Kids[]/Count 0>>"],
            1,
        ));
        // offsets are relative to the signature
        let doc = Document::load_mem(&content).unwrap();
        assert_eq!(doc.version, "1.5");
    }

    #[test]
    fn corrupt_object_fails_the_load() {
        let mut pdf = build_pdf(&["<</Type/Catalog/Pages 2 0 R>>", "<</Type/Pages/Kids[]/Count 0>>"], 1);
        let at = pdf.windows(7).position(|w| w == b"2 0 obj").unwrap();
        pdf[at..at + 7].copy_from_slice(b"xx yobj");
        let err = Document::load_mem(&pdf).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::InvalidObject { .. })));
    }

    #[test]
    fn encrypted_documents_are_refused() {
        let mut pdf = build_pdf(&["<</Type/Catalog/Pages 2 0 R>>", "<</Type/Pages/Kids[]/Count 0>>"], 1);
        let at = pdf.windows(7).position(|w| w == b"/Root 1").unwrap();
        pdf.splice(at..at, b"/Encrypt 2 0 R".iter().copied());
        let err = Document::load_mem(&pdf).unwrap_err();
        assert!(matches!(err, Error::Parse(ParseError::Encrypted)));
    }

    #[test]
    fn load_many_shallow_brackets() {
        let content: String = std::iter::repeat_n("()", MAX_BRACKET * 10).collect();
        let pdf = build_pdf(
            &[
                "<</Type/Catalog/Pages 2 0 R>>",
                "<</Type/Pages/Kids[3 0 R]/Count 1>>",
                "<</Type/Page/Parent 2 0 R/Contents 4 0 R>>",
                &format!(
                    "<</Length {}>>stream\nBT ({}) Tj ET\nendstream",
                    content.len() + 12,
                    content
                ),
            ],
            1,
        );
        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.objects.len(), 4);
    }
}
