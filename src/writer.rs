use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

use super::Object::*;
use super::{Dictionary, Document, Object, SaveOptions, Stream, StringFormat};
use crate::xref::*;

/// Trailer keys that only make sense for the file the document was read from.
const STALE_TRAILER_KEYS: [&[u8]; 9] = [
    b"Prev",
    b"XRefStm",
    b"Encrypt",
    b"W",
    b"Index",
    b"Type",
    b"Filter",
    b"DecodeParms",
    b"Length",
];

impl Document {
    /// Save PDF document to specified file path.
    #[inline]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<File> {
        let mut file = BufWriter::new(File::create(path)?);
        self.save_internal(&mut file, &SaveOptions::default())?;
        Ok(file.into_inner()?)
    }

    /// Save PDF to arbitrary target
    #[inline]
    pub fn save_to<W: Write>(&self, target: &mut W) -> Result<()> {
        self.save_internal(target, &SaveOptions::default())
    }

    /// Save PDF to arbitrary target with the given options.
    pub fn save_with_options<W: Write>(&self, target: &mut W, options: &SaveOptions) -> Result<()> {
        self.save_internal(target, options)
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.save_internal(&mut buffer, &SaveOptions::default())?;
        Ok(buffer)
    }

    fn save_internal<W: Write>(&self, target: &mut W, options: &SaveOptions) -> Result<()> {
        let mut target = CountingWrite {
            inner: target,
            bytes_written: 0,
        };
        let mut xref = Xref::new(self.max_id + 1);
        writeln!(target, "%PDF-{}", self.version)?;
        if options.binary_mark && !self.binary_mark.is_empty() {
            target.write_all(b"%")?;
            target.write_all(&self.binary_mark)?;
            target.write_all(b"\n")?;
        }

        for (&(id, generation), object) in &self.objects {
            if object
                .type_name()
                .map(|name| [&b"ObjStm"[..], b"XRef", b"Linearized"].contains(&name))
                .ok()
                == Some(true)
            {
                continue;
            }
            match object {
                Object::Stream(stream)
                    if options.compress_streams && stream.allows_compression && !stream.dict.has(b"Filter") =>
                {
                    let mut stream = stream.clone();
                    stream.compress().map_err(std::io::Error::other)?;
                    let object = Object::Stream(stream);
                    Writer::write_indirect_object(&mut target, id, generation, &object, &mut xref)?;
                }
                _ => Writer::write_indirect_object(&mut target, id, generation, object, &mut xref)?,
            }
        }

        let xref_start = target.bytes_written;
        Writer::write_xref(&mut target, &xref)?;
        self.write_trailer(&mut target)?;
        write!(target, "\nstartxref\n{}\n%%EOF\n", xref_start)?;

        Ok(())
    }

    fn write_trailer(&self, file: &mut dyn Write) -> Result<()> {
        let mut trailer = self.trailer.clone();
        for key in STALE_TRAILER_KEYS {
            trailer.remove(key);
        }
        trailer.set("Size", i64::from(self.max_id + 1));
        file.write_all(b"trailer\n")?;
        Writer::write_dictionary(file, &trailer)?;
        Ok(())
    }
}

pub struct Writer;

impl Writer {
    fn need_separator(object: &Object) -> bool {
        matches!(*object, Null | Boolean(_) | Integer(_) | Real(_) | Reference(_))
    }

    fn need_end_separator(object: &Object) -> bool {
        matches!(
            *object,
            Null | Boolean(_) | Integer(_) | Real(_) | Name(_) | Reference(_) | Object::Stream(_)
        )
    }

    fn write_xref(file: &mut dyn Write, xref: &Xref) -> Result<()> {
        writeln!(file, "xref\n0 {}", xref.size)?;

        let mut write_xref_entry =
            |offset: u32, generation: u16, kind: char| writeln!(file, "{:>010} {:>05} {} ", offset, generation, kind);
        write_xref_entry(0, 65535, 'f')?;

        for obj_id in 1..xref.size {
            match xref.get(obj_id) {
                Some(&XrefEntry::Normal { offset, generation }) => write_xref_entry(offset, generation, 'n')?,
                _ => write_xref_entry(0, 65535, 'f')?,
            }
        }
        Ok(())
    }

    fn write_indirect_object<W: Write>(
        file: &mut CountingWrite<&mut W>, id: u32, generation: u16, object: &Object, xref: &mut Xref,
    ) -> Result<()> {
        let offset = u32::try_from(file.bytes_written).map_err(std::io::Error::other)?;
        xref.insert(id, XrefEntry::Normal { offset, generation });
        write!(
            file,
            "{} {} obj{}",
            id,
            generation,
            if Writer::need_separator(object) { " " } else { "" }
        )?;
        Writer::write_object(file, object)?;
        writeln!(
            file,
            "{}endobj",
            if Writer::need_end_separator(object) { " " } else { "" }
        )?;
        Ok(())
    }

    fn write_object(file: &mut dyn Write, object: &Object) -> Result<()> {
        match *object {
            Null => file.write_all(b"null"),
            Boolean(ref value) => {
                if *value {
                    file.write_all(b"true")
                } else {
                    file.write_all(b"false")
                }
            }
            Integer(ref value) => {
                let mut buf = itoa::Buffer::new();
                file.write_all(buf.format(*value).as_bytes())
            }
            Real(ref value) => file.write_all(format!("{:.02?}", *value).as_bytes()),
            Name(ref name) => Writer::write_name(file, name),
            String(ref text, ref format) => Writer::write_string(file, text, format),
            Array(ref array) => Writer::write_array(file, array),
            Object::Dictionary(ref dict) => Writer::write_dictionary(file, dict),
            Object::Stream(ref stream) => Writer::write_stream(file, stream),
            Reference(ref id) => write!(file, "{} {} R", id.0, id.1),
        }
    }

    fn write_name(file: &mut dyn Write, name: &[u8]) -> Result<()> {
        file.write_all(b"/")?;
        for &byte in name {
            // white-space and delimiter chars are encoded to # sequences
            // also encode bytes outside of the range 33 (!) to 126 (~)
            if b" \t\n\r\x0C()<>[]{}/%#".contains(&byte) || !(33..=126).contains(&byte) {
                write!(file, "#{:02X}", byte)?;
            } else {
                file.write_all(&[byte])?;
            }
        }
        Ok(())
    }

    fn write_string(file: &mut dyn Write, text: &[u8], format: &StringFormat) -> Result<()> {
        match *format {
            // Within a Literal string, backslash (\) and unbalanced parentheses should be escaped.
            // An end-of-line marker without a preceding backslash reads back as \n,
            // so \r also need be escaped.
            StringFormat::Literal => {
                let mut escape_indice = Vec::new();
                let mut parentheses = Vec::new();
                for (index, &byte) in text.iter().enumerate() {
                    match byte {
                        b'(' => parentheses.push(index),
                        b')' => {
                            if parentheses.pop().is_none() {
                                escape_indice.push(index);
                            }
                        }
                        b'\\' | b'\r' => escape_indice.push(index),
                        _ => continue,
                    }
                }
                escape_indice.append(&mut parentheses);

                file.write_all(b"(")?;
                if !escape_indice.is_empty() {
                    for (index, &byte) in text.iter().enumerate() {
                        if escape_indice.contains(&index) {
                            file.write_all(b"\\")?;
                            file.write_all(&[if byte == b'\r' { b'r' } else { byte }])?;
                        } else {
                            file.write_all(&[byte])?;
                        }
                    }
                } else {
                    file.write_all(text)?;
                }
                file.write_all(b")")?;
            }
            StringFormat::Hexadecimal => {
                file.write_all(b"<")?;
                for &byte in text {
                    write!(file, "{:02X}", byte)?;
                }
                file.write_all(b">")?;
            }
        }
        Ok(())
    }

    fn write_array(file: &mut dyn Write, array: &[Object]) -> Result<()> {
        file.write_all(b"[")?;
        let mut first = true;
        for object in array {
            if first {
                first = false;
            } else if Writer::need_separator(object) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, object)?;
        }
        file.write_all(b"]")?;
        Ok(())
    }

    fn write_dictionary(file: &mut dyn Write, dictionary: &Dictionary) -> Result<()> {
        file.write_all(b"<<")?;
        for (key, value) in dictionary {
            Writer::write_name(file, key)?;
            if Writer::need_separator(value) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, value)?;
        }
        file.write_all(b">>")?;
        Ok(())
    }

    fn write_stream(file: &mut dyn Write, stream: &Stream) -> Result<()> {
        let mut dict = stream.dict.clone();
        dict.set("Length", stream.content.len() as i64);
        Writer::write_dictionary(file, &dict)?;
        file.write_all(b"stream\n")?;
        file.write_all(&stream.content)?;
        file.write_all(b"\nendstream")?;
        Ok(())
    }
}

pub struct CountingWrite<W: Write> {
    inner: W,
    bytes_written: usize,
}

impl<W: Write> Write for CountingWrite<W> {
    #[inline]
    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        let result = self.inner.write(buffer);
        if let Ok(bytes) = result {
            self.bytes_written += bytes;
        }
        result
    }

    #[inline]
    fn write_all(&mut self, buffer: &[u8]) -> Result<()> {
        self.bytes_written += buffer.len();
        // If this returns `Err` we can’t know how many bytes were actually written (if any)
        // but that doesn’t matter since we’re gonna abort the entire PDF generation anyway.
        self.inner.write_all(buffer)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
