use crate::error::DecompressError;
use crate::{Document, Error, Result};
use indexmap::IndexMap;
use log::warn;
use std::fmt;
use std::str;

/// Object identifier consists of two parts: object number and generation number.
pub type ObjectId = (u32, u16);

/// Dictionary object.
#[derive(Clone, Default, PartialEq)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

/// Stream object
/// Warning - all streams must be indirect objects, while
/// the stream dictionary may be a direct object
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Associated stream dictionary
    pub dict: Dictionary,
    /// Contents of the stream in bytes
    pub content: Vec<u8>,
    /// Can the stream be compressed by the `Document::compress()` function?
    /// Font streams may not be compressed, for example
    pub allows_compression: bool,
    /// Stream data's position in PDF file.
    pub start_position: Option<usize>,
}

/// Basic PDF object types defined in an enum.
#[derive(Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f32),
    Name(Vec<u8>),
    String(Vec<u8>, StringFormat),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

/// String objects can be written in two formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(number: i64) -> Self {
        Object::Integer(number)
    }
}

macro_rules! from_smaller_ints {
	($( $Int: ty )+) => {
		$(
			impl From<$Int> for Object {
				fn from(number: $Int) -> Self {
					Object::Integer(i64::from(number))
				}
			}
		)+
	}
}

from_smaller_ints! {
    i8 i16 i32
    u8 u16 u32
}

impl From<f32> for Object {
    fn from(number: f32) -> Self {
        Object::Real(number)
    }
}

impl From<f64> for Object {
    fn from(number: f64) -> Self {
        Object::Real(number as f32)
    }
}

impl From<String> for Object {
    fn from(name: String) -> Self {
        Object::Name(name.into_bytes())
    }
}

impl<'a> From<&'a str> for Object {
    fn from(name: &'a str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }
}

impl From<Vec<Object>> for Object {
    fn from(array: Vec<Object>) -> Self {
        Object::Array(array)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl Object {
    pub fn string_literal<S: Into<Vec<u8>>>(s: S) -> Self {
        Object::String(s.into(), StringFormat::Literal)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Object::Boolean(value) => Ok(*value),
            _ => Err(self.type_error("Boolean")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Object::Integer(value) => Ok(*value),
            _ => Err(self.type_error("Integer")),
        }
    }

    /// Numeric value of either an Integer or a Real.
    pub fn as_float(&self) -> Result<f32> {
        match self {
            Object::Integer(value) => Ok(*value as f32),
            Object::Real(value) => Ok(*value),
            _ => Err(self.type_error("Integer or Real")),
        }
    }

    pub fn as_name(&self) -> Result<&[u8]> {
        match self {
            Object::Name(name) => Ok(name),
            _ => Err(self.type_error("Name")),
        }
    }

    pub fn as_name_str(&self) -> Result<&str> {
        Ok(str::from_utf8(self.as_name()?)?)
    }

    pub fn as_str(&self) -> Result<&[u8]> {
        match self {
            Object::String(string, _) => Ok(string),
            _ => Err(self.type_error("String")),
        }
    }

    pub fn as_reference(&self) -> Result<ObjectId> {
        match self {
            Object::Reference(id) => Ok(*id),
            _ => Err(self.type_error("Reference")),
        }
    }

    pub fn as_array(&self) -> Result<&Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Vec<Object>> {
        match self {
            Object::Array(arr) => Ok(arr),
            _ => Err(self.type_error("Array")),
        }
    }

    pub fn as_dict(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_dict_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Ok(dict),
            _ => Err(self.type_error("Dictionary")),
        }
    }

    pub fn as_stream(&self) -> Result<&Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn as_stream_mut(&mut self) -> Result<&mut Stream> {
        match self {
            Object::Stream(stream) => Ok(stream),
            _ => Err(self.type_error("Stream")),
        }
    }

    pub fn type_name(&self) -> Result<&[u8]> {
        match self {
            Object::Dictionary(dict) => dict.get_type(),
            Object::Stream(stream) => stream.dict.get_type(),
            _ => Err(self.type_error("Dictionary or Stream")),
        }
    }

    pub fn enum_variant(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::Name(_) => "Name",
            Object::String(..) => "String",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    fn type_error(&self, expected: &'static str) -> Error {
        Error::ObjectType {
            expected,
            found: self.enum_variant(),
        }
    }

    /// Visit every reference held by this object, descending into arrays,
    /// dictionaries and stream dictionaries.
    pub fn for_each_reference<F: FnMut(ObjectId)>(&self, f: &mut F) {
        match self {
            Object::Reference(id) => f(*id),
            Object::Array(array) => array.iter().for_each(|item| item.for_each_reference(f)),
            Object::Dictionary(dict) => dict.iter().for_each(|(_, value)| value.for_each_reference(f)),
            Object::Stream(stream) => stream.dict.iter().for_each(|(_, value)| value.for_each_reference(f)),
            _ => {}
        }
    }

    /// Rewrite every reference held by this object in place.
    pub fn map_references<F: FnMut(ObjectId) -> Object>(&mut self, f: &mut F) {
        match self {
            Object::Reference(id) => *self = f(*id),
            Object::Array(array) => array.iter_mut().for_each(|item| item.map_references(f)),
            Object::Dictionary(dict) => dict.iter_mut().for_each(|(_, value)| value.map_references(f)),
            Object::Stream(stream) => stream.dict.iter_mut().for_each(|(_, value)| value.map_references(f)),
            _ => {}
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Null => f.write_str("null"),
            Object::Boolean(value) => {
                if *value {
                    f.write_str("true")
                } else {
                    f.write_str("false")
                }
            }
            Object::Integer(value) => write!(f, "{}", *value),
            Object::Real(value) => write!(f, "{}", *value),
            Object::Name(name) => write!(f, "/{}", String::from_utf8_lossy(name)),
            Object::String(text, _) => write!(f, "({})", String::from_utf8_lossy(text)),
            Object::Array(array) => {
                let items = array.iter().map(|item| format!("{:?}", item)).collect::<Vec<String>>();
                write!(f, "[{}]", items.join(" "))
            }
            Object::Dictionary(dict) => write!(f, "{:?}", dict),
            Object::Stream(stream) => write!(f, "{:?}stream...endstream", stream.dict),
            Object::Reference(id) => write!(f, "{} {} R", id.0, id.1),
        }
    }
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary(IndexMap::new())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<&Object> {
        self.0
            .get(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    /// Extract object from dictionary, dereferencing the object if it
    /// is a reference.
    pub fn get_deref<'a>(&'a self, key: &[u8], doc: &'a Document) -> Result<&'a Object> {
        doc.dereference(self.get(key)?).map(|(_, object)| object)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Result<&mut Object> {
        self.0
            .get_mut(key)
            .ok_or_else(|| Error::DictKey(String::from_utf8_lossy(key).into_owned()))
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Vec<u8>>,
        V: Into<Object>,
    {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn get_type(&self) -> Result<&[u8]> {
        self.get(b"Type").and_then(Object::as_name)
    }

    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get_type().ok() == Some(type_name)
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, Vec<u8>, Object> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> indexmap::map::IterMut<'_, Vec<u8>, Object> {
        self.0.iter_mut()
    }
}

#[macro_export]
macro_rules! dictionary {
	() => {
		$crate::Dictionary::new()
	};
	($( $key: expr => $value: expr ),+ ,) => {
		$crate::dictionary!( $($key => $value),+ )
	};
	($( $key: expr => $value: expr ),*) => {{
		let mut dict = $crate::Dictionary::new();
		$(
			dict.set($key, $value);
		)*
		dict
	}}
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .into_iter()
            .map(|(key, value)| format!("/{} {:?}", String::from_utf8_lossy(key), value))
            .collect::<Vec<String>>();
        write!(f, "<<{}>>", entries.concat())
    }
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a Vec<u8>, &'a Object);
    type IntoIter = indexmap::map::Iter<'a, Vec<u8>, Object>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, Object)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, Object)>>(iter: I) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.set(k, v);
        }
        dict
    }
}

impl Stream {
    pub fn new(mut dict: Dictionary, content: Vec<u8>) -> Stream {
        dict.set("Length", content.len() as i64);
        Stream {
            dict,
            content,
            allows_compression: true,
            start_position: None,
        }
    }

    pub fn with_position(dict: Dictionary, position: usize) -> Stream {
        Stream {
            dict,
            content: vec![],
            allows_compression: true,
            start_position: Some(position),
        }
    }

    /// Default is that the stream may be compressed. On font streams,
    /// set this to false, otherwise the font will be corrupt
    #[inline]
    pub fn with_compression(mut self, allows_compression: bool) -> Stream {
        self.allows_compression = allows_compression;
        self
    }

    /// Filter names in decoding order. A stream without `Filter` has an empty chain.
    pub fn filters(&self) -> Result<Vec<&[u8]>> {
        let filter = match self.dict.get(b"Filter") {
            Ok(filter) => filter,
            Err(_) => return Ok(vec![]),
        };

        match filter {
            Object::Name(name) => Ok(vec![name.as_slice()]),
            Object::Array(names) => names.iter().map(Object::as_name).collect(),
            other => Err(Error::ObjectType {
                expected: "Name or Array",
                found: other.enum_variant(),
            }),
        }
    }

    /// Decode parameters matching each filter of the chain.
    fn decode_params(&self) -> Vec<Option<&Dictionary>> {
        match self.dict.get(b"DecodeParms") {
            Ok(Object::Dictionary(params)) => vec![Some(params)],
            Ok(Object::Array(params)) => params.iter().map(|p| p.as_dict().ok()).collect(),
            _ => vec![],
        }
    }

    pub fn is_image(&self) -> bool {
        self.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice())
    }

    pub fn set_content(&mut self, content: Vec<u8>) {
        self.content = content;
        self.dict.set("Length", self.content.len() as i64);
    }

    pub fn set_plain_content(&mut self, content: Vec<u8>) {
        self.dict.remove(b"DecodeParms");
        self.dict.remove(b"Filter");
        self.dict.set("Length", content.len() as i64);
        self.content = content;
    }

    pub fn compress(&mut self) -> Result<()> {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::prelude::*;

        if self.dict.get(b"Filter").is_err() {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(self.content.as_slice())?;
            let compressed = encoder.finish()?;
            if compressed.len() + 19 < self.content.len() {
                self.dict.set("Filter", "FlateDecode");
                self.set_content(compressed);
            }
        }
        Ok(())
    }

    /// Run the content through the leading filters of its chain, stopping
    /// at the first filter that is an image codec (DCT, JPX, ...).
    /// Returns the decoded bytes and the filters that remain to be applied.
    pub fn decode_leading_filters(&self) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        let filters = self.filters()?;
        let params = self.decode_params();
        let mut data = self.content.clone();

        for (index, filter) in filters.iter().enumerate() {
            let param = params.get(index).copied().flatten();
            data = match *filter {
                b"FlateDecode" | b"Fl" => Self::decompress_predictor(Self::decompress_zlib(&data)?, param)?,
                b"LZWDecode" | b"LZW" => Self::decompress_predictor(Self::decompress_lzw(&data, param)?, param)?,
                b"ASCIIHexDecode" | b"AHx" => Self::decode_hex(&data)?,
                b"ASCII85Decode" | b"A85" => Self::decode_ascii85(&data)?,
                b"RunLengthDecode" | b"RL" => Self::decode_run_length(&data),
                _ => {
                    let rest = filters[index..].iter().map(|f| f.to_vec()).collect();
                    return Ok((data, rest));
                }
            };
        }

        Ok((data, vec![]))
    }

    /// Fully decoded stream content. Fails on filters this crate cannot decode.
    pub fn decompressed_content(&self) -> Result<Vec<u8>> {
        let (data, rest) = self.decode_leading_filters()?;
        match rest.first() {
            None => Ok(data),
            Some(filter) => {
                Err(DecompressError::UnsupportedFilter(String::from_utf8_lossy(filter).into_owned()).into())
            }
        }
    }

    pub fn decompress(&mut self) {
        if let Ok(data) = self.decompressed_content() {
            self.set_plain_content(data);
        }
    }

    fn decompress_zlib(input: &[u8]) -> Result<Vec<u8>> {
        use flate2::read::ZlibDecoder;
        use std::io::prelude::*;

        let mut output = Vec::with_capacity(input.len() * 2);
        if input.is_empty() {
            return Ok(output);
        }

        let mut decoder = ZlibDecoder::new(input);
        if let Err(err) = decoder.read_to_end(&mut output) {
            // Truncated streams are common, keep what could be inflated.
            if output.is_empty() {
                return Err(DecompressError::Flate(err.to_string()).into());
            }
            warn!("{}", err);
        }
        Ok(output)
    }

    fn decompress_lzw(input: &[u8], params: Option<&Dictionary>) -> Result<Vec<u8>> {
        use weezl::{BitOrder, decode::Decoder};
        const MIN_BITS: u8 = 8;

        let early_change = params
            .and_then(|p| p.get(b"EarlyChange").ok())
            .and_then(|p| Object::as_i64(p).ok())
            .map(|v| v != 0)
            .unwrap_or(true);

        let mut decoder = if early_change {
            Decoder::with_tiff_size_switch(BitOrder::Msb, MIN_BITS)
        } else {
            Decoder::new(BitOrder::Msb, MIN_BITS)
        };

        decoder
            .decode(input)
            .map_err(|err| DecompressError::Lzw(err.to_string()).into())
    }

    fn decompress_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> Result<Vec<u8>> {
        use crate::filters::png;

        let Some(params) = params else {
            return Ok(data);
        };

        let predictor = params.get(b"Predictor").and_then(Object::as_i64).unwrap_or(1);
        let columns = params.get(b"Columns").and_then(Object::as_i64).unwrap_or(1).max(1) as usize;
        let colors = params.get(b"Colors").and_then(Object::as_i64).unwrap_or(1).max(1) as usize;
        let bits = params.get(b"BitsPerComponent").and_then(Object::as_i64).unwrap_or(8).max(1) as usize;
        let bytes_per_pixel = (colors * bits).div_ceil(8);
        let bytes_per_row = (colors * bits * columns).div_ceil(8);

        match predictor {
            10..=15 => png::decode_frame(data.as_slice(), bytes_per_pixel, bytes_per_row)
                .map_err(|err| DecompressError::Predictor(err.to_string()).into()),
            2 if bits == 8 => Ok(png::decode_tiff_horizontal(data, colors, bytes_per_row)),
            1 => Ok(data),
            other => {
                warn!("unsupported predictor {}", other);
                Ok(data)
            }
        }
    }

    fn decode_hex(input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() / 2);
        let mut pending: Option<u8> = None;
        for &byte in input {
            if byte == b'>' {
                break;
            }
            if byte.is_ascii_whitespace() {
                continue;
            }
            let nibble = (byte as char).to_digit(16).ok_or(DecompressError::AsciiHex)? as u8;
            pending = match pending {
                None => Some(nibble),
                Some(high) => {
                    output.push(high << 4 | nibble);
                    None
                }
            };
        }
        if let Some(high) = pending {
            output.push(high << 4);
        }
        Ok(output)
    }

    fn decode_ascii85(input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() * 4 / 5);
        let mut group = [0u8; 5];
        let mut count = 0;

        let mut bytes = input.iter().copied().filter(|c| !c.is_ascii_whitespace()).peekable();
        if input.starts_with(b"<~") {
            bytes.next();
            bytes.next();
        }

        while let Some(byte) = bytes.next() {
            match byte {
                b'~' => {
                    if bytes.next() != Some(b'>') {
                        return Err(DecompressError::Ascii85("missing end marker").into());
                    }
                    break;
                }
                b'z' if count == 0 => output.extend_from_slice(&[0; 4]),
                b'!'..=b'u' => {
                    group[count] = byte - b'!';
                    count += 1;
                    if count == 5 {
                        let value = group.iter().fold(0u64, |acc, &digit| acc * 85 + u64::from(digit));
                        if value > u64::from(u32::MAX) {
                            return Err(DecompressError::Ascii85("group overflow").into());
                        }
                        output.extend_from_slice(&(value as u32).to_be_bytes());
                        count = 0;
                    }
                }
                _ => return Err(DecompressError::Ascii85("invalid character").into()),
            }
        }

        if count == 1 {
            return Err(DecompressError::Ascii85("dangling single character").into());
        }
        if count > 1 {
            for digit in group.iter_mut().skip(count) {
                *digit = 84;
            }
            let value = group.iter().fold(0u64, |acc, &digit| acc * 85 + u64::from(digit));
            output.extend_from_slice(&(value as u32).to_be_bytes()[..count - 1]);
        }

        Ok(output)
    }

    fn decode_run_length(input: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(input.len() * 2);
        let mut pos = 0;
        while pos < input.len() {
            let length = input[pos] as usize;
            pos += 1;
            match length {
                128 => break,
                0..=127 => {
                    let end = (pos + length + 1).min(input.len());
                    output.extend_from_slice(&input[pos..end]);
                    pos = end;
                }
                _ => {
                    if let Some(&byte) = input.get(pos) {
                        output.extend(std::iter::repeat_n(byte, 257 - length));
                    }
                    pos += 1;
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii85_round_values() {
        let decoded = Stream::decode_ascii85(b"87cURD]i,\"Ebo80~>").unwrap();
        assert_eq!(decoded, b"Hello World!");
    }

    #[test]
    fn ascii_hex_with_odd_length() {
        let decoded = Stream::decode_hex(b"90 1F A>").unwrap();
        assert_eq!(decoded, vec![0x90, 0x1F, 0xA0]);
    }

    #[test]
    fn run_length_literal_and_repeat() {
        let decoded = Stream::decode_run_length(&[2, b'a', b'b', b'c', 254, b'z', 128]);
        assert_eq!(decoded, b"abczzz");
    }

    #[test]
    fn flate_chain_is_decoded() {
        let mut stream = Stream::new(Dictionary::new(), b"BT /F1 12 Tf (Hello) Tj ET ".repeat(10));
        let plain = stream.content.clone();
        stream.compress().unwrap();
        assert_eq!(stream.filters().unwrap(), vec![b"FlateDecode".as_slice()]);
        assert_eq!(stream.decompressed_content().unwrap(), plain);
    }

    #[test]
    fn image_codec_stops_the_chain() {
        let stream = Stream::new(
            dictionary! {
                "Filter" => vec![Object::from("ASCIIHexDecode"), Object::from("DCTDecode")],
            },
            b"FFD8>".to_vec(),
        );
        let (data, rest) = stream.decode_leading_filters().unwrap();
        assert_eq!(data, vec![0xFF, 0xD8]);
        assert_eq!(rest, vec![b"DCTDecode".to_vec()]);
        assert!(stream.decompressed_content().is_err());
    }

    #[test]
    fn references_are_rewritten_everywhere() {
        let mut object = Object::Dictionary(dictionary! {
            "A" => Object::Reference((1, 0)),
            "B" => vec![Object::Reference((2, 0)), Object::Integer(5)],
        });
        object.map_references(&mut |(id, generation)| Object::Reference((id + 10, generation)));

        let mut seen = vec![];
        object.for_each_reference(&mut |id| seen.push(id));
        assert_eq!(seen, vec![(11, 0), (12, 0)]);
    }

    #[test]
    fn wrong_type_names_both_sides() {
        let err = Object::Integer(1).as_name().unwrap_err();
        assert_eq!(
            err.to_string(),
            "object has wrong type; expected type Name but found type Integer"
        );
    }
}
