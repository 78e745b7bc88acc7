//! Owned decode of a single AMQP value, used for the cached
//! delivery-annotations map.
//!
//! The location table is the zero-copy path; this tree exists for the one
//! consumer that needs structured access to a (small) annotations map and
//! wants it decoded exactly once per message.

use crate::error::ParseError;
use crate::iterator::FieldIterator;

/// One decoded AMQP value. Compound values carry children; scalar and
/// variable-width values carry their payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    tag: u8,
    children: Vec<ParsedField>,
    payload: Vec<u8>,
}

impl ParsedField {
    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn is_map(&self) -> bool {
        matches!(self.tag, 0xC1 | 0xD1)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.tag, 0x45 | 0xC0 | 0xD0)
    }

    pub fn is_described(&self) -> bool {
        self.tag == 0x00
    }

    pub fn children(&self) -> &[ParsedField] {
        &self.children
    }

    /// Key/value pairs of a map value.
    pub fn map_pairs(&self) -> impl Iterator<Item = (&ParsedField, &ParsedField)> {
        self.children.chunks_exact(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// Looks a string or symbol key up in a map value.
    pub fn map_get(&self, key: &str) -> Option<&ParsedField> {
        self.map_pairs()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8 for string and symbol encodings.
    pub fn as_str(&self) -> Option<&str> {
        match self.tag {
            0xA1 | 0xB1 | 0xA3 | 0xB3 => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }
}

fn next(iter: &mut FieldIterator<'_>) -> Result<u8, ParseError> {
    if iter.at_end() {
        return Err(ParseError::TruncatedFrame);
    }
    Ok(iter.octet())
}

fn take(iter: &mut FieldIterator<'_>, len: usize) -> Result<Vec<u8>, ParseError> {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        bytes.push(next(iter)?);
    }
    Ok(bytes)
}

fn width(iter: &mut FieldIterator<'_>, bytes: usize) -> Result<usize, ParseError> {
    let mut value = 0usize;
    for _ in 0..bytes {
        value = (value << 8) | next(iter)? as usize;
    }
    Ok(value)
}

/// Decodes one value from the iterator's current position.
pub fn parse(iter: &mut FieldIterator<'_>) -> Result<ParsedField, ParseError> {
    let tag = next(iter)?;

    // Described value: a descriptor, then the value it describes.
    if tag == 0x00 {
        let descriptor = parse(iter)?;
        let value = parse(iter)?;
        return Ok(ParsedField {
            tag,
            children: vec![descriptor, value],
            payload: Vec::new(),
        });
    }

    match tag & 0xF0 {
        0x40 => Ok(ParsedField {
            tag,
            children: Vec::new(),
            payload: Vec::new(),
        }),
        0x50 | 0x60 | 0x70 | 0x80 | 0x90 => {
            let len = match tag & 0xF0 {
                0x50 => 1,
                0x60 => 2,
                0x70 => 4,
                0x80 => 8,
                _ => 16,
            };
            Ok(ParsedField {
                tag,
                children: Vec::new(),
                payload: take(iter, len)?,
            })
        }
        0xA0 | 0xB0 => {
            let len = if tag & 0xF0 == 0xA0 {
                width(iter, 1)?
            } else {
                width(iter, 4)?
            };
            Ok(ParsedField {
                tag,
                children: Vec::new(),
                payload: take(iter, len)?,
            })
        }
        // list0 (0x45) already landed in the zero-width arm above.
        0xC0 | 0xD0 => {
            let count = if tag & 0xF0 == 0xC0 {
                let _size = width(iter, 1)?;
                width(iter, 1)?
            } else {
                let _size = width(iter, 4)?;
                width(iter, 4)?
            };
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(parse(iter)?);
            }
            Ok(ParsedField {
                tag,
                children,
                payload: Vec::new(),
            })
        }
        _ => Err(ParseError::UnexpectedTag { tag }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::View;

    #[test]
    fn parses_a_small_map() {
        // map8 { sym "k": str "v", sym "n": null }
        let bytes = [
            0xC1, 0x0B, 0x04, 0xA3, 0x01, b'k', 0xA1, 0x01, b'v', 0xA3, 0x01, b'n', 0x40,
        ];
        let mut iter = FieldIterator::over_bytes(&bytes, View::All);
        let map = parse(&mut iter).expect("well-formed map");

        assert!(map.is_map());
        assert_eq!(map.children().len(), 4);
        assert_eq!(map.map_get("k").and_then(ParsedField::as_str), Some("v"));
        assert_eq!(map.map_get("n").map(ParsedField::tag), Some(0x40));
        assert!(map.map_get("missing").is_none());
    }

    #[test]
    fn truncated_value_is_an_error() {
        let bytes = [0xA1, 0x05, b'a'];
        let mut iter = FieldIterator::over_bytes(&bytes, View::All);
        assert_eq!(parse(&mut iter), Err(ParseError::TruncatedFrame));
    }

    #[test]
    fn list0_has_no_children() {
        let mut iter = FieldIterator::over_bytes(&[0x45], View::All);
        let list = parse(&mut iter).expect("list0");
        assert!(list.is_list());
        assert!(list.children().is_empty());
    }
}
