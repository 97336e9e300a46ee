//! A small hand-rolled canonical-CBOR writer, just large enough to encode
//! the signature-header and response-header maps a signed exchange needs
//! (`SPEC_FULL.md` §4.8). Canonical CBOR, per the webpackage draft, orders
//! map keys by byte length first, then by byte value — this module enforces
//! that ordering at encode time rather than trusting callers to pre-sort.

#[derive(Debug, Clone)]
pub enum DataItem {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Map(Vec<(DataItem, DataItem)>),
    Array(Vec<DataItem>),
}

impl DataItem {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        DataItem::Bytes(b.into())
    }

    pub fn text(s: impl Into<String>) -> Self {
        DataItem::Text(s.into())
    }

    /// Encode into canonical CBOR bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            DataItem::Bytes(b) => {
                write_head(out, 2, b.len() as u64);
                out.extend_from_slice(b);
            }
            DataItem::Text(s) => {
                write_head(out, 3, s.len() as u64);
                out.extend_from_slice(s.as_bytes());
            }
            DataItem::Int(n) => {
                if *n >= 0 {
                    write_head(out, 0, *n as u64);
                } else {
                    write_head(out, 1, (-1 - *n) as u64);
                }
            }
            DataItem::Array(items) => {
                write_head(out, 4, items.len() as u64);
                for item in items {
                    item.write(out);
                }
            }
            DataItem::Map(entries) => {
                let mut sorted = entries.clone();
                sorted.sort_by(|(a, _), (b, _)| canonical_key_order(a, b));
                write_head(out, 5, sorted.len() as u64);
                for (k, v) in &sorted {
                    k.write(out);
                    v.write(out);
                }
            }
        }
    }
}

/// Canonical CBOR key ordering: shorter encoded byte strings sort first;
/// ties broken by byte value. Every map this module builds uses byte-string
/// keys (header names), which is all the webpackage draft requires.
fn canonical_key_order(a: &DataItem, b: &DataItem) -> std::cmp::Ordering {
    let (ab, bb) = match (a, b) {
        (DataItem::Bytes(ab), DataItem::Bytes(bb)) => (ab, bb),
        _ => return std::cmp::Ordering::Equal,
    };
    ab.len().cmp(&bb.len()).then_with(|| ab.cmp(bb))
}

fn write_head(out: &mut Vec<u8>, major_type: u8, value: u64) {
    let major = major_type << 5;
    if value < 24 {
        out.push(major | value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(major | 24);
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(major | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(major | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_small_uint() {
        assert_eq!(DataItem::Int(5).encode(), vec![0x05]);
    }

    #[test]
    fn encodes_byte_string() {
        assert_eq!(DataItem::bytes(vec![1, 2, 3]).encode(), vec![0x43, 1, 2, 3]);
    }

    #[test]
    fn map_keys_sort_by_length_then_value() {
        let map = DataItem::Map(vec![
            (DataItem::bytes(*b"bb"), DataItem::Int(1)),
            (DataItem::bytes(*b"a"), DataItem::Int(2)),
            (DataItem::bytes(*b"ac"), DataItem::Int(3)),
        ]);
        let encoded = map.encode();
        // Map header (3 entries), then "a" (shortest key), then "ac"/"bb"
        // (tied length 2, byte-sorted: "ac" < "bb").
        assert_eq!(encoded[0], 0xa3);
        assert_eq!(encoded[1], 0x41); // byte-string head, length 1
        assert_eq!(encoded[2], b'a');
        assert_eq!(encoded[4], 0x42); // byte-string head, length 2
        assert_eq!(&encoded[5..7], b"ac");
    }

    #[test]
    fn array_round_trips_length_prefix() {
        let arr = DataItem::Array(vec![DataItem::Int(1), DataItem::Int(2)]);
        assert_eq!(arr.encode(), vec![0x82, 0x01, 0x02]);
    }
}
