//! # Key Encoder (section 4.1)
//!
//! Pure, total functions producing opaque byte keys for the four key
//! families this crate addresses the store with: data cells, index
//! entries, index group listings, and reverse-index pointers. Every
//! encoder has a matching parser; ordering of the bytes never matters,
//! only equality, so fields are simply length-prefixed and concatenated
//! behind a one-byte family tag.
use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;

const DATA: u8 = 0;
const INDEX: u8 = 1;
const INDEX_GROUP: u8 = 2;
const REVERSE_INDEX: u8 = 3;

/// The field name every live object carries; absent once deleted.
pub const EXISTS_FIELD: &str = " exists";

/// The pseudo-field used in an index-slice subscription to mean "the
/// object's own identity", rather than an indexed attribute.
pub const IDENTITY_FIELD: &str = "_identity";

/// A client-supplied digest used as the bucket key inside an index.
/// Collisions are permitted; clients disambiguate on read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ValueHash {
    /// Used for the `" exists"` index and other boolean-valued fields.
    Bool(bool),
    /// An arbitrary string digest.
    Str(String),
    /// An integer digest.
    Int(i64),
}

impl ValueHash {
    /// Canonical string form, used both as a group-listing member and as
    /// the encoded byte payload of a reverse-index pointer.
    pub fn to_canonical_string(&self) -> String {
        match self {
            ValueHash::Bool(b) => format!("b:{}", b),
            ValueHash::Str(s) => format!("s:{}", s),
            ValueHash::Int(i) => format!("i:{}", i),
        }
    }

    /// Parses the canonical string form produced by [`ValueHash::to_canonical_string`].
    pub fn from_canonical_string(s: &str) -> ValueHash {
        if let Some(rest) = s.strip_prefix("b:") {
            return ValueHash::Bool(rest == "true");
        }
        if let Some(rest) = s.strip_prefix("i:") {
            if let Ok(i) = rest.parse::<i64>() {
                return ValueHash::Int(i);
            }
        }
        if let Some(rest) = s.strip_prefix("s:") {
            return ValueHash::Str(rest.to_string());
        }
        ValueHash::Str(s.to_string())
    }

    /// Encodes this value-hash as the opaque byte payload stored at a
    /// reverse-index pointer cell.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_canonical_string())
    }

    /// Decodes a reverse-index pointer cell's payload back into a value-hash.
    pub fn from_bytes(b: &Bytes) -> Result<ValueHash, Error> {
        let s = std::str::from_utf8(b).map_err(|_| Error::MalformedMessage("value hash is not utf8"))?;
        Ok(ValueHash::from_canonical_string(s))
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u32(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
    buf.put_slice(bytes);
}

fn get_str(buf: &mut Bytes) -> Result<String, Error> {
    if buf.remaining() < 4 {
        return Err(Error::MalformedMessage("truncated key: missing length prefix"));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedMessage("truncated key: field shorter than prefix"));
    }
    let field = buf.split_to(len);
    String::from_utf8(field.to_vec()).map_err(|_| Error::MalformedMessage("key field is not utf8"))
}

fn expect_tag(buf: &mut Bytes, tag: u8) -> Result<(), Error> {
    if !buf.has_remaining() || buf.get_u8() != tag {
        return Err(Error::MalformedMessage("key family tag mismatch"));
    }
    Ok(())
}

/// `data_key(schema,type,id,field)` — addresses a single data cell.
pub fn data_key(schema: &str, typename: &str, identity: &str, field: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(DATA);
    put_str(&mut buf, schema);
    put_str(&mut buf, typename);
    put_str(&mut buf, identity);
    put_str(&mut buf, field);
    buf.freeze()
}

/// Recovers `(schema, type, id, field)` from a [`data_key`].
pub fn parse_data_key(key: &Bytes) -> Result<(String, String, String, String), Error> {
    let mut buf = key.clone();
    expect_tag(&mut buf, DATA)?;
    Ok((get_str(&mut buf)?, get_str(&mut buf)?, get_str(&mut buf)?, get_str(&mut buf)?))
}

/// `index_key(schema,type,field,value_hash)` — addresses the set of
/// identities whose value for `field` hashes to `value_hash`.
pub fn index_key(schema: &str, typename: &str, field: &str, value: &ValueHash) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(INDEX);
    put_str(&mut buf, schema);
    put_str(&mut buf, typename);
    put_str(&mut buf, field);
    put_str(&mut buf, &value.to_canonical_string());
    buf.freeze()
}

/// Recovers `(schema, type, field, value_hash)` from an [`index_key`].
pub fn parse_index_key(key: &Bytes) -> Result<(String, String, String, ValueHash), Error> {
    let mut buf = key.clone();
    expect_tag(&mut buf, INDEX)?;
    let schema = get_str(&mut buf)?;
    let typename = get_str(&mut buf)?;
    let field = get_str(&mut buf)?;
    let value = ValueHash::from_canonical_string(&get_str(&mut buf)?);
    Ok((schema, typename, field, value))
}

/// Recovers just `(schema, type)` from an [`index_key`] — used by the
/// engine to determine which schema/type pair a set mutation belongs to
/// without caring about the field or value.
pub fn parse_index_key_schema_type(key: &Bytes) -> Result<(String, String), Error> {
    let (schema, typename, _, _) = parse_index_key(key)?;
    Ok((schema, typename))
}

/// `index_group(schema,type,field)` — the group listing enumerating every
/// value-hash currently populated for that field.
pub fn index_group(schema: &str, typename: &str, field: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(INDEX_GROUP);
    put_str(&mut buf, schema);
    put_str(&mut buf, typename);
    put_str(&mut buf, field);
    buf.freeze()
}

/// Recovers `(schema, type, field)` from an [`index_group`] key.
pub fn parse_index_group(key: &Bytes) -> Result<(String, String, String), Error> {
    let mut buf = key.clone();
    expect_tag(&mut buf, INDEX_GROUP)?;
    Ok((get_str(&mut buf)?, get_str(&mut buf)?, get_str(&mut buf)?))
}

/// `reverse_index_key(id,field)` — the identity's current value-hash for
/// an index field, stored so the engine can locate index entries for an
/// identity without scanning.
pub fn reverse_index_key(identity: &str, field: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(REVERSE_INDEX);
    put_str(&mut buf, identity);
    put_str(&mut buf, field);
    buf.freeze()
}

/// Recovers `(id, field)` from a [`reverse_index_key`].
pub fn parse_reverse_index_key(key: &Bytes) -> Result<(String, String), Error> {
    let mut buf = key.clone();
    expect_tag(&mut buf, REVERSE_INDEX)?;
    Ok((get_str(&mut buf)?, get_str(&mut buf)?))
}
