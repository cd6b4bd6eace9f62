//! Canonical byte encoding of serializable values
//!
//! Structural fingerprints must agree for equal values and differ for values
//! a computation can tell apart. The encoder here writes every node of the
//! serde data model behind its own tag byte, so the output is prefix-free:
//!
//! - floats are written as their IEEE-754 bit patterns (`+inf`, `-inf`, `-0.0`
//!   and `NaN` all stay distinct)
//! - map entries are sorted by their encoded bytes, so hash maps built in
//!   different insertion orders encode identically
//! - elements of `HashSet`s are sorted the same way; other sequences keep
//!   their order

use std::any::type_name;
use std::fmt::Display;

use serde::Serialize;
use serde::ser::{self, SerializeMap as _, SerializeSeq as _, Serializer as _};
use thiserror::Error;

/// Encoding failure raised by a `Serialize` impl
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct EncodeError(String);

impl ser::Error for EncodeError {
    fn custom<T: Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

mod tag {
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const UINT: u8 = 0x03;
    pub const F32: u8 = 0x04;
    pub const F64: u8 = 0x05;
    pub const CHAR: u8 = 0x06;
    pub const STR: u8 = 0x07;
    pub const BYTES: u8 = 0x08;
    pub const NONE: u8 = 0x09;
    pub const SOME: u8 = 0x0a;
    pub const UNIT: u8 = 0x0b;
    pub const UNIT_STRUCT: u8 = 0x0c;
    pub const UNIT_VARIANT: u8 = 0x0d;
    pub const NEWTYPE_STRUCT: u8 = 0x0e;
    pub const NEWTYPE_VARIANT: u8 = 0x0f;
    pub const SEQ: u8 = 0x10;
    pub const SET: u8 = 0x11;
    pub const TUPLE: u8 = 0x12;
    pub const TUPLE_STRUCT: u8 = 0x13;
    pub const TUPLE_VARIANT: u8 = 0x14;
    pub const MAP: u8 = 0x15;
    pub const STRUCT: u8 = 0x16;
    pub const STRUCT_VARIANT: u8 = 0x17;
    pub const FIELD: u8 = 0x18;
    pub const END: u8 = 0x19;
}

/// Encode `value` canonically
pub(crate) fn to_bytes<T: ?Sized + Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::default();
    value.serialize(&mut encoder)?;
    Ok(encoder.out)
}

/// `HashSet` (std or hashbrown) iterates in per-instance order
fn is_unordered_set<I>() -> bool {
    let name = type_name::<I>().trim_start_matches('&');
    let path = name.split('<').next().unwrap_or(name);
    path.ends_with("::HashSet")
}

#[derive(Default)]
struct Encoder {
    out: Vec<u8>,
}

impl Encoder {
    fn tag(&mut self, tag: u8) {
        self.out.push(tag);
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.out.extend_from_slice(bytes);
    }

    fn name(&mut self, name: &str) {
        self.raw(name.as_bytes());
    }

    fn variant(&mut self, tag: u8, name: &str, index: u32, variant: &str) {
        self.tag(tag);
        self.name(name);
        self.out.extend_from_slice(&index.to_le_bytes());
        self.name(variant);
    }

    fn sorted(&mut self, kind: u8, mut items: Vec<Vec<u8>>) {
        items.sort_unstable();
        self.tag(kind);
        for item in items {
            self.out.extend_from_slice(&item);
        }
        self.tag(tag::END);
    }
}

impl<'a> ser::Serializer for &'a mut Encoder {
    type Ok = ();
    type Error = EncodeError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = MapEncoder<'a>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> Result<(), EncodeError> {
        self.tag(tag::BOOL);
        self.out.push(u8::from(v));
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), EncodeError> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<(), EncodeError> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<(), EncodeError> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<(), EncodeError> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i128(self, v: i128) -> Result<(), EncodeError> {
        self.tag(tag::INT);
        self.out.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), EncodeError> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<(), EncodeError> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<(), EncodeError> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<(), EncodeError> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u128(self, v: u128) -> Result<(), EncodeError> {
        self.tag(tag::UINT);
        self.out.extend_from_slice(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), EncodeError> {
        self.tag(tag::F32);
        self.out.extend_from_slice(&v.to_bits().to_le_bytes());
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), EncodeError> {
        self.tag(tag::F64);
        self.out.extend_from_slice(&v.to_bits().to_le_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), EncodeError> {
        self.tag(tag::CHAR);
        self.out.extend_from_slice(&u32::from(v).to_le_bytes());
        Ok(())
    }

    fn serialize_str(self, v: &str) -> Result<(), EncodeError> {
        self.tag(tag::STR);
        self.raw(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), EncodeError> {
        self.tag(tag::BYTES);
        self.raw(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), EncodeError> {
        self.tag(tag::NONE);
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), EncodeError> {
        self.tag(tag::SOME);
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), EncodeError> {
        self.tag(tag::UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<(), EncodeError> {
        self.tag(tag::UNIT_STRUCT);
        self.name(name);
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> Result<(), EncodeError> {
        self.variant(tag::UNIT_VARIANT, name, variant_index, variant);
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.tag(tag::NEWTYPE_STRUCT);
        self.name(name);
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.variant(tag::NEWTYPE_VARIANT, name, variant_index, variant);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, EncodeError> {
        self.tag(tag::SEQ);
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, EncodeError> {
        self.tag(tag::TUPLE);
        Ok(self)
    }

    fn serialize_tuple_struct(self, name: &'static str, _len: usize) -> Result<Self, EncodeError> {
        self.tag(tag::TUPLE_STRUCT);
        self.name(name);
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self, EncodeError> {
        self.variant(tag::TUPLE_VARIANT, name, variant_index, variant);
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapEncoder<'a>, EncodeError> {
        Ok(MapEncoder {
            parent: self,
            entries: Vec::new(),
            pending: None,
        })
    }

    fn serialize_struct(self, name: &'static str, _len: usize) -> Result<Self, EncodeError> {
        self.tag(tag::STRUCT);
        self.name(name);
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self, EncodeError> {
        self.variant(tag::STRUCT_VARIANT, name, variant_index, variant);
        Ok(self)
    }

    fn collect_seq<I>(self, iter: I) -> Result<(), EncodeError>
    where
        I: IntoIterator,
        I::Item: Serialize,
    {
        if is_unordered_set::<I>() {
            let items = iter
                .into_iter()
                .map(|item| to_bytes(&item))
                .collect::<Result<Vec<_>, _>>()?;
            self.sorted(tag::SET, items);
            return Ok(());
        }

        let mut seq = self.serialize_seq(None)?;
        for item in iter {
            seq.serialize_element(&item)?;
        }
        seq.end()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

impl ser::SerializeSeq for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

impl ser::SerializeTuple for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

impl ser::SerializeTupleStruct for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

impl ser::SerializeTupleVariant for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

impl ser::SerializeStruct for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.tag(tag::FIELD);
        self.name(key);
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

impl ser::SerializeStructVariant for &mut Encoder {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.tag(tag::FIELD);
        self.name(key);
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.tag(tag::END);
        Ok(())
    }
}

/// Buffers map entries so they can be written in sorted order
struct MapEncoder<'a> {
    parent: &'a mut Encoder,
    entries: Vec<Vec<u8>>,
    pending: Option<Vec<u8>>,
}

impl ser::SerializeMap for MapEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), EncodeError> {
        self.pending = Some(to_bytes(key)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), EncodeError> {
        let mut entry = self
            .pending
            .take()
            .ok_or_else(|| EncodeError("map value serialized before its key".to_string()))?;
        entry.extend_from_slice(&to_bytes(value)?);
        self.entries.push(entry);
        Ok(())
    }

    fn end(self) -> Result<(), EncodeError> {
        self.parent.sorted(tag::MAP, self.entries);
        Ok(())
    }
}
