//! Marshalling [`Value`] trees into raw bytes.
//!
//! The encoder is the structural mirror of [`crate::de`]: it walks a parsed
//! signature and the value tree together, padding to each type's natural
//! alignment as it goes. Array byte lengths are emitted as placeholders via
//! a [`LengthToken`] and patched once the contents are written; padding
//! between the length field and the first element never counts towards the
//! length.
//!
//! A value that does not structurally match the signature it is encoded
//! against is an encoding error, and nothing is returned for that encode.

use crate::align::align_vec;
use crate::error::{Error, Result};
use crate::message::Endian;
use crate::signature::TypeDesc;
use crate::value::Value;

use byteorder::{ByteOrder, BE, LE};
use std::marker::PhantomData;

/// Encode `values` against `sig`, producing the raw body bytes.
pub fn encode(sig: &[u8], values: &[Value], endian: Endian) -> Result<Vec<u8>> {
    match endian {
        Endian::Little => encode_with::<LE>(sig, values),
        Endian::Big => encode_with::<BE>(sig, values),
    }
}

fn encode_with<B: ByteOrder>(sig: &[u8], values: &[Value]) -> Result<Vec<u8>> {
    let types = TypeDesc::parse(sig)?;
    if types.len() != values.len() {
        return Err(Error::SignatureMismatch {
            expected: String::from_utf8_lossy(sig).into_owned(),
            found: values.iter().map(|v| v.signature()).collect(),
        });
    }
    let mut ser = Marshaller::<B>::new();
    for (ty, value) in types.iter().zip(values) {
        ser.encode_one(ty, value)?;
    }
    Ok(ser.complete())
}

/// A placeholder for an array's 4-byte length field, patched on finish.
pub(crate) struct LengthToken {
    fill_ix: usize,
    begin_ix: usize,
}

pub(crate) struct Marshaller<B: ByteOrder> {
    data: Vec<u8>,
    phantom: PhantomData<B>,
}

impl<B: ByteOrder> Marshaller<B> {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub(crate) fn complete(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn align(&mut self, alignment: usize) {
        align_vec(&mut self.data, alignment);
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        B::write_u32(&mut buf, v);
        self.write(&buf);
    }

    pub(crate) fn write_u32_at(&mut self, ix: usize, v: u32) {
        B::write_u32(&mut self.data[ix..ix + 4], v);
    }

    // 4-byte length prefix, UTF-8 bytes, trailing NUL. Caller aligns.
    fn write_str_basic(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write(s.as_bytes());
        self.write(&[0]);
    }

    // 1-byte length prefix, signature bytes, trailing NUL.
    fn write_sig_basic(&mut self, s: &str) {
        self.write(&[s.len() as u8]);
        self.write(s.as_bytes());
        self.write(&[0]);
    }

    pub(crate) fn start_length(&mut self) -> LengthToken {
        self.align(4);
        let fill_ix = self.data.len();
        self.write(&[0, 0, 0, 0]);
        LengthToken {
            fill_ix,
            begin_ix: fill_ix + 4,
        }
    }

    // Call after aligning to the first element so the padding is excluded
    // from the patched length.
    pub(crate) fn mark_length_start(&mut self, token: &mut LengthToken) {
        token.begin_ix = self.data.len();
    }

    pub(crate) fn finish_length(&mut self, token: LengthToken) {
        let length = (self.data.len() - token.begin_ix) as u32;
        B::write_u32(&mut self.data[token.fill_ix..token.fill_ix + 4], length);
    }

    fn mismatch(ty: &TypeDesc, value: &Value) -> Error {
        Error::SignatureMismatch {
            expected: ty.signature(),
            found: value.signature(),
        }
    }

    pub(crate) fn encode_one(&mut self, ty: &TypeDesc, value: &Value) -> Result<()> {
        self.align(ty.alignment());
        match (ty, value) {
            (TypeDesc::Byte, Value::Byte(v)) => self.write(&[*v]),
            (TypeDesc::Bool, Value::Bool(v)) => self.write_u32(*v as u32),
            (TypeDesc::Int16, Value::Int16(v)) => {
                let mut buf = [0u8; 2];
                B::write_i16(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::UInt16, Value::UInt16(v)) => {
                let mut buf = [0u8; 2];
                B::write_u16(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::Int32, Value::Int32(v)) => {
                let mut buf = [0u8; 4];
                B::write_i32(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::UInt32, Value::UInt32(v)) => self.write_u32(*v),
            (TypeDesc::Int64, Value::Int64(v)) => {
                let mut buf = [0u8; 8];
                B::write_i64(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::UInt64, Value::UInt64(v)) => {
                let mut buf = [0u8; 8];
                B::write_u64(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::Double, Value::Double(v)) => {
                let mut buf = [0u8; 8];
                B::write_f64(&mut buf, *v);
                self.write(&buf);
            }
            (TypeDesc::String, Value::Str(s)) => self.write_str_basic(s),
            (TypeDesc::ObjectPath, Value::ObjectPath(s)) => self.write_str_basic(s),
            (TypeDesc::Signature, Value::Signature(s)) => self.write_sig_basic(s),
            (TypeDesc::Array(elem), Value::Array { elem_sig, items }) => {
                if *elem_sig != elem.signature() {
                    return Err(Self::mismatch(ty, value));
                }
                let mut token = self.start_length();
                self.align(elem.alignment());
                self.mark_length_start(&mut token);
                for item in items {
                    self.encode_one(elem, item)?;
                }
                self.finish_length(token);
            }
            (TypeDesc::Struct(fields), Value::Struct(contents)) => {
                if fields.len() != contents.len() {
                    return Err(Self::mismatch(ty, value));
                }
                for (field, content) in fields.iter().zip(contents) {
                    self.encode_one(field, content)?;
                }
            }
            (TypeDesc::DictEntry(kt, vt), Value::DictEntry(key, val)) => {
                self.encode_one(kt, key)?;
                self.encode_one(vt, val)?;
            }
            (TypeDesc::Variant, Value::Variant { sig, value }) => {
                let inner = TypeDesc::parse_single(sig.as_bytes())?;
                self.write_sig_basic(sig);
                self.encode_one(&inner, value)?;
            }
            (ty, value) => return Err(Self::mismatch(ty, value)),
        }
        Ok(())
    }
}
