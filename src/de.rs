//! Demarshalling signature-typed values from raw bytes.
//!
//! Decoding is a pure function over a fixed byte buffer: every read aligns
//! the cursor to the type's natural alignment first, and truncated or
//! malformed input surfaces as an error before anything is read out of
//! bounds. No partially-built [`Value`] tree ever escapes a failed decode.

use crate::align::align;
use crate::error::{Error, Result};
use crate::message::Endian;
use crate::signature::{TypeDesc, MAX_DEPTH};
use crate::value::Value;

use byteorder::{ByteOrder, BE, LE};
use log::trace;
use std::marker::PhantomData;
use std::str::from_utf8;

/// Upper bound on the byte length an array may claim. Anything larger is
/// rejected as a resource-exhaustion guard before any element is decoded.
pub const MAX_ARRAY_LENGTH: usize = 67_108_864;

/// Decode a whole buffer against `sig`. Bytes left over after the last
/// value are a framing error.
pub fn decode(sig: &[u8], data: &[u8], endian: Endian) -> Result<Vec<Value>> {
    let (values, end) = decode_at(sig, data, 0, endian)?;
    if end != data.len() {
        return Err(Error::LeftoverData(data.len() - end));
    }
    Ok(values)
}

/// Decode the values described by `sig` starting at `start`, returning them
/// together with the offset one past the last byte consumed.
pub fn decode_at(
    sig: &[u8],
    data: &[u8],
    start: usize,
    endian: Endian,
) -> Result<(Vec<Value>, usize)> {
    match endian {
        Endian::Little => decode_with::<LE>(sig, data, start),
        Endian::Big => decode_with::<BE>(sig, data, start),
    }
}

fn decode_with<B: ByteOrder>(
    sig: &[u8],
    data: &[u8],
    start: usize,
) -> Result<(Vec<Value>, usize)> {
    let types = TypeDesc::parse(sig)?;
    let mut de = Demarshaller::<B> {
        data,
        ix: start,
        phantom: PhantomData,
    };
    let mut values = Vec::with_capacity(types.len());
    for ty in &types {
        values.push(de.decode_one(ty, 0)?);
    }
    Ok((values, de.ix))
}

struct Demarshaller<'de, B: ByteOrder> {
    data: &'de [u8],
    ix: usize,
    phantom: PhantomData<B>,
}

impl<'de, B: ByteOrder> Demarshaller<'de, B> {
    // Index after a read or alignment must stay within the buffer.
    fn validate_ix(&self) -> Result<()> {
        if self.ix > self.data.len() {
            return Err(Error::Truncated(self.ix));
        }
        Ok(())
    }

    fn align_reader(&mut self, alignment: usize) -> Result<()> {
        self.ix = align(self.ix, alignment);
        self.validate_ix()
    }

    fn read(&mut self, len: usize) -> Result<&'de [u8]> {
        let old_ix = self.ix;
        self.ix = old_ix + len;
        self.validate_ix()?;
        Ok(&self.data[old_ix..self.ix])
    }

    // 4-byte length prefix, UTF-8 bytes, trailing NUL.
    fn read_str_basic(&mut self) -> Result<String> {
        let len = B::read_u32(self.read(4)?) as usize;
        let bytes = self.read(len + 1)?;
        Ok(from_utf8(&bytes[..len])?.to_owned())
    }

    // 1-byte length prefix, signature bytes, trailing NUL.
    fn read_sig_basic(&mut self) -> Result<String> {
        let len = self.read(1)?[0] as usize;
        let bytes = self.read(len + 1)?;
        Ok(from_utf8(&bytes[..len])?.to_owned())
    }

    fn decode_one(&mut self, ty: &TypeDesc, depth: usize) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep(MAX_DEPTH));
        }

        self.align_reader(ty.alignment())?;
        trace!("decoding {:?} at {}", ty, self.ix);
        match ty {
            TypeDesc::Byte => Ok(Value::Byte(self.read(1)?[0])),
            TypeDesc::Bool => {
                let i = B::read_u32(self.read(4)?);
                if i > 1 {
                    return Err(Error::InvalidBoolValue(i));
                }
                Ok(Value::Bool(i == 1))
            }
            TypeDesc::Int16 => Ok(Value::Int16(B::read_i16(self.read(2)?))),
            TypeDesc::UInt16 => Ok(Value::UInt16(B::read_u16(self.read(2)?))),
            TypeDesc::Int32 => Ok(Value::Int32(B::read_i32(self.read(4)?))),
            TypeDesc::UInt32 => Ok(Value::UInt32(B::read_u32(self.read(4)?))),
            TypeDesc::Int64 => Ok(Value::Int64(B::read_i64(self.read(8)?))),
            TypeDesc::UInt64 => Ok(Value::UInt64(B::read_u64(self.read(8)?))),
            TypeDesc::Double => Ok(Value::Double(B::read_f64(self.read(8)?))),
            TypeDesc::String => Ok(Value::Str(self.read_str_basic()?)),
            TypeDesc::ObjectPath => Ok(Value::ObjectPath(self.read_str_basic()?)),
            TypeDesc::Signature => Ok(Value::Signature(self.read_sig_basic()?)),
            TypeDesc::Array(elem) => {
                let size = B::read_u32(self.read(4)?) as usize;
                trace!("reading array of {} bytes at {}", size, self.ix);
                if size > MAX_ARRAY_LENGTH {
                    return Err(Error::ArrayTooLong(size));
                }
                // The element alignment padding does not count towards the
                // array's byte length.
                self.align_reader(elem.alignment())?;
                let available = self.data.len() - self.ix;
                if size > available {
                    return Err(Error::ArrayOutOfBounds {
                        claimed: size,
                        available,
                    });
                }
                let end_ix = self.ix + size;
                let mut items = Vec::new();
                while self.ix < end_ix {
                    items.push(self.decode_one(elem, depth + 1)?);
                }
                if self.ix != end_ix {
                    return Err(Error::ArrayElementOverrun(self.ix, end_ix));
                }
                Ok(Value::Array {
                    elem_sig: elem.signature(),
                    items,
                })
            }
            TypeDesc::Struct(fields) => {
                let mut contents = Vec::with_capacity(fields.len());
                for field in fields {
                    contents.push(self.decode_one(field, depth + 1)?);
                }
                Ok(Value::Struct(contents))
            }
            TypeDesc::DictEntry(key, val) => {
                let key = self.decode_one(key, depth + 1)?;
                let val = self.decode_one(val, depth + 1)?;
                Ok(Value::DictEntry(Box::new(key), Box::new(val)))
            }
            TypeDesc::Variant => {
                let sig = self.read_sig_basic()?;
                let inner = TypeDesc::parse_single(sig.as_bytes())?;
                let value = self.decode_one(&inner, depth + 1)?;
                Ok(Value::Variant {
                    sig,
                    value: Box::new(value),
                })
            }
        }
    }
}
