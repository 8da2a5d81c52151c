//! The D-Bus type-signature grammar.
//!
//! A signature is an ordered sequence of single-byte type codes. [`TypeDesc`]
//! is the parsed form: a tree of type descriptors that drives both the
//! decoder and the encoder without consuming any data bytes.

use crate::error::{Error, Result};

/// Maximum container nesting accepted before a signature (or a chain of
/// variants at decode time) is rejected, to bound stack usage on hostile
/// input.
pub const MAX_DEPTH: usize = 64;

/// A parsed single complete type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypeDesc {
    Byte,
    Bool,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ObjectPath,
    Signature,
    Array(Box<TypeDesc>),
    Struct(Vec<TypeDesc>),
    DictEntry(Box<TypeDesc>, Box<TypeDesc>),
    Variant,
}

impl TypeDesc {
    /// Parse a full signature into its sequence of complete types.
    pub fn parse(sig: &[u8]) -> Result<Vec<TypeDesc>> {
        let mut parser = Parser { sig, ix: 0 };
        let mut types = Vec::new();
        while parser.ix < sig.len() {
            types.push(parser.parse_one(0)?);
        }
        Ok(types)
    }

    /// Parse a signature that must contain exactly one complete type,
    /// such as a variant's embedded signature.
    pub fn parse_single(sig: &[u8]) -> Result<TypeDesc> {
        let mut parser = Parser { sig, ix: 0 };
        let ty = parser.parse_one(0)?;
        if parser.ix != sig.len() {
            return Err(Error::VariantSignatureArity(
                String::from_utf8_lossy(sig).into_owned(),
            ));
        }
        Ok(ty)
    }

    pub fn alignment(&self) -> usize {
        match self {
            TypeDesc::Byte | TypeDesc::Signature | TypeDesc::Variant => 1,
            TypeDesc::Int16 | TypeDesc::UInt16 => 2,
            TypeDesc::Bool
            | TypeDesc::Int32
            | TypeDesc::UInt32
            | TypeDesc::String
            | TypeDesc::ObjectPath
            | TypeDesc::Array(_) => 4,
            TypeDesc::Int64
            | TypeDesc::UInt64
            | TypeDesc::Double
            | TypeDesc::Struct(_)
            | TypeDesc::DictEntry(_, _) => 8,
        }
    }

    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            TypeDesc::Array(_) | TypeDesc::Struct(_) | TypeDesc::DictEntry(_, _) | TypeDesc::Variant
        )
    }

    /// Re-derive the signature string for this type.
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        self.write_signature(&mut sig);
        sig
    }

    fn write_signature(&self, sig: &mut String) {
        match self {
            TypeDesc::Byte => sig.push('y'),
            TypeDesc::Bool => sig.push('b'),
            TypeDesc::Int16 => sig.push('n'),
            TypeDesc::UInt16 => sig.push('q'),
            TypeDesc::Int32 => sig.push('i'),
            TypeDesc::UInt32 => sig.push('u'),
            TypeDesc::Int64 => sig.push('x'),
            TypeDesc::UInt64 => sig.push('t'),
            TypeDesc::Double => sig.push('d'),
            TypeDesc::String => sig.push('s'),
            TypeDesc::ObjectPath => sig.push('o'),
            TypeDesc::Signature => sig.push('g'),
            TypeDesc::Variant => sig.push('v'),
            TypeDesc::Array(elem) => {
                sig.push('a');
                elem.write_signature(sig);
            }
            TypeDesc::Struct(fields) => {
                sig.push('(');
                for f in fields {
                    f.write_signature(sig);
                }
                sig.push(')');
            }
            TypeDesc::DictEntry(key, val) => {
                sig.push('{');
                key.write_signature(sig);
                val.write_signature(sig);
                sig.push('}');
            }
        }
    }
}

struct Parser<'a> {
    sig: &'a [u8],
    ix: usize,
}

impl<'a> Parser<'a> {
    fn next_code(&mut self) -> Result<u8> {
        let code = *self.sig.get(self.ix).ok_or(Error::SignatureExhausted)?;
        self.ix += 1;
        Ok(code)
    }

    fn parse_one(&mut self, depth: usize) -> Result<TypeDesc> {
        if depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep(MAX_DEPTH));
        }

        let start = self.ix;
        let code = self.next_code()?;
        match code {
            b'y' => Ok(TypeDesc::Byte),
            b'b' => Ok(TypeDesc::Bool),
            b'n' => Ok(TypeDesc::Int16),
            b'q' => Ok(TypeDesc::UInt16),
            b'i' => Ok(TypeDesc::Int32),
            b'u' => Ok(TypeDesc::UInt32),
            b'x' => Ok(TypeDesc::Int64),
            b't' => Ok(TypeDesc::UInt64),
            b'd' => Ok(TypeDesc::Double),
            b's' => Ok(TypeDesc::String),
            b'o' => Ok(TypeDesc::ObjectPath),
            b'g' => Ok(TypeDesc::Signature),
            b'v' => Ok(TypeDesc::Variant),
            b'a' => {
                // The array marker consumes exactly the following single
                // complete type.
                let elem = self.parse_one(depth + 1)?;
                Ok(TypeDesc::Array(Box::new(elem)))
            }
            b'(' => {
                let mut fields = Vec::new();
                loop {
                    match self.sig.get(self.ix) {
                        Some(b')') => {
                            self.ix += 1;
                            break;
                        }
                        Some(_) => fields.push(self.parse_one(depth + 1)?),
                        None => return Err(Error::MismatchedSignatureBracketing(start)),
                    }
                }
                if fields.is_empty() {
                    return Err(Error::EmptyStruct);
                }
                Ok(TypeDesc::Struct(fields))
            }
            b'{' => {
                let key_code = *self.sig.get(self.ix).ok_or(Error::SignatureExhausted)?;
                let key = self.parse_one(depth + 1)?;
                if !key.is_basic() {
                    return Err(Error::DictEntryKeyNotBasic(key_code));
                }
                if self.sig.get(self.ix) == Some(&b'}') {
                    // A key with no value is wrong arity, not bad bracketing.
                    return Err(Error::DictEntryArity);
                }
                let val = self.parse_one(depth + 1)?;
                match self.next_code() {
                    Ok(b'}') => Ok(TypeDesc::DictEntry(Box::new(key), Box::new(val))),
                    Ok(_) => Err(Error::DictEntryArity),
                    Err(_) => Err(Error::MismatchedSignatureBracketing(start)),
                }
            }
            b')' | b'}' => Err(Error::MismatchedSignatureBracketing(start)),
            b'h' | b'f' => Err(Error::UnsupportedSignatureCharacter(code)),
            other => Err(Error::UnrecognizedSignatureCharacter(other)),
        }
    }
}
