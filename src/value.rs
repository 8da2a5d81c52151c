//! The demarshalled counterpart of a signature.
//!
//! A [`Value`] tree's shape always matches the signature it was decoded
//! against; the decoder checks this structurally while it works, so no
//! after-the-fact inference is needed. Arrays and variants carry their
//! element/inner signature so that [`Value::signature`] is exact even for
//! empty arrays.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::signature::TypeDesc;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(String),
    /// `elem_sig` is the signature of one element, e.g. `"i"` for `ai`.
    Array { elem_sig: String, items: Vec<Value> },
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    /// A self-describing container: the wire payload carries `sig` alongside
    /// the value.
    Variant { sig: String, value: Box<Value> },
}

impl Value {
    /// Convenience constructor for an array of `elem_sig`-typed items.
    pub fn array(elem_sig: &str, items: Vec<Value>) -> Value {
        Value::Array {
            elem_sig: elem_sig.to_owned(),
            items,
        }
    }

    /// Convenience constructor for a variant wrapping `value`.
    pub fn variant(sig: &str, value: Value) -> Value {
        Value::Variant {
            sig: sig.to_owned(),
            value: Box::new(value),
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Value::Byte(_) => b'y',
            Value::Bool(_) => b'b',
            Value::Int16(_) => b'n',
            Value::UInt16(_) => b'q',
            Value::Int32(_) => b'i',
            Value::UInt32(_) => b'u',
            Value::Int64(_) => b'x',
            Value::UInt64(_) => b't',
            Value::Double(_) => b'd',
            Value::Str(_) => b's',
            Value::ObjectPath(_) => b'o',
            Value::Signature(_) => b'g',
            Value::Array { .. } => b'a',
            Value::Struct(_) => b'(',
            Value::DictEntry(_, _) => b'{',
            Value::Variant { .. } => b'v',
        }
    }

    /// Derive this value's signature. Exact for every value, including empty
    /// arrays, because arrays store their element signature.
    pub fn signature(&self) -> String {
        match self {
            Value::Array { elem_sig, .. } => format!("a{}", elem_sig),
            Value::Struct(fields) => {
                let mut sig = String::from("(");
                for f in fields {
                    sig.push_str(&f.signature());
                }
                sig.push(')');
                sig
            }
            Value::DictEntry(key, val) => {
                format!("{{{}{}}}", key.signature(), val.signature())
            }
            Value::Variant { .. } => "v".to_owned(),
            scalar => (scalar.type_code() as char).to_string(),
        }
    }

    /// The parsed type of this value.
    ///
    /// Arrays carry a caller-supplied element signature, so a malformed one
    /// surfaces here as a format error rather than a panic.
    pub fn type_desc(&self) -> Result<TypeDesc> {
        TypeDesc::parse_single(self.signature().as_bytes())
    }
}

macro_rules! value_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Value {
                Value::$variant(v)
            }
        }
    };
}

value_from!(u8, Byte);
value_from!(bool, Bool);
value_from!(i16, Int16);
value_from!(u16, UInt16);
value_from!(i32, Int32);
value_from!(u32, UInt32);
value_from!(i64, Int64);
value_from!(u64, UInt64);
value_from!(f64, Double);
value_from!(String, Str);

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned())
    }
}

/// Capability interface for host type-description objects that need to drive
/// array/struct shaping when no explicit signature is available.
///
/// Each entry in [`sub_types`] is one named child together with every node
/// sharing that name, in a stable order.
///
/// [`sub_types`]: SubTypes::sub_types()
pub trait SubTypes {
    fn sub_types(&self) -> Vec<(&str, &[Self])>
    where
        Self: Sized;

    /// The scalar payload of a leaf node, if any.
    fn scalar(&self) -> Option<&Value>;
}

/// A generic untyped host tree: an optional scalar root plus ordered named
/// children, each name mapping to one or more nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueTree {
    pub root: Option<Value>,
    pub children: BTreeMap<String, Vec<ValueTree>>,
}

impl ValueTree {
    pub fn leaf(root: Value) -> ValueTree {
        ValueTree {
            root: Some(root),
            children: BTreeMap::new(),
        }
    }
}

impl SubTypes for ValueTree {
    fn sub_types(&self) -> Vec<(&str, &[ValueTree])> {
        self.children
            .iter()
            .map(|(name, nodes)| (name.as_str(), nodes.as_slice()))
            .collect()
    }

    fn scalar(&self) -> Option<&Value> {
        self.root.as_ref()
    }
}

/// Synthesize a signature from an untyped host tree: two or more same-named
/// children become an array (of a struct when the element itself has several
/// children), a single multi-child node becomes a struct, and a leaf maps to
/// its scalar's type code.
///
/// Best effort only. Empty and single-element collections are
/// indistinguishable from plain values here, so callers that need roundtrip
/// fidelity should pass an explicit signature instead.
pub fn synthesize_signature<T: SubTypes>(node: &T) -> String {
    let subs = node.sub_types();
    if subs.is_empty() {
        return match node.scalar() {
            Some(v) => (v.type_code() as char).to_string(),
            None => String::new(),
        };
    }

    let mut sig = String::new();
    for (_, nodes) in subs {
        let first = match nodes.first() {
            Some(first) => first,
            None => continue,
        };
        if nodes.len() > 1 {
            sig.push('a');
            if first.sub_types().len() > 1 {
                sig.push('(');
                sig.push_str(&synthesize_signature(first));
                sig.push(')');
            } else {
                sig.push_str(&synthesize_signature(first));
            }
        } else if first.sub_types().len() > 1 {
            sig.push('(');
            sig.push_str(&synthesize_signature(first));
            sig.push(')');
        } else {
            sig.push_str(&synthesize_signature(first));
        }
    }
    sig
}

#[cfg(test)]
mod tests {
    use super::{synthesize_signature, Value, ValueTree};
    use crate::error::Error;
    use crate::signature::TypeDesc;
    use test_log::test;

    #[test]
    fn type_desc_rejects_bad_element_signature() {
        assert_eq!(Value::from(3i32).type_desc(), Ok(TypeDesc::Int32));
        assert_eq!(
            Value::array("i", vec![]).type_desc(),
            Ok(TypeDesc::Array(Box::new(TypeDesc::Int32)))
        );
        assert_eq!(
            Value::array("zz", vec![]).type_desc(),
            Err(Error::UnrecognizedSignatureCharacter(b'z'))
        );
    }

    #[test]
    fn scalar_signatures() {
        assert_eq!(Value::from(3i32).signature(), "i");
        assert_eq!(Value::from("hi").signature(), "s");
        assert_eq!(Value::ObjectPath("/foo".to_owned()).signature(), "o");
    }

    #[test]
    fn container_signatures() {
        let v = Value::array("i", vec![1i32.into(), 2i32.into()]);
        assert_eq!(v.signature(), "ai");

        let empty = Value::array("(sd)", vec![]);
        assert_eq!(empty.signature(), "a(sd)");

        let s = Value::Struct(vec!["Hi".into(), 0.2f64.into()]);
        assert_eq!(s.signature(), "(sd)");

        let e = Value::DictEntry(Box::new("a".into()), Box::new(Value::variant("i", 3i32.into())));
        assert_eq!(e.signature(), "{sv}");
    }

    #[test]
    fn synthesize_scalar_and_struct() {
        let leaf = ValueTree::leaf(3i32.into());
        assert_eq!(synthesize_signature(&leaf), "i");

        let mut node = ValueTree::default();
        node.children
            .insert("a".to_owned(), vec![ValueTree::leaf("x".into())]);
        node.children
            .insert("b".to_owned(), vec![ValueTree::leaf(1.5f64.into())]);
        // Single node per name, scanned in stable (sorted) order.
        assert_eq!(synthesize_signature(&node), "sd");
    }

    #[test]
    fn synthesize_array_of_scalars() {
        let mut node = ValueTree::default();
        node.children.insert(
            "xs".to_owned(),
            vec![ValueTree::leaf(1i32.into()), ValueTree::leaf(2i32.into())],
        );
        assert_eq!(synthesize_signature(&node), "ai");
    }

    #[test]
    fn synthesize_array_of_structs() {
        let mut elem = ValueTree::default();
        elem.children
            .insert("name".to_owned(), vec![ValueTree::leaf("n".into())]);
        elem.children
            .insert("score".to_owned(), vec![ValueTree::leaf(0.5f64.into())]);

        let mut node = ValueTree::default();
        node.children
            .insert("rows".to_owned(), vec![elem.clone(), elem]);
        assert_eq!(synthesize_signature(&node), "a(sd)");
    }

    #[test]
    fn synthesize_single_element_is_ambiguous() {
        // One element under a name degrades to the element's own signature;
        // the legacy heuristic cannot tell a one-element array from a plain
        // value, which is why explicit signatures are preferred.
        let mut node = ValueTree::default();
        node.children
            .insert("xs".to_owned(), vec![ValueTree::leaf(1i32.into())]);
        assert_eq!(synthesize_signature(&node), "i");
    }
}
