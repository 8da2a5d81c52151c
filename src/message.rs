//! Framing the four D-Bus message kinds.
//!
//! Wire layout, fixed by the D-Bus specification:
//!
//! ```text
//! [endian:1][msgtype:1][flags:1][version:1][bodyLength:4][serial:4]
//! [headerArrayByteLen:4][padding to 8][(byte code, variant value)]*
//! [padding to 8][body bytes per the SIGNATURE header field]
//! ```
//!
//! The variable header is a signature-`a(yv)` array of (code, variant)
//! pairs. Codes this codec knows about are mapped to named fields on
//! [`Message`]; unknown codes are preserved verbatim and re-emitted on
//! encode, but never interpreted.

use crate::align::align;
use crate::de;
use crate::error::{Error, Result};
use crate::ser::Marshaller;
use crate::signature::TypeDesc;
use crate::value::Value;

use byteorder::{ByteOrder, BE, LE};
use log::debug;
use std::io::{Read, Write};

/// Highest protocol version this codec understands. A message with a larger
/// version byte is a framing error, fatal for that connection.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message-type codes. Values are fixed by the D-Bus specification.
mod message_type {
    pub const METHOD_CALL: u8 = 1;
    pub const METHOD_RETURN: u8 = 2;
    pub const ERROR: u8 = 3;
    pub const SIGNAL: u8 = 4;
}

/// Header-field codes recognized by the codec.
pub mod header_field {
    pub const PATH: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const MEMBER: u8 = 3;
    pub const ERROR_NAME: u8 = 4;
    pub const REPLY_SERIAL: u8 = 5;
    pub const DESTINATION: u8 = 6;
    pub const SENDER: u8 = 7;
    pub const SIGNATURE: u8 = 8;
}

/// Message flag bits.
pub mod flag {
    pub const NO_REPLY_EXPECTED: u8 = 0x01;
    pub const NO_AUTO_START: u8 = 0x02;
}

/// Byte order of a single message, chosen per-message, not per-field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn from_flag(flag: u8) -> Result<Endian> {
        match flag {
            b'l' => Ok(Endian::Little),
            b'B' => Ok(Endian::Big),
            other => Err(Error::InvalidEndianFlag(other)),
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            Endian::Little => b'l',
            Endian::Big => b'B',
        }
    }

    fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LE::read_u32(buf),
            Endian::Big => BE::read_u32(buf),
        }
    }
}

/// The kind-specific required fields of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageKind {
    MethodCall {
        path: String,
        interface: Option<String>,
        member: String,
    },
    MethodReturn {
        reply_serial: u32,
    },
    Error {
        name: String,
        reply_serial: u32,
    },
    Signal {
        path: String,
        interface: String,
        member: String,
    },
}

impl MessageKind {
    pub fn type_code(&self) -> u8 {
        match self {
            MessageKind::MethodCall { .. } => message_type::METHOD_CALL,
            MessageKind::MethodReturn { .. } => message_type::METHOD_RETURN,
            MessageKind::Error { .. } => message_type::ERROR,
            MessageKind::Signal { .. } => message_type::SIGNAL,
        }
    }
}

/// One logical D-Bus message.
///
/// `signature` and `body` are present together or absent together: a body
/// with no signature cannot be decoded and is rejected on both directions.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub endian: Endian,
    pub flags: u8,
    /// Assigned by the sender, unique per connection lifetime, never zero.
    pub serial: u32,
    pub kind: MessageKind,
    pub sender: Option<String>,
    pub destination: Option<String>,
    pub signature: Option<String>,
    pub body: Vec<Value>,
    /// Header fields with codes the codec does not interpret.
    pub extra_headers: Vec<(u8, Value)>,
}

impl Message {
    fn new(serial: u32, kind: MessageKind, body: Vec<Value>) -> Message {
        let signature: String = body.iter().map(|v| v.signature()).collect();
        Message {
            endian: Endian::Little,
            flags: 0,
            serial,
            kind,
            sender: None,
            destination: None,
            signature: if signature.is_empty() {
                None
            } else {
                Some(signature)
            },
            body,
            extra_headers: Vec::new(),
        }
    }

    pub fn method_call(
        serial: u32,
        path: &str,
        interface: Option<&str>,
        member: &str,
        body: Vec<Value>,
    ) -> Message {
        Message::new(
            serial,
            MessageKind::MethodCall {
                path: path.to_owned(),
                interface: interface.map(str::to_owned),
                member: member.to_owned(),
            },
            body,
        )
    }

    pub fn method_return(serial: u32, reply_serial: u32, body: Vec<Value>) -> Message {
        Message::new(serial, MessageKind::MethodReturn { reply_serial }, body)
    }

    pub fn error(serial: u32, name: &str, reply_serial: u32, body: Vec<Value>) -> Message {
        Message::new(
            serial,
            MessageKind::Error {
                name: name.to_owned(),
                reply_serial,
            },
            body,
        )
    }

    pub fn signal(
        serial: u32,
        path: &str,
        interface: &str,
        member: &str,
        body: Vec<Value>,
    ) -> Message {
        Message::new(
            serial,
            MessageKind::Signal {
                path: path.to_owned(),
                interface: interface.to_owned(),
                member: member.to_owned(),
            },
            body,
        )
    }
}

// One shared header-assembly routine for all four kinds. Field order:
// kind-specific fields first (reply-serial/error-name before anything else
// for replies), then destination, sender, signature, then preserved
// uninterpreted fields.
fn header_fields(msg: &Message) -> Vec<(u8, Value)> {
    let string_variant = |s: &str| Value::variant("s", s.into());
    let mut fields = Vec::new();
    match &msg.kind {
        MessageKind::MethodCall {
            path,
            interface,
            member,
        } => {
            fields.push((
                header_field::PATH,
                Value::variant("o", Value::ObjectPath(path.clone())),
            ));
            if let Some(interface) = interface {
                fields.push((header_field::INTERFACE, string_variant(interface)));
            }
            fields.push((header_field::MEMBER, string_variant(member)));
        }
        MessageKind::MethodReturn { reply_serial } => {
            fields.push((
                header_field::REPLY_SERIAL,
                Value::variant("u", Value::UInt32(*reply_serial)),
            ));
        }
        MessageKind::Error { name, reply_serial } => {
            fields.push((header_field::ERROR_NAME, string_variant(name)));
            fields.push((
                header_field::REPLY_SERIAL,
                Value::variant("u", Value::UInt32(*reply_serial)),
            ));
        }
        MessageKind::Signal {
            path,
            interface,
            member,
        } => {
            fields.push((
                header_field::PATH,
                Value::variant("o", Value::ObjectPath(path.clone())),
            ));
            fields.push((header_field::INTERFACE, string_variant(interface)));
            fields.push((header_field::MEMBER, string_variant(member)));
        }
    }
    if let Some(destination) = &msg.destination {
        fields.push((header_field::DESTINATION, string_variant(destination)));
    }
    if let Some(sender) = &msg.sender {
        fields.push((header_field::SENDER, string_variant(sender)));
    }
    if let Some(signature) = &msg.signature {
        fields.push((
            header_field::SIGNATURE,
            Value::variant("g", Value::Signature(signature.clone())),
        ));
    }
    for (code, value) in &msg.extra_headers {
        fields.push((*code, Value::variant(&value.signature(), value.clone())));
    }
    fields
}

/// Encode a message to its full wire representation.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    match msg.endian {
        Endian::Little => encode_message_with::<LE>(msg),
        Endian::Big => encode_message_with::<BE>(msg),
    }
}

fn encode_message_with<B: ByteOrder>(msg: &Message) -> Result<Vec<u8>> {
    if msg.signature.is_none() && !msg.body.is_empty() {
        return Err(Error::SignatureMismatch {
            expected: String::new(),
            found: msg.body.iter().map(|v| v.signature()).collect(),
        });
    }

    let mut ser = Marshaller::<B>::new();
    ser.write(&[
        msg.endian.flag(),
        msg.kind.type_code(),
        msg.flags,
        PROTOCOL_VERSION,
    ]);
    let body_len_ix = ser.len();
    ser.write_u32(0);
    ser.write_u32(msg.serial);

    let entries = header_fields(msg)
        .into_iter()
        .map(|(code, variant)| Value::Struct(vec![Value::Byte(code), variant]))
        .collect();
    let header_array = Value::array("(yv)", entries);
    let header_ty = TypeDesc::parse_single(b"a(yv)")?;
    ser.encode_one(&header_ty, &header_array)?;
    ser.align(8);

    let body_start = ser.len();
    if let Some(signature) = &msg.signature {
        let types = TypeDesc::parse(signature.as_bytes())?;
        if types.len() != msg.body.len() {
            return Err(Error::SignatureMismatch {
                expected: signature.clone(),
                found: msg.body.iter().map(|v| v.signature()).collect(),
            });
        }
        for (ty, value) in types.iter().zip(&msg.body) {
            ser.encode_one(ty, value)?;
        }
    }
    let body_len = (ser.len() - body_start) as u32;
    ser.write_u32_at(body_len_ix, body_len);
    Ok(ser.complete())
}

/// Decode a message from a buffer holding exactly one wire message.
pub fn decode_message(buf: &[u8]) -> Result<Message> {
    if buf.len() < 16 {
        return Err(Error::Truncated(16));
    }
    let endian = Endian::from_flag(buf[0])?;
    let msg_type = buf[1];
    let flags = buf[2];
    let version = buf[3];
    if version > PROTOCOL_VERSION {
        return Err(Error::UnsupportedProtocolVersion(version));
    }

    // bodyLength, serial, then the header-field array, in one pass.
    let (header_vals, header_end) = de::decode_at(b"uua(yv)", buf, 4, endian)?;
    let (body_len, serial, entries) = match header_vals.as_slice() {
        [Value::UInt32(body_len), Value::UInt32(serial), Value::Array { items, .. }] => {
            (*body_len as usize, *serial, items.clone())
        }
        _ => unreachable!("decode returns the shape of its signature"),
    };
    debug!(
        "read message: type {}, flags {:#04x}, body {} bytes, serial {}",
        msg_type, flags, body_len, serial
    );

    let mut path = None;
    let mut interface = None;
    let mut member = None;
    let mut error_name = None;
    let mut reply_serial = None;
    let mut destination = None;
    let mut sender = None;
    let mut signature: Option<String> = None;
    let mut extra_headers = Vec::new();

    for entry in entries {
        let (code, variant_value) = match entry {
            Value::Struct(fields) => match fields.as_slice() {
                [Value::Byte(code), Value::Variant { value, .. }] => {
                    (*code, (**value).clone())
                }
                _ => unreachable!("header entries decode as (yv)"),
            },
            _ => unreachable!("header entries decode as (yv)"),
        };
        match (code, variant_value) {
            (header_field::PATH, Value::ObjectPath(s)) => path = Some(s),
            (header_field::PATH, _) => return Err(Error::HeaderFieldType("PATH")),
            (header_field::INTERFACE, Value::Str(s)) => interface = Some(s),
            (header_field::INTERFACE, _) => return Err(Error::HeaderFieldType("INTERFACE")),
            (header_field::MEMBER, Value::Str(s)) => member = Some(s),
            (header_field::MEMBER, _) => return Err(Error::HeaderFieldType("MEMBER")),
            (header_field::ERROR_NAME, Value::Str(s)) => error_name = Some(s),
            (header_field::ERROR_NAME, _) => return Err(Error::HeaderFieldType("ERROR_NAME")),
            (header_field::REPLY_SERIAL, Value::UInt32(v)) => reply_serial = Some(v),
            (header_field::REPLY_SERIAL, _) => {
                return Err(Error::HeaderFieldType("REPLY_SERIAL"))
            }
            (header_field::DESTINATION, Value::Str(s)) => destination = Some(s),
            (header_field::DESTINATION, _) => return Err(Error::HeaderFieldType("DESTINATION")),
            (header_field::SENDER, Value::Str(s)) => sender = Some(s),
            (header_field::SENDER, _) => return Err(Error::HeaderFieldType("SENDER")),
            (header_field::SIGNATURE, Value::Signature(s)) => {
                signature = if s.is_empty() { None } else { Some(s) }
            }
            (header_field::SIGNATURE, _) => return Err(Error::HeaderFieldType("SIGNATURE")),
            (code, value) => extra_headers.push((code, value)),
        }
    }

    let body_start = align(header_end, 8);
    let total = body_start + body_len;
    if buf.len() < total {
        return Err(Error::Truncated(total));
    }
    if buf.len() > total {
        return Err(Error::LeftoverData(buf.len() - total));
    }

    let body = match &signature {
        Some(signature) => de::decode(signature.as_bytes(), &buf[body_start..total], endian)?,
        None if body_len > 0 => return Err(Error::BodyWithoutSignature(body_len)),
        None => Vec::new(),
    };

    let missing = Error::MissingHeaderField;
    let kind = match msg_type {
        message_type::METHOD_CALL => MessageKind::MethodCall {
            path: path.ok_or(missing("PATH"))?,
            interface,
            member: member.ok_or(missing("MEMBER"))?,
        },
        message_type::METHOD_RETURN => MessageKind::MethodReturn {
            reply_serial: reply_serial.ok_or(missing("REPLY_SERIAL"))?,
        },
        message_type::ERROR => MessageKind::Error {
            name: error_name.ok_or(missing("ERROR_NAME"))?,
            reply_serial: reply_serial.ok_or(missing("REPLY_SERIAL"))?,
        },
        message_type::SIGNAL => MessageKind::Signal {
            path: path.ok_or(missing("PATH"))?,
            interface: interface.ok_or(missing("INTERFACE"))?,
            member: member.ok_or(missing("MEMBER"))?,
        },
        other => return Err(Error::UnknownMessageType(other)),
    };

    Ok(Message {
        endian,
        flags,
        serial,
        kind,
        sender,
        destination,
        signature,
        body,
        extra_headers,
    })
}

/// Read exactly one message from a byte stream: the 12-byte fixed header,
/// the variable header rounded up to 8-byte alignment, then the body.
pub fn read_message<R: Read>(r: &mut R) -> Result<Message> {
    let mut fixed = [0u8; 16];
    r.read_exact(&mut fixed)?;
    let endian = Endian::from_flag(fixed[0])?;
    let body_len = endian.read_u32(&fixed[4..8]) as usize;
    let header_len = endian.read_u32(&fixed[12..16]) as usize;
    // Both lengths are attacker-controlled and drive the allocation below,
    // so they share the 64 MiB guard.
    if header_len > de::MAX_ARRAY_LENGTH {
        return Err(Error::ArrayTooLong(header_len));
    }
    if body_len > de::MAX_ARRAY_LENGTH {
        return Err(Error::BodyTooLong(body_len));
    }

    let mut rest = vec![0u8; align(header_len, 8) + body_len];
    r.read_exact(&mut rest)?;
    let mut whole = fixed.to_vec();
    whole.append(&mut rest);
    decode_message(&whole)
}

/// Write one message to a byte stream.
pub fn write_message<W: Write>(w: &mut W, msg: &Message) -> Result<()> {
    let bytes = encode_message(msg)?;
    w.write_all(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        decode_message, encode_message, read_message, write_message, Endian, Message, MessageKind,
    };
    use crate::error::{Error, ErrorKind, Result};
    use crate::value::Value;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn method_call_roundtrip() -> Result<()> {
        let msg = Message::method_call(
            7,
            "/foo",
            Some("org.example.Foo"),
            "Bar",
            vec!["hi".into()],
        );
        assert_eq!(msg.signature.as_deref(), Some("s"));

        let bytes = encode_message(&msg)?;
        let decoded = decode_message(&bytes)?;
        assert_eq!(decoded, msg);
        match &decoded.kind {
            MessageKind::MethodCall {
                path,
                interface,
                member,
            } => {
                assert_eq!(path, "/foo");
                assert_eq!(interface.as_deref(), Some("org.example.Foo"));
                assert_eq!(member, "Bar");
            }
            other => panic!("expected method call, got {:?}", other),
        }
        assert_eq!(decoded.body, vec![Value::Str("hi".to_owned())]);
        Ok(())
    }

    // An Error message assembled by hand, byte by byte: reply-serial 42,
    // error name org.freedesktop.DBus.Error.UnknownMethod, empty body.
    #[test]
    fn decode_hand_built_error() -> Result<()> {
        let name = b"org.freedesktop.DBus.Error.UnknownMethod";
        let mut buf = vec![
            b'l', 3, 0, 1, // endian, ERROR, flags, version
            0, 0, 0, 0, // body length
            5, 0, 0, 0, // serial
            64, 0, 0, 0, // header array byte length
        ];
        // ERROR_NAME entry at offset 16
        buf.extend_from_slice(&[4, 1, b's', 0]);
        buf.extend_from_slice(&[40, 0, 0, 0]);
        buf.extend_from_slice(name);
        buf.push(0); // ends at 65
        buf.extend_from_slice(&[0; 7]); // entry padding to 72
        // REPLY_SERIAL entry at offset 72
        buf.extend_from_slice(&[5, 1, b'u', 0, 42, 0, 0, 0]);
        assert_eq!(buf.len(), 80);

        let msg = decode_message(&buf)?;
        assert_eq!(msg.serial, 5);
        assert_eq!(
            msg.kind,
            MessageKind::Error {
                name: "org.freedesktop.DBus.Error.UnknownMethod".to_owned(),
                reply_serial: 42,
            }
        );
        assert_eq!(msg.body, vec![]);

        // The reply-serial pairs the error back to its originating call.
        let table = crate::correlation::CallTable::new();
        table.register(42, "GetName")?;
        match msg.kind {
            MessageKind::Error { reply_serial, .. } => {
                assert_eq!(table.resolve(reply_serial), Some("GetName"));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    #[test]
    fn error_roundtrip_with_body() -> Result<()> {
        let mut msg = Message::error(
            9,
            "org.example.Failed",
            42,
            vec!["no such object".into()],
        );
        msg.destination = Some(":1.42".to_owned());
        msg.sender = Some(":1.7".to_owned());
        let decoded = decode_message(&encode_message(&msg)?)?;
        assert_eq!(decoded, msg);
        Ok(())
    }

    #[test]
    fn signal_roundtrip_big_endian() -> Result<()> {
        let mut msg = Message::signal(
            3,
            "/org/example",
            "org.example.Watcher",
            "Changed",
            vec![Value::UInt32(11), Value::array("i", vec![5i32.into()])],
        );
        msg.endian = Endian::Big;
        assert_eq!(msg.signature.as_deref(), Some("uai"));
        let bytes = encode_message(&msg)?;
        assert_eq!(bytes[0], b'B');
        let decoded = decode_message(&bytes)?;
        assert_eq!(decoded, msg);
        Ok(())
    }

    #[test]
    fn method_return_roundtrip_via_stream() -> Result<()> {
        let msg = Message::method_return(8, 7, vec![Value::Bool(true), 1.25f64.into()]);
        let mut stream = Cursor::new(Vec::new());
        write_message(&mut stream, &msg)?;
        write_message(&mut stream, &msg)?;
        stream.set_position(0);
        assert_eq!(read_message(&mut stream)?, msg);
        assert_eq!(read_message(&mut stream)?, msg);
        Ok(())
    }

    #[test]
    fn huge_claimed_body_is_rejected_before_reading() {
        // Only the 16-byte preamble arrives; the claimed ~4 GiB body must be
        // refused without attempting to buffer it.
        let mut fixed = vec![b'l', 2, 0, 1];
        fixed.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes()); // body length
        fixed.extend_from_slice(&[7, 0, 0, 0]); // serial
        fixed.extend_from_slice(&[8, 0, 0, 0]); // header array length
        let err = read_message(&mut Cursor::new(fixed)).unwrap_err();
        assert_eq!(err, Error::BodyTooLong(0xFFFF_FFF0));
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    }

    #[test]
    fn huge_claimed_header_array_is_rejected_before_reading() {
        let mut fixed = vec![b'l', 2, 0, 1];
        fixed.extend_from_slice(&[0, 0, 0, 0]); // body length
        fixed.extend_from_slice(&[7, 0, 0, 0]); // serial
        fixed.extend_from_slice(&0xFFFF_FFF0u32.to_le_bytes()); // header array length
        let err = read_message(&mut Cursor::new(fixed)).unwrap_err();
        assert_eq!(err, Error::ArrayTooLong(0xFFFF_FFF0));
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    }

    #[test]
    fn unknown_message_type_is_dropped_not_fatal() -> Result<()> {
        let mut bytes = encode_message(&Message::method_return(8, 7, vec![]))?;
        bytes[1] = 9;
        let err = decode_message(&bytes).unwrap_err();
        assert_eq!(err, Error::UnknownMessageType(9));
        assert_eq!(err.kind(), ErrorKind::Format);
        Ok(())
    }

    #[test]
    fn unsupported_version_is_fatal_framing() -> Result<()> {
        let mut bytes = encode_message(&Message::method_return(8, 7, vec![]))?;
        bytes[3] = 2;
        let err = decode_message(&bytes).unwrap_err();
        assert_eq!(err, Error::UnsupportedProtocolVersion(2));
        assert_eq!(err.kind(), ErrorKind::Framing);
        Ok(())
    }

    #[test]
    fn invalid_endian_flag() {
        let err = decode_message(&[0u8; 16]).unwrap_err();
        assert_eq!(err, Error::InvalidEndianFlag(0));
    }

    #[test]
    fn missing_required_header_field() -> Result<()> {
        // A method return re-typed as an error lacks ERROR_NAME.
        let mut bytes = encode_message(&Message::method_return(8, 7, vec![]))?;
        bytes[1] = 3;
        let err = decode_message(&bytes).unwrap_err();
        assert_eq!(err, Error::MissingHeaderField("ERROR_NAME"));
        Ok(())
    }

    #[test]
    fn body_without_signature() -> Result<()> {
        let mut bytes = encode_message(&Message::method_return(8, 7, vec![]))?;
        // Claim a 4-byte body without a SIGNATURE header field.
        bytes[4] = 4;
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        let err = decode_message(&bytes).unwrap_err();
        assert_eq!(err, Error::BodyWithoutSignature(4));
        Ok(())
    }

    #[test]
    fn truncated_body() -> Result<()> {
        let msg = Message::method_return(8, 7, vec![Value::UInt32(3)]);
        let bytes = encode_message(&msg)?;
        let err = decode_message(&bytes[..bytes.len() - 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
        Ok(())
    }

    #[test]
    fn unknown_header_codes_are_preserved() -> Result<()> {
        let mut msg = Message::method_return(8, 7, vec![]);
        msg.extra_headers.push((9, Value::UInt32(77)));
        let decoded = decode_message(&encode_message(&msg)?)?;
        assert_eq!(decoded.extra_headers, vec![(9, Value::UInt32(77))]);
        assert_eq!(decoded, msg);
        Ok(())
    }

    #[test]
    fn serial_and_flags_survive() -> Result<()> {
        let mut msg = Message::method_call(0xDEAD_BEEF, "/x", None, "Go", vec![]);
        msg.flags = super::flag::NO_REPLY_EXPECTED;
        let decoded = decode_message(&encode_message(&msg)?)?;
        assert_eq!(decoded.serial, 0xDEAD_BEEF);
        assert_eq!(decoded.flags, super::flag::NO_REPLY_EXPECTED);
        Ok(())
    }
}
