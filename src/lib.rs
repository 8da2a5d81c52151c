//! A codec and message-correlation engine for the D-Bus wire protocol.
//!
//! D-Bus frames inter-process method calls, returns, errors, and signals as
//! self-describing, alignment-sensitive binary messages over a byte stream.
//! This crate covers the wire level only: marshalling and demarshalling
//! signature-typed values (including nested arrays, structs, dict entries,
//! and variants), framing the four message kinds, and matching an
//! asynchronous reply back to its originating call by serial number.
//!
//! Transport and SASL authentication are out of scope; the framer works
//! against plain byte buffers, or any [`Read`]/[`Write`] pair the transport
//! supplies. Bus-name registration, match rules, and introspection XML are
//! likewise left to a higher layer, as is the translation between the
//! generic [`Value`] tree and a host application's own data model.
//!
//! Decoding a message boils down to [`decode_message`] (or [`read_message`]
//! when pulling from a stream); the mirror image is [`encode_message`] /
//! [`write_message`]. Bodies are sequences of [`Value`], typed by a D-Bus
//! signature string parsed through [`signature`]. Outstanding calls live in
//! a [`CallTable`] keyed by the serials a [`SerialCounter`] hands out.
//!
//! [`Read`]: std::io::Read
//! [`Write`]: std::io::Write
//! [`decode_message`]: crate::message::decode_message()
//! [`read_message`]: crate::message::read_message()
//! [`encode_message`]: crate::message::encode_message()
//! [`write_message`]: crate::message::write_message()
//! [`Value`]: crate::value::Value
//! [`signature`]: crate::signature
//! [`CallTable`]: crate::correlation::CallTable
//! [`SerialCounter`]: crate::correlation::SerialCounter

mod align;
pub mod correlation;
pub mod de;
pub mod error;
pub mod message;
pub mod ser;
pub mod signature;
pub mod value;
