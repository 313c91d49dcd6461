//! ## Remote Authentication Dial In User Service (RADIUS)
//!
//! [RFC2865]: https://tools.ietf.org/html/rfc2865
//! [RFC2866]: https://tools.ietf.org/html/rfc2866
//! [RFC3579]: https://tools.ietf.org/html/rfc3579
//!
//! RADIUS is a client/server protocol carried over UDP.  A client
//! originates requests to a server; the server either acts on the
//! request or forwards it to another server, and returns a response
//! packet correlated by the one-octet `Identifier` field and
//! authenticated by a 16-octet MD5 authenticator computed over the
//! packet and a shared secret [RFC2865].  Exactly one RADIUS packet is
//! encapsulated in the UDP data field.
//!
//! This crate implements the wire codec only: packet encoding, shape
//! validation, attribute access, authenticator computation and
//! verification, and the User-Password transform of [RFC2865]
//! Section 5.2.  Retransmission, failover and socket management are the
//! caller's concern.

pub mod attributes;
pub mod crypto;
pub mod packet;

use std::{array::TryFromSliceError, ops::Range, str::Utf8Error};

/// RADIUS packet header size: code, identifier, length, authenticator.
pub const HEADER_LEN: usize = 20;

/// Size of the Request/Response Authenticator field.
pub const AUTHENTICATOR_LEN: usize = 16;

/// The smallest well-formed packet is a bare header.
pub const PACKET_MIN_LEN: usize = HEADER_LEN;

/// Maximum packet length permitted by RFC 2865 Section 3.
pub const PACKET_MAX_LEN: usize = 4096;

/// Upper bound on the encoded User-Password attribute value, which also
/// bounds usable shared secret lengths.
pub const USER_PASSWORD_MAX_LEN: usize = 128;

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    BadLength,
    BadAttribute,
    UnknownCode,
    SecretTooLong,
    PasswordTooLong,
    SummaryFailed,
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

/// A cache of the list of attributes, this is for internal use only.
///
/// Attribute types are kept as raw octets so that unknown attributes
/// survive the walk instead of failing it; RFC 2865 Section 5 requires
/// unrecognised attributes to be ignored, not rejected.
#[derive(Debug, Clone)]
pub struct Attributes(Vec<(u8, Range<usize>)>);

impl Default for Attributes {
    fn default() -> Self {
        Self(Vec::with_capacity(16))
    }
}

impl Attributes {
    /// Adds an attribute to the list.
    pub fn append(&mut self, kind: u8, range: Range<usize>) {
        self.0.push((kind, range));
    }

    /// Gets an attribute from the list.
    ///
    /// Note: This function will only look for the first matching
    /// attribute in the list and return it.
    pub fn get(&self, kind: u8) -> Option<Range<usize>> {
        self.0
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone())
    }

    /// Gets all the values of an attribute from the list.
    ///
    /// A RADIUS packet can carry multiple attributes of the same type,
    /// for example Reply-Message; this returns every occurrence in
    /// packet order.
    pub fn get_all<'a>(&'a self, kind: u8) -> impl Iterator<Item = &'a Range<usize>> {
        self.0.iter().filter(move |(k, _)| *k == kind).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        if !self.0.is_empty() {
            self.0.clear();
        }
    }
}
