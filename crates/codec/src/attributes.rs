use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::{AUTHENTICATOR_LEN, Error};

/// RADIUS Attribute Types
///
/// [RFC2865]: https://tools.ietf.org/html/rfc2865#section-5
/// [RFC2866]: https://tools.ietf.org/html/rfc2866#section-5
/// [RFC3579]: https://tools.ietf.org/html/rfc3579#section-3.2
///
/// RADIUS Attributes carry the specific authentication, authorization,
/// information and configuration details for the request and reply.
/// The end of the list of attributes is indicated by the Length of the
/// RADIUS packet.  This registry lists the subset of assigned types
/// that this codec understands; every other type is still carried and
/// walked, only opaque to the typed accessors.
#[repr(u8)]
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum AttributeType {
    UserName = 1,
    UserPassword = 2,
    ChapPassword = 3,
    NasIpAddress = 4,
    NasPort = 5,
    ServiceType = 6,
    ReplyMessage = 18,
    State = 24,
    Class = 25,
    VendorSpecific = 26,
    SessionTimeout = 27,
    CalledStationId = 30,
    CallingStationId = 31,
    NasIdentifier = 32,
    AcctStatusType = 40,
    AcctSessionId = 44,
    EventTimestamp = 55,
    MessageAuthenticator = 80,
}

/// One typed RADIUS attribute.
///
/// `encode` writes the value octets only; the two-octet type/length
/// header is the encoder's job.  `decode` reads the value octets of a
/// single attribute out of a received packet.
pub trait Attribute<'a> {
    const TYPE: AttributeType;
    type Item;

    fn encode(value: Self::Item, bytes: &mut BytesMut);
    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error>;
}

/// User-Name
///
/// This Attribute indicates the name of the user to be authenticated.
/// It MUST be sent in Access-Request packets if available.
pub struct UserName;

impl<'a> Attribute<'a> for UserName {
    const TYPE: AttributeType = AttributeType::UserName;
    type Item = &'a str;

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value.as_bytes());
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// User-Password
///
/// This Attribute indicates the password of the user to be
/// authenticated.  On the wire the value is obfuscated per RFC 2865
/// Section 5.2; the encoder writes the plaintext padded with nul
/// octets to a multiple of 16, and the signing step performs the
/// transform in place.  The decoder hands back the raw on-wire value.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use radius_client_codec::attributes::{Attribute, UserPassword};
///
/// let mut bytes = BytesMut::new();
/// UserPassword::encode(b"arctangent", &mut bytes);
///
/// assert_eq!(bytes.len(), 16);
/// assert_eq!(&bytes[..10], b"arctangent");
/// assert_eq!(&bytes[10..], &[0u8; 6][..]);
/// ```
pub struct UserPassword;

impl<'a> Attribute<'a> for UserPassword {
    const TYPE: AttributeType = AttributeType::UserPassword;
    type Item = &'a [u8];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value);

        // pad to the 16-octet boundary the transform operates on; an
        // empty password still occupies one block.
        let padded = value.len().div_ceil(16).max(1) * 16;
        bytes.put_bytes(0, padded - value.len());
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// CHAP-Password
///
/// This Attribute indicates the response value provided by a PPP
/// Challenge-Handshake Authentication Protocol (CHAP) user in
/// response to the challenge: one octet of CHAP Identifier followed
/// by the 16-octet CHAP response.
pub struct ChapPassword;

impl<'a> Attribute<'a> for ChapPassword {
    const TYPE: AttributeType = AttributeType::ChapPassword;
    type Item = &'a [u8];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.len() != 17 {
            return Err(Error::BadAttribute);
        }

        Ok(bytes)
    }
}

/// NAS-IP-Address
///
/// This Attribute indicates the identifying IP Address of the NAS
/// which is requesting authentication of the user.
pub struct NasIpAddress;

impl<'a> Attribute<'a> for NasIpAddress {
    const TYPE: AttributeType = AttributeType::NasIpAddress;
    type Item = Ipv4Addr;

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(&value.octets()[..]);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        let octets: [u8; 4] = bytes.try_into()?;
        Ok(Ipv4Addr::from(octets))
    }
}

/// NAS-Port
///
/// This Attribute indicates the physical port number of the NAS which
/// is authenticating the user.
pub struct NasPort;

impl<'a> Attribute<'a> for NasPort {
    const TYPE: AttributeType = AttributeType::NasPort;
    type Item = u32;

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put_u32(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// Service-Type
///
/// This Attribute indicates the type of service the user has
/// requested, or the type of service to be provided.
pub struct ServiceType;

impl<'a> Attribute<'a> for ServiceType {
    const TYPE: AttributeType = AttributeType::ServiceType;
    type Item = u32;

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put_u32(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// Reply-Message
///
/// This Attribute indicates text which MAY be displayed to the user.
/// Multiple Reply-Message's MAY be included, and if any are displayed
/// they MUST be displayed in the same order as they appear in the
/// packet.
pub struct ReplyMessage;

impl<'a> Attribute<'a> for ReplyMessage {
    const TYPE: AttributeType = AttributeType::ReplyMessage;
    type Item = &'a str;

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value.as_bytes());
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// State
///
/// The octets are obtained from the server and MUST be sent unmodified
/// to the server in a new Access-Request reply to a challenge.
pub struct State;

impl<'a> Attribute<'a> for State {
    const TYPE: AttributeType = AttributeType::State;
    type Item = &'a [u8];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// Class
///
/// This Attribute is available to be sent by the server to the client
/// in an Access-Accept and SHOULD be sent unmodified by the client to
/// the accounting server as part of the Accounting-Request packet.
pub struct Class;

impl<'a> Attribute<'a> for Class {
    const TYPE: AttributeType = AttributeType::Class;
    type Item = &'a [u8];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// NAS-Identifier
///
/// This Attribute contains a string identifying the NAS originating
/// the Access-Request.
pub struct NasIdentifier;

impl<'a> Attribute<'a> for NasIdentifier {
    const TYPE: AttributeType = AttributeType::NasIdentifier;
    type Item = &'a [u8];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(value);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// Message-Authenticator
///
/// An HMAC-MD5 over the whole packet, keyed with the shared secret
/// [RFC3579].  The encoder writes a zeroed placeholder; the signing
/// step fills the digest in once the rest of the packet is final.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use radius_client_codec::attributes::{Attribute, MessageAuthenticator};
///
/// let mut bytes = BytesMut::new();
/// MessageAuthenticator::encode(&[0u8; 16], &mut bytes);
///
/// assert_eq!(&bytes[..], &[0u8; 16][..]);
/// ```
pub struct MessageAuthenticator;

impl<'a> Attribute<'a> for MessageAuthenticator {
    const TYPE: AttributeType = AttributeType::MessageAuthenticator;
    type Item = &'a [u8; AUTHENTICATOR_LEN];

    fn encode(value: Self::Item, bytes: &mut BytesMut) {
        bytes.put(&value[..]);
    }

    fn decode(bytes: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes.try_into()?)
    }
}
