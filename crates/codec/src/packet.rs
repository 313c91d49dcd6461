use bytes::{BufMut, BytesMut};

use crate::{
    Attributes, Error, HEADER_LEN, PACKET_MAX_LEN, PACKET_MIN_LEN, attributes::Attribute,
};

/// RADIUS Packet Type Codes
///
/// [RFC2865]: https://tools.ietf.org/html/rfc2865#section-4
/// [RFC2866]: https://tools.ietf.org/html/rfc2866
///
/// The Code field is one octet, and identifies the type of RADIUS
/// packet.  When a packet is received with an invalid Code field, it
/// is silently discarded.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Code {
    AccessRequest,
    AccessAccept,
    AccessReject,
    AccountingRequest,
    AccountingResponse,
    AccessChallenge,
    StatusServer,
    StatusClient,
}

impl Code {
    /// Whether a packet of this code is originated by a client.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::AccessRequest | Self::AccountingRequest | Self::StatusServer | Self::StatusClient
        )
    }
}

impl TryFrom<u8> for Code {
    type Error = Error;

    /// # Test
    ///
    /// ```
    /// use radius_client_codec::packet::Code;
    ///
    /// assert_eq!(Code::try_from(1).unwrap(), Code::AccessRequest);
    /// assert_eq!(Code::try_from(2).unwrap(), Code::AccessAccept);
    /// assert_eq!(Code::try_from(3).unwrap(), Code::AccessReject);
    /// assert_eq!(Code::try_from(4).unwrap(), Code::AccountingRequest);
    /// assert_eq!(Code::try_from(5).unwrap(), Code::AccountingResponse);
    /// assert_eq!(Code::try_from(11).unwrap(), Code::AccessChallenge);
    /// assert_eq!(Code::try_from(12).unwrap(), Code::StatusServer);
    /// assert_eq!(Code::try_from(13).unwrap(), Code::StatusClient);
    /// assert!(Code::try_from(0).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::AccessRequest,
            2 => Self::AccessAccept,
            3 => Self::AccessReject,
            4 => Self::AccountingRequest,
            5 => Self::AccountingResponse,
            11 => Self::AccessChallenge,
            12 => Self::StatusServer,
            13 => Self::StatusClient,
            _ => return Err(Error::UnknownCode),
        })
    }
}

impl From<Code> for u8 {
    fn from(value: Code) -> Self {
        match value {
            Code::AccessRequest => 1,
            Code::AccessAccept => 2,
            Code::AccessReject => 3,
            Code::AccountingRequest => 4,
            Code::AccountingResponse => 5,
            Code::AccessChallenge => 11,
            Code::StatusServer => 12,
            Code::StatusClient => 13,
        }
    }
}

/// A decoded view over a RADIUS packet.
///
/// Borrows the raw octets; attribute lookups go through the range
/// cache filled during the decode walk.
pub struct Packet<'a> {
    bytes: &'a [u8],
    attributes: &'a Attributes,
}

impl<'a> Packet<'a> {
    /// Validate the shape of a packet without decoding it.
    ///
    /// Checks the header size, the Length field bounds of RFC 2865
    /// Section 3, and walks the attribute list verifying that every
    /// attribute header is in bounds and no attribute is shorter than
    /// its own header.  Octets past the Length field are padding and
    /// are ignored.
    ///
    /// # Test
    ///
    /// ```
    /// use radius_client_codec::packet::Packet;
    ///
    /// let mut packet = [0u8; 22];
    /// packet[0] = 1;
    /// packet[2] = 0;
    /// packet[3] = 22;
    /// packet[20] = 32; // NAS-Identifier
    /// packet[21] = 2;  // zero-length value
    ///
    /// assert!(Packet::check(&packet).is_ok());
    ///
    /// packet[21] = 1; // attribute shorter than its header
    /// assert!(Packet::check(&packet).is_err());
    ///
    /// packet[3] = 19; // length below the header size
    /// assert!(Packet::check(&packet).is_err());
    /// ```
    pub fn check(bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::BadLength);
        }

        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if length < PACKET_MIN_LEN || length > PACKET_MAX_LEN || length > bytes.len() {
            return Err(Error::BadLength);
        }

        let mut offset = HEADER_LEN;
        while offset < length {
            if offset + 2 > length {
                return Err(Error::BadAttribute);
            }

            let size = bytes[offset + 1] as usize;
            if size < 2 || offset + size > length {
                return Err(Error::BadAttribute);
            }

            offset += size;
        }

        Ok(())
    }

    /// Decode a packet, filling the caller's attribute cache.
    pub fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        Self::check(bytes)?;
        Code::try_from(bytes[0])?;

        attributes.clear();

        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let mut offset = HEADER_LEN;
        while offset < length {
            let size = bytes[offset + 1] as usize;
            attributes.append(bytes[offset], offset + 2..offset + size);
            offset += size;
        }

        Ok(Self {
            bytes,
            attributes: &*attributes,
        })
    }

    pub fn code(&self) -> Code {
        // decode checked the code field already.
        Code::try_from(self.bytes[0]).unwrap()
    }

    pub fn identifier(&self) -> u8 {
        self.bytes[1]
    }

    pub fn length(&self) -> usize {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]]) as usize
    }

    pub fn authenticator(&self) -> &'a [u8] {
        &self.bytes[4..HEADER_LEN]
    }

    /// Gets the first occurrence of a typed attribute.
    ///
    /// Returns `None` both when the attribute is absent and when its
    /// value fails to decode; a malformed single attribute does not
    /// condemn the packet.
    pub fn get<T: Attribute<'a>>(&self) -> Option<T::Item> {
        let range = self.attributes.get(T::TYPE as u8)?;
        T::decode(&self.bytes[range]).ok()
    }

    /// Gets every occurrence of a typed attribute, in packet order.
    pub fn get_all<T: Attribute<'a>>(&'a self) -> impl Iterator<Item = T::Item> {
        self.attributes
            .get_all(T::TYPE as u8)
            .filter_map(|range| T::decode(&self.bytes[range.clone()]).ok())
    }
}

/// RADIUS packet encoder.
///
/// Writes the header on construction, attributes through `append`, and
/// the final Length field through `flush`.  The authenticator field is
/// zeroed; signing happens afterwards, over the finished image.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use radius_client_codec::attributes::*;
/// use radius_client_codec::packet::*;
///
/// let result = [
///     0x01u8, 0x2a, 0x00, 0x1b, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x07,
///     0x70, 0x61, 0x6e, 0x64, 0x61,
/// ];
///
/// let mut bytes = BytesMut::with_capacity(1024);
/// let mut encoder = PacketEncoder::new(Code::AccessRequest, 42, &mut bytes);
/// encoder.append::<UserName>("panda").unwrap();
/// encoder.flush().unwrap();
///
/// assert_eq!(&bytes[..], &result[..]);
/// ```
pub struct PacketEncoder<'a> {
    bytes: &'a mut BytesMut,
}

impl<'a> PacketEncoder<'a> {
    pub fn new(code: Code, identifier: u8, bytes: &'a mut BytesMut) -> Self {
        bytes.clear();
        bytes.put_u8(code.into());
        bytes.put_u8(identifier);
        bytes.put_u16(0);
        bytes.put_bytes(0, 16);

        Self { bytes }
    }

    /// Append a typed attribute.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use radius_client_codec::attributes::*;
    /// use radius_client_codec::packet::*;
    ///
    /// let mut bytes = BytesMut::with_capacity(1024);
    /// let mut encoder = PacketEncoder::new(Code::AccessRequest, 0, &mut bytes);
    /// encoder.append::<NasPort>(3).unwrap();
    ///
    /// assert_eq!(&bytes[20..], &[0x05, 0x06, 0x00, 0x00, 0x00, 0x03]);
    /// ```
    pub fn append<'c, T: Attribute<'c>>(&mut self, value: T::Item) -> Result<(), Error> {
        self.bytes.put_u8(T::TYPE as u8);

        // record the current position, and then advance the internal
        // cursor one byte, here is to reserve the length octet.
        let offset = self.bytes.len();
        self.bytes.put_u8(0);
        T::encode(value, self.bytes);

        // attribute length includes its own two-octet header and must
        // fit the one-octet length field.
        let size = self.bytes.len() - offset + 1;
        if size > u8::MAX as usize {
            return Err(Error::BadAttribute);
        }

        self.bytes[offset] = size as u8;
        Ok(())
    }

    /// Append an attribute of arbitrary type with raw value octets.
    pub fn append_raw(&mut self, kind: u8, value: &[u8]) -> Result<(), Error> {
        if value.len() > u8::MAX as usize - 2 {
            return Err(Error::BadAttribute);
        }

        self.bytes.put_u8(kind);
        self.bytes.put_u8(value.len() as u8 + 2);
        self.bytes.put(value);
        Ok(())
    }

    /// Write the Length field.
    pub fn flush(&mut self) -> Result<(), Error> {
        let size = self.bytes.len();
        if size > PACKET_MAX_LEN {
            return Err(Error::BadLength);
        }

        let length = (size as u16).to_be_bytes();
        self.bytes[2] = length[0];
        self.bytes[3] = length[1];
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{NasIdentifier, ReplyMessage, UserName, UserPassword};

    #[test]
    fn encode_then_decode() {
        let mut bytes = BytesMut::with_capacity(1024);
        let mut encoder = PacketEncoder::new(Code::AccessRequest, 7, &mut bytes);
        encoder.append::<UserName>("panda").unwrap();
        encoder.append::<UserPassword>(b"raspberry").unwrap();
        encoder.append::<NasIdentifier>(b"nas-01").unwrap();
        encoder.flush().unwrap();

        let mut attributes = Attributes::default();
        let packet = Packet::decode(&bytes, &mut attributes).unwrap();

        assert_eq!(packet.code(), Code::AccessRequest);
        assert_eq!(packet.identifier(), 7);
        assert_eq!(packet.length(), bytes.len());
        assert_eq!(packet.get::<UserName>(), Some("panda"));
        assert_eq!(packet.get::<NasIdentifier>(), Some(&b"nas-01"[..]));

        // padded to the transform block size on the wire.
        assert_eq!(packet.get::<UserPassword>().map(|v| v.len()), Some(16));
    }

    #[test]
    fn repeated_attributes_keep_packet_order() {
        let mut bytes = BytesMut::with_capacity(1024);
        let mut encoder = PacketEncoder::new(Code::AccessAccept, 1, &mut bytes);
        encoder.append::<ReplyMessage>("hello").unwrap();
        encoder.append::<ReplyMessage>("world").unwrap();
        encoder.flush().unwrap();

        let mut attributes = Attributes::default();
        let packet = Packet::decode(&bytes, &mut attributes).unwrap();
        let messages: Vec<&str> = packet.get_all::<ReplyMessage>().collect();

        assert_eq!(messages, vec!["hello", "world"]);
    }

    #[test]
    fn check_rejects_truncated_attribute_walks() {
        let mut bytes = BytesMut::with_capacity(64);
        let mut encoder = PacketEncoder::new(Code::AccessRequest, 0, &mut bytes);
        encoder.append::<UserName>("panda").unwrap();
        encoder.flush().unwrap();

        // claim one octet more than the last attribute carries.
        bytes[21] += 1;
        assert!(matches!(Packet::check(&bytes), Err(Error::BadAttribute)));
    }

    #[test]
    fn check_tolerates_trailing_padding() {
        let mut bytes = BytesMut::with_capacity(64);
        let mut encoder = PacketEncoder::new(Code::AccessRequest, 0, &mut bytes);
        encoder.append::<UserName>("panda").unwrap();
        encoder.flush().unwrap();

        bytes.extend_from_slice(&[0u8; 8]);
        assert!(Packet::check(&bytes).is_ok());
    }
}
