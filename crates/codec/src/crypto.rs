use bytes::BytesMut;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::Rng;

use crate::{
    AUTHENTICATOR_LEN, Error, HEADER_LEN, USER_PASSWORD_MAX_LEN,
    attributes::AttributeType,
    packet::{Code, Packet},
};

/// Generate a fresh Request Authenticator.
///
/// RFC 2865 Section 3: in Access-Request packets the value is a 16
/// octet random number.  Its unpredictability is what the User-Password
/// transform and the Response Authenticator lean on.
pub fn request_authenticator() -> [u8; AUTHENTICATOR_LEN] {
    let mut authenticator = [0u8; AUTHENTICATOR_LEN];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// HMAC-MD5 digest.
///
/// Keyed with the shared secret; this is the Message-Authenticator
/// primitive of RFC 3579 Section 3.2.
///
/// # Test
///
/// ```
/// use radius_client_codec::crypto::hmac_md5;
///
/// let a = hmac_md5(b"secret", &[b"payload"]).unwrap();
/// let b = hmac_md5(b"secret", &[b"pay", b"load"]).unwrap();
/// let c = hmac_md5(b"other", &[b"payload"]).unwrap();
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
pub fn hmac_md5(key: &[u8], source: &[&[u8]]) -> Result<[u8; 16], Error> {
    match Hmac::<Md5>::new_from_slice(key) {
        Err(_) => Err(Error::SummaryFailed),
        Ok(mut mac) => {
            for buf in source {
                mac.update(buf);
            }

            Ok(mac.finalize().into_bytes().into())
        }
    }
}

/// Sign a request packet.
///
/// Copies the caller's unsigned packet into `dst` and finalizes it for
/// the wire against one concrete server:
///
/// 1. rewrites the Identifier octet to the allocated value;
/// 2. fills the Request Authenticator (random for Access-Request and
///    Status-Server, the MD5 construction of RFC 2866 Section 4.1 for
///    Accounting-Request);
/// 3. performs the User-Password transform of RFC 2865 Section 5.2 in
///    place, when the attribute is present;
/// 4. computes the Message-Authenticator of RFC 3579 Section 3.2 into
///    its placeholder, when the attribute is present.
///
/// The source packet is left untouched so it can be re-signed against
/// a different server; the produced image is what retransmissions must
/// resend verbatim (RFC 2865 Section 2.5).
pub fn sign_request(
    src: &[u8],
    dst: &mut BytesMut,
    identifier: u8,
    secret: &[u8],
) -> Result<(), Error> {
    Packet::check(src)?;

    if secret.is_empty() {
        return Err(Error::InvalidInput);
    }

    if secret.len() >= USER_PASSWORD_MAX_LEN {
        return Err(Error::SecretTooLong);
    }

    let length = u16::from_be_bytes([src[2], src[3]]) as usize;

    dst.clear();
    dst.extend_from_slice(&src[..length]);
    dst[1] = identifier;

    let code = Code::try_from(dst[0])?;
    let password = find_attribute(dst, AttributeType::UserPassword as u8);
    let authenticator_attr = find_attribute(dst, AttributeType::MessageAuthenticator as u8);

    if let Some(range) = &password {
        if range.len() > USER_PASSWORD_MAX_LEN {
            return Err(Error::PasswordTooLong);
        }

        if range.is_empty() || range.len() % 16 != 0 {
            return Err(Error::BadAttribute);
        }
    }

    if let Some(range) = &authenticator_attr {
        if range.len() != AUTHENTICATOR_LEN {
            return Err(Error::BadAttribute);
        }
    }

    match code {
        Code::AccountingRequest => {
            // RFC 2866 Section 4.1: the Request Authenticator is the
            // MD5 over the packet with a zeroed authenticator field,
            // concatenated with the secret.
            dst[4..HEADER_LEN].fill(0);

            if let Some(range) = authenticator_attr {
                dst[range.clone()].fill(0);
                let digest = hmac_md5(secret, &[&dst[..]])?;
                dst[range].copy_from_slice(&digest);
            }

            let mut hasher = Md5::new();
            hasher.update(&dst[..]);
            hasher.update(secret);
            let digest = hasher.finalize();
            dst[4..HEADER_LEN].copy_from_slice(&digest);
        }
        _ => {
            let authenticator = request_authenticator();
            dst[4..HEADER_LEN].copy_from_slice(&authenticator);

            if let Some(range) = password {
                hide_user_password(&mut dst[range], secret, &authenticator);
            }

            if let Some(range) = authenticator_attr {
                dst[range.clone()].fill(0);
                let digest = hmac_md5(secret, &[&dst[..]])?;
                dst[range].copy_from_slice(&digest);
            }
        }
    }

    Ok(())
}

/// Sign a response packet in place.
///
/// Used by servers (and the test harness): fills the Message-
/// Authenticator when its placeholder is present and computes the
/// Response Authenticator over `(Code | Id | Length | RequestAuth |
/// Attributes | Secret)` per RFC 2865 Section 3.
pub fn sign_response(
    dst: &mut BytesMut,
    request_authenticator: &[u8; AUTHENTICATOR_LEN],
    secret: &[u8],
) -> Result<(), Error> {
    Packet::check(dst)?;

    dst[4..HEADER_LEN].copy_from_slice(request_authenticator);

    if let Some(range) = find_attribute(dst, AttributeType::MessageAuthenticator as u8) {
        if range.len() != AUTHENTICATOR_LEN {
            return Err(Error::BadAttribute);
        }

        dst[range.clone()].fill(0);
        let digest = hmac_md5(secret, &[&dst[..]])?;
        dst[range].copy_from_slice(&digest);
    }

    let mut hasher = Md5::new();
    hasher.update(&dst[..]);
    hasher.update(secret);
    let digest = hasher.finalize();
    dst[4..HEADER_LEN].copy_from_slice(&digest);

    Ok(())
}

/// Verify a response against the signed request it answers.
///
/// `request` is the wire image produced by [`sign_request`]; its
/// authenticator field holds the Request Authenticator the server must
/// have folded into the Response Authenticator.  Checks the Response
/// Authenticator and, when the response carries one, the Message-
/// Authenticator.  Any failure makes the response not-ours; the caller
/// drops it and keeps waiting.
pub fn verify_response(request: &[u8], response: &[u8], secret: &[u8]) -> bool {
    if Packet::check(request).is_err() || Packet::check(response).is_err() {
        return false;
    }

    if request[1] != response[1] {
        return false;
    }

    let length = u16::from_be_bytes([response[2], response[3]]) as usize;

    let mut hasher = Md5::new();
    hasher.update(&response[..4]);
    hasher.update(&request[4..HEADER_LEN]);
    hasher.update(&response[HEADER_LEN..length]);
    hasher.update(secret);
    let digest = hasher.finalize();

    if digest[..] != response[4..HEADER_LEN] {
        return false;
    }

    if let Some(range) = find_attribute(&response[..length], AttributeType::MessageAuthenticator as u8) {
        if range.len() != AUTHENTICATOR_LEN {
            return false;
        }

        let mut image = response[..length].to_vec();
        image[4..HEADER_LEN].copy_from_slice(&request[4..HEADER_LEN]);
        image[range.clone()].fill(0);

        match hmac_md5(secret, &[&image]) {
            Ok(digest) => digest[..] == response[range],
            Err(_) => false,
        }
    } else {
        true
    }
}

/// Recover the plaintext from an on-wire User-Password value.
///
/// The inverse of the RFC 2865 Section 5.2 transform.  Trailing nul
/// padding is stripped; the protocol does not transmit the original
/// length.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use radius_client_codec::attributes::{Attribute, UserPassword};
/// use radius_client_codec::crypto::{hide_user_password, reveal_user_password};
///
/// let authenticator = [7u8; 16];
/// let mut value = BytesMut::new();
/// UserPassword::encode(b"arctangent", &mut value);
///
/// hide_user_password(&mut value, b"secret", &authenticator);
/// assert_ne!(&value[..10], b"arctangent");
///
/// let plain = reveal_user_password(&value, b"secret", &authenticator).unwrap();
/// assert_eq!(plain, b"arctangent");
/// ```
pub fn reveal_user_password(
    value: &[u8],
    secret: &[u8],
    authenticator: &[u8; AUTHENTICATOR_LEN],
) -> Result<Vec<u8>, Error> {
    if value.is_empty() || value.len() % 16 != 0 || value.len() > USER_PASSWORD_MAX_LEN {
        return Err(Error::BadAttribute);
    }

    let mut plain = value.to_vec();
    let mut previous = *authenticator;

    for chunk in plain.chunks_mut(16) {
        let cipher: [u8; 16] = (&*chunk).try_into()?;

        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(previous);
        let digest = hasher.finalize();

        for (byte, mask) in chunk.iter_mut().zip(digest) {
            *byte ^= mask;
        }

        previous = cipher;
    }

    while plain.last() == Some(&0) {
        plain.pop();
    }

    Ok(plain)
}

/// The RFC 2865 Section 5.2 transform, in place.
///
/// `value` must already be padded to a multiple of 16 octets.  Each
/// block is XORed with `MD5(secret | previous)` where `previous`
/// starts as the Request Authenticator and chains through the produced
/// ciphertext blocks.
pub fn hide_user_password(
    value: &mut [u8],
    secret: &[u8],
    authenticator: &[u8; AUTHENTICATOR_LEN],
) {
    let mut previous = *authenticator;

    for chunk in value.chunks_mut(16) {
        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(previous);
        let digest = hasher.finalize();

        for (byte, mask) in chunk.iter_mut().zip(digest) {
            *byte ^= mask;
        }

        previous.copy_from_slice(chunk);
    }
}

/// Locate the first attribute of the given type, returning the range
/// of its value octets.  The packet shape must already be validated.
fn find_attribute(bytes: &[u8], kind: u8) -> Option<std::ops::Range<usize>> {
    let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

    let mut offset = HEADER_LEN;
    while offset < length {
        let size = bytes[offset + 1] as usize;
        if bytes[offset] == kind {
            return Some(offset + 2..offset + size);
        }

        offset += size;
    }

    None
}
