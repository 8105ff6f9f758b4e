// SPDX-License-Identifier: MIT

//! Per-hop RADIUS crypto: Response-Authenticator signing, Message-Authenticator
//! HMAC, and the attribute encryption schemes used by User-Password,
//! Tunnel-Password and MS-MPPE-*-Key (SPEC_FULL.md §4.2).
//!
//! Every function builds a fresh digest context per call; there is no
//! process-wide mutex around OpenSSL-style EVP state the way the legacy
//! proxy needed one.

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::RngCore;
use zeroize::Zeroize;

use super::attr::AttrType;
use super::packet::{self, Packet};
use crate::error::PacketError;

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut h = Md5::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

fn hmac_md5(data: &[u8], key: &[u8]) -> [u8; 16] {
    let mut mac = Hmac::<Md5>::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// A fresh 16-byte Request-Authenticator, as generated for each forwarded
/// Access-Request.
pub fn random_authenticator() -> [u8; 16] {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// A fresh 2-byte MS-MPPE salt; the legacy proxy sets the high bit of the
/// first byte to satisfy RFC 2548's salt format.
pub fn random_salt() -> [u8; 2] {
    let mut buf = [0u8; 2];
    rand::thread_rng().fill_bytes(&mut buf);
    buf[0] |= 0x80;
    buf
}

/// Sign a reply's Response-Authenticator: `MD5(header | request_auth | attrs | secret)`.
pub fn sign_response(packet: &mut Packet, request_authenticator: &[u8], secret: &[u8]) {
    packet.set_authenticator(request_authenticator);
    let digest = md5(&[packet.as_bytes(), secret]);
    packet.set_authenticator(&digest);
}

/// Verify a reply's Response-Authenticator against the authenticator of the
/// request it answers.
pub fn validate_response(packet: &Packet, request_authenticator: &[u8], secret: &[u8]) -> bool {
    let mut buf = packet.as_bytes().to_vec();
    buf[4..20].copy_from_slice(request_authenticator);
    md5(&[&buf, secret]) == packet.authenticator()
}

/// Sign an Accounting-Request, whose Request-Authenticator is
/// `MD5(header | 16 zero bytes | attrs | secret)` rather than random.
pub fn sign_accounting_request(packet: &mut Packet, secret: &[u8]) {
    packet.set_authenticator(&[0u8; 16]);
    let digest = md5(&[packet.as_bytes(), secret]);
    packet.set_authenticator(&digest);
}

/// Verify an Accounting-Request's Request-Authenticator.
pub fn validate_accounting_request(packet: &Packet, secret: &[u8]) -> bool {
    let mut buf = packet.as_bytes().to_vec();
    buf[4..20].fill(0);
    md5(&[&buf, secret]) == packet.authenticator()
}

/// Recompute and store the Message-Authenticator attribute, appending one
/// (zeroed) if absent. The attribute value is zeroed for the duration of the
/// HMAC computation, as RFC 2869 requires.
pub fn create_message_authenticator(packet: &mut Packet, secret: &[u8]) -> Result<(), PacketError> {
    let attr_id = AttrType::MessageAuthenticator.id();
    if packet.attr_value(attr_id).is_none() {
        packet.append_attr(attr_id, &[0u8; 16]);
    } else if let Some(v) = packet.attr_value_mut(attr_id) {
        v.fill(0);
    }
    let mac = hmac_md5(packet.as_bytes(), secret);
    let v = packet
        .attr_value_mut(attr_id)
        .ok_or(PacketError::AttributeMissing(attr_id))?;
    v.copy_from_slice(&mac);
    Ok(())
}

/// Verify the Message-Authenticator attribute, temporarily zeroing it in a
/// scratch copy of the packet bytes (the live packet is left untouched).
pub fn verify_message_authenticator(packet: &Packet, secret: &[u8]) -> Result<(), PacketError> {
    let attr_id = AttrType::MessageAuthenticator.id();
    let original = packet
        .attr_value(attr_id)
        .ok_or(PacketError::AttributeMissing(attr_id))?;
    if original.len() != 16 {
        return Err(PacketError::AttributeLength(attr_id, original.len(), 16));
    }
    let mut original16 = [0u8; 16];
    original16.copy_from_slice(original);

    let mut buf = packet.as_bytes().to_vec();
    let attrs = &buf[packet::HEADER_LEN..];
    let tlv = packet::attr_get(attrs, attr_id).ok_or(PacketError::AttributeMissing(attr_id))?;
    let tlv_offset = (tlv.as_ptr() as usize) - (attrs.as_ptr() as usize);
    let val_off = packet::HEADER_LEN + tlv_offset + 2;
    buf[val_off..val_off + 16].fill(0);

    let mac = hmac_md5(&buf, secret);
    if mac == original16 {
        Ok(())
    } else {
        Err(PacketError::BadMessageAuthenticator)
    }
}

/// `c[i] = p[i] XOR MD5(secret | prev)`, where `prev` is the seed for the
/// first block and the previous *ciphertext* block thereafter. Used both to
/// encrypt (prev = ciphertext produced so far) and, with the seed supplied by
/// the caller, to decrypt (prev = ciphertext received so far) -- the two
/// directions share this function because the chaining variable is always a
/// ciphertext block.
fn encrypt_blocks(plain: &[u8], secret: &[u8], seed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len());
    let mut prev = seed.to_vec();
    for chunk in plain.chunks(16) {
        let b = md5(&[secret, &prev]);
        let c: Vec<u8> = chunk.iter().zip(b.iter()).map(|(p, b)| p ^ b).collect();
        out.extend_from_slice(&c);
        prev = c;
    }
    out
}

fn decrypt_blocks(cipher: &[u8], secret: &[u8], seed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cipher.len());
    let mut prev = seed.to_vec();
    for chunk in cipher.chunks(16) {
        let b = md5(&[secret, &prev]);
        let p: Vec<u8> = chunk.iter().zip(b.iter()).map(|(c, b)| c ^ b).collect();
        out.extend_from_slice(&p);
        prev = chunk.to_vec();
    }
    out
}

fn check_password_length(len: usize) -> Result<(), PacketError> {
    if len < 16 || len > 128 || len % 16 != 0 {
        return Err(PacketError::BadPasswordLength(len));
    }
    Ok(())
}

/// Decrypt a User-Password or Tunnel-Password attribute value (RFC 2865 §5.2).
pub fn pwd_decrypt(cipher: &[u8], secret: &[u8], authenticator: &[u8]) -> Result<Vec<u8>, PacketError> {
    check_password_length(cipher.len())?;
    Ok(decrypt_blocks(cipher, secret, authenticator))
}

/// Encrypt a plaintext password, already padded to a 16-byte multiple in
/// `16..=128`, for forwarding under a different shared secret/authenticator.
pub fn pwd_encrypt(plain: &[u8], secret: &[u8], authenticator: &[u8]) -> Result<Vec<u8>, PacketError> {
    check_password_length(plain.len())?;
    Ok(encrypt_blocks(plain, secret, authenticator))
}

/// Decrypt under the old secret/authenticator and re-encrypt under the new
/// ones, re-keying a password attribute as it crosses a hop.
pub fn pwd_recrypt(
    cipher: &[u8],
    old_secret: &[u8],
    old_authenticator: &[u8],
    new_secret: &[u8],
    new_authenticator: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let mut plain = pwd_decrypt(cipher, old_secret, old_authenticator)?;
    let result = pwd_encrypt(&plain, new_secret, new_authenticator);
    plain.zeroize();
    result
}

fn ms_mppe_seed(authenticator: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut seed = Vec::with_capacity(18);
    seed.extend_from_slice(authenticator);
    seed.extend_from_slice(salt);
    seed
}

/// Decrypt an MS-MPPE-Send-Key / MS-MPPE-Recv-Key value: a 2-byte salt
/// followed by an MD5-keystream-chained ciphertext (RFC 2548).
pub fn ms_mppe_decrypt(value: &[u8], secret: &[u8], authenticator: &[u8]) -> Result<Vec<u8>, PacketError> {
    if value.len() < 18 || (value.len() - 2) % 16 != 0 {
        return Err(PacketError::BadMsMppeLength);
    }
    let (salt, cipher) = value.split_at(2);
    let seed = ms_mppe_seed(authenticator, salt);
    Ok(decrypt_blocks(cipher, secret, &seed))
}

/// Encrypt an MS-MPPE key under a freshly chosen salt.
pub fn ms_mppe_encrypt(plain: &[u8], secret: &[u8], authenticator: &[u8], salt: [u8; 2]) -> Vec<u8> {
    let seed = ms_mppe_seed(authenticator, &salt);
    let mut out = Vec::with_capacity(2 + plain.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&encrypt_blocks(plain, secret, &seed));
    out
}

/// Decrypt under the old secret/authenticator/salt and re-encrypt under a
/// newly generated salt and the new secret/authenticator.
pub fn ms_mppe_recrypt(
    value: &[u8],
    old_secret: &[u8],
    old_authenticator: &[u8],
    new_secret: &[u8],
    new_authenticator: &[u8],
    new_salt: [u8; 2],
) -> Result<Vec<u8>, PacketError> {
    let mut plain = ms_mppe_decrypt(value, old_secret, old_authenticator)?;
    let result = ms_mppe_encrypt(&plain, new_secret, new_authenticator, new_salt);
    plain.zeroize();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips_under_same_secret_and_auth() {
        let secret = b"xyzzy5461";
        let auth = [7u8; 16];
        let mut plain = b"password".to_vec();
        plain.resize(16, 0);
        let cipher = pwd_encrypt(&plain, secret, &auth).unwrap();
        let decrypted = pwd_decrypt(&cipher, secret, &auth).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn password_recrypt_changes_ciphertext_but_preserves_plaintext() {
        let old_secret = b"oldsecret";
        let old_auth = [1u8; 16];
        let new_secret = b"newsecret";
        let new_auth = [2u8; 16];
        let mut plain = b"hunter2hunter2xx".to_vec();
        plain.resize(16, 0);
        let cipher = pwd_encrypt(&plain, old_secret, &old_auth).unwrap();
        let recrypted = pwd_recrypt(&cipher, old_secret, &old_auth, new_secret, &new_auth).unwrap();
        assert_ne!(recrypted, cipher);
        let plain2 = pwd_decrypt(&recrypted, new_secret, &new_auth).unwrap();
        assert_eq!(plain2, plain);
    }

    #[test]
    fn rejects_bad_password_lengths() {
        assert!(pwd_decrypt(&[0u8; 8], b"s", &[0u8; 16]).is_err());
        assert!(pwd_decrypt(&[0u8; 17], b"s", &[0u8; 16]).is_err());
    }

    #[test]
    fn ms_mppe_round_trips() {
        let secret = b"secret";
        let auth = [3u8; 16];
        let mut plain = vec![16u8];
        plain.extend_from_slice(&[0xAAu8; 31]);
        let value = ms_mppe_encrypt(&plain, secret, &auth, [0x80, 0x01]);
        let decrypted = ms_mppe_decrypt(&value, secret, &auth).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn response_authenticator_round_trips() {
        let request_auth = [9u8; 16];
        let mut pkt = Packet::new(2, 5, [0u8; 16]);
        pkt.append_attr(18, b"hello");
        sign_response(&mut pkt, &request_auth, b"secret");
        assert!(validate_response(&pkt, &request_auth, b"secret"));
        assert!(!validate_response(&pkt, &[0u8; 16], b"secret"));
    }

    #[test]
    fn message_authenticator_round_trips() {
        let mut pkt = Packet::new(1, 5, [4u8; 16]);
        pkt.append_attr(1, b"bob");
        create_message_authenticator(&mut pkt, b"secret").unwrap();
        verify_message_authenticator(&pkt, b"secret").unwrap();

        let tampered_value = {
            let mut v = pkt.attr_value(1).unwrap().to_vec();
            v[0] ^= 0xFF;
            v
        };
        pkt.resize_attr(1, &tampered_value);
        assert!(verify_message_authenticator(&pkt, b"secret").is_err());
    }
}
