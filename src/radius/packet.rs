// SPDX-License-Identifier: MIT

//! RADIUS packet codec (SPEC_FULL.md §4.1).
//!
//! A [`Packet`] owns its wire bytes. The 20-byte header is
//! `code(1) | id(1) | length(2 be) | authenticator(16)`, followed by a TLV
//! sequence of `type(1) | len(1) | value(len-2)` attributes. The header's
//! `length` field is authoritative: receivers trust it over the datagram
//! size and tolerate UDP padding.

use super::attr::AttrType;
use crate::error::PacketError;

pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct Packet(Vec<u8>);

impl Packet {
    /// Parse a packet from received bytes, trusting the header length field
    /// over the transport-reported size. Trailing bytes past the header
    /// length (UDP padding) are dropped. Does not validate the attribute
    /// TLV sequence; call [`Packet::validate_attrs`] for that.
    pub fn from_received(mut buf: Vec<u8>) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort);
        }
        let len = u16::from_be_bytes([buf[2], buf[3]]);
        if (len as usize) < HEADER_LEN {
            return Err(PacketError::LengthTooSmall(len));
        }
        if buf.len() < len as usize {
            return Err(PacketError::TooShort);
        }
        if buf.len() > len as usize {
            tracing::debug!(padding = buf.len() - len as usize, "trailing UDP padding");
            buf.truncate(len as usize);
        }
        Ok(Packet(buf))
    }

    /// Build a freshly framed header with no attributes.
    pub fn new(code: u8, id: u8, authenticator: [u8; 16]) -> Self {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = code;
        buf[1] = id;
        buf[2..4].copy_from_slice(&(HEADER_LEN as u16).to_be_bytes());
        buf[4..20].copy_from_slice(&authenticator);
        Packet(buf)
    }

    pub fn code(&self) -> u8 {
        self.0[0]
    }

    pub fn set_code(&mut self, code: u8) {
        self.0[0] = code;
    }

    pub fn id(&self) -> u8 {
        self.0[1]
    }

    pub fn set_id(&mut self, id: u8) {
        self.0[1] = id;
    }

    pub fn header_len(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    fn set_header_len(&mut self, len: u16) {
        self.0[2..4].copy_from_slice(&len.to_be_bytes());
    }

    pub fn authenticator(&self) -> &[u8] {
        &self.0[4..20]
    }

    pub fn set_authenticator(&mut self, auth: &[u8]) {
        debug_assert_eq!(auth.len(), 16);
        self.0[4..20].copy_from_slice(auth);
    }

    pub fn attrs(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Append a raw attribute TLV and grow the header length field.
    /// `value.len()` must fit in `u8::MAX - 2`.
    pub fn append_attr(&mut self, attr_type: u8, value: &[u8]) {
        debug_assert!(value.len() <= 253);
        self.0.push(attr_type);
        self.0.push((value.len() + 2) as u8);
        self.0.extend_from_slice(value);
        let new_len = self.0.len() as u16;
        self.set_header_len(new_len);
    }

    /// Walk the attribute TLV sequence, mirroring the legacy `attrvalidate`:
    /// any `len < 2` or cumulative overrun fails; a single dangling trailing
    /// byte is tolerated (logged, not rejected).
    pub fn validate_attrs(&self) -> Result<(), PacketError> {
        let attrs = self.attrs();
        let mut remaining = attrs.len() as isize;
        let mut offset = 0usize;
        while remaining > 1 {
            let alen = attrs[offset + 1] as isize;
            if alen < 2 {
                return Err(PacketError::MalformedAttributes);
            }
            remaining -= alen;
            if remaining < 0 {
                return Err(PacketError::MalformedAttributes);
            }
            offset += alen as usize;
        }
        if remaining != 0 {
            tracing::warn!("malformed packet? remaining byte after last attribute");
        }
        Ok(())
    }

    /// First attribute TLV (type, length, value) with the given type, or `None`.
    pub fn attr_get(&self, attr_type: u8) -> Option<&[u8]> {
        attr_get(self.attrs(), attr_type)
    }

    /// Just the value bytes of the first attribute with the given type.
    pub fn attr_value(&self, attr_type: u8) -> Option<&[u8]> {
        self.attr_get(attr_type).map(|tlv| &tlv[2..])
    }

    pub fn user_name(&self) -> Option<&[u8]> {
        self.attr_value(AttrType::UserName.id())
    }

    /// Replace a single attribute's value in place, growing or shrinking the
    /// backing buffer as needed, and return the byte offset of the new
    /// value within the buffer. Mirrors the legacy `resizeattr`.
    pub fn resize_attr(&mut self, attr_type: u8, new_value: &[u8]) -> Option<usize> {
        let header_len = self.header_len() as usize;
        let attrs_start = HEADER_LEN;
        let attrs_len = header_len - attrs_start;

        let tlv_offset = {
            let attrs = &self.0[attrs_start..attrs_start + attrs_len];
            let tlv = attr_get(attrs, attr_type)?;
            // Safety: tlv is a subslice of attrs, compute its offset.
            (tlv.as_ptr() as usize) - (attrs.as_ptr() as usize)
        };
        let attr_off = attrs_start + tlv_offset;
        let old_vallen = self.0[attr_off + 1] as usize - 2;
        let new_vallen = new_value.len();
        if new_vallen > 253 {
            return None;
        }

        if new_vallen != old_vallen {
            let val_off = attr_off + 2;
            let tail_start = val_off + old_vallen;
            let tail: Vec<u8> = self.0[tail_start..].to_vec();
            self.0.truncate(val_off);
            self.0.extend_from_slice(new_value);
            self.0.extend_from_slice(&tail);
            self.0[attr_off + 1] = (new_vallen + 2) as u8;
            let new_header_len = (header_len as isize + new_vallen as isize - old_vallen as isize) as u16;
            self.set_header_len(new_header_len);
        } else {
            self.0[attr_off + 2..attr_off + 2 + new_vallen].copy_from_slice(new_value);
        }
        Some(attr_off + 2)
    }

    /// Replace the whole attribute section with `new_attrs`, which must
    /// already be a well-formed TLV sequence, and update the header length.
    pub fn set_attrs(&mut self, new_attrs: &[u8]) {
        self.0.truncate(HEADER_LEN);
        self.0.extend_from_slice(new_attrs);
        let new_len = self.0.len() as u16;
        self.set_header_len(new_len);
    }

    pub fn attr_value_mut(&mut self, attr_type: u8) -> Option<&mut [u8]> {
        let header_len = self.header_len() as usize;
        let attrs_start = HEADER_LEN;
        let offset = {
            let attrs = &self.0[attrs_start..header_len];
            let tlv = attr_get(attrs, attr_type)?;
            (tlv.as_ptr() as usize) - (attrs.as_ptr() as usize)
        };
        let attr_off = attrs_start + offset;
        let vallen = self.0[attr_off + 1] as usize - 2;
        Some(&mut self.0[attr_off + 2..attr_off + 2 + vallen])
    }
}

/// Free function mirroring the legacy `attrget`: walk TLVs without
/// validating length invariants (the caller is expected to have called
/// `validate_attrs` first).
pub fn attr_get(attrs: &[u8], attr_type: u8) -> Option<&[u8]> {
    let mut offset = 0usize;
    while offset + 1 < attrs.len() {
        let alen = attrs[offset + 1] as usize;
        if alen < 2 || offset + alen > attrs.len() {
            return None;
        }
        if attrs[offset] == attr_type {
            return Some(&attrs[offset..offset + alen]);
        }
        offset += alen;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_header() {
        let p = Packet::new(1, 7, [0xAB; 16]);
        assert_eq!(p.code(), 1);
        assert_eq!(p.id(), 7);
        assert_eq!(p.header_len(), 20);
        assert_eq!(p.authenticator(), [0xAB; 16]);
    }

    #[test]
    fn append_and_get_attr() {
        let mut p = Packet::new(1, 7, [0u8; 16]);
        p.append_attr(1, b"bob@example.org");
        assert_eq!(p.header_len() as usize, 20 + 2 + 15);
        let v = p.attr_value(1).unwrap();
        assert_eq!(v, b"bob@example.org");
        p.validate_attrs().unwrap();
    }

    #[test]
    fn validate_attrs_rejects_short_tlv() {
        let mut p = Packet::new(1, 7, [0u8; 16]);
        p.0.extend_from_slice(&[5, 1]); // len < 2
        p.set_header_len(22);
        assert!(p.validate_attrs().is_err());
    }

    #[test]
    fn validate_attrs_rejects_overrun() {
        let mut p = Packet::new(1, 7, [0u8; 16]);
        p.0.extend_from_slice(&[5, 10, 1, 2, 3]); // declares len 10, only 5 bytes present
        p.set_header_len(25);
        assert!(p.validate_attrs().is_err());
    }

    #[test]
    fn resize_attr_grows_and_shrinks() {
        let mut p = Packet::new(1, 7, [0u8; 16]);
        p.append_attr(1, b"short");
        p.resize_attr(1, b"a much longer replacement value").unwrap();
        assert_eq!(p.attr_value(1).unwrap(), b"a much longer replacement value");
        p.resize_attr(1, b"tiny").unwrap();
        assert_eq!(p.attr_value(1).unwrap(), b"tiny");
        assert_eq!(p.header_len() as usize, p.as_bytes().len());
    }

    #[test]
    fn from_received_truncates_padding() {
        let mut raw = Packet::new(2, 0, [0u8; 16]).into_bytes();
        raw.extend_from_slice(&[0, 0, 0, 0]);
        let p = Packet::from_received(raw).unwrap();
        assert_eq!(p.as_bytes().len(), 20);
    }

    #[test]
    fn from_received_rejects_short() {
        assert!(Packet::from_received(vec![0u8; 10]).is_err());
    }
}
