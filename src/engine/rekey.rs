// SPDX-License-Identifier: MIT

//! MS-MPPE-Send-Key/Recv-Key re-keying inside a Vendor-Specific attribute
//! (SPEC_FULL.md §4.5 step 8), grounded in the same TLV-rebuild walk
//! `rewrite::RewriteRule::apply` uses for vendor sub-attribute removal, but
//! rewriting sub-attribute values in place instead of dropping them.

use crate::radius::attr::{VENDOR_MICROSOFT, VSA_MS_MPPE_RECV_KEY, VSA_MS_MPPE_SEND_KEY};
use crate::radius::crypto;
use crate::radius::Packet;

const VENDOR_SPECIFIC: u8 = 26;

/// Re-key every MS-MPPE-Send-Key/Recv-Key sub-attribute found inside a
/// vendor-id=311 Vendor-Specific attribute, from the old hop's secret and
/// request authenticator to the new hop's. Any other attribute, including
/// other vendors' VSAs, passes through untouched. A fresh random salt is
/// drawn per re-keyed sub-attribute.
pub fn rekey_ms_mppe(packet: &mut Packet, old_secret: &[u8], old_authenticator: &[u8; 16], new_secret: &[u8], new_authenticator: &[u8; 16]) {
    let attrs = packet.attrs().to_vec();
    if attrs.is_empty() {
        return;
    }
    let mut out = Vec::with_capacity(attrs.len());
    let mut offset = 0usize;
    let mut changed = false;
    while offset + 1 < attrs.len() {
        let alen = attrs[offset + 1] as usize;
        if alen < 2 || offset + alen > attrs.len() {
            break;
        }
        let attr_type = attrs[offset];
        let value = &attrs[offset + 2..offset + alen];

        if attr_type == VENDOR_SPECIFIC && value.len() >= 4 {
            let vendor = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            if vendor == VENDOR_MICROSOFT {
                if let Some(rebuilt) = rekey_vsa_subattrs(value, old_secret, old_authenticator, new_secret, new_authenticator) {
                    out.push(attr_type);
                    out.push((rebuilt.len() + 2) as u8);
                    out.extend_from_slice(&rebuilt);
                    offset += alen;
                    changed = true;
                    continue;
                }
            }
        }

        out.extend_from_slice(&attrs[offset..offset + alen]);
        offset += alen;
    }
    if changed {
        packet.set_attrs(&out);
    }
}

fn rekey_vsa_subattrs(vsa_value: &[u8], old_secret: &[u8], old_authenticator: &[u8; 16], new_secret: &[u8], new_authenticator: &[u8; 16]) -> Option<Vec<u8>> {
    let (vendor_bytes, sub_attrs) = vsa_value.split_at(4);
    let mut out = vendor_bytes.to_vec();
    let mut offset = 0usize;
    while offset + 1 < sub_attrs.len() {
        let sublen = sub_attrs[offset + 1] as usize;
        if sublen < 2 || offset + sublen > sub_attrs.len() {
            return None;
        }
        let subtype = sub_attrs[offset];
        let subvalue = &sub_attrs[offset + 2..offset + sublen];
        if subtype == VSA_MS_MPPE_SEND_KEY || subtype == VSA_MS_MPPE_RECV_KEY {
            match crypto::ms_mppe_recrypt(subvalue, old_secret, old_authenticator, new_secret, new_authenticator, crypto::random_salt()) {
                Ok(new_value) => {
                    out.push(subtype);
                    out.push((new_value.len() + 2) as u8);
                    out.extend_from_slice(&new_value);
                }
                Err(e) => {
                    tracing::debug!(error = %e, subtype, "leaving MS-MPPE sub-attribute unre-keyed (bad length)");
                    out.extend_from_slice(&sub_attrs[offset..offset + sublen]);
                }
            }
        } else {
            out.extend_from_slice(&sub_attrs[offset..offset + sublen]);
        }
        offset += sublen;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radius::attr::VENDOR_MICROSOFT;

    fn vsa_with_mppe_key(subtype: u8, plain: &[u8], secret: &[u8], auth: &[u8; 16]) -> Vec<u8> {
        let value = crypto::ms_mppe_encrypt(plain, secret, auth, [0x80, 0x01]);
        let mut vsa = VENDOR_MICROSOFT.to_be_bytes().to_vec();
        vsa.push(subtype);
        vsa.push((value.len() + 2) as u8);
        vsa.extend_from_slice(&value);
        vsa
    }

    #[test]
    fn rekeys_recv_key_and_preserves_plaintext() {
        let old_secret = b"upstreamsecret";
        let old_auth = [5u8; 16];
        let new_secret = b"downstreamsecret";
        let new_auth = [9u8; 16];
        let mut plain = vec![32u8];
        plain.extend_from_slice(&[0xCCu8; 31]);

        let mut pkt = Packet::new(2, 1, [0u8; 16]);
        let vsa = vsa_with_mppe_key(VSA_MS_MPPE_RECV_KEY, &plain, old_secret, &old_auth);
        pkt.append_attr(26, &vsa);

        rekey_ms_mppe(&mut pkt, old_secret, &old_auth, new_secret, &new_auth);

        let rekeyed_vsa = pkt.attr_value(26).unwrap();
        let subvalue = &rekeyed_vsa[5..];
        let decrypted = crypto::ms_mppe_decrypt(subvalue, new_secret, &new_auth).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn leaves_other_vendors_untouched() {
        let mut pkt = Packet::new(2, 1, [0u8; 16]);
        let mut vsa = 99u32.to_be_bytes().to_vec();
        vsa.extend_from_slice(&[1, 4, 0xAA, 0xBB]);
        pkt.append_attr(26, &vsa);
        let before = pkt.attr_value(26).unwrap().to_vec();
        rekey_ms_mppe(&mut pkt, b"a", &[0u8; 16], b"b", &[1u8; 16]);
        assert_eq!(pkt.attr_value(26).unwrap(), before.as_slice());
    }
}
