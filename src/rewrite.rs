// SPDX-License-Identifier: MIT

//! Attribute removal rules applied on ingress (to the request) and egress
//! (to the reply), mirroring the legacy `dorewrite`/`dovendorrewrite`.

use crate::radius::Packet;

/// A vendor-specific sub-attribute removal. `subtype: None` drops the whole
/// Vendor-Specific attribute for that vendor; `Some(n)` drops only
/// sub-attribute `n`, leaving the rest of the VSA intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorAttrRemoval {
    pub vendor: u32,
    pub subtype: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteRule {
    pub name: String,
    /// Plain attribute types stripped unconditionally.
    pub remove_attrs: Vec<u8>,
    pub remove_vendor_attrs: Vec<VendorAttrRemoval>,
}

const VENDOR_SPECIFIC: u8 = 26;

impl RewriteRule {
    pub fn new(name: impl Into<String>) -> Self {
        RewriteRule {
            name: name.into(),
            remove_attrs: Vec::new(),
            remove_vendor_attrs: Vec::new(),
        }
    }

    fn vendor_removal(&self, vendor: u32) -> Option<Option<u8>> {
        self.remove_vendor_attrs
            .iter()
            .find(|r| r.vendor == vendor)
            .map(|r| r.subtype)
    }

    /// Apply this rule's removals to `packet` in place.
    pub fn apply(&self, packet: &mut Packet) {
        if self.remove_attrs.is_empty() && self.remove_vendor_attrs.is_empty() {
            return;
        }
        let attrs = packet.attrs().to_vec();
        let mut out = Vec::with_capacity(attrs.len());
        let mut offset = 0usize;
        while offset + 1 < attrs.len() {
            let alen = attrs[offset + 1] as usize;
            if alen < 2 || offset + alen > attrs.len() {
                break;
            }
            let attr_type = attrs[offset];
            let value = &attrs[offset + 2..offset + alen];

            if self.remove_attrs.contains(&attr_type) {
                offset += alen;
                continue;
            }

            if attr_type == VENDOR_SPECIFIC && value.len() >= 4 {
                let vendor = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                if let Some(removal) = self.vendor_removal(vendor) {
                    match removal {
                        None => {
                            offset += alen;
                            continue;
                        }
                        Some(subtype) => {
                            if let Some(rebuilt) = remove_vendor_subattr(value, subtype) {
                                if rebuilt.len() > 4 {
                                    out.push(attr_type);
                                    out.push((rebuilt.len() + 2) as u8);
                                    out.extend_from_slice(&rebuilt);
                                }
                                offset += alen;
                                continue;
                            }
                        }
                    }
                }
            }

            out.extend_from_slice(&attrs[offset..offset + alen]);
            offset += alen;
        }
        packet.set_attrs(&out);
    }
}

/// Rebuild a Vendor-Specific attribute's value with sub-attribute `subtype`
/// removed, mirroring `findvendorsubattr` + the removal loop in
/// `dovendorrewrite`. Returns `None` if the sub-TLV sequence is malformed.
fn remove_vendor_subattr(vsa_value: &[u8], subtype: u8) -> Option<Vec<u8>> {
    let (vendor_bytes, sub_attrs) = vsa_value.split_at(4);
    let mut out = vendor_bytes.to_vec();
    let mut offset = 0usize;
    while offset + 1 < sub_attrs.len() {
        let sublen = sub_attrs[offset + 1] as usize;
        if sublen < 2 || offset + sublen > sub_attrs.len() {
            return None;
        }
        if sub_attrs[offset] != subtype {
            out.extend_from_slice(&sub_attrs[offset..offset + sublen]);
        }
        offset += sublen;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radius::AttrType;

    #[test]
    fn removes_plain_attribute() {
        let mut rule = RewriteRule::new("strip-reply-message");
        rule.remove_attrs.push(AttrType::ReplyMessage.id());
        let mut pkt = Packet::new(2, 1, [0u8; 16]);
        pkt.append_attr(AttrType::UserName.id(), b"bob");
        pkt.append_attr(AttrType::ReplyMessage.id(), b"hello");
        rule.apply(&mut pkt);
        assert!(pkt.attr_value(AttrType::ReplyMessage.id()).is_none());
        assert_eq!(pkt.attr_value(AttrType::UserName.id()).unwrap(), b"bob");
    }

    #[test]
    fn removes_whole_vsa_when_subtype_omitted() {
        let mut rule = RewriteRule::new("strip-vendor");
        rule.remove_vendor_attrs.push(VendorAttrRemoval { vendor: 311, subtype: None });
        let mut pkt = Packet::new(2, 1, [0u8; 16]);
        let mut vsa = 311u32.to_be_bytes().to_vec();
        vsa.extend_from_slice(&[1, 4, 0xAA, 0xBB]);
        pkt.append_attr(26, &vsa);
        rule.apply(&mut pkt);
        assert!(pkt.attr_value(26).is_none());
    }

    #[test]
    fn removes_single_vendor_subattr_leaves_others() {
        let mut rule = RewriteRule::new("strip-one-subattr");
        rule.remove_vendor_attrs.push(VendorAttrRemoval { vendor: 311, subtype: Some(1) });
        let mut pkt = Packet::new(2, 1, [0u8; 16]);
        let mut vsa = 311u32.to_be_bytes().to_vec();
        vsa.extend_from_slice(&[1, 4, 0xAA, 0xBB]); // sub-attr 1
        vsa.extend_from_slice(&[2, 4, 0xCC, 0xDD]); // sub-attr 2
        pkt.append_attr(26, &vsa);
        rule.apply(&mut pkt);
        let remaining = pkt.attr_value(26).unwrap();
        assert_eq!(&remaining[0..4], &311u32.to_be_bytes());
        assert_eq!(&remaining[4..], &[2, 4, 0xCC, 0xDD]);
    }
}
