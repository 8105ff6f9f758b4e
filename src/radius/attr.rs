// SPDX-License-Identifier: MIT

//! Numeric RADIUS codes and attribute types the proxy interprets (SPEC_FULL.md §6).
//! The attribute dictionary is assumed numeric; anything not listed here passes
//! through the codec untouched.

/// RADIUS packet codes (RFC 2865/2866/5997).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    AccessChallenge = 11,
    StatusServer = 12,
}

impl Code {
    pub fn from_u8(v: u8) -> Option<Code> {
        match v {
            1 => Some(Code::AccessRequest),
            2 => Some(Code::AccessAccept),
            3 => Some(Code::AccessReject),
            4 => Some(Code::AccountingRequest),
            5 => Some(Code::AccountingResponse),
            11 => Some(Code::AccessChallenge),
            12 => Some(Code::StatusServer),
            _ => None,
        }
    }
}

/// Well-known RADIUS attribute types (by symbolic name in SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttrType {
    UserName = 1,
    UserPassword = 2,
    ReplyMessage = 18,
    VendorSpecific = 26,
    TunnelPassword = 69,
    MessageAuthenticator = 80,
}

impl AttrType {
    pub const fn id(self) -> u8 {
        self as u8
    }
}

/// Microsoft vendor id (RFC 2548) and the two sub-attributes the proxy re-keys.
pub const VENDOR_MICROSOFT: u32 = 311;
pub const VSA_MS_MPPE_SEND_KEY: u8 = 16;
pub const VSA_MS_MPPE_RECV_KEY: u8 = 17;
