// SPDX-License-Identifier: MIT

//! RADIUS wire format: packet codec and per-hop crypto (SPEC_FULL.md §4.1-4.2).

pub mod attr;
pub mod crypto;
pub mod packet;

pub use attr::AttrType;
pub use packet::Packet;
