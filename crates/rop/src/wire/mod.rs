// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire constants and the byte buffer frames are driven over.
//!
//! ```text
//! message  := port_id:i32 (request | return)
//! request  := head:u8 (0b00xx_xxx0 call, 0b00xx_xxx1 one-way) target:i32 method:u16 args...
//! return   := head:u8 (0b11xx_xxxx) variant:i32 payload
//! objref   := present:u8 [id:i32]
//! ```
//!
//! All integers are big-endian. Ids are written in the sender's numbering
//! and negated by the receiver.

mod buffer;

pub use buffer::Buffer;

/// Length of the port id prefix
pub const PORT_ID_LEN: usize = 4;

/// Request head expecting a Return
pub const HEAD_REQUEST: u8 = 0x00;

/// Flag bit on a request head: no Return will be sent
pub const HEAD_ONEWAY: u8 = 0x01;

/// Return head
pub const HEAD_RETURN: u8 = 0xC0;

/// Bits selecting the message kind
pub const HEAD_KIND_MASK: u8 = 0xC0;

/// Object id of every connection's directory skeleton
pub const CONTROL_OBJECT: i32 = 0;

/// Convert an id between the sender's and the receiver's numbering.
#[inline]
pub fn flip(id: i32) -> i32 {
    id.wrapping_neg()
}

/// Head byte of a Request (call or one-way).
#[inline]
pub fn is_request(head: u8) -> bool {
    head & HEAD_KIND_MASK == 0
}

/// Head byte of a Return.
#[inline]
pub fn is_return(head: u8) -> bool {
    head & HEAD_KIND_MASK == HEAD_RETURN
}

/// Request head that expects no Return.
#[inline]
pub fn is_oneway(head: u8) -> bool {
    is_request(head) && head & HEAD_ONEWAY != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip() {
        assert_eq!(flip(7), -7);
        assert_eq!(flip(-7), 7);
        assert_eq!(flip(0), 0);
        assert_eq!(flip(i32::MIN), i32::MIN);
    }

    #[test]
    fn test_heads() {
        assert!(is_request(HEAD_REQUEST));
        assert!(is_request(HEAD_ONEWAY));
        assert!(is_oneway(HEAD_ONEWAY));
        assert!(!is_oneway(HEAD_REQUEST));
        assert!(is_return(HEAD_RETURN));
        assert!(!is_return(HEAD_REQUEST));
        assert!(!is_request(0x40) && !is_return(0x40));
        assert!(!is_oneway(HEAD_RETURN | HEAD_ONEWAY));
    }
}
