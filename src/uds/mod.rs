//! UDS (ISO 14229) protocol identifiers used by the backends and the
//! override evaluator.
//!
//! The service table in [`services`] is the closed symbol namespace that
//! override expressions may reference. Nothing outside it resolves.

mod services;

pub use services::{ServiceId, SERVICE_TABLE};

/// Response service identifier for negative responses.
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// Bit set in a sub-function byte to ask the server not to answer positively.
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// Offset added to a request service id to form the positive response id.
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Negative response codes emitted by the mock server.
pub struct NegativeResponseCode {}

impl NegativeResponseCode {
    pub const GENERAL_REJECT: u8 = 0x10;
    pub const SERVICE_NOT_SUPPORTED: u8 = 0x11;
    pub const SUB_FUNCTION_NOT_SUPPORTED: u8 = 0x12;
    pub const INCORRECT_MESSAGE_LENGTH_OR_INVALID_FORMAT: u8 = 0x13;
    pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
    pub const SERVICE_NOT_SUPPORTED_IN_ACTIVE_SESSION: u8 = 0x7F;
}

/// Build a `7F <sid> <nrc>` negative response.
pub fn negative_response(sid: u8, nrc: u8) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE_SID, sid, nrc]
}

/// Positive response id for a request service id.
pub fn positive_sid(sid: u8) -> u8 {
    sid.wrapping_add(POSITIVE_RESPONSE_OFFSET)
}

/// Whether `response` is a positive answer to a request for `sid`.
pub fn is_positive_response(sid: u8, response: &[u8]) -> bool {
    response.first() == Some(&positive_sid(sid))
}

/// Sub-function byte of a request with the suppress bit masked out.
///
/// Returns `None` when the service has no sub-function or the request is too
/// short to carry one.
pub fn sub_function(request: &[u8]) -> Option<u8> {
    let sid = *request.first()?;
    if !ServiceId(sid).has_sub_function() {
        return None;
    }
    request.get(1).map(|sub| sub & !SUPPRESS_POSITIVE_RESPONSE)
}

/// Whether the request asks for positive-response suppression.
pub fn suppress_positive_response(request: &[u8]) -> bool {
    match request {
        [sid, sub, ..] => ServiceId(*sid).has_sub_function() && sub & SUPPRESS_POSITIVE_RESPONSE != 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_response_layout() {
        assert_eq!(
            negative_response(0x22, NegativeResponseCode::REQUEST_OUT_OF_RANGE),
            vec![0x7F, 0x22, 0x31]
        );
    }

    #[test]
    fn sub_function_masks_suppress_bit() {
        assert_eq!(sub_function(&[0x3E, 0x80]), Some(0x00));
        assert_eq!(sub_function(&[0x10, 0x03]), Some(0x03));
        assert_eq!(sub_function(&[0x22, 0xF1, 0x90]), None);
        assert_eq!(sub_function(&[0x10]), None);
    }

    #[test]
    fn suppress_only_for_sub_function_services() {
        assert!(suppress_positive_response(&[0x3E, 0x80]));
        assert!(!suppress_positive_response(&[0x3E, 0x00]));
        assert!(!suppress_positive_response(&[0x22, 0x80, 0x00]));
    }

    #[test]
    fn positive_response_detection() {
        assert!(is_positive_response(0x10, &[0x50, 0x01]));
        assert!(!is_positive_response(0x10, &[0x7F, 0x10, 0x12]));
    }
}
