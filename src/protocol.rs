//! Binary wire protocol codec.
//!
//! All multi-byte integers are big-endian, fields are packed with no padding.
//!
//! ```text
//! Request:  tml:u8 | op_code:u8 | operand_one:i32 | operand_two:i32 |
//!           request_id:u16 | op_name_length:u8 | op_name:utf16-be
//! Response: tml:u8 (=8) | result:i32 | error_code:u8 | request_id:u16
//! ```
//!
//! `op_name_length` counts UTF-16 code units, so the name occupies
//! `2 * op_name_length` bytes. The codec does no semantic validation; a
//! mismatched `tml` or unknown `op_code` decodes fine and is left for the
//! dispatcher to reject.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Size of the fixed request fields preceding the op name.
pub const REQUEST_HEADER_LEN: usize = 13;

/// Size of every encoded response.
pub const RESPONSE_LEN: usize = 8;

/// `error_code` of a successful response.
pub const ERROR_CODE_OK: u8 = 0;

/// `error_code` of any failed response.
pub const ERROR_CODE_FAILED: u8 = 127;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Need `needed` more bytes to complete the frame
    #[error("incomplete frame: {needed} more bytes required")]
    Incomplete { needed: usize },
    /// Op name is not valid big-endian UTF-16
    #[error("op name is not valid UTF-16")]
    InvalidOpName,
    /// Op name does not fit the one-byte length field
    #[error("op name is {units} UTF-16 code units, at most 255 allowed")]
    OpNameTooLong { units: usize },
}

/// Decoded arithmetic request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Declared total message length. Not used for framing.
    pub tml: u8,
    pub op_code: u8,
    pub operand_one: i32,
    pub operand_two: i32,
    pub request_id: u16,
    /// Op name length in UTF-16 code units
    pub op_name_length: u8,
    pub op_name: String,
}

impl Request {
    /// Build a request whose length fields agree with `op_name`.
    pub fn new(
        op_code: u8,
        operand_one: i32,
        operand_two: i32,
        request_id: u16,
        op_name: &str,
    ) -> Result<Self, CodecError> {
        let units = op_name.encode_utf16().count();
        let op_name_length =
            u8::try_from(units).map_err(|_| CodecError::OpNameTooLong { units })?;

        Ok(Request {
            tml: (REQUEST_HEADER_LEN as u8).wrapping_add(op_name_length),
            op_code,
            operand_one,
            operand_two,
            request_id,
            op_name_length,
            op_name: op_name.to_string(),
        })
    }

    /// Whether `tml` matches the header size plus the declared name length.
    pub fn has_consistent_length(&self) -> bool {
        usize::from(self.tml) == REQUEST_HEADER_LEN + usize::from(self.op_name_length)
    }

    /// Number of bytes this request occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        REQUEST_HEADER_LEN + 2 * usize::from(self.op_name_length)
    }

    /// Decode a request from the front of `input`.
    ///
    /// Returns the request and the number of bytes consumed. Trailing bytes
    /// are left untouched.
    pub fn decode(input: &[u8]) -> Result<(Request, usize), CodecError> {
        if input.len() < REQUEST_HEADER_LEN {
            return Err(CodecError::Incomplete {
                needed: REQUEST_HEADER_LEN - input.len(),
            });
        }

        let mut buf = input;
        let tml = buf.get_u8();
        let op_code = buf.get_u8();
        let operand_one = buf.get_i32();
        let operand_two = buf.get_i32();
        let request_id = buf.get_u16();
        let op_name_length = buf.get_u8();

        let name_len = 2 * usize::from(op_name_length);
        if buf.len() < name_len {
            return Err(CodecError::Incomplete {
                needed: name_len - buf.len(),
            });
        }

        let op_name = decode_utf16_be(&buf[..name_len])?;

        let request = Request {
            tml,
            op_code,
            operand_one,
            operand_two,
            request_id,
            op_name_length,
            op_name,
        };
        Ok((request, REQUEST_HEADER_LEN + name_len))
    }

    /// Encode the request to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the request into an existing buffer.
    ///
    /// `tml` and `op_name_length` are written as stored, so a deliberately
    /// inconsistent request goes out unchanged.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tml);
        buf.put_u8(self.op_code);
        buf.put_i32(self.operand_one);
        buf.put_i32(self.operand_two);
        buf.put_u16(self.request_id);
        buf.put_u8(self.op_name_length);
        for unit in self.op_name.encode_utf16() {
            buf.put_u16(unit);
        }
    }
}

/// Arithmetic response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub tml: u8,
    pub result: i32,
    pub error_code: u8,
    pub request_id: u16,
}

impl Response {
    /// Successful response carrying `result`.
    pub fn ok(result: i32, request_id: u16) -> Self {
        Response {
            tml: RESPONSE_LEN as u8,
            result,
            error_code: ERROR_CODE_OK,
            request_id,
        }
    }

    /// Failed response. `result` is transmitted as given.
    pub fn failed(result: i32, request_id: u16) -> Self {
        Response {
            tml: RESPONSE_LEN as u8,
            result,
            error_code: ERROR_CODE_FAILED,
            request_id,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == ERROR_CODE_OK
    }

    /// Encode the response to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(RESPONSE_LEN);
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the response into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tml);
        buf.put_i32(self.result);
        buf.put_u8(self.error_code);
        buf.put_u16(self.request_id);
    }

    /// Decode a response from the front of `input`.
    pub fn decode(input: &[u8]) -> Result<Response, CodecError> {
        if input.len() < RESPONSE_LEN {
            return Err(CodecError::Incomplete {
                needed: RESPONSE_LEN - input.len(),
            });
        }

        let mut buf = input;
        Ok(Response {
            tml: buf.get_u8(),
            result: buf.get_i32(),
            error_code: buf.get_u8(),
            request_id: buf.get_u16(),
        })
    }
}

/// Decode big-endian UTF-16, rejecting unpaired surrogates.
fn decode_utf16_be(bytes: &[u8]) -> Result<String, CodecError> {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| CodecError::InvalidOpName)
}

#[cfg(test)]
mod tests {
    use super::*;

    // "Add" request, op_code 0, 5 + 3, request id 42
    const ADD_FRAME: [u8; 19] = [
        16, 0, 0, 0, 0, 5, 0, 0, 0, 3, 0, 42, 3, 0x00, b'A', 0x00, b'd', 0x00, b'd',
    ];

    #[test]
    fn test_decode_request() {
        let (request, consumed) = Request::decode(&ADD_FRAME).unwrap();
        assert_eq!(consumed, 19);
        assert_eq!(request.tml, 16);
        assert_eq!(request.op_code, 0);
        assert_eq!(request.operand_one, 5);
        assert_eq!(request.operand_two, 3);
        assert_eq!(request.request_id, 42);
        assert_eq!(request.op_name_length, 3);
        assert_eq!(request.op_name, "Add");
        assert!(request.has_consistent_length());
    }

    #[test]
    fn test_decode_negative_operands_and_large_id() {
        let mut frame = BytesMut::new();
        frame.put_u8(13);
        frame.put_u8(1);
        frame.put_i32(-7);
        frame.put_i32(i32::MIN);
        frame.put_u16(65535);
        frame.put_u8(0);

        let (request, consumed) = Request::decode(&frame).unwrap();
        assert_eq!(consumed, REQUEST_HEADER_LEN);
        assert_eq!(request.operand_one, -7);
        assert_eq!(request.operand_two, i32::MIN);
        assert_eq!(request.request_id, 65535);
        assert_eq!(request.op_name, "");
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut input = ADD_FRAME.to_vec();
        input.extend_from_slice(b"extra");
        let (_, consumed) = Request::decode(&input).unwrap();
        assert_eq!(consumed, ADD_FRAME.len());
    }

    #[test]
    fn test_decode_incomplete_header() {
        assert_eq!(
            Request::decode(&ADD_FRAME[..5]),
            Err(CodecError::Incomplete { needed: 8 })
        );
        assert_eq!(
            Request::decode(&[]),
            Err(CodecError::Incomplete { needed: 13 })
        );
    }

    #[test]
    fn test_decode_incomplete_name() {
        assert_eq!(
            Request::decode(&ADD_FRAME[..16]),
            Err(CodecError::Incomplete { needed: 3 })
        );
    }

    #[test]
    fn test_decode_does_not_validate_semantics() {
        let mut frame = ADD_FRAME;
        frame[0] = 200;
        frame[1] = 99;
        let (request, _) = Request::decode(&frame).unwrap();
        assert_eq!(request.tml, 200);
        assert_eq!(request.op_code, 99);
        assert!(!request.has_consistent_length());
    }

    #[test]
    fn test_decode_unpaired_surrogate() {
        let mut frame = ADD_FRAME[..REQUEST_HEADER_LEN].to_vec();
        frame[0] = 14;
        frame[12] = 1;
        frame.extend_from_slice(&[0xD8, 0x00]);
        assert_eq!(Request::decode(&frame), Err(CodecError::InvalidOpName));
    }

    #[test]
    fn test_decode_surrogate_pair() {
        let request = Request::new(0, 1, 2, 3, "a\u{1F600}").unwrap();
        assert_eq!(request.op_name_length, 3);
        assert_eq!(request.tml, 16);

        let (decoded, _) = Request::decode(&request.encode()).unwrap();
        assert_eq!(decoded.op_name, "a\u{1F600}");
    }

    #[test]
    fn test_request_encode_matches_wire_layout() {
        let request = Request::new(0, 5, 3, 42, "Add").unwrap();
        assert_eq!(&request.encode()[..], &ADD_FRAME[..]);
    }

    #[test]
    fn test_request_name_too_long() {
        let name = "x".repeat(256);
        assert_eq!(
            Request::new(0, 1, 1, 1, &name),
            Err(CodecError::OpNameTooLong { units: 256 })
        );
        assert!(Request::new(0, 1, 1, 1, &"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_response_encode() {
        let response = Response::ok(-2, 0x0102);
        assert_eq!(
            &response.encode()[..],
            &[8, 0xFF, 0xFF, 0xFF, 0xFE, 0, 0x01, 0x02]
        );

        let response = Response::failed(0, 7);
        assert_eq!(&response.encode()[..], &[8, 0, 0, 0, 0, 127, 0, 7]);
    }

    #[test]
    fn test_response_decode() {
        let response = Response::decode(&[8, 0, 0, 0, 8, 0, 0, 42]).unwrap();
        assert_eq!(response, Response::ok(8, 42));
        assert!(response.is_ok());

        assert_eq!(
            Response::decode(&[8, 0, 0]),
            Err(CodecError::Incomplete { needed: 5 })
        );
    }
}
