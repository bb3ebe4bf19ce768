// rpb-common - Wire vocabulary shared by the client and its test doubles
//
// This crate defines message codes, frame layout and the protobuf payloads

pub mod code;
pub mod error;
pub mod frame;
pub mod messages;

// Re-export for convenience
pub use code::*;
pub use error::*;
pub use frame::{
    decode_frame, decode_header, decode_payload, encode, encode_message, Frame, FrameHeader,
    HEADER_LEN, MAX_PAYLOAD_LEN,
};
