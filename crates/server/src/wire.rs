//! The wire framing: one hex-encoded record per newline-terminated line.
//!
//! A decoded frame is `[kind(1) | body]`: kind 0 carries data (a request's
//! SQL text, or a response's result bytes), kind 1 a UTF-8 error message.
//! Encoding emits lowercase hex; decoding accepts either case.

use thiserror::Error;

const KIND_DATA: u8 = 0;
const KIND_ERR: u8 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid package data")]
pub struct InvalidPkgData;

/// A decoded frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    Err(String),
}

impl Frame {
    pub fn error(e: impl std::fmt::Display) -> Frame {
        Frame::Err(e.to_string())
    }

    /// Encodes the frame as one hex line, without the trailing newline.
    pub fn encode(&self) -> String {
        let mut bytes = Vec::new();
        match self {
            Frame::Data(body) => {
                bytes.push(KIND_DATA);
                bytes.extend_from_slice(body);
            }
            Frame::Err(msg) => {
                bytes.push(KIND_ERR);
                bytes.extend_from_slice(msg.as_bytes());
            }
        }
        hex::encode(bytes)
    }

    pub fn decode(line: &str) -> Result<Frame, InvalidPkgData> {
        let bytes = hex::decode(line.trim()).map_err(|_| InvalidPkgData)?;
        match bytes.split_first() {
            Some((&KIND_DATA, body)) => Ok(Frame::Data(body.to_vec())),
            Some((&KIND_ERR, body)) => Ok(Frame::Err(String::from_utf8_lossy(body).into_owned())),
            _ => Err(InvalidPkgData),
        }
    }
}
