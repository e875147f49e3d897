//! Core components for Shroud: identifiers, the frame model, the record
//! codec used on physical connections and frame obfuscation.
pub mod codec;
pub mod connection;
pub mod default;
pub mod error;
pub mod frame;
pub mod obfs;
pub mod stream;

pub use crate::{
    codec::FrameCodec,
    connection::{ConnectionId, SessionId, SessionSide},
    error::{MuxError, Result},
    frame::{Closing, Frame, FrameBuilder},
    obfs::{make_obfuscator, EncryptionMethod, Obfuscator, PlainObfuscator},
    stream::{Seq, StreamId},
};
