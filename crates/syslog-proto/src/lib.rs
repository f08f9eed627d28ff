//! Wire format, JSON encoding, and shared types for syslog message exchange.

pub mod error;
pub mod json;
pub mod model;
pub mod observer;
pub mod wire;

pub use error::{CodecError, CodecResult};
pub use model::{Entry, Facility, Filter, Msg, SdData, Severity, MAX_RESULTS_LIMIT};
pub use observer::{SetFilter, StateSync};
pub use wire::{decode_msg_wire, encode_msg_wire};
