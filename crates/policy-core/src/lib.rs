//! Small cross-cutting utilities shared by `policy-engine` and
//! `policy-engine-app`: the interned string type, duration parsing used by
//! the parameter validator, request-id minting, and the tracing bootstrap.

pub mod duration;
pub mod request_id;
pub mod strng;
pub mod telemetry;

pub mod prelude {
	pub use crate::strng::{CaseInsensitive, Strng};
}
