//! HTTP/1.0 framing
//!
//! Only as much HTTP as the relay needs: building the fixed upstream request and
//! recognising a complete downstream request head. Nothing beyond the request
//! line is interpreted.

pub mod constants;
pub mod framing;
pub mod request;

pub use framing::RequestFramer;
pub use request::{upstream_request, RequestHead};
