#![warn(missing_docs)]

//! ssync wire layer: CRLF line framing with bounded reads, phase markers,
//! in-band error lines, and subrequest framing shared by both session roles.

pub mod error;
pub mod line;
pub mod message;
pub mod subrequest;

pub use error::WireError;
pub use line::{BodyRead, BodyReader, LineChannel};
pub use message::{ErrorLine, InventoryLine};
pub use subrequest::{HeaderMap, Method, RawSubrequest, Subrequest, SubrequestError, SubrequestFault};
