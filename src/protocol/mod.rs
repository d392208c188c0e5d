//! Wire protocol between the host and script processes.
//!
//! Every message is one JSON object per line carrying `pid` and `channel`
//! next to the channel's own fields. Requests flow script → host; responses
//! echo the same `pid`/`channel` back over the same connection.
//!
//! # Module Structure
//!
//! - `channel`: the fixed numbered channel catalogue
//! - `message`: `Envelope` validation and outbound message building
//! - `request`: decoding an envelope into a typed `Request` (or `Malformed`)
//! - `io`: JSONL streaming with graceful skipping of bad lines

mod channel;
mod io;
mod message;
mod request;

pub use channel::Channel;
pub use io::*;
pub use message::*;
pub use request::*;
