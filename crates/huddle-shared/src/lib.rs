//! Types shared between the huddle relay and anything that talks to it:
//! the JSON event protocol, room naming, and agent-mention matching.

pub mod constants;
pub mod error;
pub mod mention;
pub mod protocol;
pub mod room;
pub mod types;
