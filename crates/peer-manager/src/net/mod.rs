//! The I/O boundary: the peer task, its mailbox, the supervisor that
//! tracks spawned tasks, and a default TCP transport.

pub mod codec;
pub mod peer;
pub mod supervisor;
