//! Transaction relay
//!
//! Answers peers' questions about transactions we have not yet seen confirmed.

mod mempool;

pub use mempool::MempoolRelayResponder;
