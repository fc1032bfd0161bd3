//! Integration tests for cloudsync-transfer
//!
//! Runs the orchestrators and the backend facade against an in-memory
//! object store with fault injection, simulated latency and call recording.

mod common;

mod test_concat;
