//! Integration tests for partsync-api
//!
//! Uses wiremock to simulate the parts API and verifies end-to-end
//! behavior of the client, provider and request gate.

mod common;

mod test_folders;
mod test_parts;
mod test_retry;
