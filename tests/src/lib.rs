//! # ict-rs Test Suite
//!
//! Unified test crate for scenarios spanning more than one subsystem:
//! full nodes talking to each other over loopback UDP.
//!
//! ```bash
//! # All tests
//! cargo test -p ict-tests
//!
//! # By category
//! cargo test -p ict-tests integration::
//! ```

#![allow(dead_code)]

pub mod integration;
