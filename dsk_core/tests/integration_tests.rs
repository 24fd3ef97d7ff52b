//! Integration tests for the DSK kernel.
//!
//! These tests drive whole device trees through a recording adapter:
//! lifecycle and aggregation, the PV data-flow engine and the
//! multiplexing node.

mod integration;
