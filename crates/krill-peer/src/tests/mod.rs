//! Tests for the krill-peer crate.

mod helpers;

mod basic;
mod capacity;
mod multi_node;
