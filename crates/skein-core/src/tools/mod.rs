//! Tool contract and dispatch.

pub mod registry;
