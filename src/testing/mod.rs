//! Test doubles for the transport and application seams

pub mod mocks;
