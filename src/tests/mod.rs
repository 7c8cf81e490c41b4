//! Helpers shared by unit, integration, and doc tests.

pub mod support;
