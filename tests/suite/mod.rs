//! Integration test suites, each against a live host runtime.

mod config;
mod detour;
mod properties;
