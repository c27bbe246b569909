//! Shared test utilities for replywatch integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring the core components over an in-memory database
//! - `FakeProvider`, a scripted in-process mail provider
//! - Builders for tracked emails, messages, and subscription settings

pub mod builders;
pub mod fake_provider;
pub mod harness;

pub use builders::*;
pub use fake_provider::{Calls, FakeProvider};
pub use harness::{FailingInsertStore, TestHarness};
