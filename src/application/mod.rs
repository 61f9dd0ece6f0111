//! Application layer: submission, settlement and wallet lifecycle.
//!
//! The settlement path is `SubmissionGuard` (request time) → message channel →
//! `SettlementConsumer` workers → `SettlementApplier` (one unit of work per
//! delivery), with `RetryPolicy` deciding what happens to failed deliveries.

pub mod applier;
pub mod consumer;
pub mod delay;
pub mod guard;
pub mod retry;
pub mod wallet;
