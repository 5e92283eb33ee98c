//! HTTP surface for this service: liveness/readiness and aggregate stats.
//! Deliberately thin — no auth, no mutation routes, nothing that writes to
//! the pipeline. Everything that changes state comes in through an adapter
//! or the scheduler, never through this API.

pub mod health;
pub mod stats;
