//! Pipeline stages between an uploaded page image and its extracted record.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap
//! implementations (e.g. a different model backend) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! page bytes ──▶ prepare ──▶ client ──▶ WorkflowEngine
//! (raster)       (JPEG ≤     (vision     (Done/Failed)
//!                 ceiling)    model)
//! ```
//!
//! 1. [`prepare`] — decode and re-encode the raster under the configured
//!    byte ceiling; CPU-bound, driven under `spawn_blocking` by
//!    [`crate::batch`]
//! 2. [`client`]  — send the encoded page to the vision model and parse the
//!    reply into a [`crate::value::Value`]; the only stage with network I/O

pub mod client;
pub mod prepare;
