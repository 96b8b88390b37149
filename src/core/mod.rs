//! Core runtime state shared by every other module.
//!
//! This module contains:
//! - The [`Context`](context::Context) that owns every object
//! - Reference handles and the reference table
//! - Status codes and verification reports
//! - Buffers, map guards and memory accounting
//! - Meta formats used by kernel validators
//! - Plain value types (formats, rectangles, borders, scalars)

pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod meta;
pub mod reference;
pub mod types;

// Re-export commonly used types
pub use config::{ContextConfig, TargetConfig, TARGET_C_MODEL, TARGET_TILING};
pub use context::{Context, LogEntry};
pub use error::{VerifyReport, VxError, VxResult};
pub use meta::{MetaFormat, MetaInfo};
pub use reference::{AsHandle, Handle, ReferenceInfo};
