//! # rtugate-registers
//!
//! Register resolution for rtugate.
//!
//! This crate provides:
//! - The `Register` abstraction with optional decode/encode capabilities
//! - Register spans that map frame payloads to/from named values
//! - Typed numeric registers with byte order, access mode and scaling
//! - Register catalogs loaded from YAML

pub mod catalog;
pub mod error;
pub mod numeric;
pub mod register;
pub mod span;

pub use catalog::RegisterCatalog;
pub use error::RegisterError;
pub use numeric::{Access, Endian, NumericRegister, ValueKind};
pub use register::{Decode, Encode, Register, ValueMap};
pub use span::{DecodeMode, RegisterSpan};
