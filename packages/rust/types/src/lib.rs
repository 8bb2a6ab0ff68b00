//! Entity type catalog for enrichkit.
//!
//! This crate provides:
//! - [`TypeDescriptor`]: field list, identifying field, optional detection rule
//! - [`TypeCatalog`]: name → descriptor lookup and raw-string classification
//! - [`Entity`]: a value validated against its descriptor

pub mod builtin;
pub mod catalog;
pub mod descriptor;
pub mod entity;

pub use catalog::TypeCatalog;
pub use descriptor::{DetectionRule, FieldKind, FieldSpec, TypeDescriptor};
pub use entity::{Entity, NodeRef};
