//! # systest-parser
//!
//! Turns human-authored YAML suite documents into validated
//! [`TestSuite`](systest_core::model::TestSuite) values.
//!
//! - [`SuiteParser`]: one document → one suite, structural then referential checks
//! - [`PackageLoader`]: walks a directory of test packages with reusable fragments
//! - [`document`]: the serialized shapes

pub mod document;
pub mod package;
mod position;
pub mod schema;
pub mod suite;

pub use package::{PackageLoader, TestPackage};
pub use suite::{FragmentUsage, Fragments, Located, MAX_DOCUMENT_SIZE, ParseDefaults, SuiteParser};
