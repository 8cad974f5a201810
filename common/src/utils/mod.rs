//! Utility functions and helpers.

pub mod id_generator;
pub mod markup;
pub mod sql_classifier;

pub use id_generator::IdGenerator;
pub use markup::escape_markup;
pub use sql_classifier::{SqlClassifier, StatementKind};
