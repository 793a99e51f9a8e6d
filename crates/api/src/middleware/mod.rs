//! Request middleware and extractors.

pub mod operator;

pub use operator::{OPERATOR_HEADER, Operator};
