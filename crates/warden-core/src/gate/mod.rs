//! Untrusted Data Gate
//!
//! Plain data values and the strict parser that produces them.

pub mod parser;
pub mod value;

pub use parser::DataGate;
pub use value::{format_number, PlainValue, UntrustedValue};
