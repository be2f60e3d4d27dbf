//! Embedded script interpreter
//!
//! Lexer, parser, heap and evaluator for the small scripting language run
//! by the engine. Fulfils `evaluate(source, context) -> value | SourceError`.

pub mod ast;
pub mod heap;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{Program, SourceText};
pub use heap::{Heap, HeapObject, Scope, ScopeRef};
pub use interpreter::Interpreter;
pub use parser::parse;
pub use value::{ObjectRef, Value};
