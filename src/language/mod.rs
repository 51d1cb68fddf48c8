pub mod ast;
pub mod build;
pub mod index;
pub mod types;
