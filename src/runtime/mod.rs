pub mod async_runtime;
pub mod continuation;
pub mod environment;
pub mod error;
pub mod interpreter;
pub mod iterator;
pub mod outcome;
pub mod platform;
pub mod registry;
pub mod sync;
pub mod task;
pub mod value;

pub use interpreter::{Evaluator, Interpreter};
