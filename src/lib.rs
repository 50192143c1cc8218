pub mod compiler;
pub mod dsl;
pub mod error;
pub mod orders;
pub mod runtime;

pub use error::{FlowError, FlowResult};
