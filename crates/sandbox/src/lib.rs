#![forbid(unsafe_code)]

pub mod error;
pub mod executor;
pub mod limits;
pub mod sample;
pub mod value;
pub mod verifier;

pub use error::SandboxError;
pub use executor::{Argument, Binding, Execution, Sandbox};
pub use limits::SandboxLimits;
pub use value::ScriptValue;
pub use verifier::{Mismatch, Submission, Verdict, Verifier};
