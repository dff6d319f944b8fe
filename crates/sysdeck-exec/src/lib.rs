mod files;
mod gateway;
mod request;
mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use gateway::{DomainGuard, ExecutionGateway};
pub use request::{ExecutionRequest, ExecutionResult, TimeoutPolicy};
pub use runner::{Invocation, ProcessRunner, SystemRunner};

pub use tokio_util::sync::CancellationToken;
