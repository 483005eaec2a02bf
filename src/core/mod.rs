//! 核心基础设施：错误分层与优雅关闭

pub mod error;
pub mod shutdown;

pub use error::{AgentError, PlanError, ResilienceError};
pub use shutdown::{run_with_graceful_shutdown, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
