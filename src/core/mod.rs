//! 核心层：子进程监管、命令通道、停止信号、运行周期

pub mod channel;
pub mod error;
pub mod lifetime;
pub mod line_source;
pub mod shutdown;
pub mod supervisor;

pub use channel::{CommandChannel, MatchMode, PendingRequest};
pub use error::SupervisorError;
pub use lifetime::{lifetime, run_forever, LifetimeContext, RunEnd};
pub use line_source::LineSource;
pub use shutdown::{KillSwitch, ShutdownReason, ShutdownWatch};
pub use supervisor::{LaunchSpec, ProcessSupervisor, SupervisorSettings};
