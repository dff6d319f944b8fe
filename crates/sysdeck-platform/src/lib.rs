mod capabilities;
mod paths;
mod process;

pub use capabilities::{Host, LocalHost, ProbeError, SystemCapabilities};
pub use paths::{AppPaths, AppPathsError};
pub use process::{GroupSignal, OwnProcessGroup, group_exists, running_as_root, signal_group};
