pub mod progress_log;
pub mod task;

pub use progress_log::{ProgressLogActor, ProgressLogArguments, ProgressLogMsg};
pub use task::{TaskActor, TaskHandle, TaskMsg};
