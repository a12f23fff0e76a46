pub mod callbacks;
pub mod event;
pub mod system_log;

pub use callbacks::{Hook, HookRegistrar, StepCallbacks};
pub use event::{DispatchEvent, ErrorEvent, StepEvent};
pub use system_log::{Outcome, SystemLog};
