pub mod context;
pub mod exit;
pub mod fork;
pub mod info;
pub mod manager;
pub mod sleep;
pub mod uaccess;

pub use context::{Abandoned, Context};
pub use exit::ExitRecord;
pub use fork::ForkMode;
pub use info::ProcInfo;
pub use manager::*;
pub use sleep::ProcessExited;
pub use uaccess::{UserDst, UserSrc};
