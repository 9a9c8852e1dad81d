//! Wire protocol shared by the control plane and the agent runtime.
//!
//! Both sides depend on this crate instead of on each other so the frame and
//! action shapes stay a single source of truth: a change here is a change
//! both binaries see at compile time.

pub mod actions;
pub mod frame;
pub mod registration;

pub use actions::*;
pub use frame::*;
pub use registration::*;
