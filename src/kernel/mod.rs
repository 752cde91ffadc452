pub mod spinlock;
pub mod switch;

pub use switch::{BootSnapshot, Coordinator, HotplugAction, PowerDownOutcome};
