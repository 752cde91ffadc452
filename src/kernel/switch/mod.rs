//! 大小核簇电源切换协调
//!
//! 迁移框架 -> 切换事件处理 -> 簇状态存储 -> 簇电源时序 -> 核心电源驱动 -> 寄存器

pub mod cluster_power;
pub mod cpu_power;
pub mod handlers;
pub mod hotplug;
pub mod state;
mod stats;

pub use cluster_power::{ClusterDown, ClusterSequencer, TickOutcome};
pub use cpu_power::CorePowerDriver;
pub use handlers::{Coordinator, PowerDownOutcome};
pub use hotplug::{HotplugAction, HotplugAdapter};
pub use state::{
    BootSnapshot, BringUp, ClusterPhase, ClusterStateStore, MarkDown, MarkUp, StoreSnapshot,
    TeardownCheck, UseCount,
};
pub use stats::CoordinatorStats;
