//! RK3588 大小核簇电源切换协调
//!
//! 迁移框架把一个逻辑CPU从一个簇搬到另一个簇时, 本库负责
//! 入站核心上电, 外出核心下电, 以及簇共享资源 (电源域, 一致性
//! snoop, 专用PLL) 的按需开关.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod kernel;
pub mod platform;
pub mod system;

#[cfg(test)]
mod testing;

pub use config::{ClusterBringUp, PlatformConfig, PowerOffPath, SiliconRevision, TeardownMode};
pub use error::{HwTimeout, PowerFault};
pub use kernel::switch::{
    BootSnapshot, ClusterDown, Coordinator, CoordinatorStats, HotplugAction, PowerDownOutcome,
    TickOutcome, UseCount,
};
pub use platform::{Cluster, ClusterPowerState, Platform};
