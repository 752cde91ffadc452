//! CPU热插拔适配
//!
//! 让热插拔引起的在线/离线与切换路径的记账保持一致:
//! 物理移除的核心不能在之后的切换中被重复计数.

use log::{debug, info};

use crate::error::PowerFault;

use super::handlers::Coordinator;
use super::state::{HotplugDelta, HotplugOutcome};

/// 热插拔通知动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Online,
    Offline,
}

pub struct HotplugAdapter<'c, 'a> {
    coordinator: &'c Coordinator<'a>,
}

impl<'c, 'a> HotplugAdapter<'c, 'a> {
    pub fn new(coordinator: &'c Coordinator<'a>) -> Self {
        HotplugAdapter { coordinator }
    }

    /// OS热插拔层的通知回调
    pub fn notify(&self, cpu: usize, action: HotplugAction) -> Result<(), PowerFault> {
        let coord = self.coordinator;
        coord.check_slot(cpu)?;

        // 离线时核心已经不在, 只能问框架它最后运行在哪个簇
        let cluster = coord.platform.framework.running_cluster_of(cpu);
        let delta = match action {
            HotplugAction::Online => HotplugDelta::Online,
            HotplugAction::Offline => HotplugDelta::Offline,
        };

        match coord.store.adjust_hotplug(cpu, cluster, delta)? {
            HotplugOutcome::Counted { live } => {
                debug!("cpu {} {:?} on {}, {} live", cpu, action, cluster, live);
                if action == HotplugAction::Offline && live == 0 {
                    info!("{} cluster idle after cpu {} offline, teardown scheduled", cluster, cpu);
                    coord.platform.timer.arm(coord.config().tick_period_us);
                }
            }
            HotplugOutcome::AlreadyAccounted => {
                debug!("cpu {} {:?} already accounted on {}", cpu, action, cluster);
            }
        }
        Ok(())
    }
}
