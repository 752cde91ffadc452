//! 簇电源时序
//!
//! 上电: 时钟切到专用PLL -> 簇电源写入 -> 使能一致性 snoop -> 等待应答.
//! 下电: 关闭 snoop -> 切断簇电源 -> 时钟切回参考源.
//! 先关 snoop 再断电, 否则互连上可能出现一致性挂死.
//!
//! 谁来执行序列由 `ClusterStateStore` 中的簇阶段决定; 两个方向都
//! 经由迁移框架的 enter/leave 临界区发布新的簇状态.

use log::{debug, error, info, warn};

use crate::config::{PlatformConfig, RegisterMap, TeardownMode};
use crate::error::PowerFault;
use crate::hal::cpu::poll_until;
use crate::platform::{Cluster, ClusterPowerState, Platform};

use super::state::{ClusterStateStore, TeardownCheck};

/// `request_cluster_down` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDown {
    /// 簇已拆除
    Done,
    /// 交给周期定时器完成
    Deferred,
    /// 并发上电仍需要该簇, 未拆除
    Denied,
}

/// 一次 `tick` 的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// 本次下电的簇数
    pub powered_off: usize,
    /// 是否重新安排了下一次 tick
    pub rescheduled: bool,
}

enum TickStep {
    Nothing,
    Busy,
    PoweredOff,
    /// 共享资源已关闭, 断电应答未到
    Unacked,
}

pub struct ClusterSequencer<'a> {
    platform: Platform<'a>,
    map: RegisterMap,
    teardown: TeardownMode,
    dedicated_pll: bool,
    ack_timeout_us: u64,
    off_timeout_us: u64,
    tick_period_us: u64,
}

impl<'a> ClusterSequencer<'a> {
    pub fn new(platform: Platform<'a>, config: &PlatformConfig) -> Self {
        ClusterSequencer {
            platform,
            map: RegisterMap::for_revision(config.revision),
            teardown: config.teardown,
            dedicated_pll: config.dedicated_pll,
            ack_timeout_us: config.cluster_ack_timeout_us,
            off_timeout_us: config.cluster_off_timeout_us,
            tick_period_us: config.tick_period_us,
        }
    }

    /// 簇上电完整序列, 由占有 `BringUp::Lead` 的一方调用
    ///
    /// `core` 是代表本次上电进入簇临界区的核心.
    pub fn ensure_cluster_up(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        let Platform { regs, cpu, framework, interconnect, clock, .. } = self.platform;
        let group = self.map.phys(cluster);

        // 上电方向不需要拆除权, 返回值只用于记录
        if !framework.enter_cluster_critical(core, cluster) {
            debug!("{} cluster bring-up while teardown decision is held elsewhere", cluster);
        }

        if self.dedicated_pll {
            clock.select_pll(cluster);
        }
        regs.set_cluster_power(group, true);
        interconnect.enable_snoop(cluster);

        if let Err(timeout) = poll_until(cpu, self.ack_timeout_us, || regs.cluster_powered(group)) {
            error!("{} cluster power-up not acknowledged: {}", cluster, timeout);
            framework.leave_cluster_critical(cluster, ClusterPowerState::Down);
            return Err(PowerFault::ClusterAckTimeout { cluster });
        }

        framework.leave_cluster_critical(cluster, ClusterPowerState::Up);
        info!("{} cluster powered up", cluster);
        Ok(())
    }

    /// 最后一个核心下电时请求拆除簇
    pub fn request_cluster_down(
        &self,
        store: &ClusterStateStore<'_>,
        core: usize,
        cluster: Cluster,
    ) -> ClusterDown {
        let framework = self.platform.framework;

        if !framework.enter_cluster_critical(core, cluster) {
            info!("{} cluster teardown denied, inbound power-up in progress", cluster);
            return ClusterDown::Denied;
        }

        match self.teardown {
            TeardownMode::Deferred => {
                framework.leave_cluster_critical(cluster, ClusterPowerState::Up);
                self.platform.timer.arm(self.tick_period_us);
                debug!("{} cluster teardown deferred", cluster);
                ClusterDown::Deferred
            }
            TeardownMode::Immediate => {
                if !store.claim_teardown(cluster) {
                    framework.leave_cluster_critical(cluster, ClusterPowerState::Up);
                    info!("{} cluster reclaimed before teardown", cluster);
                    return ClusterDown::Denied;
                }

                // 最后一个核心仍在运行, 断电请求由硬件在其下电后生效, 不等待应答
                self.power_off_shared(cluster);
                framework.leave_cluster_critical(cluster, ClusterPowerState::Down);
                if store.finish_teardown(cluster, true) {
                    // 拆除期间排队的核心由定时器重新上电
                    self.platform.timer.arm(self.tick_period_us);
                }
                info!("{} cluster torn down", cluster);
                ClusterDown::Done
            }
        }
    }

    /// 周期检查: 活动数为0但仍上电的簇在此被拆除
    ///
    /// 存储锁只用于检查和占有拆除权, 寄存器操作和等待都在锁外.
    pub fn tick(&self, store: &ClusterStateStore<'_>) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        for cluster in Cluster::ALL {
            let step = match store.teardown_check(cluster) {
                TeardownCheck::Nothing => TickStep::Nothing,
                TeardownCheck::Idle { last_man } => {
                    if self.platform.framework.cluster_power_state(cluster) == ClusterPowerState::Up {
                        self.deferred_teardown(store, last_man, cluster)
                    } else {
                        debug!("{} cluster idle but already down in framework", cluster);
                        TickStep::Nothing
                    }
                }
                TeardownCheck::Unacked => self.repoll_off(store, cluster),
            };

            match step {
                TickStep::Nothing => {}
                TickStep::Busy => outcome.rescheduled = true,
                TickStep::PoweredOff => outcome.powered_off += 1,
                TickStep::Unacked => {
                    outcome.powered_off += 1;
                    outcome.rescheduled = true;
                }
            }
        }

        if outcome.rescheduled {
            self.platform.timer.arm(self.tick_period_us);
        }
        outcome
    }

    fn deferred_teardown(
        &self,
        store: &ClusterStateStore<'_>,
        last_man: usize,
        cluster: Cluster,
    ) -> TickStep {
        let Platform { regs, cpu, framework, .. } = self.platform;
        let group = self.map.phys(cluster);

        // 刚写入核心下电, 应答还没传到簇状态
        if regs.cluster_cores_active(group) {
            return TickStep::Busy;
        }

        if !framework.enter_cluster_critical(last_man, cluster) {
            info!("deferred teardown of {} cluster denied", cluster);
            return TickStep::Nothing;
        }
        if !store.claim_teardown(cluster) {
            framework.leave_cluster_critical(cluster, ClusterPowerState::Up);
            return TickStep::Nothing;
        }

        self.power_off_shared(cluster);
        let acked = poll_until(cpu, self.off_timeout_us, || !regs.cluster_powered(group));

        // 共享资源已经关闭, 无论应答与否都按断电发布
        framework.leave_cluster_critical(cluster, ClusterPowerState::Down);
        store.finish_teardown(cluster, acked.is_ok());

        match acked {
            Ok(()) => {
                info!("{} cluster powered off by deferred teardown", cluster);
                TickStep::PoweredOff
            }
            Err(timeout) => {
                warn!("{} cluster power-off not acknowledged ({}), polling again", cluster, timeout);
                TickStep::Unacked
            }
        }
    }

    /// 上一次拆除只差断电应答, 这里只重新等待, 不重复关闭序列
    fn repoll_off(&self, store: &ClusterStateStore<'_>, cluster: Cluster) -> TickStep {
        let Platform { regs, cpu, .. } = self.platform;
        let group = self.map.phys(cluster);

        match poll_until(cpu, self.off_timeout_us, || !regs.cluster_powered(group)) {
            Ok(()) => {
                if store.mark_acked(cluster) {
                    debug!("{} cluster power-off acknowledged late", cluster);
                }
                TickStep::Nothing
            }
            Err(_) => TickStep::Busy,
        }
    }

    fn power_off_shared(&self, cluster: Cluster) {
        let Platform { regs, interconnect, clock, .. } = self.platform;

        interconnect.disable_snoop(cluster);
        regs.set_cluster_power(self.map.phys(cluster), false);
        if self.dedicated_pll {
            clock.select_reference(cluster);
        }
    }
}
