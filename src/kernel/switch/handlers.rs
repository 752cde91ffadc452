//! 切换事件处理
//!
//! 迁移框架调用的三个入口: `power_up`, `power_down`, `inbound_setup`,
//! 以及延迟拆除定时器的 `tick` 和系统睡眠恢复时的 `resume`.

use core::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error, info, warn};

use crate::config::{ClusterBringUp, PlatformConfig};
use crate::error::PowerFault;
use crate::hal::cpu::IrqGuard;
use crate::platform::{Cluster, Platform};

use super::cluster_power::{ClusterDown, ClusterSequencer, TickOutcome};
use super::cpu_power::CorePowerDriver;
use super::state::{
    BootSnapshot, BringUp, ClusterStateStore, MarkDown, MarkUp, StoreSnapshot, UseCount,
};
use super::stats::{CoordinatorStats, SwitchStats};

/// `power_down` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDownOutcome {
    /// 本核已下电, 簇内仍有 `live` 个活动核心
    CoreOff { live: usize },
    /// 最后一个核心, 附带簇拆除请求的结果
    LastMan(ClusterDown),
    /// 并发上电已重新占用该槽位, 只做了本地静默
    RaceSkipped,
}

/// 簇电源切换协调器
pub struct Coordinator<'a> {
    pub(super) platform: Platform<'a>,
    config: PlatformConfig,
    pub(super) store: ClusterStateStore<'a>,
    pub(super) sequencer: ClusterSequencer<'a>,
    cores: CorePowerDriver<'a>,
    entry_vector: AtomicUsize,
    pub(super) stats: SwitchStats,
}

impl<'a> Coordinator<'a> {
    /// 按启动快照建立协调器, 并安装核心上电入口向量
    pub fn new(
        platform: Platform<'a>,
        config: PlatformConfig,
        boot: BootSnapshot,
    ) -> Result<Self, PowerFault> {
        config.validate()?;
        let store = ClusterStateStore::new(platform.cpu, config.cores_per_cluster, &boot)?;

        let entry = platform.framework.power_up_setup();
        platform.regs.set_entry_vector(entry);

        info!(
            "cluster switcher ready: boot on {}, online mask {:#x}, {:?} teardown",
            boot.boot_cluster, boot.online_mask, config.teardown
        );

        Ok(Coordinator {
            platform,
            sequencer: ClusterSequencer::new(platform, &config),
            cores: CorePowerDriver::new(platform, &config),
            config,
            store,
            entry_vector: AtomicUsize::new(entry),
            stats: SwitchStats::default(),
        })
    }

    /// 在 `cluster` 上为逻辑CPU `core` 上电
    pub fn power_up(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        self.check_slot(core)?;

        match self.store.try_mark_up(core, cluster) {
            MarkUp::FirstUse { bring_up } => {
                debug!("power up core {} on {} ({:?})", core, cluster, bring_up);
                SwitchStats::bump(&self.stats.power_ups);

                match bring_up {
                    BringUp::Ready => self.power_on(core, cluster),
                    BringUp::Lead => match self.config.bringup {
                        ClusterBringUp::OnPowerUp => {
                            self.lead_bring_up(cluster, core, Some(core))?;
                            self.power_on(core, cluster)
                        }
                        ClusterBringUp::OnInbound => {
                            self.store.set_pending_bringup(cluster, core);
                            if let Err(fault) = self.cores.power_on_core(core, cluster) {
                                self.store.abort_bring_up(cluster, Some(core))?;
                                return Err(fault);
                            }
                            Ok(())
                        }
                    },
                    BringUp::Queued => {
                        info!("core {} waits for {} cluster to settle", core, cluster);
                        Ok(())
                    }
                }
            }
            MarkUp::RaceRetry => {
                info!("core {} on {} reclaimed while going down", core, cluster);
                SwitchStats::bump(&self.stats.races_resolved);
                Ok(())
            }
            MarkUp::AlreadyUp => {
                warn!("duplicate power up for core {} on {} ignored", core, cluster);
                Ok(())
            }
        }
    }

    /// 外出核心自身的下电路径
    ///
    /// 经由安全监控器下电时, 真实硬件上不会返回.
    pub fn power_down(&self, core: usize, cluster: Cluster) -> Result<PowerDownOutcome, PowerFault> {
        self.check_slot(core)?;
        let _irq = IrqGuard::new(self.platform.cpu);

        self.platform.framework.notify_going_down(core, cluster);

        let outcome = match self.store.mark_down(core, cluster)? {
            MarkDown::TornDown(0) => {
                debug!("core {} is last man on {}", core, cluster);
                let decision = self.sequencer.request_cluster_down(&self.store, core, cluster);
                if decision == ClusterDown::Done {
                    SwitchStats::bump(&self.stats.cluster_downs);
                }
                self.finish_core_off(core, cluster);
                PowerDownOutcome::LastMan(decision)
            }
            MarkDown::TornDown(live) => {
                // 簇内还有活动核心, 只做本地静默, 电源留给簇拆除处理
                debug!("core {} leaving {}, {} still live", core, cluster, live);
                self.cores.quiesce(core, cluster);
                PowerDownOutcome::CoreOff { live }
            }
            MarkDown::RaceSkip => {
                info!("core {} on {} power down aborted by racing power up", core, cluster);
                self.cores.quiesce(core, cluster);
                PowerDownOutcome::RaceSkipped
            }
        };

        SwitchStats::bump(&self.stats.power_downs);
        Ok(outcome)
    }

    /// 新入站核心执行的第一段代码
    pub fn inbound_setup(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        self.check_slot(core)?;
        self.cores.clear_boot_flag(core, cluster);

        if self.store.take_pending_bringup(core, cluster) {
            debug!("core {} completes {} cluster bring-up", core, cluster);
            self.lead_bring_up(cluster, core, Some(core))?;
        }
        Ok(())
    }

    /// 延迟拆除定时器回调
    ///
    /// 拆除期间排队的核心在这里接手簇上电.
    pub fn tick(&self) -> Result<TickOutcome, PowerFault> {
        let outcome = self.sequencer.tick(&self.store);
        SwitchStats::bump(&self.stats.ticks);
        SwitchStats::add(&self.stats.cluster_downs, outcome.powered_off as u64);

        for cluster in Cluster::ALL {
            if let Some(core) = self.store.claim_handoff(cluster) {
                info!("{} cluster powered back up for cores queued during teardown", cluster);
                self.lead_bring_up(cluster, core, None)?;
            }
        }
        Ok(outcome)
    }

    /// 系统睡眠恢复后重新写入入口向量 (可重复调用)
    pub fn resume(&self) {
        let entry = self.entry_vector.load(Ordering::Acquire);
        self.platform.regs.set_entry_vector(entry);
        debug!("entry vector {:#x} re-armed", entry);
    }

    /// 致命故障: 记录日志后停机
    pub fn fatal(&self, fault: PowerFault) -> ! {
        error!("fatal power fault: {}", fault);
        #[cfg(feature = "diagnostics")]
        self.cores.dump_registers();
        self.platform.cpu.halt()
    }

    pub fn use_count(&self, core: usize, cluster: Cluster) -> UseCount {
        self.store.use_count(core, cluster)
    }

    pub fn live_count(&self, cluster: Cluster) -> usize {
        self.store.live_count(cluster)
    }

    pub fn online_count(&self) -> usize {
        self.store.online_count()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub(super) fn check_slot(&self, core: usize) -> Result<(), PowerFault> {
        if core >= self.config.cores_per_cluster {
            return Err(PowerFault::InvalidSlot { core });
        }
        Ok(())
    }

    fn power_on(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        if let Err(fault) = self.cores.power_on_core(core, cluster) {
            self.store.rollback_up(core, cluster)?;
            return Err(fault);
        }
        Ok(())
    }

    /// 执行簇上电, 然后上电期间排队的核心
    ///
    /// `core` 代表本次上电进入簇临界区; `leader` 是已经计数的发起者,
    /// 失败时和排队槽位一起回滚.
    fn lead_bring_up(
        &self,
        cluster: Cluster,
        core: usize,
        leader: Option<usize>,
    ) -> Result<(), PowerFault> {
        if let Err(fault) = self.sequencer.ensure_cluster_up(core, cluster) {
            self.store.abort_bring_up(cluster, leader)?;
            return Err(fault);
        }
        SwitchStats::bump(&self.stats.cluster_ups);

        let queued = self.store.finish_bring_up(cluster);
        for slot in (0..self.config.cores_per_cluster).filter(|slot| queued & (1 << *slot) != 0) {
            debug!("powering core {} queued on {}", slot, cluster);
            self.power_on(slot, cluster)?;
        }
        Ok(())
    }

    fn finish_core_off(&self, core: usize, cluster: Cluster) {
        // 下电确认超时不致命: 核心保持上电只是多耗电
        if let Err(timeout) = self.cores.power_off_core(core, cluster) {
            debug!("core {} on {} left powered after {}", core, cluster, timeout);
            SwitchStats::bump(&self.stats.core_off_timeouts);
        }
    }
}
