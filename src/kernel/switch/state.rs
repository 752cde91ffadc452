//! 簇状态存储
//!
//! 每个 (核心, 簇) 的使用计数, 每簇活动核心数和全局在线核心数.
//! 所有读写都在同一把中断安全自旋锁内完成.

use crate::error::PowerFault;
use crate::hal::cpu::CpuOps;
use crate::kernel::spinlock::IrqSpinLock;
use crate::platform::{Cluster, MAX_CLUSTERS, MAX_CORES_PER_CLUSTER};

/// 三态饱和使用计数
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseCount {
    /// 该簇上的核心未被使用
    Down = 0,
    /// 核心正常运行
    Up = 1,
    /// 下电尚未完成时又收到了上电请求
    UpPendingDown = 2,
}

/// 簇共享资源 (电源域, snoop, PLL) 的阶段
///
/// 只在存储锁内改变. `BringingUp` 和 `TearingDown` 期间持有者在锁外
/// 操作寄存器, 其他执行流只能排队.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterPhase {
    Off,
    BringingUp,
    On,
    TearingDown,
    /// 共享资源已关闭, 簇断电应答尚未到达
    OffUnacked,
}

/// 首次使用时簇的就绪情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUp {
    /// 簇已上电, 直接上电核心
    Ready,
    /// 调用者负责簇上电
    Lead,
    /// 簇正在上电或拆除, 由当前持有者在簇就绪后上电该核心
    Queued,
}

/// `try_mark_up` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkUp {
    /// 0 -> 1: 核心需要完整上电
    FirstUse { bring_up: BringUp },
    /// 1 -> 2: 该核心仍在运行, 正在进行的下电会发现并放弃
    RaceRetry,
    /// 已是 2, 计数饱和, 忽略
    AlreadyUp,
}

/// 延迟拆除检查的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownCheck {
    Nothing,
    /// 簇空闲但仍上电, 携带最后一个下电的核心
    Idle { last_man: usize },
    /// 上一次拆除的断电应答仍未到达
    Unacked,
}

/// `mark_down` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDown {
    /// 1 -> 0, 携带簇剩余活动核心数 (0 表示最后一个)
    TornDown(usize),
    /// 2 -> 1, 并发上电已经占用该槽位
    RaceSkip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugDelta {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugOutcome {
    /// 使用计数已更新, 携带簇活动核心数
    Counted { live: usize },
    /// 切换路径已经记账过该核心, 只更新在线数
    AlreadyAccounted,
}

/// 启动时的在线核心快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSnapshot {
    /// 启动时运行的簇
    pub boot_cluster: Cluster,
    /// bit n 表示核心槽位 n 在线
    pub online_mask: u32,
}

/// 计数器的只读副本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub use_count: [[UseCount; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
    pub live: [usize; MAX_CLUSTERS],
    pub online: usize,
    pub phase: [ClusterPhase; MAX_CLUSTERS],
}

impl StoreSnapshot {
    /// 活动核心数等于非 Down 的槽位数
    pub fn is_consistent(&self) -> bool {
        Cluster::ALL.iter().all(|cluster| {
            let idx = cluster.index();
            let counted = self.use_count[idx]
                .iter()
                .filter(|count| **count != UseCount::Down)
                .count();
            counted == self.live[idx]
        })
    }
}

struct StoreInner {
    use_count: [[UseCount; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
    live: [usize; MAX_CLUSTERS],
    online: usize,
    phase: [ClusterPhase; MAX_CLUSTERS],
    /// bit n: 槽位 n 等待簇就绪后上电
    queued: [u32; MAX_CLUSTERS],
    last_man: [usize; MAX_CLUSTERS],
    /// 等待入站核心完成簇上电的槽位
    pending_bringup: [Option<usize>; MAX_CLUSTERS],
}

impl StoreInner {
    fn release_slot(&mut self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        let idx = cluster.index();
        self.use_count[idx][core] = UseCount::Down;
        self.live[idx] = ClusterStateStore::dec_live(self.live[idx], core, cluster)?;
        if self.live[idx] == 0 {
            self.last_man[idx] = core;
        }
        Ok(())
    }
}

pub struct ClusterStateStore<'a> {
    cpu: &'a dyn CpuOps,
    cores_per_cluster: usize,
    inner: IrqSpinLock<StoreInner>,
}

impl<'a> ClusterStateStore<'a> {
    /// 按启动快照重建计数器
    pub fn new(
        cpu: &'a dyn CpuOps,
        cores_per_cluster: usize,
        boot: &BootSnapshot,
    ) -> Result<Self, PowerFault> {
        if boot.online_mask >> cores_per_cluster != 0 {
            return Err(PowerFault::InvalidConfig("boot online mask exceeds core slots"));
        }

        let mut inner = StoreInner {
            use_count: [[UseCount::Down; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
            live: [0; MAX_CLUSTERS],
            online: 0,
            phase: [ClusterPhase::Off; MAX_CLUSTERS],
            queued: [0; MAX_CLUSTERS],
            last_man: [0; MAX_CLUSTERS],
            pending_bringup: [None; MAX_CLUSTERS],
        };

        let idx = boot.boot_cluster.index();
        if boot.online_mask != 0 {
            inner.phase[idx] = ClusterPhase::On;
        }
        for core in 0..cores_per_cluster {
            if boot.online_mask & (1 << core) != 0 {
                inner.use_count[idx][core] = UseCount::Up;
                inner.live[idx] += 1;
                inner.online += 1;
            }
        }

        Ok(ClusterStateStore {
            cpu,
            cores_per_cluster,
            inner: IrqSpinLock::new(inner),
        })
    }

    pub fn try_mark_up(&self, core: usize, cluster: Cluster) -> MarkUp {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        match inner.use_count[idx][core] {
            UseCount::Down => {
                inner.use_count[idx][core] = UseCount::Up;
                inner.live[idx] += 1;
                let bring_up = match inner.phase[idx] {
                    ClusterPhase::On => BringUp::Ready,
                    ClusterPhase::Off | ClusterPhase::OffUnacked => {
                        inner.phase[idx] = ClusterPhase::BringingUp;
                        BringUp::Lead
                    }
                    ClusterPhase::BringingUp | ClusterPhase::TearingDown => {
                        inner.queued[idx] |= 1 << core;
                        BringUp::Queued
                    }
                };
                MarkUp::FirstUse { bring_up }
            }
            UseCount::Up => {
                inner.use_count[idx][core] = UseCount::UpPendingDown;
                MarkUp::RaceRetry
            }
            UseCount::UpPendingDown => MarkUp::AlreadyUp,
        }
    }

    pub fn mark_down(&self, core: usize, cluster: Cluster) -> Result<MarkDown, PowerFault> {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        match inner.use_count[idx][core] {
            UseCount::Up => {
                inner.release_slot(core, cluster)?;
                Ok(MarkDown::TornDown(inner.live[idx]))
            }
            UseCount::UpPendingDown => {
                inner.use_count[idx][core] = UseCount::Up;
                Ok(MarkDown::RaceSkip)
            }
            UseCount::Down => Err(PowerFault::InvariantViolation {
                core,
                cluster,
                what: "power down of a slot that is not up",
            }),
        }
    }

    /// 撤销一次失败的 `FirstUse`, 恢复到 "尚未上电"
    pub fn rollback_up(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        let mut inner = self.inner.lock(self.cpu);
        Self::rollback_slot(&mut inner, core, cluster)
    }

    /// 簇上电完成: 进入 `On`, 取走排队等待上电的槽位
    pub fn finish_bring_up(&self, cluster: Cluster) -> u32 {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        inner.phase[idx] = ClusterPhase::On;
        core::mem::take(&mut inner.queued[idx])
    }

    /// 簇上电失败: 回滚 `leader` 和所有排队槽位, 簇回到 `Off`
    pub fn abort_bring_up(&self, cluster: Cluster, leader: Option<usize>) -> Result<(), PowerFault> {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        inner.phase[idx] = ClusterPhase::Off;
        inner.pending_bringup[idx] = None;

        let mut slots = core::mem::take(&mut inner.queued[idx]);
        if let Some(core) = leader {
            slots |= 1 << core;
        }
        for core in 0..self.cores_per_cluster {
            if slots & (1 << core) != 0 {
                Self::rollback_slot(&mut inner, core, cluster)?;
            }
        }
        Ok(())
    }

    /// 拆除结束后仍有排队核心时, 由调用者接手簇上电; 返回用于握手的槽位
    pub fn claim_handoff(&self, cluster: Cluster) -> Option<usize> {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        match inner.phase[idx] {
            ClusterPhase::Off | ClusterPhase::OffUnacked if inner.queued[idx] != 0 => {
                inner.phase[idx] = ClusterPhase::BringingUp;
                Some(inner.queued[idx].trailing_zeros() as usize)
            }
            _ => None,
        }
    }

    pub fn teardown_check(&self, cluster: Cluster) -> TeardownCheck {
        let inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        match inner.phase[idx] {
            ClusterPhase::On if inner.live[idx] == 0 => TeardownCheck::Idle {
                last_man: inner.last_man[idx],
            },
            ClusterPhase::OffUnacked => TeardownCheck::Unacked,
            _ => TeardownCheck::Nothing,
        }
    }

    /// 簇仍空闲时占有拆除权 (`On` -> `TearingDown`)
    ///
    /// 之后的寄存器操作在锁外进行, 期间到达的上电请求排队.
    pub fn claim_teardown(&self, cluster: Cluster) -> bool {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        if inner.phase[idx] == ClusterPhase::On && inner.live[idx] == 0 {
            inner.phase[idx] = ClusterPhase::TearingDown;
            true
        } else {
            false
        }
    }

    /// 拆除序列结束; 返回是否有核心在此期间排队
    pub fn finish_teardown(&self, cluster: Cluster, acked: bool) -> bool {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        inner.phase[idx] = if acked { ClusterPhase::Off } else { ClusterPhase::OffUnacked };
        inner.queued[idx] != 0
    }

    /// 迟到的断电应答; 簇已被重新上电时不做任何事
    pub fn mark_acked(&self, cluster: Cluster) -> bool {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        if inner.phase[idx] == ClusterPhase::OffUnacked {
            inner.phase[idx] = ClusterPhase::Off;
            true
        } else {
            false
        }
    }

    pub fn phase(&self, cluster: Cluster) -> ClusterPhase {
        self.inner.lock(self.cpu).phase[cluster.index()]
    }

    fn rollback_slot(inner: &mut StoreInner, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        let idx = cluster.index();
        if inner.use_count[idx][core] != UseCount::Up {
            return Err(PowerFault::InvariantViolation {
                core,
                cluster,
                what: "rollback of a slot that is not freshly up",
            });
        }
        inner.use_count[idx][core] = UseCount::Down;
        inner.live[idx] = Self::dec_live(inner.live[idx], core, cluster)?;
        inner.queued[idx] &= !(1 << core);
        if inner.pending_bringup[idx] == Some(core) {
            inner.pending_bringup[idx] = None;
        }
        Ok(())
    }

    /// 热插拔记账, 不涉及寄存器操作
    pub fn adjust_hotplug(
        &self,
        core: usize,
        cluster: Cluster,
        delta: HotplugDelta,
    ) -> Result<HotplugOutcome, PowerFault> {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();

        match delta {
            HotplugDelta::Online => {
                if inner.online >= self.cores_per_cluster {
                    return Err(PowerFault::OnlineCountOverflow);
                }
                inner.online += 1;

                if inner.use_count[idx][core] != UseCount::Down {
                    return Ok(HotplugOutcome::AlreadyAccounted);
                }
                inner.use_count[idx][core] = UseCount::Up;
                inner.live[idx] += 1;
                Ok(HotplugOutcome::Counted { live: inner.live[idx] })
            }
            HotplugDelta::Offline => {
                if inner.online == 0 {
                    return Err(PowerFault::OnlineCountUnderflow);
                }
                inner.online -= 1;

                match inner.use_count[idx][core] {
                    UseCount::Down => Ok(HotplugOutcome::AlreadyAccounted),
                    UseCount::UpPendingDown => {
                        inner.use_count[idx][core] = UseCount::Up;
                        Ok(HotplugOutcome::Counted { live: inner.live[idx] })
                    }
                    UseCount::Up => {
                        inner.release_slot(core, cluster)?;
                        Ok(HotplugOutcome::Counted { live: inner.live[idx] })
                    }
                }
            }
        }
    }

    pub fn set_pending_bringup(&self, cluster: Cluster, core: usize) {
        self.inner.lock(self.cpu).pending_bringup[cluster.index()] = Some(core);
    }

    /// 若 `core` 是等待完成簇上电的首个核心, 取走该标记
    pub fn take_pending_bringup(&self, core: usize, cluster: Cluster) -> bool {
        let mut inner = self.inner.lock(self.cpu);
        let idx = cluster.index();
        if inner.pending_bringup[idx] == Some(core) {
            inner.pending_bringup[idx] = None;
            true
        } else {
            false
        }
    }

    pub fn use_count(&self, core: usize, cluster: Cluster) -> UseCount {
        self.inner.lock(self.cpu).use_count[cluster.index()][core]
    }

    pub fn live_count(&self, cluster: Cluster) -> usize {
        self.inner.lock(self.cpu).live[cluster.index()]
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock(self.cpu).online
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock(self.cpu);
        StoreSnapshot {
            use_count: inner.use_count,
            live: inner.live,
            online: inner.online,
            phase: inner.phase,
        }
    }

    fn dec_live(live: usize, core: usize, cluster: Cluster) -> Result<usize, PowerFault> {
        live.checked_sub(1).ok_or(PowerFault::InvariantViolation {
            core,
            cluster,
            what: "live core count below zero",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;

    fn store(mock: &MockPlatform, mask: u32) -> ClusterStateStore<'_> {
        let boot = BootSnapshot { boot_cluster: Cluster::Big, online_mask: mask };
        ClusterStateStore::new(mock, 4, &boot).unwrap()
    }

    #[test]
    fn test_boot_seeding() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b0101);
        assert_eq!(store.use_count(0, Cluster::Big), UseCount::Up);
        assert_eq!(store.use_count(1, Cluster::Big), UseCount::Down);
        assert_eq!(store.use_count(2, Cluster::Big), UseCount::Up);
        assert_eq!(store.live_count(Cluster::Big), 2);
        assert_eq!(store.live_count(Cluster::Little), 0);
        assert_eq!(store.online_count(), 2);
        assert!(store.snapshot().is_consistent());
    }

    #[test]
    fn test_boot_mask_out_of_range() {
        let mock = MockPlatform::new();
        let boot = BootSnapshot { boot_cluster: Cluster::Big, online_mask: 0b1_0000 };
        assert!(ClusterStateStore::new(&mock, 4, &boot).is_err());
    }

    #[test]
    fn test_first_use_leads_then_queues() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0);

        let lead = MarkUp::FirstUse { bring_up: BringUp::Lead };
        let queued = MarkUp::FirstUse { bring_up: BringUp::Queued };
        assert_eq!(store.try_mark_up(0, Cluster::Little), lead);
        // 簇上电尚未完成, 第二个核心只能排队
        assert_eq!(store.try_mark_up(1, Cluster::Little), queued);
        assert_eq!(store.live_count(Cluster::Little), 2);

        assert_eq!(store.finish_bring_up(Cluster::Little), 0b10);
        assert_eq!(store.phase(Cluster::Little), ClusterPhase::On);
        assert_eq!(
            store.try_mark_up(2, Cluster::Little),
            MarkUp::FirstUse { bring_up: BringUp::Ready }
        );
    }

    #[test]
    fn test_boot_cluster_phase() {
        let mock = MockPlatform::new();
        assert_eq!(store(&mock, 0b1).phase(Cluster::Big), ClusterPhase::On);
        assert_eq!(store(&mock, 0b1).phase(Cluster::Little), ClusterPhase::Off);
        // 没有在线核心时启动簇也按断电处理
        assert_eq!(store(&mock, 0).phase(Cluster::Big), ClusterPhase::Off);
    }

    #[test]
    fn test_abort_bring_up_rolls_back_queue() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0);

        store.try_mark_up(0, Cluster::Little);
        store.try_mark_up(3, Cluster::Little);
        store.abort_bring_up(Cluster::Little, Some(0)).unwrap();

        assert_eq!(store.use_count(0, Cluster::Little), UseCount::Down);
        assert_eq!(store.use_count(3, Cluster::Little), UseCount::Down);
        assert_eq!(store.live_count(Cluster::Little), 0);
        assert_eq!(store.phase(Cluster::Little), ClusterPhase::Off);
        assert!(store.snapshot().is_consistent());
    }

    #[test]
    fn test_race_counts_saturate() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b1);

        assert_eq!(store.try_mark_up(0, Cluster::Big), MarkUp::RaceRetry);
        assert_eq!(store.use_count(0, Cluster::Big), UseCount::UpPendingDown);
        assert_eq!(store.try_mark_up(0, Cluster::Big), MarkUp::AlreadyUp);
        assert_eq!(store.use_count(0, Cluster::Big), UseCount::UpPendingDown);

        // 下电发现竞争, 槽位保持 Up, 活动数不变
        assert_eq!(store.mark_down(0, Cluster::Big), Ok(MarkDown::RaceSkip));
        assert_eq!(store.use_count(0, Cluster::Big), UseCount::Up);
        assert_eq!(store.live_count(Cluster::Big), 1);
        assert!(store.snapshot().is_consistent());
    }

    #[test]
    fn test_mark_down_reports_last_man() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b11);

        assert_eq!(store.mark_down(0, Cluster::Big), Ok(MarkDown::TornDown(1)));
        assert_eq!(store.mark_down(1, Cluster::Big), Ok(MarkDown::TornDown(0)));
        assert!(matches!(
            store.mark_down(1, Cluster::Big),
            Err(PowerFault::InvariantViolation { core: 1, .. })
        ));
    }

    #[test]
    fn test_rollback_restores_not_yet_up() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0);

        store.try_mark_up(2, Cluster::Little);
        store.set_pending_bringup(Cluster::Little, 2);
        store.rollback_up(2, Cluster::Little).unwrap();

        assert_eq!(store.use_count(2, Cluster::Little), UseCount::Down);
        assert_eq!(store.live_count(Cluster::Little), 0);
        assert!(!store.take_pending_bringup(2, Cluster::Little));
        assert!(store.rollback_up(2, Cluster::Little).is_err());
    }

    #[test]
    fn test_hotplug_accounting() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b1);

        assert_eq!(
            store.adjust_hotplug(3, Cluster::Big, HotplugDelta::Online),
            Ok(HotplugOutcome::Counted { live: 2 })
        );
        // 已经通过切换路径记账的核心不会重复计数
        assert_eq!(
            store.adjust_hotplug(3, Cluster::Big, HotplugDelta::Online),
            Ok(HotplugOutcome::AlreadyAccounted)
        );
        assert_eq!(store.live_count(Cluster::Big), 2);
        assert_eq!(store.online_count(), 3);

        assert_eq!(
            store.adjust_hotplug(3, Cluster::Big, HotplugDelta::Offline),
            Ok(HotplugOutcome::Counted { live: 1 })
        );
        assert_eq!(
            store.adjust_hotplug(0, Cluster::Big, HotplugDelta::Offline),
            Ok(HotplugOutcome::Counted { live: 0 })
        );
        assert_eq!(store.online_count(), 1);
        assert!(store.snapshot().is_consistent());
    }

    #[test]
    fn test_online_count_bounds() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b1111);
        assert_eq!(
            store.adjust_hotplug(0, Cluster::Little, HotplugDelta::Online),
            Err(PowerFault::OnlineCountOverflow)
        );

        let store = self::store(&mock, 0);
        assert_eq!(
            store.adjust_hotplug(0, Cluster::Big, HotplugDelta::Offline),
            Err(PowerFault::OnlineCountUnderflow)
        );
    }

    #[test]
    fn test_teardown_claim_and_unacked() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b10);
        assert_eq!(store.teardown_check(Cluster::Big), TeardownCheck::Nothing);
        assert!(!store.claim_teardown(Cluster::Big));

        store.mark_down(1, Cluster::Big).unwrap();
        assert_eq!(store.teardown_check(Cluster::Big), TeardownCheck::Idle { last_man: 1 });
        assert!(store.claim_teardown(Cluster::Big));
        assert!(!store.claim_teardown(Cluster::Big));

        // 拆除期间到达的核心排队
        assert_eq!(
            store.try_mark_up(2, Cluster::Big),
            MarkUp::FirstUse { bring_up: BringUp::Queued }
        );
        assert!(store.finish_teardown(Cluster::Big, false));
        assert_eq!(store.teardown_check(Cluster::Big), TeardownCheck::Unacked);

        assert_eq!(store.claim_handoff(Cluster::Big), Some(2));
        assert_eq!(store.phase(Cluster::Big), ClusterPhase::BringingUp);
        // 已被重新上电, 迟到的应答不改变阶段
        assert!(!store.mark_acked(Cluster::Big));
        assert_eq!(store.claim_handoff(Cluster::Big), None);
    }

    #[test]
    fn test_unacked_cluster_needs_full_bring_up() {
        let mock = MockPlatform::new();
        let store = store(&mock, 0b1);
        store.mark_down(0, Cluster::Big).unwrap();
        assert!(store.claim_teardown(Cluster::Big));
        assert!(!store.finish_teardown(Cluster::Big, false));

        assert_eq!(
            store.try_mark_up(0, Cluster::Big),
            MarkUp::FirstUse { bring_up: BringUp::Lead }
        );
    }
}
