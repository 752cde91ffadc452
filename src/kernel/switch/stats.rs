//! 切换统计

use core::sync::atomic::{AtomicU64, Ordering};

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub power_ups: u64,
    pub power_downs: u64,
    /// 上电抢在下电完成之前到达的次数
    pub races_resolved: u64,
    pub cluster_ups: u64,
    pub cluster_downs: u64,
    /// 延迟拆除定时器的执行次数
    pub ticks: u64,
    /// 核心下电未得到确认, 核心保持上电
    pub core_off_timeouts: u64,
}

#[derive(Default)]
pub(crate) struct SwitchStats {
    pub power_ups: AtomicU64,
    pub power_downs: AtomicU64,
    pub races_resolved: AtomicU64,
    pub cluster_ups: AtomicU64,
    pub cluster_downs: AtomicU64,
    pub ticks: AtomicU64,
    pub core_off_timeouts: AtomicU64,
}

impl SwitchStats {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            power_ups: self.power_ups.load(Ordering::Relaxed),
            power_downs: self.power_downs.load(Ordering::Relaxed),
            races_resolved: self.races_resolved.load(Ordering::Relaxed),
            cluster_ups: self.cluster_ups.load(Ordering::Relaxed),
            cluster_downs: self.cluster_downs.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            core_off_timeouts: self.core_off_timeouts.load(Ordering::Relaxed),
        }
    }
}
