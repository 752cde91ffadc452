//! CPU本地操作
//!
//! 中断屏蔽, 单调时钟, 本地静默序列和停机.

use crate::error::HwTimeout;
use crate::platform::Cluster;

/// CPU本地操作接口
pub trait CpuOps: Sync {
    /// 屏蔽本地中断, 返回之前的中断状态
    fn irq_save(&self) -> usize;

    /// 恢复 `irq_save` 返回的中断状态
    fn irq_restore(&self, state: usize);

    /// 单调时钟 (微秒)
    fn now_us(&self) -> u64;

    /// 忙等循环中的让步提示
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// 核心下电前的本地静默 (关闭数据缓存并清理本核缓存)
    fn quiesce(&self, core: usize, cluster: Cluster);

    /// 停机, 不再返回
    fn halt(&self) -> !;
}

/// 作用域内屏蔽本地中断
pub struct IrqGuard<'a> {
    cpu: &'a dyn CpuOps,
    state: usize,
}

impl<'a> IrqGuard<'a> {
    pub fn new(cpu: &'a dyn CpuOps) -> Self {
        let state = cpu.irq_save();
        IrqGuard { cpu, state }
    }
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.cpu.irq_restore(self.state);
    }
}

/// 有界忙等, 直到 `cond` 成立
///
/// 只自旋不睡眠. 超时返回 `HwTimeout`, 由调用者决定是否致命.
pub fn poll_until<F>(cpu: &dyn CpuOps, timeout_us: u64, mut cond: F) -> Result<(), HwTimeout>
where
    F: FnMut() -> bool,
{
    let start = cpu.now_us();
    loop {
        if cond() {
            return Ok(());
        }

        let waited_us = cpu.now_us().saturating_sub(start);
        if waited_us >= timeout_us {
            // 超时前最后确认一次
            if cond() {
                return Ok(());
            }
            return Err(HwTimeout { waited_us });
        }

        cpu.relax();
    }
}
