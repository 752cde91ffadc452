//! GIC-500 重分发器 (Redistributor) 唤醒控制
//!
//! 核心上电后, 其重分发器需要从睡眠中唤醒才能接收中断.
//! `GICR_WAKER.ChildrenAsleep` 清零即表示该核心的中断路由已就绪.

use volatile::Volatile;

/// GIC-500基地址 (RK3588特定)
pub const GIC_BASE: usize = 0xfe60_0000;

/// GICR (Redistributor)基地址
pub const GICR_BASE: usize = GIC_BASE + 0x10_0000;

/// 每核重分发器区域大小 (RD_base + SGI_base)
pub const GICR_STRIDE: usize = 0x2_0000;

/// GICR_WAKER: 电源管理控制
const GICR_WAKER: usize = 0x14;

/// ProcessorSleep
const WAKER_PROCESSOR_SLEEP: u32 = 1 << 1;

/// ChildrenAsleep
const WAKER_CHILDREN_ASLEEP: u32 = 1 << 2;

pub struct GicRedistributor {
    base: usize,
    stride: usize,
}

impl GicRedistributor {
    /// # Safety
    ///
    /// `base` 起的 `stride * 核心数` 区域必须已映射.
    pub const unsafe fn new(base: usize, stride: usize) -> Self {
        GicRedistributor { base, stride }
    }

    fn waker(&self, cpu_index: usize) -> Volatile<&'static mut u32> {
        let addr = self.base + cpu_index * self.stride + GICR_WAKER;
        // SAFETY: 构造时保证映射, 4字节对齐
        unsafe { Volatile::new(&mut *(addr as *mut u32)) }
    }

    /// 清除 ProcessorSleep, 请求唤醒该核心的重分发器
    pub fn wake(&self, cpu_index: usize) {
        self.waker(cpu_index)
            .update(|value| *value &= !WAKER_PROCESSOR_SLEEP);
    }

    /// 设置 ProcessorSleep, 核心下电前调用
    pub fn sleep(&self, cpu_index: usize) {
        self.waker(cpu_index)
            .update(|value| *value |= WAKER_PROCESSOR_SLEEP);
    }

    /// 重分发器是否已唤醒
    pub fn is_awake(&self, cpu_index: usize) -> bool {
        let waker = self.waker(cpu_index).read();
        waker & (WAKER_PROCESSOR_SLEEP | WAKER_CHILDREN_ASLEEP) == 0
    }
}
