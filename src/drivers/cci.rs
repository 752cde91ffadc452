//! CCI-400 一致性互连驱动
//!
//! 每个从接口 (slave interface) 对应一个簇. 使能/关闭 snoop 与 DVM
//! 请求后, 需要等待 `STATUS.change_pending` 清零.

use volatile::Volatile;

use crate::hal::cpu::{poll_until, CpuOps};
use crate::platform::{Cluster, Interconnect};

/// 控制覆盖寄存器 / 状态寄存器 (全局)
const CCI_STATUS: usize = 0x000C;

/// 从接口寄存器区域起始及间距
const SLAVE_BASE: usize = 0x1000;
const SLAVE_STRIDE: usize = 0x1000;

/// 从接口 snoop 控制寄存器
const SNOOP_CTRL: usize = 0x0000;

const SNOOP_ENABLE: u32 = 1 << 0;
const DVM_ENABLE: u32 = 1 << 1;

const STATUS_CHANGE_PENDING: u32 = 1 << 0;

/// 等待互连响应的上限 (us)
const CHANGE_TIMEOUT_US: u64 = 1_000;

pub struct Cci400<'a> {
    base: usize,
    /// 逻辑簇 -> 从接口编号
    ports: [usize; 2],
    cpu: &'a dyn CpuOps,
}

impl<'a> Cci400<'a> {
    /// # Safety
    ///
    /// `base` 必须是已映射的CCI寄存器区域.
    pub const unsafe fn new(base: usize, ports: [usize; 2], cpu: &'a dyn CpuOps) -> Self {
        Cci400 { base, ports, cpu }
    }

    fn reg(&self, offset: usize) -> Volatile<&'static mut u32> {
        // SAFETY: 构造时保证映射, 4字节对齐
        unsafe { Volatile::new(&mut *((self.base + offset) as *mut u32)) }
    }

    fn snoop_ctrl(&self, cluster: Cluster) -> Volatile<&'static mut u32> {
        self.reg(SLAVE_BASE + self.ports[cluster.index()] * SLAVE_STRIDE + SNOOP_CTRL)
    }

    fn wait_settled(&self, cluster: Cluster) {
        let status = self.reg(CCI_STATUS);
        if let Err(timeout) =
            poll_until(self.cpu, CHANGE_TIMEOUT_US, || status.read() & STATUS_CHANGE_PENDING == 0)
        {
            log::warn!("CCI snoop change for {} cluster still pending: {}", cluster, timeout);
        }
    }
}

impl Interconnect for Cci400<'_> {
    fn enable_snoop(&self, cluster: Cluster) {
        self.snoop_ctrl(cluster).update(|ctrl| *ctrl |= SNOOP_ENABLE | DVM_ENABLE);
        self.wait_settled(cluster);
    }

    fn disable_snoop(&self, cluster: Cluster) {
        self.snoop_ctrl(cluster).update(|ctrl| *ctrl &= !(SNOOP_ENABLE | DVM_ENABLE));
        self.wait_settled(cluster);
    }
}
