//! 核心电源驱动
//!
//! 单个核心的上电/下电寄存器序列. 芯片版本带来的寄存器组交换
//! 只在这里和簇时序中通过 `RegisterMap` 处理.

use log::{debug, error, warn};

use crate::config::{PlatformConfig, PowerOffPath, RegisterMap};
use crate::error::{HwTimeout, PowerFault};
use crate::hal::cpu::poll_until;
use crate::platform::{Cluster, Platform};

pub struct CorePowerDriver<'a> {
    platform: Platform<'a>,
    map: RegisterMap,
    secure_world: bool,
    power_off: PowerOffPath,
    irq_ready_timeout_us: u64,
    core_off_timeout_us: u64,
}

impl<'a> CorePowerDriver<'a> {
    pub fn new(platform: Platform<'a>, config: &PlatformConfig) -> Self {
        CorePowerDriver {
            platform,
            map: RegisterMap::for_revision(config.revision),
            secure_world: config.secure_world,
            power_off: config.power_off,
            irq_ready_timeout_us: config.irq_ready_timeout_us,
            core_off_timeout_us: config.core_off_timeout_us,
        }
    }

    /// 上电核心, 并等待其中断控制器接口就绪
    pub fn power_on_core(&self, core: usize, cluster: Cluster) -> Result<(), PowerFault> {
        let Platform { regs, cpu, secure, .. } = self.platform;
        let group = self.map.phys(cluster);

        // 复位向量据此走切换路径
        regs.set_boot_flag(group, core, true);

        if self.secure_world {
            secure.save_context(core, cluster.other());
        }

        regs.set_core_power(group, core, true);
        regs.irq_wake(group, core);

        poll_until(cpu, self.irq_ready_timeout_us, || regs.irq_ready(group, core)).map_err(
            |timeout| {
                error!("core {} on {} interrupt interface not ready: {}", core, cluster, timeout);
                PowerFault::CoreNotReady { core, cluster }
            },
        )?;

        debug!("core {} on {} powered on", core, cluster);
        Ok(())
    }

    /// 静默后下电调用者所在核心
    ///
    /// 经由安全监控器时, 真实硬件上不会返回.
    pub fn power_off_core(&self, core: usize, cluster: Cluster) -> Result<(), HwTimeout> {
        let Platform { regs, cpu, secure, .. } = self.platform;
        let group = self.map.phys(cluster);

        regs.irq_sleep(group, core);
        self.quiesce(core, cluster);

        match self.power_off {
            PowerOffPath::Register => {
                regs.set_core_power(group, core, false);
                poll_until(cpu, self.core_off_timeout_us, || !regs.core_powered(group, core))
                    .map_err(|timeout| {
                        warn!("core {} on {} power-off not confirmed: {}", core, cluster, timeout);
                        timeout
                    })
            }
            PowerOffPath::SecureMonitor => {
                secure.cpu_off(core, cluster);
                Ok(())
            }
        }
    }

    /// CPU本地静默 (缓存维护), 不触碰电源寄存器
    pub fn quiesce(&self, core: usize, cluster: Cluster) {
        self.platform.cpu.quiesce(core, cluster);
    }

    pub fn clear_boot_flag(&self, core: usize, cluster: Cluster) {
        self.platform.regs.set_boot_flag(self.map.phys(cluster), core, false);
    }

    #[cfg(feature = "diagnostics")]
    pub fn dump_registers(&self) {
        let snap = self.platform.regs.snapshot();
        for cluster in Cluster::ALL {
            let group = self.map.phys(cluster);
            error!(
                "{} (group {}): cluster status {:#010x}, core status {:#010x?}",
                cluster, group, snap.cluster_status[group], snap.core_status[group]
            );
        }
    }
}
