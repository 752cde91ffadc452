//! 全局协调器和顶层入口
//!
//! 迁移框架, 热插拔层, 定时器和睡眠恢复代码都经由这里调用.
//! 任何 `PowerFault` 在这里被转换为系统停机.

use log::{error, LevelFilter, SetLoggerError};
use spin::Once;

use crate::config::PlatformConfig;
use crate::drivers::uart;
use crate::error::PowerFault;
use crate::kernel::switch::{BootSnapshot, Coordinator, HotplugAction, HotplugAdapter, TickOutcome};
use crate::platform::{Cluster, Platform};

static COORDINATOR: Once<Coordinator<'static>> = Once::new();

/// 安装控制台日志
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    uart::console_init(level)
}

/// 建立全局协调器 (只能调用一次)
pub fn install(
    platform: Platform<'static>,
    config: PlatformConfig,
    boot: BootSnapshot,
) -> Result<&'static Coordinator<'static>, PowerFault> {
    if COORDINATOR.is_completed() {
        return Err(PowerFault::InvalidConfig("coordinator already installed"));
    }
    let coordinator = Coordinator::new(platform, config, boot)?;
    Ok(COORDINATOR.call_once(|| coordinator))
}

pub fn coordinator() -> Option<&'static Coordinator<'static>> {
    let coordinator = COORDINATOR.get();
    if coordinator.is_none() {
        error!("cluster switcher used before install");
    }
    coordinator
}

pub fn power_up(core: usize, cluster: Cluster) {
    if let Some(coord) = coordinator() {
        if let Err(fault) = coord.power_up(core, cluster) {
            coord.fatal(fault);
        }
    }
}

pub fn power_down(core: usize, cluster: Cluster) {
    if let Some(coord) = coordinator() {
        if let Err(fault) = coord.power_down(core, cluster) {
            coord.fatal(fault);
        }
    }
}

pub fn inbound_setup(core: usize, cluster: Cluster) {
    if let Some(coord) = coordinator() {
        if let Err(fault) = coord.inbound_setup(core, cluster) {
            coord.fatal(fault);
        }
    }
}

/// 延迟拆除定时器回调
pub fn deferred_tick() -> TickOutcome {
    match coordinator() {
        Some(coord) => match coord.tick() {
            Ok(outcome) => outcome,
            Err(fault) => coord.fatal(fault),
        },
        None => TickOutcome::default(),
    }
}

/// 从系统睡眠恢复后调用
pub fn resume() {
    if let Some(coord) = coordinator() {
        coord.resume();
    }
}

/// 注册给OS热插拔层的回调
pub fn hotplug_callback(cpu: usize, action: HotplugAction) {
    if let Some(coord) = coordinator() {
        if let Err(fault) = HotplugAdapter::new(coord).notify(cpu, action) {
            coord.fatal(fault);
        }
    }
}
