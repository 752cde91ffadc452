//! 单元测试用的模拟平台
//!
//! 一个对象同时实现全部平台接口, 写操作按顺序记录为 `Event`,
//! 读操作按内部状态返回. 时钟每读一次前进 1us, 因此所有有界等待
//! 都会在有限步内结束.

use std::boxed::Box;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::vec::Vec;

use crate::config::{RegisterMap, SiliconRevision};
use crate::hal::cpu::CpuOps;
use crate::hal::regs::{PowerRegs, RegSnapshot};
use crate::platform::{
    Cluster, ClockMux, ClusterPowerState, DeferredTimer, Interconnect, MigrationFramework, Platform,
    SecureMonitor, MAX_CLUSTERS, MAX_CORES_PER_CLUSTER,
};

/// 平台上可观察到的写操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SelectPll(Cluster),
    SelectReference(Cluster),
    ClusterPower { group: usize, on: bool },
    SnoopOn(Cluster),
    SnoopOff(Cluster),
    CorePower { group: usize, core: usize, on: bool },
    BootFlag { group: usize, core: usize, set: bool },
    SaveContext { core: usize, cluster: Cluster },
    CpuOff { core: usize, cluster: Cluster },
    Quiesce { core: usize, cluster: Cluster },
    IrqWake { group: usize, core: usize },
    IrqSleep { group: usize, core: usize },
    Enter(Cluster),
    Leave(Cluster, ClusterPowerState),
    EntryVector(usize),
}

/// 可以挂回调的平台调用点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    GoingDown,
    SelectPll,
    SnoopOff,
}

const HOOK_POINTS: usize = 3;

struct MockState {
    core_powered: [[bool; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
    /// 簇电源控制位 (最后一次写入)
    cluster_ctrl: [bool; MAX_CLUSTERS],
    /// 簇电源状态位 (应答)
    cluster_powered: [bool; MAX_CLUSTERS],
    boot_flag: [[bool; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
    cluster_state: [ClusterPowerState; MAX_CLUSTERS],
    running: [Cluster; MAX_CORES_PER_CLUSTER],
    entry_vector: usize,
    cores_active: [bool; MAX_CLUSTERS],
    cluster_ack_stuck: bool,
    core_off_stuck: bool,
    irq_never_ready: bool,
    deny_critical: bool,
}

type Hook = Box<dyn FnMut() + Send>;

pub struct MockPlatform {
    state: Mutex<MockState>,
    events: Mutex<Vec<Event>>,
    hooks: Mutex<[Option<Hook>; HOOK_POINTS]>,
    irq_masked: AtomicBool,
    clock_us: AtomicU64,
    timer_arms: AtomicUsize,
    halts: AtomicUsize,
}

/// 把测试对象提升为 `'static`, 供线程和全局实例使用
pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

impl MockPlatform {
    /// `power_up_setup` 返回的入口地址
    pub const ENTRY: usize = 0x4008_0000;

    /// 两个簇都断电的冷启动平台
    pub fn new() -> Self {
        MockPlatform {
            state: Mutex::new(MockState {
                core_powered: [[false; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
                cluster_ctrl: [false; MAX_CLUSTERS],
                cluster_powered: [false; MAX_CLUSTERS],
                boot_flag: [[false; MAX_CORES_PER_CLUSTER]; MAX_CLUSTERS],
                cluster_state: [ClusterPowerState::Down; MAX_CLUSTERS],
                running: [Cluster::Big; MAX_CORES_PER_CLUSTER],
                entry_vector: 0,
                cores_active: [false; MAX_CLUSTERS],
                cluster_ack_stuck: false,
                core_off_stuck: false,
                irq_never_ready: false,
                deny_critical: false,
            }),
            events: Mutex::new(Vec::new()),
            hooks: Mutex::new([None, None, None]),
            irq_masked: AtomicBool::new(false),
            clock_us: AtomicU64::new(0),
            timer_arms: AtomicUsize::new(0),
            halts: AtomicUsize::new(0),
        }
    }

    /// `mask` 中的核心已在 `cluster` 上运行, 该簇已上电 (R0寄存器布局)
    pub fn booted_on(cluster: Cluster, mask: u32) -> Self {
        let mock = Self::new();
        {
            let group = RegisterMap::for_revision(SiliconRevision::R0).phys(cluster);
            let mut state = mock.state.lock().unwrap();
            state.cluster_state[cluster.index()] = ClusterPowerState::Up;
            state.cluster_ctrl[group] = true;
            state.cluster_powered[group] = true;
            for core in 0..MAX_CORES_PER_CLUSTER {
                if mask & (1 << core) != 0 {
                    state.core_powered[group][core] = true;
                    state.running[core] = cluster;
                }
            }
        }
        mock
    }

    pub fn platform(&self) -> Platform<'_> {
        Platform {
            regs: self,
            cpu: self,
            framework: self,
            interconnect: self,
            clock: self,
            secure: self,
            timer: self,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn irqs_masked(&self) -> bool {
        self.irq_masked.load(Ordering::SeqCst)
    }

    pub fn timer_arms(&self) -> usize {
        self.timer_arms.load(Ordering::SeqCst)
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    pub fn cluster_state(&self, cluster: Cluster) -> ClusterPowerState {
        self.state.lock().unwrap().cluster_state[cluster.index()]
    }

    pub fn boot_flag(&self, group: usize, core: usize) -> bool {
        self.state.lock().unwrap().boot_flag[group][core]
    }

    pub fn entry_vector(&self) -> usize {
        self.state.lock().unwrap().entry_vector
    }

    /// 簇电源应答不再跟随写入; 解除后应答追上最后一次写入
    pub fn set_cluster_ack_stuck(&self, stuck: bool) {
        let mut state = self.state.lock().unwrap();
        state.cluster_ack_stuck = stuck;
        if !stuck {
            state.cluster_powered = state.cluster_ctrl;
        }
    }

    /// 核心电源状态不再跟随写入
    pub fn set_core_off_stuck(&self, stuck: bool) {
        self.state.lock().unwrap().core_off_stuck = stuck;
    }

    pub fn set_irq_never_ready(&self, never: bool) {
        self.state.lock().unwrap().irq_never_ready = never;
    }

    /// 迁移框架拒绝所有 enter 临界区请求
    pub fn set_deny_critical(&self, deny: bool) {
        self.state.lock().unwrap().deny_critical = deny;
    }

    /// 强制簇状态寄存器显示 (或不再强制显示) 活动核心
    pub fn set_cores_active(&self, group: usize, active: bool) {
        self.state.lock().unwrap().cores_active[group] = active;
    }

    pub fn set_core_powered(&self, group: usize, core: usize, powered: bool) {
        self.state.lock().unwrap().core_powered[group][core] = powered;
    }

    pub fn set_running_cluster(&self, core: usize, cluster: Cluster) {
        self.state.lock().unwrap().running[core] = cluster;
    }

    /// 下一次到达 `point` 时调用一次 `hook`
    pub fn hook<F>(&self, point: HookPoint, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.hooks.lock().unwrap()[point as usize] = Some(Box::new(hook));
    }

    fn fire(&self, point: HookPoint) {
        // 先取出再调用, 回调里可能再次进入平台
        let hook = self.hooks.lock().unwrap()[point as usize].take();
        if let Some(mut hook) = hook {
            hook();
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl PowerRegs for MockPlatform {
    fn set_core_power(&self, group: usize, core: usize, on: bool) {
        self.record(Event::CorePower { group, core, on });
        let mut state = self.state.lock().unwrap();
        if !state.core_off_stuck {
            state.core_powered[group][core] = on;
        }
    }

    fn core_powered(&self, group: usize, core: usize) -> bool {
        self.state.lock().unwrap().core_powered[group][core]
    }

    fn set_cluster_power(&self, group: usize, on: bool) {
        self.record(Event::ClusterPower { group, on });
        let mut state = self.state.lock().unwrap();
        state.cluster_ctrl[group] = on;
        if !state.cluster_ack_stuck {
            state.cluster_powered[group] = on;
        }
    }

    fn cluster_powered(&self, group: usize) -> bool {
        self.state.lock().unwrap().cluster_powered[group]
    }

    fn cluster_cores_active(&self, group: usize) -> bool {
        let state = self.state.lock().unwrap();
        state.cores_active[group] || state.core_powered[group].iter().any(|on| *on)
    }

    fn set_boot_flag(&self, group: usize, core: usize, set: bool) {
        self.record(Event::BootFlag { group, core, set });
        self.state.lock().unwrap().boot_flag[group][core] = set;
    }

    fn irq_wake(&self, group: usize, core: usize) {
        self.record(Event::IrqWake { group, core });
    }

    fn irq_sleep(&self, group: usize, core: usize) {
        self.record(Event::IrqSleep { group, core });
    }

    // 与电源状态无关, 并发测试中另一线程的下电不会让上电超时
    fn irq_ready(&self, _group: usize, _core: usize) -> bool {
        !self.state.lock().unwrap().irq_never_ready
    }

    fn set_entry_vector(&self, addr: usize) {
        self.record(Event::EntryVector(addr));
        self.state.lock().unwrap().entry_vector = addr;
    }

    fn snapshot(&self) -> RegSnapshot {
        let state = self.state.lock().unwrap();
        let mut snap = RegSnapshot::default();
        for group in 0..MAX_CLUSTERS {
            for core in 0..MAX_CORES_PER_CLUSTER {
                snap.core_status[group][core] = state.core_powered[group][core] as u32;
            }
            snap.cluster_status[group] = state.cluster_powered[group] as u32;
        }
        snap
    }
}

impl CpuOps for MockPlatform {
    fn irq_save(&self) -> usize {
        self.irq_masked.swap(true, Ordering::SeqCst) as usize
    }

    fn irq_restore(&self, state: usize) {
        self.irq_masked.store(state != 0, Ordering::SeqCst);
    }

    fn now_us(&self) -> u64 {
        self.clock_us.fetch_add(1, Ordering::SeqCst)
    }

    fn relax(&self) {
        std::thread::yield_now();
    }

    fn quiesce(&self, core: usize, cluster: Cluster) {
        self.record(Event::Quiesce { core, cluster });
    }

    fn halt(&self) -> ! {
        self.halts.fetch_add(1, Ordering::SeqCst);
        panic!("cpu halted");
    }
}

impl MigrationFramework for MockPlatform {
    fn notify_going_down(&self, _core: usize, _cluster: Cluster) {
        self.fire(HookPoint::GoingDown);
    }

    fn enter_cluster_critical(&self, _core: usize, cluster: Cluster) -> bool {
        self.record(Event::Enter(cluster));
        !self.state.lock().unwrap().deny_critical
    }

    fn leave_cluster_critical(&self, cluster: Cluster, state: ClusterPowerState) {
        self.record(Event::Leave(cluster, state));
        self.state.lock().unwrap().cluster_state[cluster.index()] = state;
    }

    fn cluster_power_state(&self, cluster: Cluster) -> ClusterPowerState {
        self.state.lock().unwrap().cluster_state[cluster.index()]
    }

    fn running_cluster_of(&self, core: usize) -> Cluster {
        self.state.lock().unwrap().running[core]
    }

    fn power_up_setup(&self) -> usize {
        Self::ENTRY
    }
}

impl Interconnect for MockPlatform {
    fn enable_snoop(&self, cluster: Cluster) {
        self.record(Event::SnoopOn(cluster));
    }

    fn disable_snoop(&self, cluster: Cluster) {
        self.record(Event::SnoopOff(cluster));
        self.fire(HookPoint::SnoopOff);
    }
}

impl ClockMux for MockPlatform {
    fn select_pll(&self, cluster: Cluster) {
        self.record(Event::SelectPll(cluster));
        self.fire(HookPoint::SelectPll);
    }

    fn select_reference(&self, cluster: Cluster) {
        self.record(Event::SelectReference(cluster));
    }
}

impl SecureMonitor for MockPlatform {
    fn save_context(&self, core: usize, cluster: Cluster) {
        self.record(Event::SaveContext { core, cluster });
    }

    fn cpu_off(&self, core: usize, cluster: Cluster) {
        self.record(Event::CpuOff { core, cluster });
        let group = RegisterMap::for_revision(SiliconRevision::R0).phys(cluster);
        self.state.lock().unwrap().core_powered[group][core] = false;
    }
}

impl DeferredTimer for MockPlatform {
    fn arm(&self, _period_us: u64) {
        self.timer_arms.fetch_add(1, Ordering::SeqCst);
    }
}
