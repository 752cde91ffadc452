pub mod entry;

pub use entry::{
    coordinator, deferred_tick, hotplug_callback, inbound_setup, init_logging, install,
    power_down, power_up, resume,
};
