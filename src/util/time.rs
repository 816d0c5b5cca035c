//! Time utilities for the room scheduler

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // 60 ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Period of the global room driver
pub fn tick_period() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

/// Wall-clock seconds between two instants, saturating at zero
pub fn elapsed_secs(since: Instant, now: Instant) -> f32 {
    now.saturating_duration_since(since).as_secs_f32()
}
