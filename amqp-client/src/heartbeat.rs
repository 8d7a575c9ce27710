use std::time::Duration;

use time::Duration as ChronoDuration;
use timer::{Guard, Timer};

/// A scheduled recurring callback that keeps a connection's heartbeat
/// alive. Not part of `spec.md` at all — real AMQP 0-9-1 connections run
/// one, and `SPEC_FULL.md` §5 adds it at the `Connection` level, outside
/// the Session core the spec pins down. Modeled after
/// `mqtt-sync-client::keepalive::KeepAlive`'s use of the `timer` crate for
/// its own scheduled ping.
pub struct Heartbeat {
    _timer: Timer,
    _guard: Guard,
}

impl Heartbeat {
    pub fn start<F>(interval: Duration, callback: F) -> Heartbeat
    where
        F: Fn() + Send + 'static,
    {
        let timer = Timer::new();
        let guard = timer.schedule_repeating(
            ChronoDuration::from_std(interval).expect("heartbeat interval fits in a chrono duration"),
            callback,
        );
        Heartbeat { _timer: timer, _guard: guard }
    }
}
