//! Real-time pacing of simulated time.
//!
//! When the broker is started with a pacing interval, a ticker thread
//! stores wall-clock-elapsed nanoseconds into a shared counter every
//! interval, and the event loop waits before dispatching grants until the
//! counter has caught up to the granted simulated time. The counter only
//! ever increases, so stale reads on the loop thread are harmless — the
//! wait just lasts one extra tick.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, tick, Sender};
use lockstep_types::SimTime;
use tracing::{debug, trace};

/// Wall-clock throttle. Created when registration closes; the creation
/// instant is the session's wall start.
pub struct Pacer {
    time_real: Arc<AtomicU64>,
    interval: Duration,
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Pacer {
    /// Spawn the ticker thread. Elapsed time is measured from this call.
    pub fn start(interval: Duration) -> Pacer {
        let time_real = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&time_real);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("pacing-clock".to_string())
            .spawn(move || {
                let start = Instant::now();
                let ticker = tick(interval);
                loop {
                    crossbeam::channel::select! {
                        recv(ticker) -> _ => {
                            counter.store(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn pacing-clock thread");

        debug!(interval_ns = interval.as_nanos() as u64, "real-time pacing enabled");
        Pacer {
            time_real,
            interval,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Wall-clock time elapsed since the session started, at ticker
    /// granularity.
    pub fn time_real(&self) -> SimTime {
        SimTime::from_nanos(self.time_real.load(Ordering::Relaxed))
    }

    /// Sleep until real time has reached `target` simulated time.
    pub fn pace_until(&self, target: SimTime) {
        loop {
            let now = self.time_real();
            if now >= target {
                return;
            }
            let remaining = Duration::from_nanos(target.as_nanos() - now.as_nanos());
            trace!(
                target = %target,
                time_real = %now,
                "pacing before grant dispatch"
            );
            thread::sleep(remaining.min(self.interval));
        }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
