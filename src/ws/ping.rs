//! Heartbeat manager for WebSocket connection keep-alive
//!
//! Runs its own timer thread that sends a ping (control frame or text
//! message) every interval and reports a missing pong after the timeout.
//! Sending and timeout reporting go through injected hooks, so the manager
//! knows nothing about the connection it serves.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::infrastructure::config::{PingConfig, PingMode};

/// Lower bound for the ping interval
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Callbacks into the owning connection
///
/// Invoked on the heartbeat thread without the heartbeat lock held.
pub struct PingHooks {
    /// Send a ping control frame; false if it could not be written
    pub send_ping: Box<dyn Fn() -> bool + Send + Sync>,
    /// Send a text keepalive; false if it could not be written
    pub send_text: Box<dyn Fn(&str) -> bool + Send + Sync>,
    /// No pong arrived within the timeout
    pub on_timeout: Box<dyn Fn(Duration) + Send + Sync>,
}

/// Runtime-adjustable heartbeat settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingSettings {
    pub mode: PingMode,
    pub interval: Duration,
    pub timeout: Duration,
    pub text_message: String,
}

impl From<&PingConfig> for PingSettings {
    fn from(config: &PingConfig) -> Self {
        Self {
            mode: config.mode,
            interval: config.interval(),
            timeout: config.timeout(),
            text_message: config.text_message.clone(),
        }
    }
}

struct PingState {
    settings: PingSettings,
    waiting_pong: bool,
    last_ping_sent_at: Option<Instant>,
    last_pong_at: Option<Instant>,
    cycle_start: Instant,
    /// Timer thread alive
    running: bool,
    /// Bumped per spawned timer; a stale timer exits on mismatch
    generation: u64,
    /// Installed by `start`, cleared by `stop`
    hooks: Option<Arc<PingHooks>>,
}

struct Shared {
    state: Mutex<PingState>,
    wake: Condvar,
}

/// Per-connection heartbeat timer
pub struct HeartbeatManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatManager {
    pub fn new(settings: PingSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PingState {
                    settings,
                    waiting_pong: false,
                    last_ping_sent_at: None,
                    last_pong_at: None,
                    cycle_start: Instant::now(),
                    running: false,
                    generation: 0,
                    hooks: None,
                }),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn from_config(config: &PingConfig) -> Self {
        Self::new(PingSettings::from(config))
    }

    /// Arm the heartbeat and start the timer unless the mode is `Disabled`
    ///
    /// While disabled the hooks stay installed, so a later `set_mode` to an
    /// active mode starts the timer.
    pub fn start(&self, hooks: PingHooks) {
        let mut state = self.shared.state.lock();
        state.hooks = Some(Arc::new(hooks));
        state.waiting_pong = false;
        state.last_ping_sent_at = None;
        state.cycle_start = Instant::now();

        if state.settings.mode == PingMode::Disabled {
            tracing::debug!("Heartbeat armed, ping mode disabled");
            return;
        }
        if state.running {
            self.shared.wake.notify_all();
            return;
        }
        self.spawn_timer(&mut state);
    }

    /// Disarm and wait for the timer thread to exit
    ///
    /// Safe to call from a hook; the timer thread is then left to exit on its own.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.hooks = None;
            state.waiting_pong = false;
            state.generation = state.generation.wrapping_add(1);
            state.running = false;
            self.shared.wake.notify_all();
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Heartbeat thread panicked");
            }
        }
    }

    /// Record a pong; returns whether a ping was outstanding
    pub fn on_pong_received(&self) -> bool {
        let mut state = self.shared.state.lock();
        let was_waiting = state.waiting_pong;
        state.waiting_pong = false;
        state.last_pong_at = Some(Instant::now());
        self.shared.wake.notify_all();
        was_waiting
    }

    /// Change the ping mode; `Disabled` idles the timer
    pub fn set_mode(&self, mode: PingMode) {
        let mut state = self.shared.state.lock();
        state.settings.mode = mode;
        if mode == PingMode::Disabled {
            state.waiting_pong = false;
        } else if state.hooks.is_some() && !state.running {
            state.cycle_start = Instant::now();
            self.spawn_timer(&mut state);
            return;
        }
        self.shared.wake.notify_all();
    }

    pub fn set_interval(&self, interval: Duration) {
        let mut state = self.shared.state.lock();
        state.settings.interval = interval;
        self.shared.wake.notify_all();
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let mut state = self.shared.state.lock();
        state.settings.timeout = timeout;
        self.shared.wake.notify_all();
    }

    pub fn set_text_message(&self, text: impl Into<String>) {
        self.shared.state.lock().settings.text_message = text.into();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    #[inline]
    pub fn is_waiting_pong(&self) -> bool {
        self.shared.state.lock().waiting_pong
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.shared.state.lock().last_pong_at
    }

    pub fn settings(&self) -> PingSettings {
        self.shared.state.lock().settings.clone()
    }

    fn spawn_timer(&self, state: &mut MutexGuard<'_, PingState>) {
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let shared = Arc::clone(&self.shared);

        match thread::Builder::new()
            .name("ws-heartbeat".to_string())
            .spawn(move || run_timer(shared, generation))
        {
            Ok(handle) => {
                state.running = true;
                // A detached timer (stopped from inside a hook) is simply replaced
                *self.thread.lock() = Some(handle);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn heartbeat thread");
            }
        }
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(shared: Arc<Shared>, generation: u64) {
    let mut state = shared.state.lock();

    loop {
        if state.generation != generation {
            return;
        }
        let Some(hooks) = state.hooks.clone() else {
            break;
        };

        let now = Instant::now();
        let mode = state.settings.mode;

        if mode == PingMode::Disabled {
            shared.wake.wait(&mut state);
            continue;
        }

        if state.waiting_pong {
            let sent_at = state.last_ping_sent_at.unwrap_or(now);
            let deadline = sent_at + state.settings.timeout;
            if now >= deadline {
                state.waiting_pong = false;
                let timeout = state.settings.timeout;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Pong timeout");
                MutexGuard::unlocked(&mut state, || (hooks.on_timeout)(timeout));
            } else {
                shared.wake.wait_until(&mut state, deadline);
            }
            continue;
        }

        let due = state.cycle_start + state.settings.interval.max(MIN_INTERVAL);
        if now < due {
            shared.wake.wait_until(&mut state, due);
            continue;
        }

        // Mark outstanding before sending so a fast pong is not lost
        state.cycle_start = now;
        state.waiting_pong = true;
        state.last_ping_sent_at = Some(now);
        let text = state.settings.text_message.clone();

        let sent = MutexGuard::unlocked(&mut state, || match mode {
            PingMode::Opcode => (hooks.send_ping)(),
            PingMode::TextMessage => (hooks.send_text)(&text),
            PingMode::Disabled => false,
        });

        if !sent && state.last_ping_sent_at == Some(now) {
            state.waiting_pong = false;
            tracing::debug!("Heartbeat ping not sent");
        }
    }

    if state.generation == generation {
        state.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counters {
        pings: AtomicUsize,
        texts: AtomicUsize,
        timeouts: AtomicUsize,
        last_text: Mutex<String>,
    }

    fn counting_hooks(ping_ok: bool) -> (PingHooks, Arc<Counters>) {
        let counters = Arc::new(Counters {
            pings: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
            last_text: Mutex::new(String::new()),
        });
        let (c1, c2, c3) = (counters.clone(), counters.clone(), counters.clone());
        let hooks = PingHooks {
            send_ping: Box::new(move || {
                c1.pings.fetch_add(1, Ordering::SeqCst);
                ping_ok
            }),
            send_text: Box::new(move |text| {
                c2.texts.fetch_add(1, Ordering::SeqCst);
                *c2.last_text.lock() = text.to_string();
                true
            }),
            on_timeout: Box::new(move |_| {
                c3.timeouts.fetch_add(1, Ordering::SeqCst);
            }),
        };
        (hooks, counters)
    }

    fn settings(mode: PingMode, interval_ms: u64, timeout_ms: u64) -> PingSettings {
        PingSettings {
            mode,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            text_message: "ping".to_string(),
        }
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_pong_timeout_fires_once() {
        let manager = HeartbeatManager::new(settings(PingMode::Opcode, 1000, 500));
        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);
        assert!(manager.is_running());

        thread::sleep(Duration::from_millis(1800));

        assert_eq!(counters.pings.load(Ordering::SeqCst), 1);
        assert_eq!(counters.timeouts.load(Ordering::SeqCst), 1);
        assert!(!manager.is_waiting_pong());

        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_pong_clears_waiting() {
        let manager = HeartbeatManager::new(settings(PingMode::Opcode, 20, 10_000));
        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);

        assert!(wait_for(|| manager.is_waiting_pong()));
        assert!(manager.last_pong_at().is_none());

        assert!(manager.on_pong_received());
        assert!(!manager.is_waiting_pong());
        assert!(manager.last_pong_at().is_some());
        assert_eq!(counters.timeouts.load(Ordering::SeqCst), 0);

        // The next cycle pings again
        assert!(wait_for(|| counters.pings.load(Ordering::SeqCst) >= 2));
        manager.stop();
    }

    #[test]
    fn test_disabled_mode_starts_no_timer() {
        let manager = HeartbeatManager::new(settings(PingMode::Disabled, 10, 1000));
        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);

        assert!(!manager.is_running());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.pings.load(Ordering::SeqCst), 0);

        // Hooks stay armed; enabling starts the timer
        manager.set_mode(PingMode::Opcode);
        assert!(manager.is_running());
        assert!(wait_for(|| counters.pings.load(Ordering::SeqCst) >= 1));

        manager.stop();
        assert!(!manager.is_running());
    }

    #[test]
    fn test_text_mode_sends_configured_message() {
        let manager = HeartbeatManager::new(settings(PingMode::TextMessage, 10, 1000));
        manager.set_text_message("{\"op\":\"ping\"}");
        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);

        assert!(wait_for(|| counters.texts.load(Ordering::SeqCst) >= 1));
        assert_eq!(counters.pings.load(Ordering::SeqCst), 0);
        assert_eq!(*counters.last_text.lock(), "{\"op\":\"ping\"}");
        manager.stop();
    }

    #[test]
    fn test_failed_send_does_not_wait_for_pong() {
        let manager = HeartbeatManager::new(settings(PingMode::Opcode, 10, 20));
        let (hooks, counters) = counting_hooks(false);
        manager.start(hooks);

        assert!(wait_for(|| counters.pings.load(Ordering::SeqCst) >= 3));
        assert!(!manager.is_waiting_pong());
        assert_eq!(counters.timeouts.load(Ordering::SeqCst), 0);
        manager.stop();
    }

    #[test]
    fn test_runtime_setters() {
        let manager = HeartbeatManager::from_config(&PingConfig::default());
        manager.set_interval(Duration::from_millis(250));
        manager.set_timeout(Duration::from_millis(75));
        manager.set_mode(PingMode::TextMessage);

        let s = manager.settings();
        assert_eq!(s.interval, Duration::from_millis(250));
        assert_eq!(s.timeout, Duration::from_millis(75));
        assert_eq!(s.mode, PingMode::TextMessage);
        // Not armed yet, so no timer
        assert!(!manager.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_restartable() {
        let manager = HeartbeatManager::new(settings(PingMode::Opcode, 10, 1000));
        manager.stop();

        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);
        manager.stop();
        manager.stop();
        assert!(!manager.is_running());

        let pings = counters.pings.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.pings.load(Ordering::SeqCst), pings);

        let (hooks, counters) = counting_hooks(true);
        manager.start(hooks);
        assert!(wait_for(|| counters.pings.load(Ordering::SeqCst) >= 1));
        manager.stop();
    }

    #[test]
    fn test_stop_survives_panicking_hook() {
        let manager = HeartbeatManager::new(settings(PingMode::Opcode, 10, 1000));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        manager.start(PingHooks {
            send_ping: Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("send hook failed");
            }),
            send_text: Box::new(|_| true),
            on_timeout: Box::new(|_| {}),
        });

        assert!(wait_for(|| fired.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(20));
        manager.stop();
        assert!(!manager.is_running());
    }
}
