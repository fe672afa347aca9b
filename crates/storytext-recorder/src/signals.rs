//! OS signal interception
//!
//! Every catchable signal (bar a few routine or fatal ones) is routed
//! through a minimal handler that only writes the signal number to a
//! socket. A watcher thread picks it up, records `receive signal NAME`, and
//! then hands the signal to whatever the application wanted: its own
//! handler, or the default action re-raised against this process.

use crate::error::{Error, Result};
use crate::recorder::SharedRecorder;
use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet};
use nix::unistd::{getpid, Pid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

pub use nix::sys::signal::Signal;

/// Never recorded: child exits and job-control resumes are routine, bus
/// errors and segfaults are internal faults.
pub const IGNORED_SIGNALS: [Signal; 4] = [
    Signal::SIGCHLD,
    Signal::SIGCONT,
    Signal::SIGBUS,
    Signal::SIGSEGV,
];

/// Write end of the wake-up socket, -1 when nothing is installed
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALLED: AtomicBool = AtomicBool::new(false);

const STOP_BYTE: u8 = 0;

extern "C" fn on_signal(signum: libc::c_int) {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signum as u8;
        // SAFETY: write(2) is async-signal-safe; the socket is non-blocking
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// What the application wants done with a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppHandler {
    Default,
    Ignore,
    Handler(extern "C" fn(libc::c_int)),
    /// An `SA_SIGINFO` action found at install time, redelivered by the OS
    Native(SigAction),
}

impl From<SigAction> for AppHandler {
    fn from(action: SigAction) -> Self {
        match action.handler() {
            SigHandler::SigDfl => AppHandler::Default,
            SigHandler::SigIgn => AppHandler::Ignore,
            SigHandler::Handler(f) => AppHandler::Handler(f),
            SigHandler::SigAction(_) => AppHandler::Native(action),
        }
    }
}

impl AppHandler {
    fn to_action(self) -> SigAction {
        match self {
            AppHandler::Default => SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
            AppHandler::Ignore => SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
            AppHandler::Handler(f) => {
                SigAction::new(SigHandler::Handler(f), SaFlags::SA_RESTART, SigSet::empty())
            }
            AppHandler::Native(action) => action,
        }
    }
}

fn recording_action() -> SigAction {
    SigAction::new(SigHandler::Handler(on_signal), SaFlags::SA_RESTART, SigSet::empty())
}

fn install_action(signal: Signal, action: &SigAction) -> Result<SigAction> {
    // SAFETY: the handlers installed here are either the OS defaults, the
    // application's own, or `on_signal`, which is async-signal-safe
    unsafe { sigaction(signal, action) }
        .map_err(|e| Error::signal_install(format!("sigaction({}) failed: {}", signal, e)))
}

/// Every signal the interceptor records by default
pub fn catchable_signals() -> Vec<Signal> {
    Signal::iterator()
        .filter(|s| !IGNORED_SIGNALS.contains(s))
        .filter(|s| !matches!(s, Signal::SIGKILL | Signal::SIGSTOP))
        .collect()
}

/// The application's real handlers, owned by one interceptor
#[derive(Debug)]
pub struct SignalTable {
    pid: Pid,
    real_handlers: HashMap<Signal, AppHandler>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self {
            pid: getpid(),
            real_handlers: HashMap::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn intercepts(&self, signal: Signal) -> bool {
        self.real_handlers.contains_key(&signal)
    }

    pub fn real_handler(&self, signal: Signal) -> Option<AppHandler> {
        self.real_handlers.get(&signal).copied()
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    table: Mutex<SignalTable>,
    recorder: SharedRecorder,
}

pub struct SignalInterceptor {
    shared: Arc<Shared>,
    wake: UnixStream,
    watcher: Option<thread::JoinHandle<()>>,
}

impl SignalInterceptor {
    pub fn install(recorder: SharedRecorder) -> Result<Self> {
        Self::install_for(recorder, &catchable_signals())
    }

    /// Intercepts just `signals`. Only one interceptor can be live per
    /// process.
    pub fn install_for(recorder: SharedRecorder, signals: &[Signal]) -> Result<Self> {
        Self::install_with_table(SignalTable::new(), recorder, signals)
    }

    pub fn install_with_table(
        mut table: SignalTable,
        recorder: SharedRecorder,
        signals: &[Signal],
    ) -> Result<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(Error::signal_install("a signal interceptor is already installed"));
        }
        let (wake, listen) = match UnixStream::pair() {
            Ok(pair) => pair,
            Err(e) => {
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        if let Err(e) = wake.set_nonblocking(true) {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        WAKE_FD.store(wake.as_raw_fd(), Ordering::SeqCst);

        let action = recording_action();
        for &signal in signals {
            if IGNORED_SIGNALS.contains(&signal) {
                continue;
            }
            match install_action(signal, &action) {
                Ok(old) => {
                    table.real_handlers.insert(signal, AppHandler::from(old));
                }
                // SIGKILL and friends can't be caught
                Err(e) => debug!(%signal, error = %e, "not intercepting"),
            }
        }
        debug!(count = table.real_handlers.len(), pid = %table.pid, "signal handlers installed");

        let shared = Arc::new(Shared {
            table: Mutex::new(table),
            recorder,
        });
        let watcher_shared = shared.clone();
        let watcher = thread::Builder::new()
            .name("signal-recorder".to_string())
            .spawn(move || watch(listen, watcher_shared));
        let watcher = match watcher {
            Ok(handle) => handle,
            Err(e) => {
                restore_all(&shared.table.lock());
                WAKE_FD.store(-1, Ordering::SeqCst);
                INSTALLED.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        Ok(Self {
            shared,
            wake,
            watcher: Some(watcher),
        })
    }

    pub fn intercepts(&self, signal: Signal) -> bool {
        self.shared.table.lock().intercepts(signal)
    }

    /// Use this where the application would install a signal handler. While
    /// the signal is intercepted the handler is remembered and called after
    /// recording. In a forked child, or for signals not intercepted, it goes
    /// straight to the OS. Returns the previous handler.
    pub fn register_handler(&self, signal: Signal, handler: AppHandler) -> Result<AppHandler> {
        let mut table = self.shared.table.lock();
        if getpid() == table.pid && table.intercepts(signal) {
            let previous = table.real_handlers.insert(signal, handler);
            return Ok(previous.unwrap_or(AppHandler::Default));
        }
        install_action(signal, &handler.to_action()).map(AppHandler::from)
    }

    /// Restores the application's handlers and stops the watcher
    pub fn uninstall(self) {
        drop(self);
    }
}

impl Drop for SignalInterceptor {
    fn drop(&mut self) {
        restore_all(&self.shared.table.lock());
        WAKE_FD.store(-1, Ordering::SeqCst);
        let _ = (&self.wake).write_all(&[STOP_BYTE]);
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
        INSTALLED.store(false, Ordering::SeqCst);
        debug!("signal handlers restored");
    }
}

fn restore_all(table: &SignalTable) {
    for (&signal, handler) in &table.real_handlers {
        if let Err(e) = install_action(signal, &handler.to_action()) {
            error!(%signal, error = %e, "failed to restore signal handler");
        }
    }
}

fn watch(mut listen: UnixStream, shared: Arc<Shared>) {
    let mut buf = [0u8; 1];
    loop {
        match listen.read(&mut buf) {
            Ok(0) => return,
            Ok(_) if buf[0] == STOP_BYTE => return,
            Ok(_) => match Signal::try_from(libc::c_int::from(buf[0])) {
                Ok(signal) => handle(&shared, signal),
                Err(e) => error!(signum = buf[0], error = %e, "unknown signal number"),
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "signal watcher stopped");
                return;
            }
        }
    }
}

fn handle(shared: &Shared, signal: Signal) {
    shared.recorder.lock().record_signal(signal.as_str());
    let (handler, pid) = {
        let table = shared.table.lock();
        (table.real_handler(signal).unwrap_or(AppHandler::Default), table.pid)
    };
    match handler {
        AppHandler::Ignore => {}
        AppHandler::Handler(f) => f(signal as libc::c_int),
        AppHandler::Default | AppHandler::Native(_) => {
            if handler == AppHandler::Default {
                info!(%pid, %signal, "killing process with signal");
            }
            if let Err(e) = redeliver(signal, handler) {
                error!(%signal, error = %e, "failed to redeliver signal");
            }
        }
    }
}

/// Puts the application's disposition back, raises the signal on this
/// thread, and if the process survives, intercepts it again.
fn redeliver(signal: Signal, handler: AppHandler) -> Result<()> {
    install_action(signal, &handler.to_action())?;
    let raised = raise(signal)
        .map_err(|e| Error::signal_install(format!("raise({}) failed: {}", signal, e)));
    install_action(signal, &recording_action())?;
    raised
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::ScriptRecorder;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};

    static SERIAL: Mutex<()> = parking_lot::const_mutex(());
    static USR1_SEEN: AtomicBool = AtomicBool::new(false);
    const CHILD_VAR: &str = "STORYTEXT_SIGNAL_TEST_CHILD";

    extern "C" fn on_usr1(_signum: libc::c_int) {
        USR1_SEEN.store(true, Ordering::SeqCst);
    }

    fn recorder_for(path: &Path) -> SharedRecorder {
        let mut recorder = ScriptRecorder::new();
        recorder.add_script(path);
        recorder.into_shared()
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn ignore_list_and_uncatchables_excluded() {
        let signals = catchable_signals();
        assert!(signals.contains(&Signal::SIGTERM));
        assert!(signals.contains(&Signal::SIGINT));
        for s in IGNORED_SIGNALS.iter().chain(&[Signal::SIGKILL, Signal::SIGSTOP]) {
            assert!(!signals.contains(s), "{} should not be intercepted", s);
        }
    }

    #[test]
    fn only_one_interceptor_per_process() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let recorder = recorder_for(&dir.path().join("usecase"));
        let first = SignalInterceptor::install_for(recorder.clone(), &[Signal::SIGUSR2]).unwrap();
        let err = SignalInterceptor::install_for(recorder.clone(), &[Signal::SIGUSR2]).err().unwrap();
        assert_eq!(err.code, crate::error::ErrorCode::SignalInstall);
        first.uninstall();
        let again = SignalInterceptor::install_for(recorder, &[Signal::SIGUSR2]).unwrap();
        assert!(again.intercepts(Signal::SIGUSR2));
    }

    #[test]
    fn app_handler_called_after_recording() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usecase");
        let interceptor = SignalInterceptor::install_for(recorder_for(&path), &[Signal::SIGUSR1]).unwrap();
        let previous = interceptor
            .register_handler(Signal::SIGUSR1, AppHandler::Handler(on_usr1))
            .unwrap();
        assert_eq!(previous, AppHandler::Default);

        USR1_SEEN.store(false, Ordering::SeqCst);
        raise(Signal::SIGUSR1).unwrap();
        assert!(wait_for(|| USR1_SEEN.load(Ordering::SeqCst)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "receive signal SIGUSR1\n");

        // the application's handler is what remains once we stop recording
        interceptor.uninstall();
        USR1_SEEN.store(false, Ordering::SeqCst);
        raise(Signal::SIGUSR1).unwrap();
        assert!(USR1_SEEN.load(Ordering::SeqCst));
        install_action(Signal::SIGUSR1, &AppHandler::Default.to_action()).unwrap();
    }

    #[test]
    fn ignored_by_app_is_only_recorded() {
        let _serial = SERIAL.lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usecase");
        let interceptor = SignalInterceptor::install_for(recorder_for(&path), &[Signal::SIGUSR2]).unwrap();
        interceptor.register_handler(Signal::SIGUSR2, AppHandler::Ignore).unwrap();
        raise(Signal::SIGUSR2).unwrap();
        raise(Signal::SIGUSR2).unwrap();
        let expected = "receive signal SIGUSR2\nreceive signal SIGUSR2\n";
        assert!(wait_for(|| fs::read_to_string(&path).unwrap_or_default() == expected));
        drop(interceptor);
        install_action(Signal::SIGUSR2, &AppHandler::Default.to_action()).unwrap();
    }

    #[test]
    fn default_disposition_terminates_after_recording() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::Command;

        if let Ok(path) = std::env::var(CHILD_VAR) {
            let _serial = SERIAL.lock();
            let _interceptor =
                SignalInterceptor::install_for(recorder_for(Path::new(&path)), &[Signal::SIGTERM]).unwrap();
            raise(Signal::SIGTERM).unwrap();
            thread::sleep(Duration::from_secs(10));
            panic!("process survived SIGTERM");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usecase");
        let status = Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "signals::tests::default_disposition_terminates_after_recording",
                "--test-threads=1",
                "--nocapture",
            ])
            .env(CHILD_VAR, &path)
            .status()
            .unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
        assert_eq!(fs::read_to_string(&path).unwrap(), "receive signal SIGTERM\n");
    }
}
