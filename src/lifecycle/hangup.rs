//! Hangup interception
//!
//! Bridges OS termination signals to a shutdown request. The OS-level hook
//! is attached lazily, on the first wait, and at most once per coordinator.

use super::ShutdownTrigger;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::Display;

const ENABLED: u8 = 0b01;
const INSTALLED: u8 = 0b10;

/// Installation state of the hangup interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HangupState {
    NotInstalled,
    InstalledEnabled,
    InstalledDisabled,
}

/// Result of toggling hangup support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupToggle {
    /// The setting will be honoured when the hook is installed
    Applied,
    /// Installation was already attempted; the setting has no effect
    Ignored,
}

/// Something that can attach a termination-signal callback to the process
///
/// Implementations must call [`ShutdownTrigger::fire`] when the signal
/// arrives. `install` is called at most once per interceptor.
pub trait SignalHook: Send + Sync {
    fn install(&self, trigger: ShutdownTrigger) -> anyhow::Result<()>;
}

/// Hook backed by tokio's OS signal streams
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignalHook;

impl SignalHook for OsSignalHook {
    fn install(&self, trigger: ShutdownTrigger) -> anyhow::Result<()> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(intercept(trigger));
            return Ok(());
        }

        // no runtime on this thread (blocking host), so the hook gets its own
        std::thread::Builder::new()
            .name("conduit-hangup-interceptor".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(intercept(trigger)),
                    Err(e) => tracing::error!("Cannot start hangup interceptor runtime: {}", e),
                }
            })?;
        Ok(())
    }
}

async fn intercept(trigger: ShutdownTrigger) {
    let received = match termination_signal().await {
        Ok(name) => name,
        Err(e) => {
            tracing::error!("Cannot listen for termination signals: {}", e);
            return;
        }
    };

    tracing::info!(signal = received, "Received hang up - stopping the main instance");
    match catch_unwind(AssertUnwindSafe(|| trigger.fire())) {
        Ok(true) => {}
        Ok(false) => tracing::debug!("Shutdown was already requested"),
        Err(_) => tracing::warn!("Error during stopping the main instance"),
    }
}

/// Wait for a termination signal and return its name
///
/// Listens for SIGHUP, SIGTERM and SIGINT on unix, Ctrl+C elsewhere.
pub async fn termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = hangup.recv() => Ok("SIGHUP"),
            _ = terminate.recv() => Ok("SIGTERM"),
            _ = interrupt.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("CTRL_C")
    }
}

/// Enable flag plus at-most-once installation of a [`SignalHook`]
pub struct SignalInterceptor {
    // ENABLED | INSTALLED bits, updated together so toggles and installation cannot interleave
    bits: AtomicU8,
    hook: Arc<dyn SignalHook>,
}

impl SignalInterceptor {
    /// Create an enabled, not yet installed interceptor
    pub fn new(hook: Arc<dyn SignalHook>) -> Self {
        Self {
            bits: AtomicU8::new(ENABLED),
            hook,
        }
    }

    /// Whether hangup support is enabled
    pub fn is_enabled(&self) -> bool {
        self.bits.load(Ordering::Acquire) & ENABLED != 0
    }

    pub fn state(&self) -> HangupState {
        let bits = self.bits.load(Ordering::Acquire);
        match (bits & INSTALLED != 0, bits & ENABLED != 0) {
            (false, _) => HangupState::NotInstalled,
            (true, true) => HangupState::InstalledEnabled,
            (true, false) => HangupState::InstalledDisabled,
        }
    }

    /// Enable or disable hangup support.
    ///
    /// Only effective before the first installation attempt.
    pub fn set_enabled(&self, enabled: bool) -> HangupToggle {
        let result = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                if bits & INSTALLED != 0 {
                    return None;
                }
                Some(if enabled { bits | ENABLED } else { bits & !ENABLED })
            });

        match result {
            Ok(_) => HangupToggle::Applied,
            Err(bits) => {
                tracing::warn!(
                    requested = enabled,
                    effective = bits & ENABLED != 0,
                    "Hangup interceptor already installed; toggle ignored"
                );
                HangupToggle::Ignored
            }
        }
    }

    /// Attempt installation.
    ///
    /// Returns `true` for the single call that performed the attempt. When
    /// disabled, the attempt is recorded but no hook is attached.
    pub fn install(&self, trigger: ShutdownTrigger) -> bool {
        let previous = self.bits.fetch_or(INSTALLED, Ordering::AcqRel);
        if previous & INSTALLED != 0 {
            return false;
        }
        if previous & ENABLED == 0 {
            tracing::debug!("Hangup interceptor disabled");
            return true;
        }

        match catch_unwind(AssertUnwindSafe(|| self.hook.install(trigger))) {
            Ok(Ok(())) => tracing::debug!("Hangup interceptor installed"),
            Ok(Err(e)) => tracing::error!("Cannot install hangup interceptor: {}", e),
            Err(_) => tracing::error!("Hangup interceptor installation panicked"),
        }
        true
    }
}

impl std::fmt::Debug for SignalInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalInterceptor")
            .field("state", &self.state())
            .finish()
    }
}
