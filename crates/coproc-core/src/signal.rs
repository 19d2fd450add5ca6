//! Per-team 32-bit signal register with wait/notify.
//!
//! Each team owns one [`TeamSignals`]. Setting a bit that was clear wakes
//! every pending `wait` whose mask contains it and calls every listener
//! registered for it; setting an already-set bit does nothing. `clear` and
//! `reset` never notify. `reset` is the kernel's cancellation primitive: it
//! rejects all pending waits with [`SignalError::Reset`].
//!
//! Waiters are `oneshot` channels held under a `Mutex`; callbacks run after
//! the lock is released so they may call back into the register.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use coproc_types::error::SignalError;
use tokio::sync::oneshot;

/// Highest valid bit position.
pub const MAX_SIGNAL_BIT: u32 = 31;

/// Persistent per-bit callback.
pub type SignalCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Handle returned by [`TeamSignals::on_signal`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Mask with only `bit` set.
pub fn signal_bit(bit: u32) -> Result<u32, SignalError> {
    if bit > MAX_SIGNAL_BIT {
        return Err(SignalError::BitOutOfRange(bit));
    }
    Ok(1u32 << bit)
}

struct Waiter {
    mask: u32,
    tx: oneshot::Sender<Result<u32, SignalError>>,
}

#[derive(Default)]
struct Registers {
    value: u32,
    waiters: Vec<Waiter>,
    listeners: HashMap<u32, Vec<(ListenerId, SignalCallback)>>,
    next_listener: u64,
}

/// The signal register of one team.
pub struct TeamSignals {
    chip_name: String,
    inner: Mutex<Registers>,
}

impl TeamSignals {
    pub fn new(chip_name: impl Into<String>) -> Self {
        Self {
            chip_name: chip_name.into(),
            inner: Mutex::new(Registers::default()),
        }
    }

    pub fn chip_name(&self) -> &str {
        &self.chip_name
    }

    /// Current register value.
    pub fn register(&self) -> u32 {
        self.lock().value
    }

    pub fn is_set(&self, bit: u32) -> Result<bool, SignalError> {
        let mask = signal_bit(bit)?;
        Ok(self.lock().value & mask != 0)
    }

    /// Set a bit. Waiters and listeners are notified only on a 0→1 transition.
    pub fn signal(&self, bit: u32) -> Result<(), SignalError> {
        let mask = signal_bit(bit)?;

        let (woken, callbacks) = {
            let mut regs = self.lock();
            if regs.value & mask != 0 {
                return Ok(());
            }
            regs.value |= mask;

            let (woken, pending): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut regs.waiters)
                .into_iter()
                .partition(|w| w.mask & mask != 0);
            regs.waiters = pending;

            let callbacks: Vec<SignalCallback> = regs
                .listeners
                .get(&bit)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default();
            (woken, callbacks)
        };

        tracing::debug!(
            chip = %self.chip_name,
            bit,
            waiters = woken.len(),
            listeners = callbacks.len(),
            "signal raised"
        );
        for waiter in woken {
            // A dropped receiver means the waiter gave up; nothing to deliver.
            let _ = waiter.tx.send(Ok(bit));
        }
        for callback in callbacks {
            callback(bit);
        }
        Ok(())
    }

    /// Clear a bit without notifying anyone.
    pub fn clear(&self, bit: u32) -> Result<(), SignalError> {
        let mask = signal_bit(bit)?;
        self.lock().value &= !mask;
        Ok(())
    }

    /// Wait until any bit in `mask` is set and return that bit.
    ///
    /// Resolves immediately (with the lowest satisfied bit) when the register
    /// already intersects the mask. Fails with [`SignalError::Reset`] if the
    /// register is reset while waiting.
    pub async fn wait(&self, mask: u32) -> Result<u32, SignalError> {
        if mask == 0 {
            return Err(SignalError::EmptyMask);
        }

        let rx = {
            let mut regs = self.lock();
            let hit = regs.value & mask;
            if hit != 0 {
                return Ok(hit.trailing_zeros());
            }
            let (tx, rx) = oneshot::channel();
            regs.waiters.retain(|w| !w.tx.is_closed());
            regs.waiters.push(Waiter { mask, tx });
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SignalError::Reset {
                chip: self.chip_name.clone(),
            }),
        }
    }

    /// Register a persistent callback for one bit.
    pub fn on_signal(
        &self,
        bit: u32,
        callback: impl Fn(u32) + Send + Sync + 'static,
    ) -> Result<ListenerId, SignalError> {
        signal_bit(bit)?;
        let mut regs = self.lock();
        let id = ListenerId(regs.next_listener);
        regs.next_listener += 1;
        regs.listeners
            .entry(bit)
            .or_default()
            .push((id, Arc::new(callback)));
        Ok(id)
    }

    /// Unregister a callback. Returns `false` if it was not registered for `bit`.
    pub fn off_signal(&self, bit: u32, id: ListenerId) -> bool {
        let mut regs = self.lock();
        let Some(list) = regs.listeners.get_mut(&bit) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener, _)| *listener != id);
        let removed = list.len() != before;
        if list.is_empty() {
            regs.listeners.remove(&bit);
        }
        removed
    }

    /// Zero the register, reject all pending waits and drop all listeners.
    pub fn reset(&self) {
        let waiters = {
            let mut regs = self.lock();
            regs.value = 0;
            regs.listeners.clear();
            std::mem::take(&mut regs.waiters)
        };
        tracing::debug!(chip = %self.chip_name, rejected = waiters.len(), "signal register reset");
        for waiter in waiters {
            let _ = waiter.tx.send(Err(SignalError::Reset {
                chip: self.chip_name.clone(),
            }));
        }
    }

    /// Number of waits still pending (excluding abandoned ones).
    pub fn pending_waiters(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|w| !w.tx.is_closed())
            .count()
    }

    pub fn listener_count(&self, bit: u32) -> usize {
        self.lock().listeners.get(&bit).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registers> {
        self.inner.lock().expect("signal register lock poisoned")
    }
}

impl std::fmt::Debug for TeamSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let regs = self.lock();
        f.debug_struct("TeamSignals")
            .field("chip_name", &self.chip_name)
            .field("register", &format!("{:#034b}", regs.value))
            .field("waiters", &regs.waiters.len())
            .finish()
    }
}
