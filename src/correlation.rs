//! Matching replies to the calls that prompted them.
//!
//! Every method call carries a serial; the method return or error that
//! answers it carries the same number as its reply-serial header field. A
//! [`CallTable`] holds whatever the caller wants remembered per outstanding
//! call until the answer shows up, and a [`SerialCounter`] hands out the
//! serials themselves.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// One outstanding call awaiting its reply.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingCall<T> {
    pub created: Instant,
    pub metadata: T,
}

/// Outstanding calls keyed by serial.
///
/// The table never decides what a reply means; it only pairs a reply-serial
/// with the metadata registered when the call went out. A reply-serial with
/// no entry is not an error here, so [`resolve`] returns an `Option` and the
/// caller picks a policy (a late reply after a timeout sweep looks exactly
/// like a reply nobody asked for).
///
/// [`resolve`]: CallTable::resolve
#[derive(Debug, Default)]
pub struct CallTable<T> {
    calls: Mutex<HashMap<u32, PendingCall<T>>>,
}

impl<T> CallTable<T> {
    pub fn new() -> CallTable<T> {
        CallTable {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Remember `metadata` for an outgoing call with the given serial.
    ///
    /// Registering a serial that is already outstanding is a caller bug and
    /// is rejected rather than silently replacing the earlier entry.
    pub fn register(&self, serial: u32, metadata: T) -> Result<()> {
        let mut calls = self.lock();
        match calls.entry(serial) {
            Entry::Occupied(_) => Err(Error::DuplicateSerial(serial)),
            Entry::Vacant(slot) => {
                trace!("registered call with serial {}", serial);
                slot.insert(PendingCall {
                    created: Instant::now(),
                    metadata,
                });
                Ok(())
            }
        }
    }

    /// Take the metadata registered under `reply_serial`, if any.
    ///
    /// Removal is atomic with the lookup: a second resolve of the same serial
    /// gets `None`, whichever thread asked first.
    pub fn resolve(&self, reply_serial: u32) -> Option<T> {
        let entry = self.lock().remove(&reply_serial);
        match &entry {
            Some(call) => trace!(
                "resolved serial {} after {:?}",
                reply_serial,
                call.created.elapsed()
            ),
            None => trace!("no outstanding call for reply serial {}", reply_serial),
        }
        entry.map(|call| call.metadata)
    }

    /// Remove and return every call older than `max_age`.
    ///
    /// Timeouts are driven from outside; the table itself has no clock
    /// loop. Replies arriving after a sweep resolve to `None`.
    pub fn sweep(&self, max_age: Duration) -> Vec<(u32, T)> {
        let cutoff = Instant::now();
        let mut calls = self.lock();
        let expired: Vec<u32> = calls
            .iter()
            .filter(|(_, call)| cutoff.duration_since(call.created) > max_age)
            .map(|(&serial, _)| serial)
            .collect();
        expired
            .into_iter()
            .filter_map(|serial| {
                trace!("timing out call with serial {}", serial);
                calls.remove(&serial).map(|call| (serial, call.metadata))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, PendingCall<T>>> {
        // Lock poisoning means a panic elsewhere already took the process
        // down a path where the table contents no longer matter.
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Source of message serials for one connection.
///
/// Serials start at 1 and wrap around zero: the D-Bus specification reserves
/// serial 0 as invalid.
#[derive(Debug)]
pub struct SerialCounter(AtomicU32);

impl SerialCounter {
    pub fn new() -> SerialCounter {
        SerialCounter(AtomicU32::new(1))
    }

    pub fn next_serial(&self) -> u32 {
        loop {
            let serial = self.0.fetch_add(1, Ordering::Relaxed);
            if serial != 0 {
                return serial;
            }
        }
    }
}

impl Default for SerialCounter {
    fn default() -> SerialCounter {
        SerialCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{CallTable, SerialCounter};
    use crate::error::{Error, ErrorKind, Result};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use test_log::test;

    #[test]
    fn register_resolve_once() -> Result<()> {
        let table = CallTable::new();
        table.register(7, "get-name")?;
        assert_eq!(table.len(), 1);

        assert_eq!(table.resolve(7), Some("get-name"));
        assert_eq!(table.resolve(7), None);
        assert_eq!(table.resolve(99), None);
        assert!(table.is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_serial_rejected() -> Result<()> {
        let table = CallTable::new();
        table.register(7, 1)?;
        let err = table.register(7, 2).unwrap_err();
        assert_eq!(err, Error::DuplicateSerial(7));
        assert_eq!(err.kind(), ErrorKind::Correlation);
        // The original entry survives.
        assert_eq!(table.resolve(7), Some(1));
        Ok(())
    }

    #[test]
    fn sweep_expires_only_old_calls() -> Result<()> {
        let table = CallTable::new();
        table.register(1, "old")?;
        table.register(2, "fresh")?;

        // Nothing is older than an hour.
        assert_eq!(table.sweep(Duration::from_secs(3600)), vec![]);
        assert_eq!(table.len(), 2);

        // Backdate one entry rather than sleeping; a coarse clock may not
        // tick at all between register and sweep.
        if let Some(call) = table.lock().get_mut(&1) {
            call.created = call
                .created
                .checked_sub(Duration::from_secs(10))
                .expect("test clock predates its own epoch");
        }

        assert_eq!(table.sweep(Duration::from_secs(5)), vec![(1, "old")]);
        assert_eq!(table.len(), 1);

        // A reply that shows up after the sweep resolves to nothing; the
        // surviving call is untouched.
        assert_eq!(table.resolve(1), None);
        assert_eq!(table.resolve(2), Some("fresh"));
        Ok(())
    }

    #[test]
    fn serials_start_at_one_and_skip_zero() {
        let counter = SerialCounter::new();
        assert_eq!(counter.next_serial(), 1);
        assert_eq!(counter.next_serial(), 2);

        counter.0.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(counter.next_serial(), u32::MAX);
        // Wraps past the reserved zero.
        assert_eq!(counter.next_serial(), 1);
    }
}
