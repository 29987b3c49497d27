//! Keyed alert rate limiter.
//!
//! ```text
//!  allow("wifi.disconnected", now, 60 s)
//!        │
//!        ▼
//!  ┌────────────────────────────── table (48 slots) ───┐
//!  │ key                │ last_emit │ suppressed │ once │
//!  │ wifi.disconnected  │  120_000  │     3      │  -   │
//!  │ system.factory_... │     -     │     0      │  ✓   │
//!  └────────────────────────────────────────────────────┘
//! ```
//!
//! Every caller shares one table behind a critical-section mutex, so the
//! limiter can be a `static` used from any task or callback.  Lookup is a
//! linear scan; the table is small and never shrinks.
//!
//! When the table is full, or the key is empty, the limiter fails open:
//! an alert is never lost because of limiter bookkeeping.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

pub const CAPACITY: usize = 48;
pub const MAX_KEY_LEN: usize = 64;

/// Outcome of [`RateLimiter::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Emit now.  `suppressed` is how many calls were blocked since the
    /// previous emission; the counter has been reset.
    Allowed { suppressed: u32 },
    /// Still cooling down.  `pending` is the running suppressed count.
    Suppressed { pending: u32 },
}

impl Verdict {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

struct Entry {
    key: heapless::String<MAX_KEY_LEN>,
    last_emit_ms: Option<u32>,
    suppressed: u32,
    once_fired: bool,
}

type Table = heapless::Vec<Entry, CAPACITY>;

pub struct RateLimiter {
    table: Mutex<CriticalSectionRawMutex, RefCell<Table>>,
}

/// Limiter shared by every task in the firmware.
pub static ALERT_LIMITER: RateLimiter = RateLimiter::new();

impl RateLimiter {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Decide whether the alert `key` may be emitted at `now_ms`.
    ///
    /// The elapsed time is computed with wrapping subtraction, so the
    /// 49-day rollover of a `u32` millisecond counter is harmless.
    pub fn allow(&self, key: &str, now_ms: u32, cooldown_ms: u32) -> Verdict {
        self.table.lock(|cell| {
            let mut table = cell.borrow_mut();
            let Some(entry) = find_or_alloc(&mut table, key) else {
                return Verdict::Allowed { suppressed: 0 };
            };

            let due = entry
                .last_emit_ms
                .is_none_or(|last| now_ms.wrapping_sub(last) >= cooldown_ms);

            if due {
                let suppressed = entry.suppressed;
                entry.suppressed = 0;
                entry.last_emit_ms = Some(now_ms);
                Verdict::Allowed { suppressed }
            } else {
                entry.suppressed = entry.suppressed.saturating_add(1);
                Verdict::Suppressed { pending: entry.suppressed }
            }
        })
    }

    /// Record an emission of `key` regardless of cooldown and return the
    /// suppressed count it absorbs.
    pub fn force(&self, key: &str, now_ms: u32) -> u32 {
        self.table.lock(|cell| {
            let mut table = cell.borrow_mut();
            match find_or_alloc(&mut table, key) {
                Some(entry) => {
                    entry.last_emit_ms = Some(now_ms);
                    core::mem::take(&mut entry.suppressed)
                }
                None => 0,
            }
        })
    }

    /// `true` only on the first call for `key` during this boot.
    pub fn once(&self, key: &str) -> bool {
        self.table.lock(|cell| {
            let mut table = cell.borrow_mut();
            match find_or_alloc(&mut table, key) {
                Some(entry) => !core::mem::replace(&mut entry.once_fired, true),
                None => true,
            }
        })
    }

    /// Number of distinct keys tracked so far.
    pub fn len(&self) -> usize {
        self.table.lock(|cell| cell.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys longer than [`MAX_KEY_LEN`] are truncated on a char boundary, so
/// two keys sharing a 64-byte prefix share one slot.
fn truncated(key: &str) -> &str {
    if key.len() <= MAX_KEY_LEN {
        return key;
    }
    let mut end = MAX_KEY_LEN;
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    &key[..end]
}

fn find_or_alloc<'t>(table: &'t mut Table, key: &str) -> Option<&'t mut Entry> {
    if key.is_empty() {
        return None;
    }
    let key = truncated(key);

    if let Some(idx) = table.iter().position(|e| e.key == key) {
        return table.get_mut(idx);
    }

    let mut stored = heapless::String::new();
    stored.push_str(key).ok()?;
    table
        .push(Entry {
            key: stored,
            last_emit_ms: None,
            suppressed: 0,
            once_fired: false,
        })
        .ok()?;
    table.last_mut()
}
