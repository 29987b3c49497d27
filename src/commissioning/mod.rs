//! BLE commissioning state machine.
//!
//! One tagged state plus a declarative transition table:
//!
//! ```text
//! ┌─────────────────┬──────────────┬─────────────────┬──────────────┐
//! │ From            │ Event        │ To              │ Action       │
//! ├─────────────────┼──────────────┼─────────────────┼──────────────┤
//! │ Idle            │ Open         │ AdvertisingOpen │ OpenWindow   │
//! │ AdvertisingOpen │ Open         │ AdvertisingOpen │ OpenWindow   │
//! │ AdvertisingOpen │ PeerUp       │ ClientConnected │ CancelTimer  │
//! │ AdvertisingOpen │ Timeout      │ Idle            │ CloseWindow  │
//! │ ClientConnected │ PeerDown     │ AdvertisingOpen │ Readvertise  │
//! │ ClientConnected │ FieldWrite   │ ClientConnected │ StoreField   │
//! │ ClientConnected │ Commit       │ Done            │ Commit       │
//! │ Done            │ PeerDown     │ Done            │ ArmRestart   │
//! └─────────────────┴──────────────┴─────────────────┴──────────────┘
//! ```
//!
//! Anything not in the table is ignored, which makes duplicate connect
//! events and a close following a disconnect harmless.  The BLE callbacks
//! only post [`RadioEvent`]s; the commissioning task owns this machine and
//! feeds it those events plus a one-second [`Input::Tick`].
//!
//! Holding the button for 3 s is a factory reset and is handled in any
//! state.

pub mod fields;

use log::{debug, error, info, warn};
use serde_json::json;

use crate::alerts::{AlertRecord, COOLDOWN_10MIN, COOLDOWN_5MIN, RateLimiter, Severity, Subsystem, Verdict};
use crate::app::ports::{AlertSink, Clock, ConfigStore, RadioPort, RestartPort, StoragePort};
use crate::config::ProvisioningField;
use crate::restart::{self, RestartCause};
use fields::{COMMIT_BYTE, Characteristic, MAX_VALUE_LEN, Scratch};

/// How long the window stays open without a peer.
pub const WINDOW_MS: u32 = 2 * 60 * 1000;
/// Grace period between the peer leaving and the reboot.
pub const RESTART_GRACE_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissioningState {
    Idle,
    AdvertisingOpen,
    ClientConnected,
    Committing,
    Done,
}

/// What the BLE stack reported.  Produced from GATT callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    PeerConnected,
    PeerDisconnected,
    /// Some stacks end a link with a close and no disconnect.
    ConnectionClosed,
    FieldWritten {
        field: ProvisioningField,
        value: heapless::Vec<u8, MAX_VALUE_LEN>,
    },
    ControlWritten(heapless::Vec<u8, 4>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Short press.
    Button,
    /// Held for 3 s.
    ButtonHeld,
    Radio(RadioEvent),
    /// Periodic deadline check.
    Tick,
}

// ── Transition table ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Open,
    PeerUp,
    PeerDown,
    Timeout,
    FieldWrite,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    OpenWindow,
    CancelTimer,
    CloseWindow,
    Readvertise,
    StoreField,
    Commit,
    ArmRestart,
}

struct Transition {
    from: CommissioningState,
    event: EventKind,
    to: CommissioningState,
    action: Action,
}

const fn row(from: CommissioningState, event: EventKind, to: CommissioningState, action: Action) -> Transition {
    Transition { from, event, to, action }
}

use CommissioningState as S;

const TRANSITIONS: [Transition; 8] = [
    row(S::Idle, EventKind::Open, S::AdvertisingOpen, Action::OpenWindow),
    row(S::AdvertisingOpen, EventKind::Open, S::AdvertisingOpen, Action::OpenWindow),
    row(S::AdvertisingOpen, EventKind::PeerUp, S::ClientConnected, Action::CancelTimer),
    row(S::AdvertisingOpen, EventKind::Timeout, S::Idle, Action::CloseWindow),
    row(S::ClientConnected, EventKind::PeerDown, S::AdvertisingOpen, Action::Readvertise),
    row(S::ClientConnected, EventKind::FieldWrite, S::ClientConnected, Action::StoreField),
    row(S::ClientConnected, EventKind::Commit, S::Done, Action::Commit),
    row(S::Done, EventKind::PeerDown, S::Done, Action::ArmRestart),
];

fn lookup(from: CommissioningState, event: EventKind) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == from && t.event == event)
}

// ── Machine ──────────────────────────────────────────────────

pub struct Commissioning<'a, R, St, P, K> {
    radio: R,
    store: St,
    restarter: P,
    clock: K,
    limiter: &'a RateLimiter,
    device_id: heapless::String<12>,
    state: CommissioningState,
    scratch: Scratch,
    window_deadline_ms: Option<u32>,
    restart_at_ms: Option<u32>,
}

impl<'a, R, St, P, K> Commissioning<'a, R, St, P, K>
where
    R: RadioPort,
    St: StoragePort,
    P: RestartPort,
    K: Clock,
{
    pub fn new(radio: R, store: St, restarter: P, clock: K, limiter: &'a RateLimiter, device_id: &str) -> Self {
        let mut id = heapless::String::new();
        // A MAC-derived id always fits.
        let _ = id.push_str(device_id);
        Self {
            radio,
            store,
            restarter,
            clock,
            limiter,
            device_id: id,
            state: CommissioningState::Idle,
            scratch: Scratch::default(),
            window_deadline_ms: None,
            restart_at_ms: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn state(&self) -> CommissioningState {
        self.state
    }

    pub fn window_deadline_ms(&self) -> Option<u32> {
        self.window_deadline_ms
    }

    pub fn restart_pending(&self) -> bool {
        matches!(self.state, CommissioningState::Committing | CommissioningState::Done)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn restarter(&self) -> &P {
        &self.restarter
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    // ── Boot ─────────────────────────────────────────────────

    /// Report the previous restart cause and open the window if the device
    /// is not fully provisioned.  Returns `true` when provisioned.
    pub fn boot<A: AlertSink + ?Sized>(&mut self, sink: &mut A) -> bool {
        let now = self.clock.now();
        if let Some(cause) = restart::take_marker(&mut self.store) {
            info!("System: previous restart cause {:?}", cause);
            restart::report(cause, now.wall_ms, self.limiter, sink);
        }

        let cfg = self.store.load_provisioning();
        info!("Provisioning: loaded {:?}", cfg);
        if cfg.is_fully_provisioned() {
            return true;
        }

        warn!("Provisioning: incomplete (SSID + broker + MQTT login/pass + user id required)");
        if self.limiter.once("provisioning.incomplete") {
            sink.submit(AlertRecord::new(
                now.wall_ms,
                "provisioning.incomplete",
                Severity::Warning,
                Subsystem::Provisioning,
                "Device not fully provisioned. Measurements blocked until configured.",
            ));
        }
        self.dispatch(EventKind::Open, None, sink);
        false
    }

    // ── Event handling ───────────────────────────────────────

    pub fn handle<A: AlertSink + ?Sized>(&mut self, input: Input, sink: &mut A) {
        match input {
            Input::Button => {
                info!("Provisioning: button click, (re)opening window");
                self.dispatch(EventKind::Open, None, sink);
            }
            Input::ButtonHeld => self.factory_reset(),
            Input::Tick => self.tick(sink),
            Input::Radio(event) => self.on_radio(event, sink),
        }
    }

    fn on_radio<A: AlertSink + ?Sized>(&mut self, event: RadioEvent, sink: &mut A) {
        match event {
            RadioEvent::PeerConnected => {
                info!("BLE: peer connected");
                self.dispatch(EventKind::PeerUp, None, sink);
            }
            RadioEvent::PeerDisconnected | RadioEvent::ConnectionClosed => {
                info!("BLE: peer gone ({:?})", event);
                self.dispatch(EventKind::PeerDown, None, sink);
            }
            RadioEvent::FieldWritten { field, value } => {
                self.dispatch(EventKind::FieldWrite, Some((field, value.as_slice())), sink);
            }
            RadioEvent::ControlWritten(bytes) => {
                if bytes.as_slice() != [COMMIT_BYTE] {
                    debug!("BLE: control write {:02x?} ignored", bytes.as_slice());
                    return;
                }
                if !self.scratch.has_values() {
                    warn!("Provisioning: commit with nothing to save, ignored");
                    return;
                }
                self.dispatch(EventKind::Commit, None, sink);
            }
        }
    }

    fn tick<A: AlertSink + ?Sized>(&mut self, sink: &mut A) {
        let now_ms = self.clock.now().monotonic_ms;
        if let Some(at) = self.restart_at_ms {
            if deadline_passed(now_ms, at) {
                info!("System: restarting after commissioning");
                self.restart_at_ms = None;
                self.restarter.restart();
            }
            return;
        }
        if let Some(deadline) = self.window_deadline_ms {
            if deadline_passed(now_ms, deadline) {
                self.dispatch(EventKind::Timeout, None, sink);
            }
        }
    }

    fn dispatch<A: AlertSink + ?Sized>(
        &mut self,
        event: EventKind,
        write: Option<(ProvisioningField, &[u8])>,
        sink: &mut A,
    ) {
        let Some(t) = lookup(self.state, event) else {
            debug!("Provisioning: {:?} ignored in {:?}", event, self.state);
            return;
        };
        let (to, action) = (t.to, t.action);
        if to != self.state {
            info!("Provisioning: {:?} -> {:?}", self.state, to);
        }
        self.run(action, write, sink);
        self.state = to;
    }

    fn run<A: AlertSink + ?Sized>(
        &mut self,
        action: Action,
        write: Option<(ProvisioningField, &[u8])>,
        sink: &mut A,
    ) {
        match action {
            Action::OpenWindow => {
                self.scratch.clear();
                self.refresh_read_values();
                self.radio.start_advertising();
                self.arm_window();
            }
            Action::CancelTimer => self.window_deadline_ms = None,
            Action::CloseWindow => {
                warn!("Provisioning: window timed out, advertising stopped");
                self.window_deadline_ms = None;
                self.radio.stop_advertising();
                let now = self.clock.now();
                if self.limiter.allow("provisioning.timeout", now.monotonic_ms, COOLDOWN_10MIN).is_allowed() {
                    sink.submit(AlertRecord::new(
                        now.wall_ms,
                        "provisioning.timeout",
                        Severity::Warning,
                        Subsystem::Provisioning,
                        "Provisioning window timed out",
                    ));
                }
            }
            Action::Readvertise => {
                self.radio.start_advertising();
                self.arm_window();
            }
            Action::StoreField => {
                if let Some((field, value)) = write {
                    self.scratch.write(field, value);
                }
            }
            Action::Commit => self.commit(sink),
            Action::ArmRestart => {
                if self.restart_at_ms.is_none() {
                    info!("System: restart in {} ms", RESTART_GRACE_MS);
                    self.restart_at_ms = Some(self.clock.now().monotonic_ms.wrapping_add(RESTART_GRACE_MS));
                }
            }
        }
    }

    /// Readable characteristics serve the persisted values.
    fn refresh_read_values(&mut self) {
        for ch in Characteristic::ALL.into_iter().filter(|c| c.readable()) {
            let value = fields::read_value(ch, &self.store, &self.device_id);
            self.radio.set_read_value(ch, &value);
        }
    }

    fn arm_window(&mut self) {
        self.window_deadline_ms = Some(self.clock.now().monotonic_ms.wrapping_add(WINDOW_MS));
    }

    fn commit<A: AlertSink + ?Sized>(&mut self, sink: &mut A) {
        self.state = CommissioningState::Committing;
        info!("Provisioning: saving settings");
        self.window_deadline_ms = None;
        self.radio.stop_advertising();

        match self.scratch.persist(&mut self.store) {
            Ok(saved) => info!("Provisioning: {} field(s) saved", saved),
            Err(e) => {
                error!("Provisioning: save failed: {}", e);
                let now = self.clock.now();
                if let Verdict::Allowed { suppressed } =
                    self.limiter.allow("provisioning.save_failed", now.monotonic_ms, COOLDOWN_5MIN)
                {
                    sink.submit(
                        AlertRecord::new(
                            now.wall_ms,
                            "provisioning.save_failed",
                            Severity::Error,
                            Subsystem::Provisioning,
                            "Failed to save provisioning settings",
                        )
                        .with_details(json!({ "err": e.code(), "suppressed": suppressed })),
                    );
                }
            }
        }
        if let Err(e) = restart::write_marker(&mut self.store, RestartCause::CommissioningComplete) {
            warn!("System: restart marker not written: {}", e);
        }
        self.radio.disconnect_peer();
    }

    fn factory_reset(&mut self) {
        warn!("System: button held, erasing provisioning and restarting");
        if let Err(e) = self.store.erase_provisioning() {
            error!("System: provisioning erase failed: {}", e);
        }
        if let Err(e) = restart::write_marker(&mut self.store, RestartCause::FactoryReset) {
            warn!("System: restart marker not written: {}", e);
        }
        self.restarter.restart();
    }
}

fn deadline_passed(now_ms: u32, deadline_ms: u32) -> bool {
    now_ms.wrapping_sub(deadline_ms) < u32::MAX / 2
}
