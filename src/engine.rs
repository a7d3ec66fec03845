//! Turns the stream of power and device notifications into "lock" or "ignore".
//!
//! Each event runs through a fixed chain of guards. A guard either lets the
//! event continue or hands it back for default handling. Events that survive
//! every guard are settled by a fresh display census: the workstation is only
//! locked when no monitor is left. Nothing is remembered between events.

use tracing::{event, Level};

use crate::error::Result;
use crate::event::{PowerSetting, SystemEvent};

/// What the engine needs from the machine it runs on.
pub trait Workstation {
    /// Queried for every event, since remoting can start or stop at any time.
    fn is_remote_session(&self) -> bool;

    /// Live number of attached monitors.
    fn display_count(&self) -> usize;

    /// Lock the interactive session.
    fn lock(&self) -> Result<()>;
}

/// How a dispatched event was dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Not ours to decide; the caller must run default handling.
    Forward,
    Handled(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Locked,
    LockFailed,
    DisplaysActive(usize),
}

enum Step {
    Continue,
    PassThrough(&'static str),
}

type Guard = fn(&SystemEvent, &dyn Workstation) -> Step;

/// Evaluated in order; the first `PassThrough` wins.
const GUARDS: [Guard; 4] = [relevant_class, local_session, watched_setting, inactive_state];

fn relevant_class(event: &SystemEvent, _: &dyn Workstation) -> Step {
    match event {
        SystemEvent::PowerSettingChanged { .. } => {
            event!(Level::DEBUG, "Power setting changed");
            Step::Continue
        }
        SystemEvent::DeviceInterfaceRemoved => {
            event!(Level::DEBUG, "Monitor interface removed");
            Step::Continue
        }
        SystemEvent::Other => Step::PassThrough("irrelevant message"),
    }
}

fn local_session(_: &SystemEvent, station: &dyn Workstation) -> Step {
    if station.is_remote_session() {
        Step::PassThrough("session is currently remote")
    } else {
        Step::Continue
    }
}

fn watched_setting(event: &SystemEvent, _: &dyn Workstation) -> Step {
    match event {
        SystemEvent::PowerSettingChanged {
            setting: PowerSetting::Unrelated(guid),
            ..
        } => {
            event!(Level::DEBUG, %guid, "Unwatched power setting");
            Step::PassThrough("irrelevant power setting")
        }
        _ => Step::Continue,
    }
}

fn inactive_state(event: &SystemEvent, _: &dyn Workstation) -> Step {
    match event {
        SystemEvent::PowerSettingChanged { setting, state } => {
            event!(Level::DEBUG, ?setting, state, "Power setting state");
            if *state == 0 {
                Step::Continue
            } else {
                Step::PassThrough("power setting still active")
            }
        }
        _ => Step::Continue,
    }
}

pub struct DecisionEngine<W> {
    station: W,
}

impl<W: Workstation> DecisionEngine<W> {
    pub fn new(station: W) -> Self {
        Self { station }
    }

    pub fn handle(&self, event: &SystemEvent) -> Flow {
        for guard in GUARDS {
            if let Step::PassThrough(reason) = guard(event, &self.station) {
                event!(Level::DEBUG, reason, "Forwarding to default handling");
                return Flow::Forward;
            }
        }
        Flow::Handled(self.confirm())
    }

    /// The triggering event is only a hint; the census has the final word.
    fn confirm(&self) -> Verdict {
        let displays = self.station.display_count();
        if displays > 0 {
            event!(
                Level::INFO,
                displays,
                "Still have active monitors, ignored locking"
            );
            return Verdict::DisplaysActive(displays);
        }

        event!(Level::INFO, "Locking");
        match self.station.lock() {
            Ok(()) => {
                event!(Level::INFO, "Locked");
                Verdict::Locked
            }
            Err(err) => {
                event!(Level::ERROR, "locking workstation {}", err);
                Verdict::LockFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{Guid, GUID_DEVINTERFACE_MONITOR};
    use std::cell::Cell;

    struct FakeStation {
        remote: bool,
        displays: usize,
        lock_fails: bool,
        censuses: Cell<usize>,
        locks: Cell<usize>,
    }

    impl FakeStation {
        fn local(displays: usize) -> Self {
            Self {
                remote: false,
                displays,
                lock_fails: false,
                censuses: Cell::new(0),
                locks: Cell::new(0),
            }
        }

        fn remote(displays: usize) -> Self {
            Self {
                remote: true,
                ..Self::local(displays)
            }
        }
    }

    impl Workstation for &FakeStation {
        fn is_remote_session(&self) -> bool {
            self.remote
        }

        fn display_count(&self) -> usize {
            self.censuses.set(self.censuses.get() + 1);
            self.displays
        }

        fn lock(&self) -> Result<()> {
            self.locks.set(self.locks.get() + 1);
            if self.lock_fails {
                return Err(Error::Win32 {
                    call: "LockWorkStation",
                    code: 5,
                    message: "Access is denied.".to_string(),
                });
            }
            Ok(())
        }
    }

    fn lid(state: u32) -> SystemEvent {
        SystemEvent::PowerSettingChanged {
            setting: PowerSetting::LidSwitch,
            state,
        }
    }

    fn monitor_power(state: u32) -> SystemEvent {
        SystemEvent::PowerSettingChanged {
            setting: PowerSetting::MonitorPowerOn,
            state,
        }
    }

    fn all_events() -> Vec<SystemEvent> {
        vec![
            lid(0),
            lid(1),
            monitor_power(0),
            monitor_power(1),
            monitor_power(2),
            SystemEvent::power_setting(GUID_DEVINTERFACE_MONITOR, 0),
            SystemEvent::DeviceInterfaceRemoved,
            SystemEvent::Other,
        ]
    }

    #[test]
    fn lid_closed_without_displays_locks() {
        let station = FakeStation::local(0);
        let flow = DecisionEngine::new(&station).handle(&lid(0));

        assert_eq!(flow, Flow::Handled(Verdict::Locked));
        assert_eq!(station.locks.get(), 1);
    }

    #[test]
    fn lid_closed_with_external_monitor_does_not_lock() {
        let station = FakeStation::local(2);
        let flow = DecisionEngine::new(&station).handle(&lid(0));

        assert_eq!(flow, Flow::Handled(Verdict::DisplaysActive(2)));
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn monitor_powered_on_is_forwarded() {
        let station = FakeStation::local(0);
        let flow = DecisionEngine::new(&station).handle(&monitor_power(1));

        assert_eq!(flow, Flow::Forward);
        assert_eq!(station.censuses.get(), 0);
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn device_removal_in_remote_session_is_forwarded() {
        let station = FakeStation::remote(0);
        let flow = DecisionEngine::new(&station).handle(&SystemEvent::DeviceInterfaceRemoved);

        assert_eq!(flow, Flow::Forward);
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn unrelated_message_skips_the_census() {
        let station = FakeStation::local(0);
        let flow = DecisionEngine::new(&station).handle(&SystemEvent::Other);

        assert_eq!(flow, Flow::Forward);
        assert_eq!(station.censuses.get(), 0);
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn remote_session_never_locks() {
        let station = FakeStation::remote(0);
        let engine = DecisionEngine::new(&station);
        for event in all_events() {
            assert_eq!(engine.handle(&event), Flow::Forward, "{event:?}");
        }
        assert_eq!(station.censuses.get(), 0);
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn unwatched_power_setting_is_forwarded() {
        let station = FakeStation::local(0);
        let engine = DecisionEngine::new(&station);
        let unrelated = Guid::from_u128(0x5d3e9a59_e9d5_4b00_a6bd_ff34ff516548);
        for state in [0, 1, 2] {
            let flow = engine.handle(&SystemEvent::power_setting(unrelated, state));
            assert_eq!(flow, Flow::Forward);
        }
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn nonzero_state_is_forwarded_for_both_settings() {
        let station = FakeStation::local(0);
        let engine = DecisionEngine::new(&station);
        for event in [lid(1), lid(7), monitor_power(1), monitor_power(2)] {
            assert_eq!(engine.handle(&event), Flow::Forward, "{event:?}");
        }
        assert_eq!(station.censuses.get(), 0);
        assert_eq!(station.locks.get(), 0);
    }

    #[test]
    fn locks_exactly_when_census_reports_zero() {
        for displays in [0, 1, 3] {
            for event in [lid(0), monitor_power(0), SystemEvent::DeviceInterfaceRemoved] {
                let station = FakeStation::local(displays);
                let flow = DecisionEngine::new(&station).handle(&event);

                assert!(matches!(flow, Flow::Handled(_)));
                assert_eq!(station.locks.get(), usize::from(displays == 0), "{event:?}");
            }
        }
    }

    #[test]
    fn census_runs_again_for_every_qualifying_event() {
        let station = FakeStation::local(1);
        let engine = DecisionEngine::new(&station);
        engine.handle(&lid(0));
        engine.handle(&SystemEvent::DeviceInterfaceRemoved);
        engine.handle(&monitor_power(0));

        assert_eq!(station.censuses.get(), 3);
    }

    #[test]
    fn failed_lock_is_reported_once_without_retry() {
        let station = FakeStation {
            lock_fails: true,
            ..FakeStation::local(0)
        };
        let flow = DecisionEngine::new(&station).handle(&SystemEvent::DeviceInterfaceRemoved);

        assert_eq!(flow, Flow::Handled(Verdict::LockFailed));
        assert_eq!(station.locks.get(), 1);
    }
}
