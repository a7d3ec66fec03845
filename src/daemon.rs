//! Daemon lifecycle: singleton check, subscriptions, then the message pump.

use std::fmt;
use std::path::Path;

use tracing::{event, Level};

use crate::error::Result;
use crate::event::{
    Guid, GUID_DEVINTERFACE_MONITOR, GUID_LIDSWITCH_STATE_CHANGE, GUID_MONITOR_POWER_ON,
};
use crate::logging;

/// Name of the mutex that keeps a second instance out. The `Local\` prefix
/// puts it in the session namespace, so each logged-on user gets one daemon.
pub const SINGLETON_IDENTIFIER: &str = "Local\\{3DA16D16-5F02-4CFD-8C43-11C31127889D}";

/// Exit status when the message pump itself breaks.
const PUMP_FAILURE: i32 = 1;

pub enum Acquire<G> {
    /// The guard must stay alive for as long as the daemon runs.
    Acquired(G),
    AlreadyRunning,
}

/// One pumped message, or the request to stop with an exit code.
pub enum Pumped<M> {
    Message(M),
    Quit(usize),
}

/// Notifications the daemon asks the OS for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    MonitorPower,
    LidSwitch,
    MonitorInterface,
}

impl Subscription {
    pub const ALL: [Subscription; 3] = [
        Subscription::MonitorPower,
        Subscription::LidSwitch,
        Subscription::MonitorInterface,
    ];

    pub fn guid(self) -> Guid {
        match self {
            Subscription::MonitorPower => GUID_MONITOR_POWER_ON,
            Subscription::LidSwitch => GUID_LIDSWITCH_STATE_CHANGE,
            Subscription::MonitorInterface => GUID_DEVINTERFACE_MONITOR,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subscription::MonitorPower => "GUID_MONITOR_POWER_ON",
            Subscription::LidSwitch => "GUID_LIDSWITCH_STATE_CHANGE",
            Subscription::MonitorInterface => "GUID_DEVINTERFACE_MONITOR",
        };
        f.write_str(name)
    }
}

/// OS services the daemon lifecycle is built from.
pub trait Platform {
    /// Releases the singleton when dropped.
    type Guard;
    /// Handle of the window notifications are delivered to.
    type Target: Copy + Default + fmt::Debug;
    type Message;

    fn acquire(&self, identifier: &str) -> Result<Acquire<Self::Guard>>;
    fn register_class(&self) -> Result<()>;
    fn create_target(&self) -> Result<Self::Target>;
    fn subscribe(&self, target: Self::Target, subscription: Subscription) -> Result<()>;
    /// Blocks until the next message is available.
    fn next(&self) -> Result<Pumped<Self::Message>>;
    /// Runs the message through the window procedure before returning.
    fn dispatch(&self, message: &Self::Message);
}

/// Runs the daemon to completion and returns the process exit code.
///
/// Diagnostic logging to `log_file` only starts once this process owns the
/// singleton, so a duplicate instance leaves no trace.
pub fn run<P: Platform>(platform: &P, log_file: Option<&Path>) -> i32 {
    let _guard = match platform.acquire(SINGLETON_IDENTIFIER) {
        Ok(Acquire::AlreadyRunning) => return 0,
        Ok(Acquire::Acquired(guard)) => {
            init_logging(log_file);
            Some(guard)
        }
        Err(err) => {
            init_logging(log_file);
            event!(Level::WARN, "creating singleton mutex {}", err);
            None
        }
    };

    event!(Level::INFO, "Registering window class");
    if let Err(err) = platform.register_class() {
        event!(Level::ERROR, "registering window class {}", err);
    }

    event!(Level::INFO, "Creating window");
    let target = platform.create_target().unwrap_or_else(|err| {
        event!(Level::ERROR, "creating window {}", err);
        Default::default()
    });

    subscribe_all(platform, target);
    pump(platform)
}

fn init_logging(log_file: Option<&Path>) {
    if let Err(err) = logging::init(log_file) {
        eprintln!("lid-lock: {err}; diagnostic logging disabled");
    }
}

fn subscribe_all<P: Platform>(platform: &P, target: P::Target) {
    for subscription in Subscription::ALL {
        let guid = subscription.guid();
        event!(Level::INFO, %guid, "Registering {}", subscription);
        if let Err(err) = platform.subscribe(target, subscription) {
            event!(Level::ERROR, %guid, "cannot register {} notification {}", subscription, err);
        }
    }
}

fn pump<P: Platform>(platform: &P) -> i32 {
    loop {
        event!(Level::DEBUG, "Awaiting next window message");
        match platform.next() {
            Ok(Pumped::Message(message)) => {
                event!(Level::DEBUG, "Dispatching message");
                platform.dispatch(&message);
            }
            Ok(Pumped::Quit(code)) => {
                event!(Level::INFO, code, "Message pump finished");
                return code as i32;
            }
            Err(err) => {
                event!(Level::ERROR, "getting window message {}", err);
                return PUMP_FAILURE;
            }
        }
    }
}
