//! Typed view of the window messages the daemon cares about.
//!
//! Raw `WM_POWERBROADCAST` / `WM_DEVICECHANGE` payloads are decoded in
//! `wynapi`; everything here is plain data so the decision logic can be
//! exercised without a message window.

use core::fmt;

/// Binary-compatible with the Win32 `GUID` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Builds a GUID from its big-endian 128-bit registry form.
    pub const fn from_u128(uuid: u128) -> Self {
        Self {
            data1: (uuid >> 96) as u32,
            data2: ((uuid >> 80) & 0xffff) as u16,
            data3: ((uuid >> 64) & 0xffff) as u16,
            data4: (uuid as u64).to_be_bytes(),
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// Monitor power state; `0` means the display is off.
pub const GUID_MONITOR_POWER_ON: Guid = Guid::from_u128(0x02731015_4510_4526_99e6_e5a17ebd1aea);

/// Lid switch state; `0` means the lid is closed.
pub const GUID_LIDSWITCH_STATE_CHANGE: Guid =
    Guid::from_u128(0xba3e0f4d_b817_4094_a2d1_d56379e6a0f3);

/// Device interface class of monitors.
pub const GUID_DEVINTERFACE_MONITOR: Guid =
    Guid::from_u128(0xe6f07b5f_ee97_4a90_b076_33f57bf4eaa7);

/// Which power setting a `PowerSettingChanged` event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSetting {
    MonitorPowerOn,
    LidSwitch,
    Unrelated(Guid),
}

impl From<Guid> for PowerSetting {
    fn from(guid: Guid) -> Self {
        match guid {
            GUID_MONITOR_POWER_ON => Self::MonitorPowerOn,
            GUID_LIDSWITCH_STATE_CHANGE => Self::LidSwitch,
            other => Self::Unrelated(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    PowerSettingChanged { setting: PowerSetting, state: u32 },
    /// A monitor device interface went away.
    DeviceInterfaceRemoved,
    /// Any message the daemon has no opinion on.
    Other,
}

impl SystemEvent {
    pub fn power_setting(setting: Guid, state: u32) -> Self {
        Self::PowerSettingChanged {
            setting: setting.into(),
            state,
        }
    }

    /// Only removals of the monitor interface class are interesting.
    pub fn device_removed(class: Guid) -> Self {
        if class == GUID_DEVINTERFACE_MONITOR {
            Self::DeviceInterfaceRemoved
        } else {
            Self::Other
        }
    }
}
