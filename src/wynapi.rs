//! This is our user abstraction that turns the windows API into
//! more of a rust friendly interface: a message-only window that receives
//! power and device notifications, the session mutex, display enumeration
//! and the workstation lock.
#![allow(non_camel_case_types, non_snake_case, clippy::upper_case_acronyms)]

use core::ffi::{c_char, c_int, c_void, CStr};
use core::mem::{size_of, zeroed, MaybeUninit};
use core::ptr::{self, addr_of, null, null_mut};
use std::ffi::CString;

use tracing::{event, Level};

use crate::census::{self, DisplayEnumerator};
use crate::daemon::{Acquire, Platform, Pumped, Subscription};
use crate::engine::{DecisionEngine, Flow, Workstation};
use crate::error::{Error, Result};
use crate::event::{Guid, SystemEvent};

type HANDLE = *mut c_void;
type LPVOID = *mut c_void;
type LPCVOID = *const c_void;
type HWND = HANDLE;
type HMENU = HANDLE;
type HINSTANCE = HANDLE;
type HMODULE = HANDLE;
type HLOCAL = HANDLE;
type HPOWERNOTIFY = HANDLE;
type HDEVNOTIFY = HANDLE;
type BOOL = i32;
type DWORD = u32;
type CHAR = c_char;
type LPCSTR = *const CHAR;
type LPSTR = *mut CHAR;
type INT = c_int;
type UINT = u32;
type LRESULT = isize;
type ATOM = u16;
type HICON = HANDLE;
type HCURSOR = HICON;
type HBRUSH = HANDLE;
type UINT_PTR = usize;
type WPARAM = UINT_PTR;
type LONG_PTR = isize;
type LPARAM = LONG_PTR;
type LONG = i32;

type WNDPROC = Option<
    unsafe extern "system" fn(
        hwnd: HWND,
        Msg: UINT,
        wParam: WPARAM,
        lParam: LPARAM,
    ) -> LRESULT,
>;

const HWND_MESSAGE: HWND = -3isize as HWND;
const CW_USEDEFAULT: INT = 0x8000_0000u32 as INT;
const ERROR_ALREADY_EXISTS: DWORD = 183;

const WM_DESTROY: UINT = 0x0002;
const WM_POWERBROADCAST: UINT = 0x0218;
const WM_DEVICECHANGE: UINT = 0x0219;
const PBT_POWERSETTINGCHANGE: WPARAM = 0x8013;
const DBT_DEVICEREMOVECOMPLETE: WPARAM = 0x8004;
const DBT_DEVTYP_DEVICEINTERFACE: DWORD = 0x0005;
const DEVICE_NOTIFY_WINDOW_HANDLE: DWORD = 0x0000;
const SM_REMOTESESSION: INT = 0x1000;

const FORMAT_MESSAGE_ALLOCATE_BUFFER: DWORD = 0x0100;
const FORMAT_MESSAGE_IGNORE_INSERTS: DWORD = 0x0200;
const FORMAT_MESSAGE_FROM_SYSTEM: DWORD = 0x1000;

const CLASS_NAME: &CStr = c"lidlock";

#[repr(C)]
struct WNDCLASSEXA {
    cbSize: UINT,
    style: UINT,
    lpfnWndProc: WNDPROC,
    cbClsExtra: c_int,
    cbWndExtra: c_int,
    hInstance: HINSTANCE,
    hIcon: HICON,
    hCursor: HCURSOR,
    hbrBackground: HBRUSH,
    lpszMenuName: LPCSTR,
    lpszClassName: LPCSTR,
    hIconSm: HICON,
}

#[repr(C)]
#[derive(Debug)]
#[allow(dead_code)]
pub struct MSG {
    hwnd: HWND,
    message: UINT,
    wParam: WPARAM,
    lParam: LPARAM,
    time: DWORD,
    pt: POINT,
}

#[repr(C)]
#[derive(Debug)]
#[allow(dead_code)]
struct POINT {
    x: LONG,
    y: LONG,
}

#[repr(C)]
#[allow(dead_code)]
struct POWERBROADCAST_SETTING {
    PowerSetting: Guid,
    DataLength: DWORD,
    Data: [u8; 1],
}

#[repr(C)]
#[allow(dead_code)]
struct DEV_BROADCAST_HDR {
    dbch_size: DWORD,
    dbch_devicetype: DWORD,
    dbch_reserved: DWORD,
}

#[repr(C)]
#[allow(dead_code)]
struct DEV_BROADCAST_DEVICEINTERFACE_A {
    dbcc_size: DWORD,
    dbcc_devicetype: DWORD,
    dbcc_reserved: DWORD,
    dbcc_classguid: Guid,
    dbcc_name: [CHAR; 1],
}

#[repr(C)]
#[allow(dead_code)]
struct DISPLAY_DEVICEA {
    cb: DWORD,
    DeviceName: [CHAR; 32],
    DeviceString: [CHAR; 128],
    StateFlags: DWORD,
    DeviceID: [CHAR; 128],
    DeviceKey: [CHAR; 128],
}

#[link(name = "Kernel32")]
extern "system" {
    fn GetLastError() -> DWORD;
    fn GetModuleHandleA(lpModuleName: LPCSTR) -> HMODULE;
    fn CreateMutexA(lpMutexAttributes: LPVOID, bInitialOwner: BOOL, lpName: LPCSTR) -> HANDLE;
    fn CloseHandle(hObject: HANDLE) -> BOOL;
    fn FormatMessageA(
        dwFlags: DWORD,
        lpSource: LPCVOID,
        dwMessageId: DWORD,
        dwLanguageId: DWORD,
        lpBuffer: LPSTR,
        nSize: DWORD,
        Arguments: LPVOID,
    ) -> DWORD;
    fn LocalFree(hMem: HLOCAL) -> HLOCAL;
}

#[link(name = "User32")]
extern "system" {
    fn RegisterClassExA(unnamedParam1: *const WNDCLASSEXA) -> ATOM;
    fn DefWindowProcA(hWnd: HWND, Msg: UINT, wParam: WPARAM, lParam: LPARAM) -> LRESULT;
    fn CreateWindowExA(
        dwExStyle: DWORD,
        lpClassName: LPCSTR,
        lpWindowName: LPCSTR,
        dwStyle: DWORD,
        X: INT,
        Y: INT,
        nWidth: INT,
        nHeight: INT,
        hWndParent: HWND,
        hMenu: HMENU,
        hInstance: HINSTANCE,
        lpParam: LPVOID,
    ) -> HWND;
    fn GetMessageA(lpMsg: *mut MSG, hWnd: HWND, wMsgFilterMin: UINT, wMsgFilterMax: UINT) -> BOOL;
    fn DispatchMessageA(lpMsg: *const MSG) -> LRESULT;
    fn PostQuitMessage(nExitCode: INT);
    fn RegisterPowerSettingNotification(
        hRecipient: HANDLE,
        PowerSettingGuid: *const Guid,
        Flags: DWORD,
    ) -> HPOWERNOTIFY;
    fn RegisterDeviceNotificationA(
        hRecipient: HANDLE,
        NotificationFilter: LPVOID,
        Flags: DWORD,
    ) -> HDEVNOTIFY;
    fn EnumDisplayDevicesA(
        lpDevice: LPCSTR,
        iDevNum: DWORD,
        lpDisplayDevice: *mut DISPLAY_DEVICEA,
        dwFlags: DWORD,
    ) -> BOOL;
    fn LockWorkStation() -> BOOL;
    fn GetSystemMetrics(nIndex: INT) -> INT;
}

/// Rust wrapper around GetLastError(), captured right after `call` failed
fn last_error(call: &'static str) -> Error {
    let code = unsafe { GetLastError() };
    win32_error(call, code)
}

fn win32_error(call: &'static str, code: DWORD) -> Error {
    Error::Win32 {
        call,
        code,
        message: format_message(code),
    }
}

// Rust wrapper for FormatMessageA
fn format_message(code: DWORD) -> String {
    let mut buffer: LPSTR = null_mut();
    let len = unsafe {
        FormatMessageA(
            FORMAT_MESSAGE_ALLOCATE_BUFFER
                | FORMAT_MESSAGE_FROM_SYSTEM
                | FORMAT_MESSAGE_IGNORE_INSERTS,
            null(),
            code,
            0,
            // With ALLOCATE_BUFFER the system writes the buffer address here
            &mut buffer as *mut LPSTR as LPSTR,
            0,
            null_mut(),
        )
    };
    if len == 0 || buffer.is_null() {
        return format!("unknown error {code}");
    }
    let message = unsafe { CStr::from_ptr(buffer) }
        .to_string_lossy()
        .trim_end()
        .to_string();
    unsafe { LocalFree(buffer as HLOCAL) };
    message
}

// Rust wrapper for GetModuleHandleA
fn get_module_handle_a() -> HMODULE {
    unsafe { GetModuleHandleA(null()) }
}

/// Per-session named mutex, closed when dropped.
pub struct SessionMutex(HANDLE);

impl Drop for SessionMutex {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
        event!(Level::DEBUG, "Singleton mutex released");
    }
}

// Rust wrapper for CreateMutexA
fn create_mutex_a(identifier: &str) -> Result<Acquire<SessionMutex>> {
    let name =
        CString::new(identifier).map_err(|_| Error::InvalidName(identifier.to_string()))?;
    let handle = unsafe { CreateMutexA(null_mut(), 0, name.as_ptr()) };
    let code = unsafe { GetLastError() };
    if handle.is_null() {
        return Err(win32_error("CreateMutexA", code));
    }
    let mutex = SessionMutex(handle);
    if code == ERROR_ALREADY_EXISTS {
        drop(mutex);
        return Ok(Acquire::AlreadyRunning);
    }
    Ok(Acquire::Acquired(mutex))
}

// Rust wrapper for RegisterClassExA
fn register_class_ex_a() -> Result<ATOM> {
    let window_class = WNDCLASSEXA {
        cbSize: size_of::<WNDCLASSEXA>() as u32,
        style: 0,
        lpfnWndProc: Some(window_procedure),
        cbClsExtra: 0,
        cbWndExtra: 0,
        hInstance: get_module_handle_a(),
        hIcon: null_mut(),
        hCursor: null_mut(),
        hbrBackground: null_mut(),
        lpszMenuName: null(),
        lpszClassName: CLASS_NAME.as_ptr(),
        hIconSm: null_mut(),
    };
    let res = unsafe { RegisterClassExA(&window_class) };
    if res == 0 {
        return Err(last_error("RegisterClassExA"));
    }
    event!(Level::DEBUG, "RegisterClassExA {}", res);
    Ok(res)
}

/// Message-only window the notifications are addressed to. Null when
/// creation failed.
#[derive(Debug, Clone, Copy)]
pub struct Window(HWND);

impl Default for Window {
    fn default() -> Self {
        Self(null_mut())
    }
}

// Rust wrapper for CreateWindowExA
fn create_window_ex_a() -> Result<Window> {
    let handle = unsafe {
        CreateWindowExA(
            0,
            CLASS_NAME.as_ptr(),
            null(),
            0,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            HWND_MESSAGE,
            null_mut(),
            get_module_handle_a(),
            null_mut(),
        )
    };
    if handle.is_null() {
        return Err(last_error("CreateWindowExA"));
    }
    event!(Level::DEBUG, "CreateWindowExA handle: {:?}", handle);
    Ok(Window(handle))
}

// Rust wrapper for RegisterPowerSettingNotification
fn register_power_setting_notification(window: Window, setting: &Guid) -> Result<()> {
    let handle =
        unsafe { RegisterPowerSettingNotification(window.0, setting, DEVICE_NOTIFY_WINDOW_HANDLE) };
    if handle.is_null() {
        return Err(last_error("RegisterPowerSettingNotification"));
    }
    Ok(())
}

// Rust wrapper for RegisterDeviceNotificationA
fn register_device_notification_a(window: Window, class: Guid) -> Result<()> {
    let mut filter: DEV_BROADCAST_DEVICEINTERFACE_A = unsafe { zeroed() };
    filter.dbcc_size = size_of::<DEV_BROADCAST_DEVICEINTERFACE_A>() as DWORD;
    filter.dbcc_devicetype = DBT_DEVTYP_DEVICEINTERFACE;
    filter.dbcc_classguid = class;

    let handle = unsafe {
        RegisterDeviceNotificationA(
            window.0,
            &mut filter as *mut DEV_BROADCAST_DEVICEINTERFACE_A as LPVOID,
            DEVICE_NOTIFY_WINDOW_HANDLE,
        )
    };
    if handle.is_null() {
        return Err(last_error("RegisterDeviceNotificationA"));
    }
    Ok(())
}

// Rust wrapper for GetMessageA. Any window of this thread, like the C pump.
fn get_message_a() -> Result<Pumped<MSG>> {
    let mut msg: MaybeUninit<MSG> = MaybeUninit::uninit();
    let res = unsafe { GetMessageA(msg.as_mut_ptr(), null_mut(), 0, 0) };
    if res == -1 {
        return Err(last_error("GetMessageA"));
    }
    // GetMessageA filled msg for both WM_QUIT and regular messages
    let msg = unsafe { msg.assume_init() };
    if res == 0 {
        return Ok(Pumped::Quit(msg.wParam));
    }
    Ok(Pumped::Message(msg))
}

/// Decodes the notification payload carried in `lparam`.
///
/// # Safety
/// `lparam` must be the parameter delivered with `msg`/`wparam`.
unsafe fn read_event(msg: UINT, wparam: WPARAM, lparam: LPARAM) -> SystemEvent {
    match (msg, wparam) {
        (WM_POWERBROADCAST, PBT_POWERSETTINGCHANGE) if lparam != 0 => {
            let setting = lparam as *const POWERBROADCAST_SETTING;
            let guid = ptr::read_unaligned(addr_of!((*setting).PowerSetting));
            let length = ptr::read_unaligned(addr_of!((*setting).DataLength));
            if (length as usize) < size_of::<DWORD>() {
                return SystemEvent::Other;
            }
            let state = ptr::read_unaligned(addr_of!((*setting).Data) as *const DWORD);
            SystemEvent::power_setting(guid, state)
        }
        (WM_DEVICECHANGE, DBT_DEVICEREMOVECOMPLETE) if lparam != 0 => {
            let header = lparam as *const DEV_BROADCAST_HDR;
            if ptr::read_unaligned(addr_of!((*header).dbch_devicetype))
                != DBT_DEVTYP_DEVICEINTERFACE
            {
                return SystemEvent::Other;
            }
            let interface = lparam as *const DEV_BROADCAST_DEVICEINTERFACE_A;
            SystemEvent::device_removed(ptr::read_unaligned(addr_of!(
                (*interface).dbcc_classguid
            )))
        }
        _ => SystemEvent::Other,
    }
}

unsafe extern "system" fn window_procedure(
    hwnd: HWND,
    msg: UINT,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    // Our own window going away ends the pump; the engine never sees it
    if msg == WM_DESTROY {
        event!(Level::INFO, "Window destroyed, quitting");
        PostQuitMessage(0);
        return 0;
    }

    let event = read_event(msg, wparam, lparam);
    match DecisionEngine::new(Win32Workstation).handle(&event) {
        Flow::Forward => DefWindowProcA(hwnd, msg, wparam, lparam),
        Flow::Handled(_) => 0,
    }
}

/// Display adapters and monitors as reported by `EnumDisplayDevicesA`.
struct Win32Displays;

impl DisplayEnumerator for Win32Displays {
    type Adapter = [CHAR; 32];

    fn adapter(&self, index: u32) -> Option<Self::Adapter> {
        let mut device = display_device();
        let found = unsafe { EnumDisplayDevicesA(null(), index, &mut device, 0) };
        (found != 0).then_some(device.DeviceName)
    }

    fn has_monitor(&self, adapter: &Self::Adapter, index: u32) -> bool {
        let mut device = display_device();
        unsafe { EnumDisplayDevicesA(adapter.as_ptr(), index, &mut device, 0) != 0 }
    }
}

fn display_device() -> DISPLAY_DEVICEA {
    let mut device: DISPLAY_DEVICEA = unsafe { zeroed() };
    device.cb = size_of::<DISPLAY_DEVICEA>() as DWORD;
    device
}

/// The local machine, answering the decision engine's questions.
pub struct Win32Workstation;

impl Workstation for Win32Workstation {
    fn is_remote_session(&self) -> bool {
        unsafe { GetSystemMetrics(SM_REMOTESESSION) != 0 }
    }

    fn display_count(&self) -> usize {
        census::display_count(&Win32Displays)
    }

    fn lock(&self) -> Result<()> {
        if unsafe { LockWorkStation() } == 0 {
            return Err(last_error("LockWorkStation"));
        }
        Ok(())
    }
}

/// The Win32 side of the daemon lifecycle.
pub struct Win32;

impl Platform for Win32 {
    type Guard = SessionMutex;
    type Target = Window;
    type Message = MSG;

    fn acquire(&self, identifier: &str) -> Result<Acquire<SessionMutex>> {
        create_mutex_a(identifier)
    }

    fn register_class(&self) -> Result<()> {
        register_class_ex_a().map(|_| ())
    }

    fn create_target(&self) -> Result<Window> {
        create_window_ex_a()
    }

    fn subscribe(&self, target: Window, subscription: Subscription) -> Result<()> {
        match subscription {
            Subscription::MonitorPower | Subscription::LidSwitch => {
                register_power_setting_notification(target, &subscription.guid())
            }
            Subscription::MonitorInterface => {
                register_device_notification_a(target, subscription.guid())
            }
        }
    }

    fn next(&self) -> Result<Pumped<MSG>> {
        get_message_a()
    }

    fn dispatch(&self, message: &MSG) {
        unsafe { DispatchMessageA(message) };
    }
}
