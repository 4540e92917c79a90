//! C FFI layer for posefeed.
//!
//! Opaque handle-based API for a native host driver acting as the pose
//! sink. The generated C header is written to `include/posefeed.h` by
//! cbindgen.

use crate::config::SessionConfig;
use crate::error::LastError;
use crate::session::Session;
use crate::types::Pose;
use crate::{PosefeedError, Result};
use std::ffi::{c_char, c_int, CStr};
use std::time::Duration;

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque session handle for C consumers.
pub struct PfSession(Session);

/// Pose in C-compatible layout.
#[repr(C)]
pub struct PfPose {
    /// Position [x, y, z].
    pub position: [f64; 3],
    /// Orientation quaternion [w, x, y, z], Hamilton convention.
    pub orientation: [f64; 4],
}

impl From<Pose> for PfPose {
    fn from(pose: Pose) -> Self {
        let q = pose.orientation;
        PfPose {
            position: [pose.position.x, pose.position.y, pose.position.z],
            orientation: [q.w, q.x, q.y, q.z],
        }
    }
}

fn into_handle(result: Result<Session>) -> *mut PfSession {
    match result {
        Ok(session) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(PfSession(session)))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Start a UDP session listening on `port`.
/// Returns NULL on error (check pf_last_error()).
#[no_mangle]
pub extern "C" fn pf_session_start_udp(port: u16) -> *mut PfSession {
    into_handle(Session::start(&SessionConfig::udp(port)))
}

/// Start a serial session on the named port.
/// Returns NULL on error.
///
/// # Safety
/// `path` must be a valid null-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_start_serial(path: *const c_char, baud_rate: u32) -> *mut PfSession {
    if path.is_null() {
        LAST_ERROR.set(&PosefeedError::Config("serial port path is null".into()));
        return std::ptr::null_mut();
    }
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    let config = SessionConfig {
        baud_rate,
        ..SessionConfig::serial(path)
    };
    into_handle(Session::start(&config))
}

/// Start a session configured from `POSEFEED_*` environment variables.
/// Returns NULL on error.
#[no_mangle]
pub extern "C" fn pf_session_start_env() -> *mut PfSession {
    into_handle(SessionConfig::from_env().and_then(|config| Session::start(&config)))
}

/// Read the latest pose without blocking.
/// Returns 0 on success, 1 if nothing has been published yet, -1 on
/// invalid arguments.
///
/// # Safety
/// `session` and `pose` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_try_read(session: *const PfSession, pose: *mut PfPose) -> c_int {
    if session.is_null() || pose.is_null() {
        return -1;
    }
    let session = &*session;
    match session.0.store().try_read() {
        Some(latest) => {
            pose.write(latest.into());
            0
        }
        None => 1,
    }
}

/// Block until a new pose is published.
/// `timeout_ms`: timeout in milliseconds (-1 = block forever).
/// Returns 0 on success, -1 on error/timeout/end of stream.
///
/// # Safety
/// `session` and `pose` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_wait(
    session: *const PfSession,
    pose: *mut PfPose,
    timeout_ms: c_int,
) -> c_int {
    if session.is_null() || pose.is_null() {
        return -1;
    }
    let store = (*session).0.store();

    let result = if timeout_ms < 0 {
        store.wait_for_next()
    } else {
        store.wait_for_next_timeout(Duration::from_millis(timeout_ms as u64))
    };

    match result {
        Ok(latest) => {
            pose.write(latest.into());
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Number of poses published so far; unchanged between two reads means
/// the same pose was returned twice.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_sequence(session: *const PfSession) -> u64 {
    if session.is_null() {
        return 0;
    }
    (*session).0.store().sequence()
}

/// Current session state: 0 Idle, 1 Connecting, 2 Streaming,
/// 3 Disconnected, 4 Stopping, 5 Stopped. -1 for a null handle.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_state(session: *const PfSession) -> c_int {
    if session.is_null() {
        return -1;
    }
    (*session).0.state() as c_int
}

/// Make the next reading the identity orientation.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_recenter(session: *const PfSession) {
    if !session.is_null() {
        (*session).0.recenter();
    }
}

/// Ask the serial IMU firmware to run its own calibration.
///
/// # Safety
/// `session` must be a valid session pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_request_device_calibration(session: *const PfSession) {
    if !session.is_null() {
        (*session).0.request_device_calibration();
    }
}

/// Stop a session and free its resources.
///
/// # Safety
/// `session` must be a pointer returned by a `pf_session_start_*` call, or null.
#[no_mangle]
pub unsafe extern "C" fn pf_session_stop(session: *mut PfSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next posefeed API call.
#[no_mangle]
pub extern "C" fn pf_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::sync::{Mutex, MutexGuard};

    // The last-error slot is process-wide; tests that read it run one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn last_error() -> Option<String> {
        let ptr = pf_last_error();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
        }
    }

    #[test]
    fn test_null_handles() {
        let _guard = serial();
        unsafe {
            let mut pose = PfPose {
                position: [0.0; 3],
                orientation: [0.0; 4],
            };
            assert_eq!(pf_session_try_read(std::ptr::null(), &mut pose), -1);
            assert_eq!(pf_session_wait(std::ptr::null(), &mut pose, 0), -1);
            assert_eq!(pf_session_state(std::ptr::null()), -1);
            assert_eq!(pf_session_sequence(std::ptr::null()), 0);
            assert!(pf_session_start_serial(std::ptr::null(), 115_200).is_null());
            pf_session_recenter(std::ptr::null());
            pf_session_stop(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_null_serial_path_sets_last_error() {
        let _guard = serial();
        LAST_ERROR.clear();
        let session = unsafe { pf_session_start_serial(std::ptr::null(), 115_200) };
        assert!(session.is_null());
        let msg = last_error().expect("error message set");
        assert!(msg.contains("serial port path is null"), "{}", msg);
    }

    #[test]
    fn test_udp_session_roundtrip() {
        let _guard = serial();
        let session = pf_session_start_udp(0);
        assert!(!session.is_null());
        unsafe {
            let port = (*session).0.local_addr().unwrap().port();
            let mut pose = PfPose {
                position: [0.0; 3],
                orientation: [0.0; 4],
            };
            assert_eq!(pf_session_try_read(session, &mut pose), 1);

            let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            sender.send_to(b"1 2 3 4 5 6 7", (Ipv4Addr::LOCALHOST, port)).unwrap();

            assert_eq!(pf_session_wait(session, &mut pose, 2000), 0);
            assert_eq!(pose.position, [2.0, 3.0, 1.0]);
            assert_eq!(pose.orientation, [4.0, 6.0, 7.0, 5.0]);
            assert_eq!(pf_session_sequence(session), 1);
            assert_eq!(pf_session_state(session), 2);

            assert_eq!(pf_session_wait(session, &mut pose, 10), -1);
            assert!(last_error().is_some());

            pf_session_stop(session);
        }
    }

    #[test]
    fn test_bind_failure_sets_last_error() {
        let _guard = serial();
        let taken = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let session = pf_session_start_udp(port);
        assert!(session.is_null());
        let msg = last_error().expect("error message set");
        assert!(msg.contains("bind"), "{}", msg);
    }
}
