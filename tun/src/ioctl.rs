//! Thin wrappers around the `TUNSETIFF`/`TUNSETPERSIST` ioctls needed to open a
//! Linux/macOS tun device by name.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

const IFNAMSIZ: usize = 16;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// Opens `/dev/net/tun` and binds it to the interface named `name`, creating
/// it if it doesn't already exist.
pub fn open_tun(name: &str) -> io::Result<RawFd> {
    let path = CString::new("/dev/net/tun").expect("static path has no NUL bytes");

    // Safety: `open` with a valid, NUL-terminated path and standard flags.
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut req = IfReq {
        name: [0; IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0; 22],
    };

    for (dst, src) in req.name.iter_mut().zip(name.bytes().take(IFNAMSIZ - 1)) {
        *dst = src as libc::c_char;
    }

    // Safety: `fd` was just opened above and `req` is a valid, correctly
    // sized `ifreq` for `TUNSETIFF`.
    let res = unsafe { libc::ioctl(fd, TUNSETIFF as _, &mut req) };
    if res < 0 {
        let err = io::Error::last_os_error();
        // Safety: `fd` is owned by this function and not used again on error.
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(fd)
}

/// Sets the given raw fd to non-blocking mode.
pub fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    // Safety: `fd` is a valid, open file descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    // Safety: same fd as above, setting a validated flag set.
    let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

pub fn raw_fd(fd: &impl AsRawFd) -> RawFd {
    fd.as_raw_fd()
}
