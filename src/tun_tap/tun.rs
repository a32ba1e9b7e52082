use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use std::{mem, ptr};

use crate::net::device::Device;
use crate::error::errno;
use crate::{Error, Result};

/// Represents a TUN (network TUNnel) interface, a virtual network device that
/// acts as a software loopback for transferring IP packets between user space
/// and the kernel, operating at layer 3 of the OSI model.
#[derive(Debug)]
pub struct Tun {
    fd: File,
    name: String,
}

impl Tun {
    /// Attaches to the TUN interface `dev` without packet information, so
    /// each read yields exactly one raw IP datagram.
    ///
    /// # Notes
    ///
    /// It is the caller's responsibility to ensure that the provided device
    /// name does not contain any null (`\0`) bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the TUN device cannot be opened, if the name is
    /// too long, or if the process does not have the required
    /// `CAP_NET_ADMIN` privilege.
    pub fn without_packet_info(dev: &str) -> Result<Self> {
        // The interface name must be less than `IFNAMSIZ` bytes.
        if dev.len() >= libc::IFNAMSIZ {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name too long",
            )));
        }

        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };

        unsafe {
            // SAFETY: `dev.len()` is less than `IFNAMSIZ`.
            ptr::copy_nonoverlapping(
                dev.as_ptr(),
                ifr.ifr_name.as_mut_ptr() as *mut u8,
                dev.len(),
            );

            // IFF_TUN   - TUN device (no Ethernet headers)
            //
            // IFF_NO_PI - Do not provide packet information
            ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as i16;
        }

        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TUNSETIFF, &ifr) } == -1 {
            return Err(errno!("failed to attach to TUN interface {dev}"));
        }

        // SAFETY: `ifr_name` remains null-terminated after copying `dev`.
        let name = unsafe {
            CStr::from_ptr(ifr.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        Ok(Self { fd, name })
    }

    /// Returns the assigned name of the TUN virtual network device.
    ///
    /// The name given for creating the TUN device is more of a suggestion
    /// to the kernel rather than a requirement, so the assigned name may be
    /// different than the one originally provided.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Device for Tun {
    /// Many errors are silently handled by the kernel, often resulting in
    /// dropped packets: a datagram with a bad checksum or an unrouted
    /// destination still appears to be sent successfully.
    fn send(&self, datagram: &[u8]) -> io::Result<usize> {
        (&self.fd).write(datagram)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.fd).read(buf)
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        // Round up so a sub-millisecond remainder still waits.
        let millis = timeout.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as libc::c_int;

        loop {
            match unsafe { libc::poll(&mut pfd, 1, millis) } {
                -1 => {
                    let err = io::Error::last_os_error();

                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }

                    return Err(err);
                }
                0 => return Ok(false),
                // POLLERR and POLLHUP surface through the next read.
                _ => return Ok(true),
            }
        }
    }
}

impl AsRawFd for Tun {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
