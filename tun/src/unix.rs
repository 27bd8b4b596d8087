//! A [`Tun`] implementation backed by a real `/dev/net/tun` character device,
//! driven through `tokio`'s `AsyncFd` the same way the rest of this workspace
//! turns a raw, poll-based OS resource into something `tokio::select!`-able.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::task::{Context, Poll};

use ip_packet::{IpPacket, IpPacketBuf, MAX_IP_SIZE};
use tokio::io::unix::AsyncFd;

use crate::{Tun, ioctl};

pub struct UnixTun {
    fd: AsyncFd<OwnedFd>,
    name: String,
}

impl UnixTun {
    pub fn new(name: &str) -> io::Result<Self> {
        let raw = ioctl::open_tun(name)?;
        ioctl::set_non_blocking(raw)?;

        // Safety: `raw` was just opened by `open_tun` and is owned here.
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };

        Ok(Self {
            fd: AsyncFd::new(owned)?,
            name: name.to_owned(),
        })
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl Tun for UnixTun {
    fn poll_send_ready(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        self.fd.poll_write_ready(cx).map(|guard| guard.map(|_| ()))
    }

    fn send(&mut self, packet: IpPacket) -> io::Result<()> {
        let fd = self.raw_fd();
        let buf = packet.packet();

        // Safety: `fd` is the tun device's fd, owned by `self.fd`; the write
        // does not outlive this call.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn poll_recv_many(
        &mut self,
        cx: &mut Context,
        buf: &mut Vec<IpPacket>,
        max: usize,
    ) -> Poll<usize> {
        let mut received = 0;

        while received < max {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => {
                    tracing::warn!("Failed to poll tun device for readiness: {e}");
                    break;
                }
                Poll::Pending => break,
            };

            let mut packet_buf = IpPacketBuf::new();
            let mut scratch = vec![0u8; MAX_IP_SIZE];

            let result = guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();

                // Safety: `scratch` is `MAX_IP_SIZE` bytes and lives for the call.
                let n = unsafe {
                    libc::read(fd, scratch.as_mut_ptr().cast(), scratch.len())
                };

                if n < 0 {
                    return Err(io::Error::last_os_error());
                }

                Ok(n as usize)
            });

            let n = match result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to read from tun device: {e}");
                    break;
                }
                Err(_would_block) => continue,
            };

            if n == 0 {
                break;
            }

            packet_buf.buf()[..n].copy_from_slice(&scratch[..n]);

            match IpPacket::new(packet_buf, n) {
                Ok(packet) => {
                    buf.push(packet);
                    received += 1;
                }
                Err(e) => tracing::debug!("Dropping malformed packet read from tun: {e:#}"),
            }
        }

        if received == 0 {
            Poll::Pending
        } else {
            Poll::Ready(received)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
