//! SIGINT/SIGTERM handling for the host process, so a `systemctl stop` or a
//! terminal Ctrl+C both drain the packet loop cleanly instead of killing it.

use std::task::{Context, Poll};

use anyhow::Result;
use tokio::signal::unix::{Signal, SignalKind, signal};

pub struct Terminate {
    sigint: Signal,
    sigterm: Signal,
}

impl Terminate {
    pub fn new() -> Result<Self> {
        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;

        Ok(Self { sigint, sigterm })
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.sigint.poll_recv(cx).is_ready() {
            Poll::Ready(())
        } else if self.sigterm.poll_recv(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    pub async fn recv(&mut self) {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }
}
