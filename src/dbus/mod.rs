//! DBus system interfaces.

use std::io;
use std::os::fd::IntoRawFd;

use tokio::runtime::{Builder, Runtime};
use zbus::Connection;
use zbus::zvariant::OwnedFd;

use crate::dbus::logind::ManagerProxy;
use crate::manager::{AcquireError, InhibitCategory, Lease, LeaseSource, ReleaseError};

#[allow(clippy::all)]
mod logind;

/// Application name reported to logind.
const APPLICATION_ID: &str = "desvelo";

/// Inhibitor lease source backed by systemd-logind.
pub struct LogindSource {
    runtime: Runtime,
}

impl LogindSource {
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }
}

impl LeaseSource for LogindSource {
    type Lease = LogindLease;

    fn acquire(
        &mut self,
        category: InhibitCategory,
        reason: &str,
    ) -> Result<LogindLease, AcquireError> {
        let fd = self.runtime.block_on(inhibit_async(category, reason))?;
        Ok(LogindLease { fd })
    }
}

/// Async handler for the logind inhibit call.
async fn inhibit_async(category: InhibitCategory, reason: &str) -> zbus::Result<OwnedFd> {
    let connection = Connection::system().await?;
    let logind = ManagerProxy::new(&connection).await?;
    logind.inhibit(category.as_str(), APPLICATION_ID, reason, "block").await
}

/// Open logind inhibitor lease.
///
/// Logind keeps the inhibitor in place for as long as the pipe file
/// descriptor remains open; closing it is the only release mechanism.
pub struct LogindLease {
    fd: OwnedFd,
}

impl Lease for LogindLease {
    fn release(self) -> Result<(), ReleaseError> {
        match unsafe { libc::close(std::os::fd::OwnedFd::from(self.fd).into_raw_fd()) } {
            0 => Ok(()),
            _ => Err(io::Error::last_os_error().into()),
        }
    }
}
