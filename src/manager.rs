//! Inhibitor lease reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::{io, mem};

use tracing::{info, warn};

/// Reason reported to the session manager for every lease.
const INHIBIT_REASON: &str = "user preference";

/// Inhibitable session manager operations.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum InhibitCategory {
    Shutdown,
    Sleep,
    Idle,
    HandlePowerKey,
    HandleSuspendKey,
    HandleHibernateKey,
    HandleLidSwitch,
}

impl InhibitCategory {
    /// Session manager name for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::Sleep => "sleep",
            Self::Idle => "idle",
            Self::HandlePowerKey => "handle-power-key",
            Self::HandleSuspendKey => "handle-suspend-key",
            Self::HandleHibernateKey => "handle-hibernate-key",
            Self::HandleLidSwitch => "handle-lid-switch",
        }
    }
}

impl FromStr for InhibitCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shutdown" => Ok(Self::Shutdown),
            "sleep" => Ok(Self::Sleep),
            "idle" => Ok(Self::Idle),
            "handle-power-key" => Ok(Self::HandlePowerKey),
            "handle-suspend-key" => Ok(Self::HandleSuspendKey),
            "handle-hibernate-key" => Ok(Self::HandleHibernateKey),
            "handle-lid-switch" => Ok(Self::HandleLidSwitch),
            _ => Err(UnknownCategory),
        }
    }
}

impl Display for InhibitCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability for opening new inhibitor leases.
pub trait LeaseSource {
    type Lease: Lease;

    /// Open a lease suppressing `category` until the lease is released.
    fn acquire(
        &mut self,
        category: InhibitCategory,
        reason: &str,
    ) -> Result<Self::Lease, AcquireError>;
}

/// One open inhibitor lease.
///
/// The underlying OS resource blocks the inhibited operation for as long as
/// the lease exists.
pub trait Lease {
    /// Give up the underlying OS resource.
    fn release(self) -> Result<(), ReleaseError>;
}

/// Inhibitor lease bookkeeping.
///
/// Holds at most one open lease per category and reconciles the held set
/// against the desired set on demand.
pub struct InhibitManager<S: LeaseSource> {
    held: BTreeMap<InhibitCategory, S::Lease>,
    source: S,
}

impl<S: LeaseSource> InhibitManager<S> {
    pub fn new(source: S) -> Self {
        Self { source, held: BTreeMap::new() }
    }

    /// Reconcile held leases with the desired category set.
    ///
    /// Stale leases are always released before any new lease is opened, so a
    /// category removed and re-added across two calls goes through a full
    /// release/reacquire cycle rather than being treated as a no-op.
    pub fn reconcile(&mut self, desired: &BTreeSet<InhibitCategory>) -> Result<(), ReconcileError> {
        // Release leases whose category is no longer desired.
        let stale: Vec<_> =
            self.held.keys().copied().filter(|category| !desired.contains(category)).collect();
        for category in stale {
            if let Some(lease) = self.held.remove(&category) {
                Self::close(category, lease);
            }
        }

        // Open leases for newly desired categories.
        //
        // One failed category never blocks the remaining ones; it simply
        // stays absent from the held set until the next reconciliation.
        let mut failed = Vec::new();
        for category in desired.iter().copied() {
            if self.held.contains_key(&category) {
                continue;
            }

            match self.source.acquire(category, INHIBIT_REASON) {
                Ok(lease) => {
                    info!("Opened {category} inhibitor lease");
                    self.held.insert(category, lease);
                },
                Err(err) => failed.push((category, err)),
            }
        }

        if failed.is_empty() { Ok(()) } else { Err(ReconcileError { failed }) }
    }

    /// Release every held lease.
    ///
    /// Called once at application teardown.
    pub fn shutdown(&mut self) {
        for (category, lease) in mem::take(&mut self.held) {
            Self::close(category, lease);
        }
    }

    /// Currently held categories.
    pub fn held(&self) -> impl Iterator<Item = InhibitCategory> + '_ {
        self.held.keys().copied()
    }

    /// Close a lease's OS resource.
    ///
    /// Release failures are logged only; the lease is gone from bookkeeping
    /// either way and the OS reclaims the resource at process exit at the
    /// latest.
    fn close(category: InhibitCategory, lease: S::Lease) {
        match lease.release() {
            Ok(()) => info!("Released {category} inhibitor lease"),
            Err(err) => warn!("Failed to release {category} inhibitor lease: {err}"),
        }
    }
}

/// Category name outside the inhibitable set.
#[derive(thiserror::Error, Debug)]
#[error("unknown inhibitor category")]
pub struct UnknownCategory;

/// Failure to open an inhibitor lease.
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    #[error("{0}")]
    DBus(#[from] zbus::Error),
}

/// Failure to close a lease's OS resource.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct ReleaseError(#[from] io::Error);

/// Partial reconciliation failure.
///
/// Lists every category which could not be acquired; all other desired
/// categories are held as requested.
#[derive(Debug)]
pub struct ReconcileError {
    pub failed: Vec<(InhibitCategory, AcquireError)>,
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to open inhibitor leases:")?;
        for (category, err) in &self.failed {
            write!(f, " {category} ({err})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReconcileError {}
