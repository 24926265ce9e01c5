//! Callback owner references and liveness tracking.
//!
//! A job keeps a reference to the object that wants its results. The
//! reference is resolved right before each delivery; when it no longer
//! resolves the delivery is skipped and the payload is recycled as usual.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Read-only view of whether an owner is still interested in results.
///
/// Obtained from [`LivenessGuard::liveness`]. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Held by an owner for as long as it wants deliveries.
///
/// Dropping the guard or calling [`revoke`](Self::revoke) turns every
/// associated [`Liveness`] off.
#[derive(Debug)]
pub struct LivenessGuard {
    alive: Arc<AtomicBool>,
}

impl LivenessGuard {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a liveness handle tied to this guard.
    pub fn liveness(&self) -> Liveness {
        Liveness {
            alive: Arc::clone(&self.alive),
        }
    }

    /// Deregister explicitly, e.g. during owner teardown.
    pub fn revoke(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for LivenessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.revoke();
    }
}

/// Reference from a job to its callback owner.
pub enum Owner<C: ?Sized> {
    /// No owner; every delivery is skipped.
    Detached,
    /// Keeps the owner alive until the job is gone.
    Strong(Arc<C>),
    /// Doesn't keep the owner alive.
    Weak(Weak<C>),
    /// Strong reference gated by an explicit liveness flag.
    Guarded { target: Arc<C>, liveness: Liveness },
}

impl<C: ?Sized> Owner<C> {
    pub fn strong(owner: Arc<C>) -> Self {
        Owner::Strong(owner)
    }

    pub fn weak(owner: &Arc<C>) -> Self {
        Owner::Weak(Arc::downgrade(owner))
    }

    pub fn guarded(owner: Arc<C>, liveness: Liveness) -> Self {
        Owner::Guarded {
            target: owner,
            liveness,
        }
    }

    /// Resolve to a usable reference, or `None` if the owner is gone.
    pub fn resolve(&self) -> Option<Arc<C>> {
        match self {
            Owner::Detached => None,
            Owner::Strong(owner) => Some(Arc::clone(owner)),
            Owner::Weak(owner) => owner.upgrade(),
            Owner::Guarded { target, liveness } => {
                liveness.is_alive().then(|| Arc::clone(target))
            }
        }
    }

    /// Check whether [`resolve`](Self::resolve) would currently succeed.
    pub fn is_alive(&self) -> bool {
        match self {
            Owner::Detached => false,
            Owner::Strong(_) => true,
            Owner::Weak(owner) => owner.strong_count() > 0,
            Owner::Guarded { liveness, .. } => liveness.is_alive(),
        }
    }

    /// Drop the reference, returning what was held.
    pub fn clear(&mut self) -> Owner<C> {
        std::mem::replace(self, Owner::Detached)
    }
}

impl<C: ?Sized> Default for Owner<C> {
    fn default() -> Self {
        Owner::Detached
    }
}

impl<C: ?Sized> fmt::Debug for Owner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Owner::Detached => "Detached",
            Owner::Strong(_) => "Strong",
            Owner::Weak(_) => "Weak",
            Owner::Guarded { .. } => "Guarded",
        };
        write!(f, "Owner::{}(alive={})", kind, self.is_alive())
    }
}
