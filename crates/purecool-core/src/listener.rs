// ── Listener registry ──
//
// Id-keyed callback sets used for both notification channels: device push
// updates and coordinator refresh cycles. Registration hands back a guard;
// dropping the guard is the only way to unregister.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;

/// A registered callback.
pub type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ids are unique across every set so a thread can tell which callbacks it
/// is currently inside.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static RUNNING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Set of callbacks invoked on every [`notify`](Self::notify).
///
/// Cheaply cloneable; clones share the same set. `notify` snapshots the
/// registered listeners and runs them with no lock on the set held, so a
/// callback may add listeners or drop guards, its own included. Removing a
/// listener blocks until in-flight invocations of it return, unless the
/// removal happens inside that listener's own callback.
pub struct ListenerSet<A> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    listeners: DashMap<u64, Arc<Slot<A>>>,
}

struct Slot<A> {
    id: u64,
    callback: Callback<A>,
    active: AtomicBool,
    /// Read-held for the length of each invocation.
    in_flight: RwLock<()>,
}

impl<A> Slot<A> {
    fn invoke(&self, arg: &A) -> bool {
        let _in_flight = self.in_flight.read().unwrap_or_else(PoisonError::into_inner);
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        let _running = RunningMark::enter(self.id);
        (self.callback)(arg);
        true
    }

    /// After this returns the callback is not running and never runs again.
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        if !RunningMark::is_running_here(self.id) {
            drop(self.in_flight.write().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

/// Marks a listener as running on the current thread until dropped.
struct RunningMark(u64);

impl RunningMark {
    fn enter(id: u64) -> Self {
        RUNNING.with_borrow_mut(|ids| ids.push(id));
        Self(id)
    }

    fn is_running_here(id: u64) -> bool {
        RUNNING.with_borrow(|ids| ids.contains(&id))
    }
}

impl Drop for RunningMark {
    fn drop(&mut self) {
        RUNNING.with_borrow_mut(|ids| {
            if let Some(pos) = ids.iter().rposition(|id| *id == self.0) {
                ids.remove(pos);
            }
        });
    }
}

impl<A: 'static> ListenerSet<A> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: DashMap::new(),
            }),
        }
    }

    /// Register a callback. It stays registered until the guard is dropped.
    pub fn add(&self, callback: impl Fn(&A) + Send + Sync + 'static) -> ListenerGuard {
        self.add_shared(Arc::new(callback))
    }

    /// Register an already shared callback.
    pub fn add_shared(&self, callback: Callback<A>) -> ListenerGuard {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(
            id,
            Arc::new(Slot {
                id,
                callback,
                active: AtomicBool::new(true),
                in_flight: RwLock::new(()),
            }),
        );

        let weak: Weak<Inner<A>> = Arc::downgrade(&self.inner);
        ListenerGuard {
            id,
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Some((_, slot)) = inner.listeners.remove(&id) {
                        slot.deactivate();
                    }
                }
            })),
        }
    }

    /// Invoke every registered callback exactly once. Returns how many ran.
    ///
    /// A listener removed while the notification is under way is skipped if
    /// its turn has not come yet.
    pub fn notify(&self, arg: &A) -> usize {
        let slots: Vec<Arc<Slot<A>>> = self
            .inner
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.iter().filter(|slot| slot.invoke(arg)).count()
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.is_empty()
    }
}

impl<A: 'static> Default for ListenerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for ListenerSet<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for ListenerSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Registration handle returned by [`ListenerSet::add`].
///
/// Dropping the guard unregisters the callback. Outliving the set is fine.
#[must_use = "dropping the guard immediately unregisters the listener"]
pub struct ListenerGuard {
    id: u64,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister now. Same as dropping, but reads better at call sites.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("id", &self.id)
            .field("active", &self.release.is_some())
            .finish()
    }
}
