//! Request coalescing for operations that must not run concurrently.
//!
//! [`SingleFlight`] is a two-state machine, [`FlightState::Idle`] and
//! [`FlightState::InFlight`], guarded by a mutex that is never held across an
//! await. The first caller to find it Idle starts the operation and publishes
//! a shared future; everyone arriving while it runs awaits that same future.
//! The shared future flips the state back to Idle as part of completing, so
//! no caller can observe a finished flight and the next call always starts a
//! fresh one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Coordinator state.
pub enum FlightState<T, E> {
    /// Nothing running; the next call starts the operation.
    Idle,
    /// An operation is running; callers join `flight`.
    InFlight {
        generation: u64,
        flight: Flight<T, E>,
    },
}

struct Inner<T, E> {
    state: Mutex<FlightState<T, E>>,
    generations: AtomicU64,
}

impl<T, E> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, FlightState<T, E>> {
        // The guarded value is a plain enum swap; a poisoned lock still holds
        // a consistent state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return to Idle if `generation` is still the flight in the slot.
    fn land(&self, generation: u64) {
        let mut state = self.lock();
        if matches!(&*state, FlightState::InFlight { generation: g, .. } if *g == generation) {
            *state = FlightState::Idle;
        }
    }
}

/// Coalesces concurrent calls into one underlying invocation.
///
/// Cloning is cheap and yields a handle to the same coordinator.
pub struct SingleFlight<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for SingleFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(FlightState::Idle),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Run `op`, or join the run already in progress.
    ///
    /// `op` is only called when the coordinator is Idle; otherwise it is
    /// dropped unused and the caller receives the in-flight outcome, success
    /// or failure, verbatim.
    pub async fn coordinate<F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut state = self.inner.lock();
            match &*state {
                FlightState::InFlight { generation, flight } => {
                    tracing::trace!(generation, "Joining in-flight operation");
                    flight.clone()
                }
                FlightState::Idle => {
                    let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
                    let inner = Arc::clone(&self.inner);
                    let work = op();
                    let flight = async move {
                        let result = work.await;
                        inner.land(generation);
                        result
                    }
                    .boxed()
                    .shared();
                    *state = FlightState::InFlight {
                        generation,
                        flight: flight.clone(),
                    };
                    tracing::debug!(generation, "Started new flight");
                    flight
                }
            }
        };

        flight.await
    }

    /// Whether an operation is currently running.
    pub fn is_in_flight(&self) -> bool {
        matches!(&*self.inner.lock(), FlightState::InFlight { .. })
    }

    /// Number of underlying invocations started so far.
    pub fn invocations(&self) -> u64 {
        self.inner.generations.load(Ordering::Relaxed)
    }
}
