//! Generic channel runtime — shared scaffolding for concurrently-run surfaces.
//!
//! A [`Component`] is any independently-runnable unit: the console loop, the
//! HTTP listener. Components capture their shared state (`Arc<Chain>`, config)
//! at construction time, then are handed to [`spawn_components`].
//!
//! [`spawn_components`] returns a [`ChannelSet`] the caller can `.join()`
//! (blocking until all components finish) or hold while doing other work —
//! the components run concurrently regardless. Any component error cancels
//! the shared [`CancellationToken`] so siblings shut down cooperatively.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit.
///
/// [`Component::run`] is called once by [`spawn_components`] and should run
/// until `shutdown` is cancelled or the component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its async run-loop as a boxed future.
    ///
    /// The returned future must be `Send + 'static` so it can be spawned on
    /// the Tokio thread pool. Capture the `CancellationToken` inside it to
    /// respect cooperative shutdown.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── ChannelSet ────────────────────────────────────────────────────────────────

/// An opaque handle to the set of running channel tasks.
pub struct ChannelSet {
    inner: JoinHandle<Result<(), AppError>>,
}

impl ChannelSet {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Channel(format!("channel task panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each [`Component`] as an independent Tokio task.
///
/// Behaviour on error:
/// - If any component returns `Err`, `shutdown` is cancelled so all siblings
///   receive the cancellation signal and stop cooperatively.
/// - The manager task then drains the remaining components and returns the
///   first error encountered.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> ChannelSet {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                // Component panicked.
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err
                        .get_or_insert_with(|| AppError::Channel(format!("component panicked: {e}")));
                }
                // Component returned an error.
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                // Component exited cleanly.
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    ChannelSet { inner: handle }
}
