//! The poll loop.
//!
//! One cycle lists the mailbox, fetches bodies for messages not yet stored, normalizes
//! them, feeds the snapshot to the [`MessageStore`] and hands the new subset to a
//! [`Renderer`]. Cycles never overlap. Cancellation is observed during the sleep between
//! cycles and before each body fetch.

use tokio::sync::watch;

use crate::config::{DisplayMode, SessionConfig};
use crate::{Address, Error, ErrorKind, MailProvider, MessageStore, NormalizedMessage, Result};

/// Consumer of newly arrived messages.
pub trait Renderer: Send {
    /// A new address is ready (at start and after a session was recreated).
    fn address_ready(&mut self, _address: &Address) {}

    /// Display messages that were seen for the first time.
    fn render(&mut self, messages: &[NormalizedMessage], mode: DisplayMode);
}

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Sleeping until the next cycle.
    Idle,
    /// A cycle is running.
    Polling,
    /// The loop has ended.
    Stopped,
}

/// Why the loop ended.
#[derive(Debug)]
pub enum StopReason {
    /// The user asked to stop.
    Cancelled,
    /// The session expired and recreating the address failed.
    SessionLost(Error),
    /// An unrecoverable error.
    Fatal(Error),
}

impl StopReason {
    /// Human-readable final status.
    pub fn describe(&self) -> String {
        match self {
            StopReason::Cancelled => "stopped by user".to_string(),
            StopReason::SessionLost(e) => format!("session expired and could not be renewed: {e}"),
            StopReason::Fatal(e) => format!("stopped after an unrecoverable error: {e}"),
        }
    }
}

/// Counters describing a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Completed or attempted poll cycles.
    pub cycles: u64,
    /// Cycles that failed with a transient provider error.
    pub transient_failures: u64,
    /// Messages skipped because they could not be mapped.
    pub skipped: u64,
    /// Addresses created after a session expired.
    pub recreated: u64,
}

/// Outcome of one polling phase.
#[derive(Debug, Default)]
struct Cycle {
    fresh: Vec<NormalizedMessage>,
    skipped: u64,
    interrupted: bool,
}

/// Drives one provider for one session.
#[derive(Debug)]
pub struct PollLoop<P, R> {
    provider: P,
    renderer: R,
    config: SessionConfig,
    store: MessageStore,
    address: Address,
    state: LoopState,
    stats: PollStats,
}

impl<P, R> PollLoop<P, R>
where
    P: MailProvider,
    R: Renderer,
{
    /// Obtain an address from `provider` and prepare the loop.
    ///
    /// # Errors
    /// Returns the provider error when the first address cannot be created.
    pub async fn start(
        mut provider: P,
        mut renderer: R,
        config: SessionConfig,
        store: MessageStore,
    ) -> Result<Self> {
        let address = provider.create_address(config.address_options()).await?;
        renderer.address_ready(&address);
        Ok(Self {
            provider,
            renderer,
            config,
            store,
            address,
            state: LoopState::Idle,
            stats: PollStats::default(),
        })
    }

    /// The address currently being watched.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Accumulated message history.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The renderer, e.g. to inspect what was emitted.
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Poll until cancelled or stopped by an unrecoverable error.
    ///
    /// `shutdown` flipping to `true` (or its sender being dropped) cancels the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> StopReason {
        tracing::info!(
            provider = %self.config.provider(),
            address = %self.address,
            interval_secs = self.config.poll_interval().as_secs(),
            "polling started"
        );

        let reason = loop {
            if *shutdown.borrow() {
                break StopReason::Cancelled;
            }

            if let Some(reason) = self.step(&shutdown).await {
                break reason;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Cancelled;
                    }
                }
            }
        };

        self.state = LoopState::Stopped;
        tracing::info!(
            reason = %reason.describe(),
            cycles = self.stats.cycles,
            messages = self.store.history().len(),
            skipped = self.stats.skipped,
            persist_failures = self.store.persist_failures(),
            "polling stopped"
        );
        reason
    }

    /// Run one polling phase and apply the failure policy.
    ///
    /// Returns `Some` when the loop must stop; otherwise the loop is left `Idle`.
    pub async fn step(&mut self, shutdown: &watch::Receiver<bool>) -> Option<StopReason> {
        self.state = LoopState::Polling;
        self.stats.cycles += 1;

        let outcome = match self.poll_once(shutdown).await {
            Ok(cycle) => {
                self.stats.skipped += cycle.skipped;
                if !cycle.fresh.is_empty() {
                    tracing::info!(count = cycle.fresh.len(), "new messages");
                    self.renderer.render(&cycle.fresh, self.config.display_mode());
                }
                cycle.interrupted.then_some(StopReason::Cancelled)
            }
            Err(e) => self.recover(e).await,
        };

        self.state = match outcome {
            Some(_) => LoopState::Stopped,
            None => LoopState::Idle,
        };
        outcome
    }

    async fn recover(&mut self, err: Error) -> Option<StopReason> {
        match err.kind() {
            ErrorKind::Unavailable => {
                self.stats.transient_failures += 1;
                tracing::warn!(error = %err, "poll failed, retrying next interval");
                None
            }
            ErrorKind::Malformed => {
                self.stats.skipped += 1;
                tracing::warn!(error = %err, "unreadable mailbox listing skipped");
                None
            }
            ErrorKind::SessionExpired => {
                tracing::warn!(
                    address = %self.address,
                    "session expired, requesting a new address"
                );
                match self
                    .provider
                    .create_address(self.config.address_options())
                    .await
                {
                    Ok(address) => {
                        self.stats.recreated += 1;
                        self.address = address;
                        self.renderer.address_ready(&self.address);
                        None
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "could not recreate address");
                        Some(StopReason::SessionLost(e))
                    }
                }
            }
            ErrorKind::Rejected | ErrorKind::Local => {
                tracing::error!(error = %err, "unrecoverable poll error");
                Some(StopReason::Fatal(err))
            }
        }
    }

    async fn poll_once(&mut self, shutdown: &watch::Receiver<bool>) -> Result<Cycle> {
        let raws = self.provider.list_messages(&self.address).await?;
        let provider = self.provider.provider();
        let mut cycle = Cycle::default();
        let mut snapshot = Vec::with_capacity(raws.len());

        for raw in &raws {
            if *shutdown.borrow() {
                cycle.interrupted = true;
                break;
            }

            let id = match self.provider.message_id(raw) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping message without usable id");
                    cycle.skipped += 1;
                    continue;
                }
            };
            if self.store.contains(provider, self.address.value(), &id) {
                continue;
            }

            let body = match self.provider.fetch_body(&self.address, raw).await {
                Ok(body) => body,
                Err(e) if e.kind() == ErrorKind::Malformed => {
                    tracing::warn!(error = %e, id = %id, "skipping message with unreadable body");
                    cycle.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.provider.normalize(&self.address, raw, body) {
                Ok(message) => snapshot.push(message),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        id = %id,
                        "skipping message that cannot be normalized"
                    );
                    cycle.skipped += 1;
                }
            }
        }

        cycle.fresh = self.store.absorb(snapshot);
        Ok(cycle)
    }
}
