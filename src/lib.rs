//! # tempmail-watcher
//! Obtain a disposable address from one of several temporary-mail providers, then poll it
//! and render new messages as they arrive.
//!
//! ## Providers
//! GuerrillaMail, mail.tm, mail.gw, tempmail.lol and dropmail.me sit behind one
//! [`MailProvider`] contract, implemented by the closed [`Adapter`] enum. Each adapter maps
//! its upstream's auth scheme, listing shape and failures onto the same types.
//!
//! ## Polling
//! [`PollLoop`] owns the active [`Address`] and a [`MessageStore`]. Every cycle it takes a
//! mailbox snapshot, keeps only messages it has not seen, and hands them to a [`Renderer`].
//! Transient provider failures are retried at the next interval; an expired session gets
//! exactly one new address.
//!
//! ## Errors
//! Adapters surface [`Error::ProviderUnavailable`], [`Error::ProviderRejected`],
//! [`Error::SessionExpired`] or [`Error::MalformedResponse`]; the crate-wide [`Result`]
//! alias wraps these errors.
//!
//! ## Example
//! ```no_run
//! use tempmail_watcher::{
//!     Adapter, DisplayMode, Endpoints, MessageStore, PollLoop, Provider, SessionConfig,
//!     Terminal, Transport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tempmail_watcher::Error> {
//!     let config = SessionConfig::new(Provider::MailTm, 5, DisplayMode::Plain, false, "h.json")?;
//!     let adapter = Adapter::new(config.provider(), Transport::new()?, &Endpoints::default());
//!     let terminal = Terminal::new(std::io::stdout());
//!
//!     let mut poll = PollLoop::start(adapter, terminal, config, MessageStore::new()).await?;
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let reason = poll.run(shutdown).await;
//!     println!("{}", reason.describe());
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
mod http;
pub mod logging;
mod models;
mod normalize;
mod poll;
pub mod providers;
mod render;
mod store;

pub use config::{DisplayMode, Overrides, SessionConfig, Settings};
pub use error::{Error, ErrorKind};
pub use http::{Transport, TransportBuilder};
pub use models::{Address, AddressOptions, MessageBody, NormalizedMessage, Provider};
pub use poll::{LoopState, PollLoop, PollStats, Renderer, StopReason};
pub use providers::{Adapter, Endpoints, MailProvider, RawMessage};
pub use render::{Terminal, display_body};
pub use store::{HistoryFile, MessageStore};

/// Result type alias for watcher operations.
///
/// This is equivalent to `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
