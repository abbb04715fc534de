//! Asterisk Manager Interface (AMI) client for Rust
//!
//! This crate provides an async client for Asterisk's Manager Interface: it
//! logs in over TCP, sends actions and waits for their responses, delivers
//! unsolicited events to registered listeners, probes the connection with
//! periodic pings, and reconnects in the background when the session is lost.
//!
//! # Architecture
//!
//! The library uses a split reader/writer design:
//! - [`AmiClient`] (Clone + Send + Sync): connect, send actions, register listeners
//! - A background reader task, the only reader of the socket, routes each
//!   record: responses to the action waiting for one, events to listeners
//! - A keep-alive task that pings at a fixed interval
//!
//! When the reader or the keep-alive probe fails, the client enters
//! [`ConnectionState::ReconnectWait`], runs the disconnect callback, and
//! retries per its [`ReconnectPolicy`] until it logs in again or
//! [`AmiClient::disconnect`] is called.
//!
//! # Examples
//!
//! ## Sending actions
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiAction, AmiClient, AmiError, Credentials};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AmiError> {
//!     let client = AmiClient::new(Credentials::new("127.0.0.1", 5038, "admin", "secret"));
//!     client.try_connect().await?;
//!
//!     let response = client
//!         .send(AmiAction::new("CoreStatus"))
//!         .await?;
//!     println!("Startup time: {}", response.header("CoreStartupTime").unwrap_or("?"));
//!
//!     // Raw text form; empty string on failure
//!     let raw = client.send_action("Command", &[("Command", "core show version")]).await;
//!     println!("{raw}");
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Event listeners
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiClient, Credentials, EventFilter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = AmiClient::new(Credentials::with_default_port("pbx.local", "admin", "secret"));
//!
//!     client.add_event_listener(
//!         |event| println!("{} hung up", event.field("Channel")),
//!         EventFilter::new().whitelist(["Hangup"]),
//!     );
//!     client.set_on_disconnect(|_, reason| eprintln!("lost AMI: {reason}"));
//!
//!     if client.connect().await {
//!         let mut calls = client.event_stream(EventFilter::new().whitelist(["Newchannel"]));
//!         while let Some(Ok(event)) = calls.recv().await {
//!             println!("new channel {}", event.field("Channel"));
//!         }
//!     }
//! }
//! ```
//!
//! ## List actions
//!
//! ```rust,no_run
//! use asterisk_ami_tokio::{AmiAction, AmiClient, Credentials};
//!
//! # async fn example(client: AmiClient) -> Result<(), asterisk_ami_tokio::AmiError> {
//! let (_response, endpoints) = client
//!     .send_list_action(AmiAction::new("PJSIPShowEndpoints"))
//!     .await?;
//! for endpoint in endpoints {
//!     println!("{} {}", endpoint.field("ObjectName"), endpoint.field("DeviceState"));
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

pub(crate) mod action;
pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod event;
pub mod headers;
pub mod keepalive;
pub mod listener;
pub mod protocol;

pub use command::{AmiAction, AmiResponse, ResponseStatus};
pub use config::{AmiConnectOptions, Credentials, ReconnectPolicy};
pub use connection::{AmiClient, ConnectionState, DisconnectReason, LifecycleCallback};
pub use constants::DEFAULT_AMI_PORT;
pub use error::{AmiError, AmiResult};
pub use event::AmiEvent;
pub use headers::AmiHeader;
pub use keepalive::KeepAliveOptions;
pub use listener::{AmiEventStream, EventBus, EventFilter, ListenerCallback, ListenerId};
pub use protocol::{AmiMessage, FrameDecoder, MessageKind};
