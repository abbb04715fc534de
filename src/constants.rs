//! Protocol constants and configuration values

use std::time::Duration;

/// Default Asterisk manager port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for a single read from the TCP stream
pub const SOCKET_BUF_SIZE: usize = 4096;

/// Maximum bytes buffered without seeing a frame terminator (16MB).
/// No legitimate AMI frame comes close; exceeding this means the peer is not
/// speaking AMI or the stream is corrupt.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Protocol message terminators
pub const LINE_TERMINATOR: &str = "\r\n";
pub const FRAME_TERMINATOR: &str = "\r\n\r\n";

/// Separator between a key and its value on a frame line
pub const KEY_VALUE_SEPARATOR: &str = ": ";

/// Substring recognized as a successful login reply
pub const LOGIN_SUCCESS_MARKER: &str = "Success";

/// `EventList` value closing a list action's event series
pub const EVENT_LIST_COMPLETE: &str = "Complete";

/// Bound on TCP connect and each handshake read
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reader poll interval; background loops observe shutdown within this
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long an action waits for its response
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between keep-alive pings
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before each reconnection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Maximum number of queued events per event stream before dropping
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;
