//! In-process AMI server for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use asterisk_ami_tokio::{
    AmiClient, AmiConnectOptions, ConnectionState, Credentials, KeepAliveOptions, ReconnectPolicy,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

pub const BANNER: &str = "Asterisk Call Manager/5.0.2";
pub const USERNAME: &str = "admin";
pub const SECRET: &str = "amp111";

pub struct MockAmi {
    listener: TcpListener,
    port: u16,
}

impl MockAmi {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let port = listener
            .local_addr()
            .unwrap()
            .port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new("127.0.0.1", self.port, USERNAME, SECRET)
    }

    /// Accept a connection, send the banner and answer the login.
    pub async fn accept(&self, accept_login: bool) -> Peer {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let mut peer = Peer {
            stream,
            buffer: Vec::new(),
        };
        peer.write(&format!("{}\r\n", BANNER))
            .await;

        let login = peer
            .read_frame()
            .await
            .expect("client closed before login");
        assert!(login.contains("Action: Login"), "unexpected first frame: {}", login);
        assert!(login.contains(&format!("Username: {}", USERNAME)));
        assert!(login.contains(&format!("Secret: {}", SECRET)));

        if accept_login {
            peer.write("Response: Success\r\nMessage: Authentication accepted\r\n\r\n")
                .await;
        } else {
            peer.write("Response: Error\r\nMessage: Authentication failed\r\n\r\n")
                .await;
        }
        peer
    }

    /// Accept a connection and say nothing, leaving the client mid-handshake.
    pub async fn accept_silent(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        Peer {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Whether a connection attempt arrives within `limit`.
    pub async fn connection_attempted(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.listener.accept())
            .await
            .is_ok()
    }
}

pub struct Peer {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Peer {
    /// Write raw bytes; a client that already hung up is ignored.
    pub async fn write(&mut self, data: &str) {
        let _ = self
            .stream
            .write_all(data.as_bytes())
            .await;
    }

    /// Next frame sent by the client, `None` on EOF.
    pub async fn read_frame(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self
                .buffer
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
            {
                let frame = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
                self.buffer
                    .drain(..pos + 4);
                return Some(frame);
            }
            let mut chunk = [0u8; 1024];
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .ok()?;
            if n == 0 {
                return None;
            }
            self.buffer
                .extend_from_slice(&chunk[..n]);
        }
    }

    /// Answer every `Ping` until the client goes away.
    pub async fn answer_pings(mut self) {
        while let Some(frame) = self
            .read_frame()
            .await
        {
            if frame.contains("Action: Ping") {
                self.write(&success(&frame, "Ping: Pong"))
                    .await;
            }
        }
    }
}

/// Value of `key` in a frame.
pub fn header<'a>(frame: &'a str, key: &str) -> Option<&'a str> {
    frame
        .split("\r\n")
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(": "))
}

/// `Response: Success` answering `request`, echoing its `ActionID`.
pub fn success(request: &str, lines: &str) -> String {
    reply(request, "Success", lines)
}

/// Response frame with the given status answering `request`.
pub fn reply(request: &str, status: &str, lines: &str) -> String {
    let id = header(request, "ActionID").expect("action without ActionID");
    format!("Response: {}\r\nActionID: {}\r\n{}\r\n\r\n", status, id, lines)
}

/// Options with short timeouts and the keep-alive effectively disabled.
pub fn fast_options() -> AmiConnectOptions {
    AmiConnectOptions {
        connect_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        action_timeout: Duration::from_secs(2),
        keepalive: KeepAliveOptions {
            interval: Duration::from_secs(3600),
            require_reply: true,
        },
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(100)),
        ..Default::default()
    }
}

pub fn client(server: &MockAmi, options: AmiConnectOptions) -> AmiClient {
    AmiClient::with_options(server.credentials(), options)
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .unwrap();
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
