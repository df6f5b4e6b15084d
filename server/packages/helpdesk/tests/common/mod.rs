#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use helpdesk::{Helpdesk, ServerConfig};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestDesk {
    pub desk: Helpdesk,
    tickets: TempDir,
}

impl TestDesk {
    /// Desk on an ephemeral port with its own ticket directory.
    pub async fn start(dispatch_interval: Option<Duration>) -> Self {
        let tickets = tempfile::tempdir().expect("create ticket dir");
        let config = ServerConfig {
            port: 0,
            ticket_dir: tickets.path().to_path_buf(),
            idle_poll: Duration::from_millis(10),
            dispatch_interval,
            ..ServerConfig::default()
        };
        let desk = Helpdesk::start(config).await.expect("start help desk");
        Self { desk, tickets }
    }

    pub fn ticket_dir(&self) -> &Path {
        self.tickets.path()
    }

    pub fn tickets(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(self.tickets.path())
            .expect("read ticket dir")
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        paths.sort();
        paths
    }

    pub async fn connect(&self) -> RawClient {
        let stream = TcpStream::connect(self.desk.local_addr())
            .await
            .expect("connect to help desk");
        RawClient {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }
}

/// A client speaking the wire protocol directly.
pub struct RawClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl RawClient {
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .expect("line within timeout")
            .map(|line| line.expect("valid line"))
    }

    pub async fn send_line(&mut self, line: &str) {
        self.framed.send(line).await.expect("send line");
    }

    /// Nothing arrives within `window`.
    pub async fn assert_silent(&mut self, window: Duration) {
        if let Ok(line) = tokio::time::timeout(window, self.framed.next()).await {
            panic!("unexpected frame: {line:?}");
        }
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
