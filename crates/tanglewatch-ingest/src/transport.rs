//! Transport interface and the TCP line-stream implementation.
//!
//! The ingestion core consumes the transport at this interface: dial an
//! endpoint, set subscription filters, receive one text frame at a time.
//! Frames are single lines of space-separated fields. Any receive failure,
//! including a frame with no content, is a transport-level error that
//! terminates the owning worker; the supervisor redials later.
//!
//! [`TcpTransport`] is the concrete implementation: line-delimited frames
//! over a plain TCP connection, with a `sub <topic>` handshake line per
//! subscription filter. Endpoint URIs are `host:port`.

use std::future::Future;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Dials endpoints and produces subscriptions.
pub trait Transport: Send + Sync + 'static {
    type Sub: Subscription;

    /// Open a subscription to the endpoint. A dial failure is a
    /// transport error; the caller decides when to retry.
    fn dial(&self, uri: &str) -> impl Future<Output = Result<Self::Sub>> + Send;
}

/// One open subscription to one endpoint.
///
/// Dropping the subscription releases the underlying connection.
pub trait Subscription: Send + 'static {
    /// Restrict the subscription to a topic. Called once per topic after
    /// dialing, before the first `recv`.
    fn set_filter(&mut self, topic: &str) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next frame. Blocks until a frame arrives or the
    /// connection fails.
    fn recv(&mut self) -> impl Future<Output = Result<String>> + Send;
}

/// Validate an endpoint URI of the form `host:port`.
///
/// Called once per endpoint at startup, before any worker is launched; a
/// malformed URI is a fatal configuration error there.
pub fn validate_endpoint_uri(uri: &str) -> Result<()> {
    let (host, port) = uri
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("endpoint '{}' is missing a port", uri)))?;
    if host.is_empty() {
        return Err(Error::Config(format!("endpoint '{}' has an empty host", uri)));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("endpoint '{}' has an invalid port", uri)))?;
    Ok(())
}

/// TCP line-stream transport.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    type Sub = TcpSubscription;

    async fn dial(&self, uri: &str) -> Result<TcpSubscription> {
        validate_endpoint_uri(uri)?;
        let stream = TcpStream::connect(uri)
            .await
            .map_err(|e| Error::Transport(format!("dial {}: {}", uri, e)))?;
        let (read_half, write_half) = stream.into_split();
        Ok(TcpSubscription {
            reader: BufReader::new(read_half),
            writer: write_half,
            line: String::new(),
        })
    }
}

/// A live TCP subscription; one frame per received line.
pub struct TcpSubscription {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl Subscription for TcpSubscription {
    async fn set_filter(&mut self, topic: &str) -> Result<()> {
        let request = format!("sub {}\n", topic);
        self.writer
            .write_all(request.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("set filter '{}': {}", topic, e)))
    }

    async fn recv(&mut self) -> Result<String> {
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .await
            .map_err(|e| Error::Transport(format!("recv: {}", e)))?;
        if read == 0 {
            return Err(Error::Transport("connection closed".into()));
        }
        let frame = self.line.trim_end_matches(['\r', '\n']);
        if frame.trim().is_empty() {
            return Err(Error::Protocol("empty frame".into()));
        }
        Ok(frame.to_string())
    }
}

/// Scripted transport for in-crate tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::{Subscription, Transport};
    use crate::error::{Error, Result};

    /// One scripted `recv` outcome.
    #[derive(Debug, Clone)]
    pub enum Step {
        Frame(&'static str),
        Fail(&'static str),
    }

    /// Transport whose dials hand out pre-scripted subscriptions.
    ///
    /// Each successful dial consumes the next script from the queue; an
    /// exhausted queue (or a `None` script) fails the dial. A subscription
    /// that runs out of steps pends forever, keeping its worker alive.
    pub struct ScriptedTransport {
        sessions: Mutex<VecDeque<Option<Vec<Step>>>>,
        dials: AtomicUsize,
        filters: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        pub fn new(sessions: Vec<Option<Vec<Step>>>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                dials: AtomicUsize::new(0),
                filters: std::sync::Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// A transport whose dials always fail.
        pub fn always_failing() -> Self {
            Self::new(Vec::new())
        }

        pub fn dial_count(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }

        /// All filters set across this transport's subscriptions.
        pub fn filters(&self) -> Vec<String> {
            self.filters.lock().clone()
        }
    }

    impl Transport for ScriptedTransport {
        type Sub = ScriptedSubscription;

        async fn dial(&self, _uri: &str) -> Result<ScriptedSubscription> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            match self.sessions.lock().pop_front().flatten() {
                Some(steps) => Ok(ScriptedSubscription {
                    steps: steps.into(),
                    filters: std::sync::Arc::clone(&self.filters),
                }),
                None => Err(Error::Transport("dial refused".into())),
            }
        }
    }

    pub struct ScriptedSubscription {
        steps: VecDeque<Step>,
        filters: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl Subscription for ScriptedSubscription {
        async fn set_filter(&mut self, topic: &str) -> Result<()> {
            self.filters.lock().push(topic.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<String> {
            match self.steps.pop_front() {
                Some(Step::Frame(frame)) => Ok(frame.to_string()),
                Some(Step::Fail(reason)) => Err(Error::Transport(reason.into())),
                None => std::future::pending().await,
            }
        }
    }
}
