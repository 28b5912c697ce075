//! Async client for the xenstore Unix socket.
//!
//! One connection per process: a reader task decodes frames, correlates
//! replies to pending requests by request id, and routes watch events into
//! an eventfd-signalled queue consumed by [`Store::next_event`].

use crate::error::{Result, StoreError};
use crate::notify;
use crate::store::{Store, WatchEvent};
use crate::wire::{self, HEADER_LEN, Header, MsgType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

type Reply = (MsgType, Vec<u8>);

/// State shared between the client handle and its reader task.
struct Shared {
    pending: StdMutex<HashMap<u32, oneshot::Sender<Result<Reply>>>>,
}

/// Connection to a running xenstore daemon.
pub struct XenStore {
    shared: Arc<Shared>,
    writer: Mutex<OwnedWriteHalf>,
    next_req_id: AtomicU32,
    events: Mutex<mpsc::UnboundedReceiver<WatchEvent>>,
    event_fd: Arc<OwnedFd>,
    reader: tokio::task::JoinHandle<()>,
}

impl XenStore {
    /// Connect to the store socket. Called once per process; the handle is
    /// then shared via `Arc`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let stream = UnixStream::connect(path.as_ref())
            .await
            .map_err(|e| StoreError::Connect {
                path: path_str.clone(),
                source: e,
            })?;
        let (rd, wr) = stream.into_split();

        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
        });
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let event_fd = Arc::new(notify::new_event_fd()?);

        let reader = tokio::spawn(reader_loop(
            rd,
            Arc::clone(&shared),
            watch_tx,
            Arc::clone(&event_fd),
        ));

        debug!(path = %path_str, "connected to store");
        Ok(XenStore {
            shared,
            writer: Mutex::new(wr),
            next_req_id: AtomicU32::new(1),
            events: Mutex::new(watch_rx),
            event_fd,
            reader,
        })
    }

    /// Remove a node and its subtree.
    pub async fn rm(&self, path: &str) -> Result<()> {
        self.request(MsgType::Rm, 0, wire::path_payload(path), path)
            .await?;
        Ok(())
    }

    /// Shut down the connection. Pending requests fail with `Closed` and
    /// the event stream ends.
    pub async fn close(&self) {
        if let Ok(mut wr) = self.writer.try_lock()
            && let Err(e) = wr.shutdown().await
        {
            debug!(error = %e, "store socket shutdown failed");
        }
        self.reader.abort();
        // The aborted reader no longer drains waiters; fail them here.
        let mut pending = self.shared.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(StoreError::Closed));
        }
        debug!("store connection closed");
    }

    async fn request(
        &self,
        msg_type: MsgType,
        tx_id: u32,
        payload: Vec<u8>,
        path: &str,
    ) -> Result<Vec<u8>> {
        if payload.len() > wire::MAX_PAYLOAD {
            return Err(StoreError::Protocol(format!(
                "request payload for {path} exceeds {} bytes",
                wire::MAX_PAYLOAD
            )));
        }

        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(req_id, tx);

        let header = Header {
            msg_type,
            req_id,
            tx_id,
            len: payload.len() as u32,
        };
        {
            let mut wr = self.writer.lock().await;
            if let Err(e) = write_frame(&mut wr, &header, &payload).await {
                drop(wr);
                self.shared.pending.lock().unwrap().remove(&req_id);
                return Err(e.into());
            }
        }

        let (reply_type, reply) = rx.await.map_err(|_| StoreError::Closed)??;
        if reply_type == MsgType::Error {
            let errno = wire::parse_error(&reply);
            return Err(StoreError::from_errno(&errno, path));
        }
        Ok(reply)
    }

    async fn tx_start(&self) -> Result<u32> {
        let reply = self
            .request(MsgType::TransactionStart, 0, wire::path_payload(""), "")
            .await?;
        let fields = wire::split_strings(&reply)?;
        fields
            .first()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Protocol("bad transaction id in reply".to_string()))
    }

    async fn tx_end(&self, tx_id: u32, commit: bool) -> Result<()> {
        let arg = if commit { "T" } else { "F" };
        self.request(MsgType::TransactionEnd, tx_id, wire::path_payload(arg), "")
            .await?;
        Ok(())
    }

    async fn read_in(&self, tx_id: u32, path: &str) -> Result<Vec<u8>> {
        self.request(MsgType::Read, tx_id, wire::path_payload(path), path)
            .await
    }
}

impl Drop for XenStore {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Store for XenStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.read_in(0, path).await
    }

    async fn write(&self, path: &str, value: &[u8]) -> Result<()> {
        self.request(MsgType::Write, 0, wire::write_payload(path, value), path)
            .await?;
        Ok(())
    }

    async fn directory(&self, path: &str) -> Result<Vec<String>> {
        let reply = self
            .request(MsgType::Directory, 0, wire::path_payload(path), path)
            .await?;
        wire::split_strings(&reply)
    }

    async fn gather(&self, dir: &str, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        // All reads happen inside one transaction so the values are a
        // consistent snapshot; EAGAIN means retry from the top.
        loop {
            let tx_id = self.tx_start().await?;
            let mut values = Vec::with_capacity(keys.len());
            let mut failure = None;
            for key in keys {
                match self.read_in(tx_id, &format!("{dir}/{key}")).await {
                    Ok(v) => values.push(Some(v)),
                    Err(StoreError::NotFound(_)) => values.push(None),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let commit = self.tx_end(tx_id, failure.is_none()).await;
            if let Some(e) = failure {
                return Err(e);
            }
            match commit {
                Ok(()) => return Ok(values),
                Err(StoreError::Again) => {
                    debug!(dir = %dir, "transaction raced, retrying gather");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn watch(&self, path: &str, token: &str) -> Result<()> {
        match self
            .request(MsgType::Watch, 0, wire::watch_payload(path, token), path)
            .await
        {
            Ok(_) => Ok(()),
            // Re-registering the same path + token is a no-op.
            Err(StoreError::Exists(_)) => {
                debug!(path = %path, token = %token, "watch already registered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn unwatch(&self, path: &str, token: &str) -> Result<()> {
        match self
            .request(MsgType::Unwatch, 0, wire::watch_payload(path, token), path)
            .await
        {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn next_event(&self) -> Result<WatchEvent> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(StoreError::Closed)
    }

    fn event_fd(&self) -> Option<RawFd> {
        Some(self.event_fd.as_raw_fd())
    }
}

async fn write_frame(wr: &mut OwnedWriteHalf, header: &Header, payload: &[u8]) -> io::Result<()> {
    wr.write_all(&header.encode()).await?;
    wr.write_all(payload).await
}

async fn reader_loop(
    mut rd: OwnedReadHalf,
    shared: Arc<Shared>,
    watch_tx: mpsc::UnboundedSender<WatchEvent>,
    event_fd: Arc<OwnedFd>,
) {
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = rd.read_exact(&mut header_buf).await {
            debug!(error = %e, "store connection closed");
            break;
        }
        let header = match Header::decode(&header_buf) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "malformed frame header, closing connection");
                break;
            }
        };
        let mut payload = vec![0u8; header.len as usize];
        if rd.read_exact(&mut payload).await.is_err() {
            break;
        }

        // Watch events are unsolicited; everything else answers a request.
        if header.msg_type == MsgType::WatchEvent {
            match wire::parse_watch_event(&payload) {
                Ok((path, token)) => {
                    if watch_tx.send(WatchEvent { path, token }).is_ok() {
                        notify::signal(event_fd.as_raw_fd());
                    }
                }
                Err(e) => warn!(error = %e, "malformed watch event"),
            }
            continue;
        }

        let waiter = shared.pending.lock().unwrap().remove(&header.req_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok((header.msg_type, payload)));
            }
            None => warn!(req_id = header.req_id, "reply for unknown request"),
        }
    }

    // Fail anything still waiting; dropping watch_tx ends the event stream.
    let mut pending = shared.pending.lock().unwrap();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(StoreError::Closed));
    }
}
