//! Test harness: a fake xenstored speaking real wire frames over a Unix
//! socket in a temporary directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use xenbus_store::wire::{self, HEADER_LEN, Header, MsgType};

pub struct FakeXenstored {
    pub socket_path: PathBuf,
    _dir: TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl FakeXenstored {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("xenstored.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream));
            }
        });
        FakeXenstored {
            socket_path,
            _dir: dir,
            task,
        }
    }
}

impl Drop for FakeXenstored {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct Session {
    nodes: HashMap<String, Vec<u8>>,
    watches: Vec<(String, String)>,
    next_tx_id: u32,
}

async fn serve(mut stream: UnixStream) {
    let mut session = Session::default();
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header_buf).await.is_err() {
            break;
        }
        let header = Header::decode(&header_buf).expect("client sent malformed header");
        let mut payload = vec![0u8; header.len as usize];
        if stream.read_exact(&mut payload).await.is_err() {
            break;
        }

        let (reply_type, reply_payload, events) = handle(&mut session, header.msg_type, &payload);
        let reply_header = Header {
            msg_type: reply_type,
            req_id: header.req_id,
            tx_id: header.tx_id,
            len: reply_payload.len() as u32,
        };
        if stream.write_all(&reply_header.encode()).await.is_err() {
            break;
        }
        if stream.write_all(&reply_payload).await.is_err() {
            break;
        }

        for (path, token) in events {
            let event_payload = wire::watch_payload(&path, &token);
            let event_header = Header {
                msg_type: MsgType::WatchEvent,
                req_id: 0,
                tx_id: 0,
                len: event_payload.len() as u32,
            };
            if stream.write_all(&event_header.encode()).await.is_err() {
                return;
            }
            if stream.write_all(&event_payload).await.is_err() {
                return;
            }
        }
    }
}

type Outcome = (MsgType, Vec<u8>, Vec<(String, String)>);

fn handle(session: &mut Session, msg_type: MsgType, payload: &[u8]) -> Outcome {
    match msg_type {
        MsgType::Read => {
            let path = first_string(payload);
            match session.nodes.get(&path) {
                Some(value) => (MsgType::Read, value.clone(), vec![]),
                None => error("ENOENT"),
            }
        }
        MsgType::Write => {
            let nul = payload.iter().position(|b| *b == 0).unwrap();
            let path = String::from_utf8(payload[..nul].to_vec()).unwrap();
            let value = payload[nul + 1..].to_vec();
            for (i, _) in path.match_indices('/') {
                session.nodes.entry(path[..i].to_string()).or_default();
            }
            session.nodes.insert(path.clone(), value);
            (MsgType::Write, b"OK\0".to_vec(), fired(session, &path))
        }
        MsgType::Directory => {
            let path = first_string(payload);
            if !session.nodes.contains_key(&path) {
                return error("ENOENT");
            }
            let prefix = format!("{path}/");
            let mut children: Vec<&str> = session
                .nodes
                .keys()
                .filter_map(|p| p.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .collect();
            children.sort();
            let mut reply = Vec::new();
            for child in children {
                reply.extend_from_slice(child.as_bytes());
                reply.push(0);
            }
            (MsgType::Directory, reply, vec![])
        }
        MsgType::Rm => {
            let path = first_string(payload);
            let prefix = format!("{path}/");
            let before = session.nodes.len();
            session
                .nodes
                .retain(|p, _| p != &path && !p.starts_with(&prefix));
            let events = if session.nodes.len() != before {
                fired(session, &path)
            } else {
                vec![]
            };
            (MsgType::Rm, b"OK\0".to_vec(), events)
        }
        MsgType::Watch => {
            let (path, token) = wire::parse_watch_event(payload).unwrap();
            let registration = (path, token);
            if session.watches.contains(&registration) {
                // Real xenstored rejects duplicates; the client must treat
                // this as success.
                return error("EEXIST");
            }
            session.watches.push(registration);
            (MsgType::Watch, b"OK\0".to_vec(), vec![])
        }
        MsgType::Unwatch => {
            let (path, token) = wire::parse_watch_event(payload).unwrap();
            let before = session.watches.len();
            session.watches.retain(|(p, t)| !(*p == path && *t == token));
            if session.watches.len() == before {
                return error("ENOENT");
            }
            (MsgType::Unwatch, b"OK\0".to_vec(), vec![])
        }
        MsgType::TransactionStart => {
            session.next_tx_id += 1;
            let reply = format!("{}\0", session.next_tx_id).into_bytes();
            (MsgType::TransactionStart, reply, vec![])
        }
        MsgType::TransactionEnd => (MsgType::TransactionEnd, b"OK\0".to_vec(), vec![]),
        other => panic!("fake xenstored got unexpected message type {other:?}"),
    }
}

fn fired(session: &Session, path: &str) -> Vec<(String, String)> {
    session
        .watches
        .iter()
        .filter(|(wpath, _)| {
            wpath == path
                || path.strip_prefix(wpath.as_str()).is_some_and(|r| r.starts_with('/'))
                || wpath.strip_prefix(path).is_some_and(|r| r.starts_with('/'))
        })
        .map(|(_, token)| (path.to_string(), token.clone()))
        .collect()
}

fn first_string(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(payload.len());
    String::from_utf8(payload[..end].to_vec()).unwrap()
}

fn error(errno: &str) -> Outcome {
    let mut reply = errno.as_bytes().to_vec();
    reply.push(0);
    (MsgType::Error, reply, vec![])
}
