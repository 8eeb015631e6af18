//! Test support: an in-process server speaking the handshake and session
//! objects, and a statement executor that records what it was asked to run.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::executor::{QueryResult, StatementExecutor};
use crate::port::{Endpoint, Object, Request, Status, WireConnection};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeServerOptions {
    /// Slave id returned by every handshake instead of a fresh one
    pub assigned_slave_id: Option<i32>,
    /// Answer session requests with a "database not found" error
    pub reject_sessions: bool,
    /// Number of connections, counted from the first, whose handshake is
    /// never answered
    pub stalled_handshakes: usize,
}

#[derive(Default)]
struct ServerState {
    handshakes: AtomicUsize,
    ended_sessions: AtomicUsize,
    next_slave_id: AtomicI32,
    next_session_id: AtomicI32,
    last_requested_slave_id: Mutex<Option<i32>>,
    databases: Mutex<Vec<String>>,
    users: Mutex<Vec<String>>,
}

pub(crate) struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with(FakeServerOptions::default()).await
    }

    pub async fn start_with(options: FakeServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let options = options.clone();
                let stall = accepted < options.stalled_handshakes;
                accepted += 1;
                tokio::spawn(async move {
                    let _ = if stall {
                        hold(stream).await
                    } else {
                        serve(stream, state, options).await
                    };
                });
            }
        });

        Self { addr, state, task }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn ended_sessions(&self) -> usize {
        self.state.ended_sessions.load(Ordering::SeqCst)
    }

    pub fn last_requested_slave_id(&self) -> Option<i32> {
        *self.state.last_requested_slave_id.lock()
    }

    pub fn databases(&self) -> Vec<String> {
        self.state.databases.lock().clone()
    }

    pub fn users(&self) -> Vec<String> {
        self.state.users.lock().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keep a connection open without ever answering it.
async fn hold(mut stream: TcpStream) -> Result<()> {
    let mut sink = Vec::new();
    stream.read_to_end(&mut sink).await?;
    Ok(())
}

async fn serve(stream: TcpStream, state: Arc<ServerState>, options: FakeServerOptions) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let master_id = reader.read_i32().await? as u32;
    let slave_id = reader.read_i32().await?;
    *state.last_requested_slave_id.lock() = Some(slave_id);
    state.handshakes.fetch_add(1, Ordering::SeqCst);

    let assigned = options
        .assigned_slave_id
        .unwrap_or_else(|| state.next_slave_id.fetch_add(1, Ordering::SeqCst));
    writer.write_i32(((master_id & 0xffff_0000) | 1) as i32).await?;
    writer.write_i32(assigned).await?;
    writer.flush().await?;

    loop {
        let request = match Object::read_from(&mut reader).await? {
            Object::Request(request) => request,
            other => return Err(Error::Protocol(format!("unexpected {:?}", other))),
        };

        let mut reply = Vec::new();
        match request {
            Request::BeginSession | Request::BeginSession2 => {
                let database = read_string(&mut reader).await?;
                if request == Request::BeginSession2 {
                    let user = read_string(&mut reader).await?;
                    let _password = Object::read_from(&mut reader).await?;
                    state.users.lock().push(user);
                }
                state.databases.lock().push(database);

                if options.reject_sessions {
                    reply.push(Object::Status(Status::Error));
                    reply.push(Object::ErrorInfo {
                        number: 1,
                        sql_state: Some("3D000".to_string()),
                        message: Some("database not found".to_string()),
                    });
                } else {
                    let id = state.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
                    reply.push(Object::Integer(id));
                    reply.push(Object::Status(Status::Success));
                }
            }
            Request::EndSession => {
                Object::read_from(&mut reader).await?;
                state.ended_sessions.fetch_add(1, Ordering::SeqCst);
                reply.push(Object::Status(Status::Success));
            }
        }

        for object in &reply {
            writer.write_all(&object.encode()).await?;
        }
        writer.flush().await?;
    }
}

async fn read_string<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<String> {
    match Object::read_from(reader).await? {
        Object::String(Some(s)) => Ok(s),
        other => Err(Error::Protocol(format!("expected string, got {:?}", other))),
    }
}

/// Records every statement; answers from scripted results and failures.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    statements: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
    results: Mutex<Vec<(String, QueryResult)>>,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Fail statements starting with `prefix` with the given status code.
    pub fn fail_on(&self, prefix: &str, sql_state: &str) {
        self.failures
            .lock()
            .push((prefix.to_string(), sql_state.to_string()));
    }

    /// Answer statements starting with `prefix` with `result`.
    pub fn respond(&self, prefix: &str, result: QueryResult) {
        self.results.lock().push((prefix.to_string(), result));
    }

    /// Hold statements starting with `prefix` for `delay` before answering.
    pub fn delay_on(&self, prefix: &str, delay: Duration) {
        self.delays.lock().push((prefix.to_string(), delay));
    }
}

#[async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn execute(
        &self,
        _port: &mut WireConnection,
        _session_id: i32,
        sql: &str,
    ) -> Result<QueryResult> {
        self.statements.lock().push(sql.to_string());

        let delay = self
            .delays
            .lock()
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, state)| state.clone());
        if let Some(state) = failure {
            return Err(Error::server(state, format!("{} failed", sql)));
        }

        let result = self
            .results
            .lock()
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone());
        Ok(result.unwrap_or_default())
    }
}
