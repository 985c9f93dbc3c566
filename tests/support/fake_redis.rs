//! A RESP2 server holding hashes in memory, for the Redis checkpoint tests.
//!
//! Understands the handful of commands the checkpoint sends: `CLIENT`
//! (connection setup), `MULTI`/`EXEC`, `DEL`, `HMSET` and `HGETALL`.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

type Hashes = HashMap<String, BTreeMap<String, String>>;

#[derive(Default)]
struct RedisState {
    hashes: Mutex<Hashes>,
    commands: Mutex<Vec<String>>,
    fail_reads: AtomicBool,
}

#[derive(Clone)]
pub struct FakeRedis {
    state: Arc<RedisState>,
    pub url: String,
}

impl FakeRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Start listening on a specific address, e.g. one a client is
    /// already trying to reach.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RedisState::default());
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, shared.clone()));
            }
        });

        Self {
            state,
            url: format!("redis://{}/", addr),
        }
    }

    /// Answer `HGETALL` with an error while set.
    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn hash(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.state.hashes.lock().unwrap().get(key).cloned()
    }

    pub fn set_hash(&self, key: &str, fields: &[(&str, &str)]) {
        let hash = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.state
            .hashes
            .lock()
            .unwrap()
            .insert(key.to_string(), hash);
    }

    /// Names of the commands received so far, setup commands excluded.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }
}

async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

fn bulk(s: &str) -> String {
    format!("${}\r\n{}\r\n", s.len(), s)
}

/// Run one data command against the store and encode its reply.
fn apply(state: &RedisState, args: &[String]) -> String {
    let name = args[0].to_ascii_uppercase();
    state.commands.lock().unwrap().push(name.clone());
    let mut hashes = state.hashes.lock().unwrap();

    match name.as_str() {
        "DEL" => {
            let removed = args[1..]
                .iter()
                .filter(|key| hashes.remove(key.as_str()).is_some())
                .count();
            format!(":{}\r\n", removed)
        }
        "HMSET" => {
            let hash = hashes.entry(args[1].clone()).or_default();
            for pair in args[2..].chunks(2) {
                hash.insert(pair[0].clone(), pair[1].clone());
            }
            "+OK\r\n".to_string()
        }
        "HGETALL" => {
            if state.fail_reads.load(Ordering::SeqCst) {
                return "-ERR injected read failure\r\n".to_string();
            }
            let hash = hashes.get(&args[1]).cloned().unwrap_or_default();
            let mut reply = format!("*{}\r\n", hash.len() * 2);
            for (field, value) in &hash {
                reply.push_str(&bulk(field));
                reply.push_str(&bulk(value));
            }
            reply
        }
        other => format!("-ERR unknown command '{}'\r\n", other),
    }
}

async fn handle(stream: TcpStream, state: Arc<RedisState>) {
    let mut reader = BufReader::new(stream);
    let mut queued: Option<Vec<Vec<String>>> = None;

    while let Some(args) = read_command(&mut reader).await {
        let Some(name) = args.first().map(|a| a.to_ascii_uppercase()) else {
            break;
        };

        let reply = match name.as_str() {
            "CLIENT" => "+OK\r\n".to_string(),
            "PING" => "+PONG\r\n".to_string(),
            "MULTI" => {
                state.commands.lock().unwrap().push(name);
                queued = Some(Vec::new());
                "+OK\r\n".to_string()
            }
            "EXEC" => {
                let batch = queued.take().unwrap_or_default();
                let mut reply = format!("*{}\r\n", batch.len());
                for cmd in &batch {
                    reply.push_str(&apply(&state, cmd));
                }
                state.commands.lock().unwrap().push(name);
                reply
            }
            _ => match queued.as_mut() {
                Some(batch) => {
                    batch.push(args);
                    "+QUEUED\r\n".to_string()
                }
                None => apply(&state, &args),
            },
        };

        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}
