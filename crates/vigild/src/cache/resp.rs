//! Network cache backend speaking a RESP subset (GET, SET .. PX, PING)

use super::{CacheError, CacheStore, MAX_ENTRY_TTL};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Upper bound for one bulk reply
const MAX_BULK_LEN: usize = 64 * 1024 * 1024;

/// Upper bound for array replies
const MAX_ARRAY_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<RespValue>),
}

/// Redis-compatible cache client over a single reused TCP connection
pub struct RespCache {
    addr: String,
    io_timeout: Duration,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RespCache {
    pub fn new(addr: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            io_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, CacheError> {
        let stream = tokio::time::timeout(self.io_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| CacheError::Timeout(self.io_timeout))??;
        stream.set_nodelay(true)?;
        debug!("Connected to cache at {}", self.addr);
        Ok(BufStream::new(stream))
    }

    /// Send one command and read its reply.
    ///
    /// A failure on a reused connection gets one retry on a fresh one; all
    /// three supported commands are idempotent.
    async fn command(&self, args: &[&[u8]]) -> Result<RespValue, CacheError> {
        let request = encode_command(args);
        let mut slot = self.conn.lock().await;

        let reused = slot.is_some();
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        match self.exchange(&mut stream, &request).await {
            Ok(reply) => {
                *slot = Some(stream);
                Ok(reply)
            }
            Err(CacheError::Io(e)) if reused => {
                debug!("Stale cache connection ({}), reconnecting", e);
                let mut fresh = self.connect().await?;
                let reply = self.exchange(&mut fresh, &request).await?;
                *slot = Some(fresh);
                Ok(reply)
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(
        &self,
        stream: &mut BufStream<TcpStream>,
        request: &[u8],
    ) -> Result<RespValue, CacheError> {
        let io = async {
            stream.write_all(request).await?;
            stream.flush().await?;
            read_value(stream).await
        };
        tokio::time::timeout(self.io_timeout, io)
            .await
            .map_err(|_| CacheError::Timeout(self.io_timeout))?
    }
}

#[async_trait]
impl CacheStore for RespCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.command(&[b"GET", key.as_bytes()]).await? {
            RespValue::Bulk(value) => Ok(value),
            RespValue::Error(msg) => Err(CacheError::Protocol(msg)),
            other => Err(unexpected("GET", &other)),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let millis = ttl.min(MAX_ENTRY_TTL).as_millis().max(1).to_string();
        let reply = self
            .command(&[b"SET", key.as_bytes(), &value, b"PX", millis.as_bytes()])
            .await?;
        match reply {
            RespValue::Simple(s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => {
                warn!("Cache rejected SET for {}: {}", key, msg);
                Err(CacheError::Protocol(msg))
            }
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        match self.command(&[b"PING"]).await? {
            RespValue::Simple(s) if s == "PONG" => Ok(()),
            RespValue::Error(msg) => Err(CacheError::Protocol(msg)),
            other => Err(unexpected("PING", &other)),
        }
    }

    fn backend(&self) -> &'static str {
        "resp"
    }
}

fn unexpected(command: &str, reply: &RespValue) -> CacheError {
    CacheError::Protocol(format!("unexpected reply to {}: {:?}", command, reply))
}

// ============================================================================
// Wire encoding
// ============================================================================

pub(crate) fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, CacheError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(CacheError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "cache closed the connection",
        )));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(CacheError::Protocol("reply line not CRLF terminated".into()));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|_| CacheError::Protocol("reply line is not UTF-8".into()))
}

fn parse_len(raw: &str) -> Result<i64, CacheError> {
    raw.parse::<i64>()
        .map_err(|_| CacheError::Protocol(format!("bad length: {:?}", raw)))
}

/// Parse a non-array value whose header line was already read
async fn read_scalar<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: String,
) -> Result<RespValue, CacheError> {
    let Some(tag) = line.chars().next() else {
        return Err(CacheError::Protocol("empty reply line".into()));
    };
    let rest = &line[tag.len_utf8()..];
    match tag {
        '+' => Ok(RespValue::Simple(rest.to_string())),
        '-' => Ok(RespValue::Error(rest.to_string())),
        ':' => Ok(RespValue::Integer(parse_len(rest)?)),
        '$' => {
            let len = parse_len(rest)?;
            if len < 0 {
                return Ok(RespValue::Bulk(None));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(CacheError::Protocol(format!("bulk reply too large: {}", len)));
            }
            let mut body = vec![0u8; len + 2];
            reader.read_exact(&mut body).await?;
            if !body.ends_with(b"\r\n") {
                return Err(CacheError::Protocol("bulk reply not CRLF terminated".into()));
            }
            body.truncate(len);
            Ok(RespValue::Bulk(Some(body)))
        }
        _ => Err(CacheError::Protocol(format!("unknown reply type: {:?}", line))),
    }
}

/// Read one value; arrays may only contain scalars
pub(crate) async fn read_value<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<RespValue, CacheError> {
    let line = read_line(reader).await?;
    let Some(count) = line.strip_prefix('*') else {
        return read_scalar(reader, line).await;
    };

    let count = parse_len(count)?;
    if count < 0 {
        return Ok(RespValue::Array(Vec::new()));
    }
    let count = count as usize;
    if count > MAX_ARRAY_LEN {
        return Err(CacheError::Protocol(format!("array reply too large: {}", count)));
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let line = read_line(reader).await?;
        if line.starts_with('*') {
            return Err(CacheError::Protocol("nested arrays are not supported".into()));
        }
        items.push(read_scalar(reader, line).await?);
    }
    Ok(RespValue::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::io::BufReader;
    use tokio::net::TcpListener;
    use vigil_common::ErrorKind;

    /// Minimal in-test RESP server; `one_shot` closes after each command
    async fn spawn_server(one_shot: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let store: Arc<StdMutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::default();

        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let store = store.clone();
                tokio::spawn(async move {
                    let mut stream = BufStream::new(socket);
                    while let Ok(RespValue::Array(args)) = read_value(&mut stream).await {
                        let args: Vec<Vec<u8>> = args
                            .into_iter()
                            .map(|a| match a {
                                RespValue::Bulk(Some(b)) => b,
                                _ => Vec::new(),
                            })
                            .collect();
                        let reply: Vec<u8> = match args[0].as_slice() {
                            b"PING" => b"+PONG\r\n".to_vec(),
                            b"SET" => {
                                assert_eq!(args[3], b"PX");
                                store.lock().unwrap().insert(args[1].clone(), args[2].clone());
                                b"+OK\r\n".to_vec()
                            }
                            b"GET" => match store.lock().unwrap().get(&args[1]) {
                                Some(v) => {
                                    let mut out = format!("${}\r\n", v.len()).into_bytes();
                                    out.extend_from_slice(v);
                                    out.extend_from_slice(b"\r\n");
                                    out
                                }
                                None => b"$-1\r\n".to_vec(),
                            },
                            _ => b"-ERR unknown command\r\n".to_vec(),
                        };
                        stream.write_all(&reply).await.unwrap();
                        stream.flush().await.unwrap();
                        if one_shot {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[test]
    fn test_encode_set_command() {
        let encoded = encode_command(&[b"SET", b"k", b"v1", b"PX", b"250"]);
        assert_eq!(
            encoded,
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nv1\r\n$2\r\nPX\r\n$3\r\n250\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_read_reply_types() {
        let raw: &[u8] = b"+OK\r\n-ERR boom\r\n:42\r\n$3\r\nabc\r\n$-1\r\n*2\r\n$1\r\na\r\n:7\r\n";
        let mut reader = BufReader::new(raw);

        assert_eq!(read_value(&mut reader).await.unwrap(), RespValue::Simple("OK".into()));
        assert_eq!(read_value(&mut reader).await.unwrap(), RespValue::Error("ERR boom".into()));
        assert_eq!(read_value(&mut reader).await.unwrap(), RespValue::Integer(42));
        assert_eq!(
            read_value(&mut reader).await.unwrap(),
            RespValue::Bulk(Some(b"abc".to_vec()))
        );
        assert_eq!(read_value(&mut reader).await.unwrap(), RespValue::Bulk(None));
        assert_eq!(
            read_value(&mut reader).await.unwrap(),
            RespValue::Array(vec![RespValue::Bulk(Some(b"a".to_vec())), RespValue::Integer(7)])
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_is_protocol_error() {
        let mut reader = BufReader::new(&b"?what\r\n"[..]);
        let err = read_value(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);

        let mut reader = BufReader::new(&b"*1\r\n*0\r\n"[..]);
        assert!(matches!(
            read_value(&mut reader).await,
            Err(CacheError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let addr = spawn_server(false).await;
        let cache = RespCache::new(addr, Duration::from_secs(2));

        cache.ping().await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache
            .set("k", b"payload".to_vec(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_reconnects_after_server_closes() {
        let addr = spawn_server(true).await;
        let cache = RespCache::new(addr, Duration::from_secs(2));

        for _ in 0..3 {
            cache.ping().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let cache = RespCache::new(addr, Duration::from_secs(2));
        let err = cache.ping().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    }
}
