//! Client for the Serf agent's msgpack RPC protocol.
//!
//! Requests are a `{Command, Seq}` header optionally followed by a body; every
//! response starts with a `{Seq, Error}` header and carries a body only when
//! the command has one and `Error` is empty. Objects are written back to back
//! on a single TCP stream with no length prefix.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, Cursor};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{self, DeserializeOwned, Deserializer, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{CoordinateSource, IdentitySource, Member, MemberStatus, MembershipSource};
use crate::coordinate::Coordinate;
use crate::error::AgentError;

const PROTOCOL_VERSION: i32 = 1;
const READ_CHUNK: usize = 8 * 1024;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestHeader<'a> {
    command: &'a str,
    seq: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseHeader {
    seq: u64,
    #[serde(default)]
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct HandshakeRequest {
    version: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct AuthRequest<'a> {
    auth_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CoordinateRequest<'a> {
    node: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MembersResponse {
    #[serde(default)]
    members: Vec<RpcMember>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcMember {
    name: String,
    #[serde(deserialize_with = "deserialize_ip")]
    addr: IpAddr,
    port: u16,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
    status: String,
}

impl From<RpcMember> for Member {
    fn from(member: RpcMember) -> Self {
        Self {
            status: MemberStatus::from_agent(&member.status),
            name: member.name,
            addr: member.addr,
            port: member.port,
            tags: member.tags.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CoordinateResponse {
    #[serde(default)]
    coord: Option<RpcCoordinate>,
    #[serde(default)]
    ok: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcCoordinate {
    vec: Vec<f64>,
    adjustment: f64,
    height: f64,
}

impl From<RpcCoordinate> for Coordinate {
    fn from(coord: RpcCoordinate) -> Self {
        Self::new(coord.vec, coord.height, coord.adjustment)
    }
}

type StatsResponse = HashMap<String, HashMap<String, String>>;

struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Connection {
    async fn exchange<B, R>(
        &mut self,
        command: &'static str,
        seq: u64,
        body: Option<&B>,
        expects_body: bool,
    ) -> Result<Option<R>, AgentError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut frame = rmp_serde::to_vec_named(&RequestHeader { command, seq })?;
        if let Some(body) = body {
            frame.extend(rmp_serde::to_vec_named(body)?);
        }
        self.stream.write_all(&frame).await?;

        let header: ResponseHeader = self.receive().await?;
        if header.seq != seq {
            return Err(AgentError::Protocol(format!(
                "'{command}' expected seq {seq}, received {}",
                header.seq
            )));
        }
        if !header.error.is_empty() {
            return Err(AgentError::Rpc {
                command,
                message: header.error,
            });
        }
        if !expects_body {
            return Ok(None);
        }
        self.receive().await.map(Some)
    }

    async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, AgentError> {
        loop {
            if !self.buffer.is_empty() {
                let mut cursor = Cursor::new(self.buffer.as_slice());
                match rmp_serde::from_read::<_, T>(&mut cursor) {
                    Ok(value) => {
                        let consumed = usize::try_from(cursor.position())
                            .map_err(|_| AgentError::Protocol("frame too large".to_string()))?;
                        self.buffer.drain(..consumed);
                        return Ok(value);
                    }
                    Err(err) if is_incomplete(&err) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            let mut chunk = [0_u8; READ_CHUNK];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(AgentError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

/// Whether a decode error only means more bytes are needed.
fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    match err {
        rmp_serde::decode::Error::InvalidMarkerRead(source)
        | rmp_serde::decode::Error::InvalidDataRead(source) => {
            source.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Membership, coordinate and identity lookups over one RPC connection.
///
/// Requests are serialised through an async mutex. Transport and decode
/// failures drop the connection; the next request reconnects.
pub struct SerfRpcClient {
    addr: String,
    auth_key: Option<String>,
    timeout: Duration,
    seq: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl SerfRpcClient {
    /// Connects and performs the handshake (plus auth when a key is set).
    pub async fn connect(
        addr: impl Into<String>,
        auth_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Self {
            addr: addr.into(),
            auth_key: auth_key.filter(|key| !key.is_empty()),
            timeout,
            seq: AtomicU64::new(0),
            connection: Mutex::new(None),
        };
        let connection = tokio::time::timeout(timeout, client.open())
            .await
            .map_err(|_| AgentError::Timeout(timeout))??;
        *client.connection.lock().await = Some(connection);
        Ok(client)
    }

    /// Address of the agent RPC endpoint.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn open(&self) -> Result<Connection, AgentError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let mut connection = Connection {
            stream,
            buffer: Vec::new(),
        };

        connection
            .exchange::<_, IgnoredAny>(
                "handshake",
                self.next_seq(),
                Some(&HandshakeRequest {
                    version: PROTOCOL_VERSION,
                }),
                false,
            )
            .await?;
        if let Some(auth_key) = self.auth_key.as_deref() {
            connection
                .exchange::<_, IgnoredAny>(
                    "auth",
                    self.next_seq(),
                    Some(&AuthRequest { auth_key }),
                    false,
                )
                .await?;
        }
        debug!(addr = %self.addr, "connected to agent RPC");
        Ok(connection)
    }

    async fn call<B, R>(&self, command: &'static str, body: Option<&B>) -> Result<R, AgentError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let mut slot = self.connection.lock().await;
        let result = tokio::time::timeout(self.timeout, self.call_on(&mut slot, command, body))
            .await
            .unwrap_or(Err(AgentError::Timeout(self.timeout)));

        if let Err(err) = &result
            && !matches!(err, AgentError::Rpc { .. })
        {
            warn!(command, "dropping agent connection: {err}");
            *slot = None;
        }
        result
    }

    async fn call_on<B, R>(
        &self,
        slot: &mut Option<Connection>,
        command: &'static str,
        body: Option<&B>,
    ) -> Result<R, AgentError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        let connection = slot.as_mut().ok_or(AgentError::Closed)?;
        connection
            .exchange(command, self.next_seq(), body, true)
            .await?
            .ok_or_else(|| AgentError::Protocol(format!("'{command}' response had no body")))
    }
}

#[async_trait]
impl MembershipSource for SerfRpcClient {
    async fn members(&self) -> Result<Vec<Member>, AgentError> {
        let response: MembersResponse = self.call::<(), _>("members", None).await?;
        Ok(response.members.into_iter().map(Member::from).collect())
    }
}

#[async_trait]
impl CoordinateSource for SerfRpcClient {
    async fn coordinate(&self, node: &str) -> Result<Option<Coordinate>, AgentError> {
        let response: CoordinateResponse = self
            .call("get-coordinate", Some(&CoordinateRequest { node }))
            .await?;
        if !response.ok {
            return Ok(None);
        }
        Ok(response.coord.map(Coordinate::from))
    }
}

#[async_trait]
impl IdentitySource for SerfRpcClient {
    async fn local_name(&self) -> Result<String, AgentError> {
        let stats: StatsResponse = self.call::<(), _>("stats", None).await?;
        stats
            .get("agent")
            .and_then(|agent| agent.get("name"))
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or_else(|| AgentError::Identity("stats response lacks agent.name".to_string()))
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    let octets = <[u8; 16]>::try_from(bytes).ok()?;
    let v6 = Ipv6Addr::from(octets);
    Some(v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4))
}

fn deserialize_ip<'de, D: Deserializer<'de>>(deserializer: D) -> Result<IpAddr, D::Error> {
    deserializer.deserialize_any(IpVisitor)
}

struct IpVisitor;

impl<'de> Visitor<'de> for IpVisitor {
    type Value = IpAddr;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a 4 or 16 byte IP address")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<IpAddr, E> {
        ip_from_bytes(v).ok_or_else(|| E::invalid_length(v.len(), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<IpAddr, E> {
        v.parse()
            .ok()
            .or_else(|| ip_from_bytes(v.as_bytes()))
            .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<IpAddr, A::Error> {
        let mut bytes = Vec::with_capacity(16);
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        ip_from_bytes(&bytes).ok_or_else(|| de::Error::invalid_length(bytes.len(), &self))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde::Serializer;

    struct Bin(Vec<u8>);

    impl Serialize for Bin {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_bytes(&self.0)
        }
    }

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct WireMember {
        name: &'static str,
        addr: Bin,
        port: u16,
        tags: Option<BTreeMap<String, String>>,
        status: &'static str,
        protocol_cur: u8,
    }

    #[test]
    fn ipv4_mapped_addresses_collapse_to_v4() {
        let mut mapped = [0_u8; 16];
        mapped[10] = 0xff;
        mapped[11] = 0xff;
        mapped[12..].copy_from_slice(&[10, 0, 2, 11]);
        assert_eq!(ip_from_bytes(&mapped), Some("10.0.2.11".parse().unwrap()));
        assert_eq!(ip_from_bytes(&[192, 168, 1, 1]), Some("192.168.1.1".parse().unwrap()));
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn decodes_member_with_binary_address_and_nil_tags() {
        let mut mapped = vec![0_u8; 16];
        mapped[10] = 0xff;
        mapped[11] = 0xff;
        mapped[12..].copy_from_slice(&[10, 0, 1, 10]);
        let wire = WireMember {
            name: "clab-nebula-serf1",
            addr: Bin(mapped),
            port: 7946,
            tags: None,
            status: "failed",
            protocol_cur: 5,
        };
        let bytes = rmp_serde::to_vec_named(&wire).unwrap();
        let decoded: RpcMember = rmp_serde::from_slice(&bytes).unwrap();
        let member = Member::from(decoded);
        assert_eq!(member.name, "clab-nebula-serf1");
        assert_eq!(member.addr, "10.0.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(member.status, MemberStatus::Failed);
        assert!(member.tags.is_empty());
    }

    #[test]
    fn truncated_frames_are_incomplete_not_fatal() {
        let bytes = rmp_serde::to_vec_named(&RequestHeader {
            command: "members",
            seq: 7,
        })
        .unwrap();
        for cut in 1..bytes.len() {
            let err = rmp_serde::from_read::<_, HashMap<String, IgnoredAny>>(Cursor::new(&bytes[..cut]))
                .err()
                .unwrap();
            assert!(is_incomplete(&err), "cut at {cut}: {err}");
        }
    }
}
