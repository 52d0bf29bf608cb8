//! Anonymity transport primitive
//!
//! One reqwest client per circuit, routed through Tor's SOCKS5h port so DNS
//! resolution also happens inside Tor. Each circuit authenticates to the
//! SOCKS port with its own throwaway credentials, which makes Tor place it on
//! an isolated circuit (IsolateSOCKSAuth).

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use umbra_core::TransportConfig;

/// Tor Project's onion service, used as a reachability probe
pub const PROBE_ONION: &str = "http://2gzyxa5ihm7nsggfxnu52rck2vv4rvmdlkiu3ber7fzs2xqxczfebsid.onion/";

/// Errors from the anonymity transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("SOCKS proxy {addr} unreachable: {reason}")]
    ProxyUnreachable { addr: String, reason: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Circuit creation exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown circuit {0}")]
    UnknownCircuit(Uuid),
}

impl TransportError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Circuit-level transport. Implementations must be safe to share across tasks.
#[async_trait]
pub trait AnonymityTransport: Send + Sync {
    /// Establish a circuit under the given id
    async fn connect(&self, circuit_id: Uuid) -> Result<(), TransportError>;

    /// Issue a GET over an established circuit
    async fn request(
        &self,
        circuit_id: Uuid,
        url: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Tear the circuit down; unknown ids are ignored
    async fn close(&self, circuit_id: Uuid);
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// `host:port` with any scheme prefix removed
fn proxy_host(socks_addr: &str) -> &str {
    socks_addr
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(socks_addr)
        .trim_end_matches('/')
}

/// Proxy URL carrying per-circuit SOCKS credentials
fn isolated_proxy_url(socks_addr: &str, circuit_id: Uuid) -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!(
        "socks5h://{}:{:016x}@{}",
        circuit_id.simple(),
        nonce,
        proxy_host(socks_addr)
    )
}

/// Create a Tor-enabled HTTP client bound to one circuit
fn create_circuit_client(socks_addr: &str, circuit_id: Uuid) -> Result<Client, TransportError> {
    let proxy = Proxy::all(isolated_proxy_url(socks_addr, circuit_id))
        .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

    Client::builder()
        .proxy(proxy)
        .user_agent(random_user_agent())
        .danger_accept_invalid_certs(true) // Many .onion sites have self-signed certs
        .build()
        .map_err(|e| TransportError::ClientBuild(e.to_string()))
}

/// Production transport over a local Tor SOCKS port
pub struct SocksTransport {
    socks_addr: String,
    connect_timeout: Duration,
    clients: DashMap<Uuid, Client>,
}

impl SocksTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            socks_addr: proxy_host(&config.socks_addr).to_string(),
            connect_timeout: config.connect_timeout(),
            clients: DashMap::new(),
        }
    }

    pub fn open_circuits(&self) -> usize {
        self.clients.len()
    }

    async fn probe_proxy(&self) -> Result<(), TransportError> {
        let unreachable = |reason: String| TransportError::ProxyUnreachable {
            addr: self.socks_addr.clone(),
            reason,
        };

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.socks_addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(unreachable(e.to_string())),
            Err(_) => Err(unreachable(format!("no answer within {:?}", self.connect_timeout))),
        }
    }
}

#[async_trait]
impl AnonymityTransport for SocksTransport {
    async fn connect(&self, circuit_id: Uuid) -> Result<(), TransportError> {
        self.probe_proxy().await?;
        let client = create_circuit_client(&self.socks_addr, circuit_id)?;
        self.clients.insert(circuit_id, client);
        debug!("Opened circuit {}", circuit_id);
        Ok(())
    }

    async fn request(
        &self,
        circuit_id: Uuid,
        url: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let client = self
            .clients
            .get(&circuit_id)
            .map(|c| c.clone())
            .ok_or(TransportError::UnknownCircuit(circuit_id))?;

        debug!("GET {} via circuit {}", url, circuit_id);

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;

        Ok(TransportResponse { status, body })
    }

    async fn close(&self, circuit_id: Uuid) {
        if self.clients.remove(&circuit_id).is_some() {
            debug!("Closed circuit {}", circuit_id);
        }
    }
}

/// Check that the SOCKS port answers and a known onion service is reachable
pub async fn check_connection(config: &TransportConfig) -> Result<bool, TransportError> {
    let transport = SocksTransport::new(config);
    let circuit_id = Uuid::new_v4();
    transport.connect(circuit_id).await?;

    let timeout = Duration::from_secs(45);
    let result = transport.request(circuit_id, PROBE_ONION, timeout).await;
    transport.close(circuit_id).await;

    match result {
        Ok(resp) => Ok(resp.is_success() || (300..400).contains(&resp.status)),
        Err(_) => Ok(false),
    }
}
