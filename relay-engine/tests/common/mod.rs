//! Test doubles shared by the relay-engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{OutboundMessage, SendResponse, Transport, TransportError};
use relay_engine::{EngineConfig, RelayEngine, RetryPolicy};
use storage::SqlCorrelationStore;

pub const BOT: &str = "@relay:x";
pub const MANAGEMENT: &str = "!mgmt:x";
pub const OPERATOR: &str = "@op:x";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(OutboundMessage),
    Reaction {
        room_id: String,
        event_id: String,
        key: String,
    },
    Join(String),
    ResolveAlias(String),
    CreateDirect(String),
}

/// Records every call; successful sends return `$m1`, `$m2`, ... in order.
/// Errors queued with [`RecordingTransport::fail_next`] are returned by the next calls.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<VecDeque<TransportError>>,
    next_event: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn sent_to(&self, room_id: &str) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.room_id == room_id)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendResponse, TransportError> {
        self.record(Call::Send(message.clone()))?;
        let n = self.next_event.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendResponse::new(format!("$m{}", n)))
    }

    async fn send_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<SendResponse, TransportError> {
        self.record(Call::Reaction {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
            key: key.to_string(),
        })?;
        Ok(SendResponse::new(format!("$reaction-{}", event_id)))
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<String, TransportError> {
        self.record(Call::Join(room_id_or_alias.to_string()))?;
        Ok(room_id_or_alias.to_string())
    }

    async fn resolve_room_alias(&self, alias: &str) -> Result<String, TransportError> {
        self.record(Call::ResolveAlias(alias.to_string()))?;
        Ok("!aliased:x".to_string())
    }

    async fn create_direct_room(&self, user_id: &str) -> Result<String, TransportError> {
        self.record(Call::CreateDirect(user_id.to_string()))?;
        Ok("!dm:x".to_string())
    }
}

pub fn rate_limited() -> TransportError {
    TransportError::RateLimited {
        retry_after: Some(Duration::from_millis(1)),
    }
}

/// Engine config with a 1 ms retry interval so rate-limit tests run instantly.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::new(BOT, MANAGEMENT);
    config.retry = RetryPolicy::new(Duration::from_millis(1), 3);
    config
}

pub async fn open_store() -> Arc<SqlCorrelationStore> {
    Arc::new(
        SqlCorrelationStore::open("sqlite::memory:")
            .await
            .expect("Failed to open store"),
    )
}

pub async fn engine_with(
    config: EngineConfig,
) -> (RelayEngine, Arc<RecordingTransport>, Arc<SqlCorrelationStore>) {
    let transport = RecordingTransport::new();
    let store = open_store().await;
    let engine = RelayEngine::new(config, transport.clone(), store.clone());
    (engine, transport, store)
}
