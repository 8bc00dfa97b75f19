//! Request queue backends
//!
//! The shared request queue is a FIFO list on a cache service with an atomic
//! pop-from-tail. Two backends:
//! - `RedisQueue` - RPOP against a Redis-compatible REST endpoint
//!   (command array POSTed with bearer-token auth)
//! - `MemoryQueue` - in-process list used by the test suite

use std::collections::VecDeque;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

/// One shared FIFO of encrypted request frames. `None` means the list is
/// currently empty; workers compete on `pop`.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    async fn pop(&self) -> Result<Option<Vec<u8>>>;
}

#[derive(Deserialize)]
struct RedisResponse {
    result: Value,
}

/// Redis REST client for the request list. Frames are hex-encoded on the
/// list because the REST surface is string-typed.
pub struct RedisQueue {
    http: reqwest::Client,
    url: String,
    token: String,
    key: String,
}

impl RedisQueue {
    pub fn new(http: reqwest::Client, url: String, token: String, key: String) -> Self {
        Self {
            http,
            url,
            token,
            key,
        }
    }

    /// Execute a Redis command via the REST API
    async fn execute(&self, command: Vec<Value>) -> Result<Value> {
        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&command)
            .send()
            .await
            .context("Failed to send Redis request")?;

        let redis_response: RedisResponse = response
            .json()
            .await
            .context("Failed to parse Redis response")?;

        Ok(redis_response.result)
    }
}

#[async_trait]
impl RequestQueue for RedisQueue {
    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let result = self
            .execute(vec![
                Value::String("RPOP".to_string()),
                Value::String(self.key.clone()),
            ])
            .await?;

        match result {
            Value::String(frame) => Ok(Some(
                hex::decode(&frame).context("request frame is not valid hex")?,
            )),
            Value::Null => Ok(None),
            other => bail!("unexpected RPOP reply: {other}"),
        }
    }
}

/// In-process queue with RPOP semantics: producers push at the head,
/// consumers pop from the tail.
#[derive(Default)]
pub struct MemoryQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
}

impl MemoryQueue {
    pub fn push(&self, frame: Vec<u8>) {
        self.frames.lock().push_front(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[async_trait]
impl RequestQueue for MemoryQueue {
    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.frames.lock().pop_back())
    }
}
