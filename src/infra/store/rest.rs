use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{KvStore, SADD_EXTEND_SCRIPT, StoreError, expiry_secs};

/// Store reached through a hosted REST command endpoint.
///
/// Each command is posted as a JSON array (`["SET","k","v","EX","60"]`) with
/// a bearer token; the reply is `{"result": ...}` or `{"error": "..."}`.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    endpoint: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestStore {
    pub fn new(endpoint: Url, token: String) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("resort-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    async fn command(&self, name: &'static str, args: Vec<String>) -> Result<Value, StoreError> {
        let mut body = Vec::with_capacity(args.len() + 1);
        body.push(name.to_string());
        body.extend(args);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let reply: CommandReply = serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::protocol(
                name,
                format!(
                    "status {status}, undecodable body ({err}): {}",
                    String::from_utf8_lossy(&bytes)
                ),
            )
        })?;

        if let Some(message) = reply.error {
            return Err(StoreError::rejected(name, message));
        }
        if !status.is_success() {
            return Err(StoreError::rejected(name, format!("status {status}")));
        }

        Ok(reply.result.unwrap_or(Value::Null))
    }
}

fn expect_text(command: &'static str, value: Value) -> Result<Option<String>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(StoreError::protocol(
            command,
            format!("expected string, got {other}"),
        )),
    }
}

fn expect_integer(command: &'static str, value: Value) -> Result<i64, StoreError> {
    value
        .as_i64()
        .ok_or_else(|| StoreError::protocol(command, format!("expected integer, got {value}")))
}

#[async_trait]
impl KvStore for RestStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.command("GET", vec![key.to_string()]).await?;
        expect_text("GET", value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut args = vec![key.to_string(), value.to_string()];
        if let Some(ttl) = expiry {
            args.push("EX".to_string());
            args.push(expiry_secs(ttl).to_string());
        }
        self.command("SET", args).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let value = self.command("INCR", vec![key.to_string()]).await?;
        expect_integer("INCR", value)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let value = self.command("DEL", keys.to_vec()).await?;
        let removed = expect_integer("DEL", value)?;
        u64::try_from(removed).map_err(|_| StoreError::protocol("DEL", "negative count"))
    }

    async fn json_get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = self.command("JSON.GET", vec![key.to_string()]).await?;
        expect_text("JSON.GET", value)?
            .map(|text| {
                serde_json::from_str(&text)
                    .map_err(|err| StoreError::protocol("JSON.GET", err.to_string()))
            })
            .transpose()
    }

    async fn json_set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.command(
            "JSON.SET",
            vec![key.to_string(), "$".to_string(), value.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        expiry: Option<Duration>,
    ) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut args = vec![
            SADD_EXTEND_SCRIPT.to_string(),
            "1".to_string(),
            key.to_string(),
            expiry.map_or(0, expiry_secs).to_string(),
        ];
        args.extend(members.iter().cloned());
        let value = self.command("EVAL", args).await?;
        let added = expect_integer("EVAL", value)?;
        u64::try_from(added).map_err(|_| StoreError::protocol("EVAL", "negative count"))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let value = self.command("SMEMBERS", vec![key.to_string()]).await?;
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(member) => Ok(member),
                    other => Err(StoreError::protocol(
                        "SMEMBERS",
                        format!("expected string member, got {other}"),
                    )),
                })
                .collect(),
            other => Err(StoreError::protocol(
                "SMEMBERS",
                format!("expected array, got {other}"),
            )),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut args = vec![key.to_string()];
        args.extend(members.iter().cloned());
        let value = self.command("SREM", args).await?;
        let removed = expect_integer("SREM", value)?;
        u64::try_from(removed).map_err(|_| StoreError::protocol("SREM", "negative count"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let value = self.command("PING", Vec::new()).await?;
        match expect_text("PING", value)?.as_deref() {
            Some("PONG") => Ok(()),
            other => Err(StoreError::protocol("PING", format!("{other:?}"))),
        }
    }
}
