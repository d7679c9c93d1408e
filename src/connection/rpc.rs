//! JSON-RPC 2.0 message types and the transport-agnostic RPC client

use super::http::HttpRpcClient;
use super::websocket::WsRpcClient;
use super::TransportEvent;
use crate::error::{Result, SdkError};
use crate::tx::classifier::classify_rpc_error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Outgoing request
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Error object of a failed call
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn into_error(self) -> SdkError {
        classify_rpc_error(self.code, &self.message, self.data.as_ref())
    }
}

/// Any incoming frame: a response (has `id`) or a subscription notification (has `params`)
#[derive(Debug, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<NotificationParams>,
}

impl RpcMessage {
    /// Outcome of a response frame
    pub fn into_outcome(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(error.into_error()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub subscription: Value,
    pub result: Value,
}

/// Nodes return subscription ids as strings or numbers
pub fn subscription_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// RPC client over either transport kind
#[derive(Clone)]
pub enum RpcClient {
    Ws(WsRpcClient),
    Http(HttpRpcClient),
}

impl RpcClient {
    /// Call `method` and decode its result
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = match self {
            RpcClient::Ws(client) => client.request(method, params).await?,
            RpcClient::Http(client) => client.request(method, params).await?,
        };
        serde_json::from_value(value)
            .map_err(|e| SdkError::protocol(format!("unexpected {} response: {}", method, e)))
    }

    pub fn is_connected(&self) -> bool {
        match self {
            RpcClient::Ws(client) => client.is_connected(),
            RpcClient::Http(client) => client.is_connected(),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        match self {
            RpcClient::Ws(client) => client.events(),
            RpcClient::Http(client) => client.events(),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            RpcClient::Ws(client) => client.close().await,
            RpcClient::Http(client) => {
                client.close();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxStateFailure;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest::new(7, "chain_getBlockHash", json!([0]));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "chain_getBlockHash", "params": [0]})
        );
    }

    #[test]
    fn test_response_outcome() {
        let ok: RpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x91b1"}"#).unwrap();
        assert_eq!(ok.into_outcome().unwrap(), json!("0x91b1"));

        let null: RpcMessage = serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"result":null}"#).unwrap();
        assert_eq!(null.into_outcome().unwrap(), Value::Null);

        let pool: RpcMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":1014,"message":"Priority is too low"}}"#,
        )
        .unwrap();
        assert!(matches!(
            pool.into_outcome(),
            Err(SdkError::TransactionState {
                state: TxStateFailure::Usurped,
                ..
            })
        ));
    }

    #[test]
    fn test_notification_parsing() {
        let frame = r#"{
            "jsonrpc": "2.0",
            "method": "author_extrinsicUpdate",
            "params": {"subscription": "aBcD", "result": {"inBlock": "0x01"}}
        }"#;
        let message: RpcMessage = serde_json::from_str(frame).unwrap();
        assert!(message.id.is_none());
        let params = message.params.unwrap();
        assert_eq!(subscription_key(&params.subscription), "aBcD");
        assert_eq!(params.result, json!({"inBlock": "0x01"}));
        assert_eq!(subscription_key(&json!(42)), "42");
    }
}
