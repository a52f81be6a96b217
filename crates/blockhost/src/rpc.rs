// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance RPC adapter.
//!
//! Exposes `instance.start`, `instance.restart` and `instance.remove` as named
//! operations. Each takes `{ "instance_id": <id> }` and answers with an empty
//! success or an error `{ code, message }`. No transport is bound here; a
//! server decodes requests off its wire and hands them to
//! [`InstanceRpc::dispatch`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::InstanceId;
use crate::instance_manager::InstanceManager;

/// A named request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method name, e.g. `instance.start`
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Build a request for an instance method.
    pub fn instance(method: InstanceMethod, instance_id: InstanceId) -> Self {
        Self {
            method: method.as_str().to_string(),
            params: serde_json::json!({ "instance_id": instance_id }),
        }
    }
}

/// Error payload of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Stable error code
    pub code: String,
    /// Human readable message
    pub message: String,
}

/// Response to a request. Success carries no payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Set when the request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response.
    pub fn ok() -> Self {
        Self { error: None }
    }

    /// Failed response.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(RpcError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Whether the request succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Instance lifecycle methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceMethod {
    /// `instance.start`
    Start,
    /// `instance.restart`
    Restart,
    /// `instance.remove`
    Remove,
}

impl InstanceMethod {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "instance.start",
            Self::Restart => "instance.restart",
            Self::Remove => "instance.remove",
        }
    }
}

impl fmt::Display for InstanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance.start" => Ok(Self::Start),
            "instance.restart" => Ok(Self::Restart),
            "instance.remove" => Ok(Self::Remove),
            other => Err(format!("Unknown method: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceParams {
    instance_id: InstanceId,
}

/// Dispatches instance RPCs to an [`InstanceManager`].
#[derive(Clone)]
pub struct InstanceRpc {
    manager: Arc<InstanceManager>,
}

impl InstanceRpc {
    /// Create a dispatcher over a manager.
    pub fn new(manager: Arc<InstanceManager>) -> Self {
        Self { manager }
    }

    /// Route one request.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let method = match request.method.parse::<InstanceMethod>() {
            Ok(method) => method,
            Err(message) => {
                warn!(method = %request.method, "Received unknown RPC method");
                return RpcResponse::error("UNKNOWN_METHOD", message);
            }
        };

        let params: InstanceParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => {
                return RpcResponse::error(
                    "INVALID_PARAMS",
                    format!("Invalid params for {}: {}", method, e),
                );
            }
        };

        debug!(method = %method, instance_id = params.instance_id, "Dispatching RPC");

        let result = match method {
            InstanceMethod::Start => self.manager.start(params.instance_id).await.map(|_| ()),
            InstanceMethod::Restart => self.manager.restart(params.instance_id).await.map(|_| ()),
            InstanceMethod::Remove => self.manager.remove(params.instance_id).await,
        };

        match result {
            Ok(()) => RpcResponse::ok(),
            Err(e) => RpcResponse::error(e.error_code(), e.to_string()),
        }
    }

    /// Route a request given as JSON.
    pub async fn dispatch_json(&self, request: Value) -> RpcResponse {
        match serde_json::from_value::<RpcRequest>(request) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => RpcResponse::error("INVALID_REQUEST", format!("Malformed request: {}", e)),
        }
    }
}
