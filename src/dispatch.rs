//! Protected tool dispatch
//!
//! [`ProtectedDispatcher`] is the single seam the protocol server calls for a
//! tool invocation.  It authorizes the request through the
//! [`AuthorizationGate`], resolves fresh [`Credentials`] from the session
//! engine, enforces the tool allow-list, and only then hands the call to the
//! external [`ToolDispatcher`] with the credentials passed explicitly.
//! Results are scrubbed with [`mask_sensitive_fields`] before they are
//! returned downstream.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::session::SessionManager;
use crate::credentials::Credentials;
use crate::error::{BrokerError, Result};
use crate::gate::AuthorizationGate;
use crate::pattern::ToolFilter;
use crate::redact::mask_sensitive_fields;

/// Executes a named tool against the identity provider's APIs.
///
/// Implemented by the protocol server; the broker only guarantees that
/// `credentials` are valid when `dispatch` is called.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Runs `tool` with `arguments` using `credentials`.
    async fn dispatch(&self, tool: &str, arguments: Value, credentials: &Credentials)
        -> Result<Value>;
}

/// One incoming tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolRequest {
    /// Tool name as requested by the client.
    pub tool: String,
    /// Tool arguments.
    pub arguments: Value,
    /// Raw `Authorization` header value, when the transport carries one.
    pub auth_header: Option<String>,
    /// Scopes the tool needs.
    pub required_scopes: Vec<String>,
}

impl ToolRequest {
    /// Creates a request with no header and no required scopes.
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            ..Default::default()
        }
    }

    /// Attaches an `Authorization` header value.
    pub fn with_auth_header(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }

    /// Declares the scopes the tool needs.
    pub fn with_required_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// Gate + session + allow-list in front of a [`ToolDispatcher`].
pub struct ProtectedDispatcher {
    gate: AuthorizationGate,
    sessions: Arc<SessionManager>,
    filter: ToolFilter,
    inner: Arc<dyn ToolDispatcher>,
}

impl ProtectedDispatcher {
    /// Assembles a protected dispatcher.
    pub fn new(
        gate: AuthorizationGate,
        sessions: Arc<SessionManager>,
        filter: ToolFilter,
        inner: Arc<dyn ToolDispatcher>,
    ) -> Self {
        Self {
            gate,
            sessions,
            filter,
            inner,
        }
    }

    /// The tool allow-list in effect.
    pub fn filter(&self) -> &ToolFilter {
        &self.filter
    }

    /// Authorizes and runs `request`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Unauthorized`] when the gate denies the request
    /// - [`BrokerError::MissingCredentials`] when no valid session exists
    /// - [`BrokerError::ToolNotAllowed`] when the tool is outside the allow-list
    /// - any error returned by the underlying dispatcher
    pub async fn call(&self, request: ToolRequest) -> Result<Value> {
        if !self
            .gate
            .is_authorized(&request.required_scopes, request.auth_header.as_deref())
            .await
        {
            return Err(BrokerError::Unauthorized(format!(
                "request for tool '{}' was not authorized",
                request.tool
            ))
            .into());
        }

        let credentials = self.sessions.get_valid_credentials().await.ok_or_else(|| {
            BrokerError::MissingCredentials(
                "no valid session; run `credbroker init` to authenticate".to_string(),
            )
        })?;

        if !self.filter.allows(&request.tool) {
            tracing::warn!(tool = %request.tool, "Tool rejected by allow-list");
            return Err(BrokerError::ToolNotAllowed(request.tool).into());
        }

        tracing::debug!(tool = %request.tool, domain = %credentials.domain, "Dispatching tool call");
        let mut result = self
            .inner
            .dispatch(&request.tool, request.arguments, &credentials)
            .await?;
        mask_sensitive_fields(&mut result);
        Ok(result)
    }
}
