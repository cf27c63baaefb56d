//! The call dispatcher.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use soapcall_message::{Error, Message};

use crate::codec::{CallContext, Codec, SoapCodec};
use crate::config::ClientConfig;
use crate::endpoint::{ActionRule, Endpoint};
use crate::fault;
use crate::pending::{CallCompleter, PendingCall};
use crate::transport::{ReqwestTransport, Transport, TransportRequest};

/// A request that has been encoded and is ready to send.
struct PreparedCall {
    operation: String,
    action: String,
    request: TransportRequest,
}

/// Issues calls against one [`Endpoint`].
///
/// Every call ends in a [`Message`]: the result, or a fault message when
/// anything went wrong. Nothing here returns a transport error.
///
/// The client is cheap to clone and can be shared between threads; clones
/// use the same transport and codec.
#[derive(Clone)]
pub struct SoapClient {
    endpoint: Arc<Endpoint>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    action_rule: ActionRule,
}

impl SoapClient {
    /// A client with the default configuration.
    pub fn new(url: &str, namespace: &str) -> Result<Self, Error> {
        Self::with_config(url, namespace, ClientConfig::default())
    }

    pub fn with_config(url: &str, namespace: &str, config: ClientConfig) -> Result<Self, Error> {
        let endpoint = Endpoint::new(url, namespace)?;
        let transport = ReqwestTransport::from_config(&config)?;
        let codec =
            SoapCodec::new(config.soap_version).with_type_annotations(config.type_annotations);
        Ok(Self::from_parts(
            endpoint,
            Arc::new(transport),
            Arc::new(codec),
            config.action_rule,
        ))
    }

    /// Assemble a client from its pieces, e.g. with a custom transport.
    pub fn from_parts(
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        action_rule: ActionRule,
    ) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            transport,
            codec,
            action_rule,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn action_rule(&self) -> ActionRule {
        self.action_rule
    }

    /// The action a call to `operation` would send, given an optional
    /// explicit one.
    pub fn resolve_action(&self, operation: &str, explicit: Option<&str>) -> String {
        self.endpoint
            .resolve_action(self.action_rule, operation, explicit)
    }

    /// Perform `operation` and block until its result is available.
    pub fn call(&self, operation: &str, message: &Message) -> Message {
        self.dispatch_blocking(operation, message, None)
    }

    /// Like [`SoapClient::call`] with an explicit action. An empty action is
    /// sent as empty.
    pub fn call_with_action(&self, operation: &str, message: &Message, action: &str) -> Message {
        self.dispatch_blocking(operation, message, Some(action))
    }

    /// Start `operation` and return immediately.
    ///
    /// The request is encoded before this returns; sending happens on a
    /// worker thread. The returned call is pending until the response (or a
    /// failure) has been turned into a message.
    pub fn async_call(&self, operation: &str, message: &Message) -> PendingCall {
        self.dispatch_async(operation, message, None)
    }

    pub fn async_call_with_action(
        &self,
        operation: &str,
        message: &Message,
        action: &str,
    ) -> PendingCall {
        self.dispatch_async(operation, message, Some(action))
    }

    fn dispatch_blocking(
        &self,
        operation: &str,
        message: &Message,
        action: Option<&str>,
    ) -> Message {
        match self.prepare(operation, message, action) {
            Ok(prepared) => self.execute(&prepared),
            Err(err) => fault::from_error(&err, self.endpoint.path()),
        }
    }

    fn dispatch_async(
        &self,
        operation: &str,
        message: &Message,
        action: Option<&str>,
    ) -> PendingCall {
        let (call, completer) = PendingCall::new(operation);

        let prepared = match self.prepare(operation, message, action) {
            Ok(prepared) => prepared,
            Err(err) => {
                completer.complete(fault::from_error(&err, self.endpoint.path()));
                return call;
            }
        };

        debug!(call = call.id(), operation, "dispatching asynchronously");
        self.spawn_worker(call.id(), prepared, completer);
        call
    }

    fn spawn_worker(&self, id: u64, prepared: PreparedCall, completer: CallCompleter) {
        let client = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("soapcall-{}", id))
            .spawn(move || {
                let response = client.execute(&prepared);
                completer.complete(response);
            });

        // A closure that never ran drops its completer, which faults the call.
        if let Err(err) = spawned {
            warn!(call = id, error = %err, "could not start worker thread");
        }
    }

    fn context<'a>(&'a self, operation: &'a str, action: &'a str) -> CallContext<'a> {
        CallContext {
            namespace: self.endpoint.namespace(),
            operation,
            action,
        }
    }

    fn prepare(
        &self,
        operation: &str,
        message: &Message,
        action: Option<&str>,
    ) -> Result<PreparedCall, Error> {
        let action = self.resolve_action(operation, action);
        let body = self
            .codec
            .encode(&self.context(operation, &action), message)?;

        Ok(PreparedCall {
            operation: operation.to_string(),
            request: TransportRequest {
                url: self.endpoint.url().to_string(),
                headers: self.codec.request_headers(&action),
                body,
            },
            action,
        })
    }

    fn execute(&self, prepared: &PreparedCall) -> Message {
        debug!(
            operation = %prepared.operation,
            action = %prepared.action,
            url = %prepared.request.url,
            bytes = prepared.request.body.len(),
            "sending request"
        );

        let outcome = self.transport.send(&prepared.request);
        if let Ok(response) = &outcome {
            debug!(
                operation = %prepared.operation,
                status = response.status,
                bytes = response.body.len(),
                "received response"
            );
        }

        fault::normalize(
            outcome,
            self.codec.as_ref(),
            &self.context(&prepared.operation, &prepared.action),
            self.endpoint.path(),
        )
    }
}

impl std::fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapClient")
            .field("endpoint", &self.endpoint)
            .field("action_rule", &self.action_rule)
            .finish()
    }
}
