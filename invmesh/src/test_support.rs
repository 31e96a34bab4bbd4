use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::ServiceClient;
use crate::error::{InvMeshError, Result};
use crate::resolver::BrokerAddress;
use crate::transport::{BrokerCall, BrokerTransport};

/// Transport replaying canned answers and recording every call. Once the
/// script runs out it fails with a peer reset, which stops a worker loop.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    answers: Mutex<VecDeque<Result<Option<Value>>>>,
    calls: Mutex<Vec<BrokerCall>>,
}

impl ScriptedTransport {
    pub(crate) fn new(answers: Vec<Result<Option<Value>>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn post(&self, call: BrokerCall) -> Result<Option<Value>> {
        self.calls.lock().unwrap().push(call);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InvMeshError::PeerReset("script exhausted".into())))
    }
}

pub(crate) fn noop_client(transport: ScriptedTransport) -> ServiceClient {
    ServiceClient::new(
        "test-service",
        Arc::new(BrokerAddress::new("http://localhost:8001")),
        Arc::new(transport),
        Duration::from_secs(1),
    )
}
