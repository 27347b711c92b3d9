use async_trait::async_trait;
use passrelay::errors::PassError;
use passrelay::push::{PushOutcome, PushTransport};
use std::collections::HashSet;
use std::sync::Mutex;

/// In-memory push transport that records every wake-up instead of
/// delivering it. Tokens listed in `gone` report a permanently invalid
/// address.
pub struct RecordingPush {
    sent: Mutex<Vec<(String, String)>>, // (push_token, topic)
    gone: HashSet<String>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            gone: HashSet::new(),
        }
    }

    pub fn with_gone_tokens(tokens: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            gone: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// Every (push_token, topic) pair delivered so far
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("Push log poisoned").clone()
    }
}

#[async_trait]
impl PushTransport for RecordingPush {
    async fn send_wakeup(&self, push_token: &str, topic: &str) -> Result<PushOutcome, PassError> {
        self.sent
            .lock()
            .expect("Push log poisoned")
            .push((push_token.to_string(), topic.to_string()));

        if self.gone.contains(push_token) {
            Ok(PushOutcome::AddressGone)
        } else {
            Ok(PushOutcome::Delivered)
        }
    }
}
