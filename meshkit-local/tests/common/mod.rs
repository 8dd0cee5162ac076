#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use meshkit_local::{LocalRequest, LocalResponse, LocalTransport, TransportError};

pub type Reply = Result<LocalResponse, TransportError>;

/// Replays canned replies per host and records every request.
/// A host with nothing left to say times out.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<LocalRequest>>,
}

impl ScriptedTransport {
    pub fn reply(&self, host: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<LocalRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, host: &str) -> usize {
        self.requests().iter().filter(|r| r.host == host).count()
    }
}

impl LocalTransport for ScriptedTransport {
    async fn send(&self, request: &LocalRequest) -> Result<LocalResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.host)
            .and_then(VecDeque::pop_front);
        next.unwrap_or(Err(timeout()))
    }
}

pub fn timeout() -> TransportError {
    TransportError::Timeout(Duration::from_secs(5))
}

pub fn ok(body: &str) -> Reply {
    Ok(LocalResponse::new(200, body.as_bytes()))
}

pub fn status(code: u16, body: &str) -> Reply {
    Ok(LocalResponse::new(code, body.as_bytes()))
}
