use async_trait::async_trait;
use banter_core::{AgentError, AgentRequest, ChatAgent, FragmentStream};
use futures_util::stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;

fn scripted(fragments: &[String]) -> FragmentStream {
    let items: Vec<Result<String, AgentError>> = fragments.iter().cloned().map(Ok).collect();
    Box::pin(stream::iter(items))
}

pub struct ScriptedAgent {
    fragments: Vec<String>,
}

impl ScriptedAgent {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    async fn generate(&self, _request: AgentRequest) -> Result<FragmentStream, AgentError> {
        Ok(scripted(&self.fragments))
    }
}

pub struct FailingAgent {
    message: String,
}

impl FailingAgent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for FailingAgent {
    async fn generate(&self, _request: AgentRequest) -> Result<FragmentStream, AgentError> {
        Err(AgentError::new(self.message.clone()))
    }
}

pub struct FailingAfterAgent {
    fragments: Vec<String>,
    message: String,
}

impl FailingAfterAgent {
    pub fn new(fragments: &[&str], message: impl Into<String>) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for FailingAfterAgent {
    async fn generate(&self, _request: AgentRequest) -> Result<FragmentStream, AgentError> {
        let mut items: Vec<Result<String, AgentError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        items.push(Err(AgentError::new(self.message.clone())));
        Ok(Box::pin(stream::iter(items)))
    }
}

pub struct FlakyAgent {
    failures_left: Mutex<usize>,
    fragments: Vec<String>,
    message: String,
}

impl FlakyAgent {
    pub fn new(failures: usize, fragments: &[&str], message: impl Into<String>) -> Self {
        Self {
            failures_left: Mutex::new(failures),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ChatAgent for FlakyAgent {
    async fn generate(&self, _request: AgentRequest) -> Result<FragmentStream, AgentError> {
        {
            let mut failures_left = self.failures_left.lock();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(AgentError::new(self.message.clone()));
            }
        }
        Ok(scripted(&self.fragments))
    }
}

pub struct RecordingAgent {
    fragments: Vec<String>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl RecordingAgent {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatAgent for RecordingAgent {
    async fn generate(&self, request: AgentRequest) -> Result<FragmentStream, AgentError> {
        self.requests.lock().push(request);
        Ok(scripted(&self.fragments))
    }
}

pub struct GatedAgent {
    fragments: Vec<String>,
    gate: Arc<Semaphore>,
}

impl GatedAgent {
    pub fn new(fragments: &[&str]) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let agent = Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            gate: gate.clone(),
        };
        (agent, gate)
    }
}

#[async_trait]
impl ChatAgent for GatedAgent {
    async fn generate(&self, _request: AgentRequest) -> Result<FragmentStream, AgentError> {
        let (tx, rx) = mpsc::channel(16);
        let fragments = self.fragments.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(Ok(fragment)).await.is_err() {
                    return;
                }
            }
            // The stream stays open until a permit is released.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
