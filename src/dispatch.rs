//! Asynchronous message dispatch.
//!
//! The webhook handler must acknowledge within seconds, so accepted messages
//! are handed to a bounded worker pool and processed after the ack. Each
//! sender is pinned to one worker by hashing their wa_id, which keeps a
//! single conversation strictly ordered while different conversations run
//! in parallel. A saturated queue is a reported error, never a silent drop.

use crate::outbound::{OutboundMessage, ReplySender, SendOutcome};
use crate::pipeline::ResponseGenerator;
use crate::webhook::InboundMessage;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,
    #[error("dispatcher is shut down")]
    Closed,
}

pub struct Dispatcher {
    queues: Vec<mpsc::Sender<InboundMessage>>,
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        generator: Arc<ResponseGenerator>,
        sender: Arc<dyn ReplySender>,
    ) -> Self {
        let workers = workers.max(1);
        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            queues.push(tx);
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                generator.clone(),
                sender.clone(),
            )));
        }

        Self { queues, handles }
    }

    /// Enqueue a message for processing. Non-blocking.
    pub fn dispatch(&self, message: InboundMessage) -> Result<(), DispatchError> {
        let worker = worker_index(&message.sender, self.queues.len());
        match self.queues[worker].try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DispatchError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Close the queues and wait for in-flight work to finish.
    pub async fn shutdown(self) {
        drop(self.queues);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn worker_index(sender: &str, workers: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    sender.hash(&mut hasher);
    (hasher.finish() as usize) % workers
}

async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<InboundMessage>,
    generator: Arc<ResponseGenerator>,
    sender: Arc<dyn ReplySender>,
) {
    while let Some(message) = rx.recv().await {
        tracing::debug!(
            worker = worker_id,
            sender = %message.sender,
            message_id = %message.message_id,
            "processing message"
        );
        let reply = generator.generate(&message).await;
        let outbound = OutboundMessage::new(&message.sender, reply);
        match sender.send(&outbound).await {
            SendOutcome::Sent { message_id } => {
                tracing::info!(
                    worker = worker_id,
                    in_reply_to = %message.message_id,
                    sent = %message_id,
                    "reply delivered"
                );
            }
            SendOutcome::Failed(kind) => {
                tracing::error!(
                    worker = worker_id,
                    in_reply_to = %message.message_id,
                    to = %message.sender,
                    "reply delivery failed: {kind}"
                );
            }
        }
    }
    tracing::debug!(worker = worker_id, "worker stopped");
}
