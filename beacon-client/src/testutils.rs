use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_protocol::EventBatch;
use tokio::sync::Notify;

use crate::transport::{Transport, TransportError};

#[derive(Debug, Default)]
struct State {
    responses: VecDeque<Result<(), TransportError>>,
    delivered: Vec<EventBatch>,
    attempts: usize,
}

/// Answers sends from a queue of scripted responses, succeeding once the queue is empty.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<State>,
    notify: Notify,
}

impl MockTransport {
    /// Queues the response to the next unanswered send.
    pub fn respond(&self, response: Result<(), TransportError>) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    /// Returns all batches that were sent successfully.
    pub fn batches(&self) -> Vec<EventBatch> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Returns the number of send calls.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Waits until at least `count` sends have been made.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.attempts() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            let response = state.responses.pop_front().unwrap_or(Ok(()));
            if response.is_ok() {
                state.delivered.push(batch.clone());
            }
            response
        };

        self.notify.notify_waiters();
        response
    }
}
