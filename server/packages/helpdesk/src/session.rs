use std::sync::{Arc, Mutex, MutexGuard};

use helpdesk_error::HelpdeskError;

use crate::protocol::Frame;
use crate::queue::WaitingQueue;
use crate::transport::{ConnectionId, Endpoint};

/// The single active-session slot.
///
/// Idle (no endpoint) moves to Busy only through [`SessionController::take_next`]
/// and back only through [`SessionController::release`]. The slot is read and
/// written under one lock, so no two callers can ever see it Busy with
/// different endpoints.
#[derive(Debug)]
pub struct SessionController {
    queue: Arc<WaitingQueue>,
    active: Mutex<Option<Arc<Endpoint>>>,
}

impl SessionController {
    pub fn new(queue: Arc<WaitingQueue>) -> Self {
        Self {
            queue,
            active: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<WaitingQueue> {
        &self.queue
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    pub fn current(&self) -> Option<Arc<Endpoint>> {
        self.lock().clone()
    }

    pub fn is_current(&self, connection: ConnectionId) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|active| active.id() == connection)
    }

    pub async fn take_next(&self) -> Result<Option<Arc<Endpoint>>, HelpdeskError> {
        self.take_next_with(|_| {}).await
    }

    /// Promotes the head of the queue into the slot and signals `/START`.
    ///
    /// `prepare` runs once the slot is taken and before the client is told to
    /// start, so anything it resets cannot race the client's first line.
    /// Returns `Ok(None)` when nobody is waiting and `SessionBusy` when the
    /// slot is already taken. A client that cannot be reached is dropped and
    /// the slot is freed again.
    pub async fn take_next_with<F>(&self, prepare: F) -> Result<Option<Arc<Endpoint>>, HelpdeskError>
    where
        F: FnOnce(&Endpoint),
    {
        let endpoint = {
            let mut active = self.lock();
            if let Some(current) = active.as_ref() {
                return Err(HelpdeskError::SessionBusy {
                    connection: current.id().get(),
                });
            }
            let Some(next) = self.queue.dequeue() else {
                return Ok(None);
            };
            *active = Some(next.clone());
            next
        };

        tracing::info!(
            connection = %endpoint.id(),
            peer = %endpoint.peer(),
            waiting = self.queue.len(),
            "session started"
        );
        prepare(&endpoint);

        if let Err(err) = endpoint.send(Frame::Start).await {
            tracing::warn!(
                connection = %endpoint.id(),
                error = %err,
                "failed to deliver start signal, dropping client"
            );
            self.release_if(endpoint.id());
            endpoint.close().await;
            return Err(err);
        }
        Ok(Some(endpoint))
    }

    /// Frees the slot. Releasing an idle controller is a no-op.
    pub fn release(&self) -> Option<Arc<Endpoint>> {
        let released = self.lock().take();
        if let Some(endpoint) = &released {
            tracing::info!(connection = %endpoint.id(), "session released");
        }
        released
    }

    /// Frees the slot only while `connection` still holds it.
    pub fn release_if(&self, connection: ConnectionId) -> bool {
        let mut active = self.lock();
        match active.as_ref() {
            Some(current) if current.id() == connection => {
                *active = None;
                tracing::info!(connection = %connection, "session released");
                true
            }
            _ => false,
        }
    }

    pub async fn send(&self, text: &str) -> Result<(), HelpdeskError> {
        let frame = Frame::chat(text)?;
        let endpoint = self.current().ok_or(HelpdeskError::NoActiveSession)?;
        endpoint.send(frame).await
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Endpoint>>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
