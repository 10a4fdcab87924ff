//! Notification channels
//!
//! [`Subscribers`] is a small observer list owned by whichever component
//! emits the notification (for example the active-node selection).
//! [`CameraSync`] mirrors camera state to a companion view: the message
//! schema is [`CameraMessage`] and the wire is any [`Transport`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handle returned by [`Subscribers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Observer list for one kind of notification
pub struct Subscribers<T> {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback<T>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Returns false when the id was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(sid, _)| *sid != id);
        self.callbacks.len() != before
    }

    /// Call every subscriber in subscription order
    pub fn notify(&self, value: &T) {
        for (_, callback) in &self.callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// Camera state mirrored between views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraMessage {
    pub camera_position: [f32; 3],
    /// Euler angles in radians
    pub camera_rotation: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_node: Option<String>,
}

impl CameraMessage {
    pub fn new(position: [f32; 3], rotation: [f32; 3]) -> Self {
        Self {
            camera_position: position,
            camera_rotation: rotation,
            target: None,
            active_node: None,
        }
    }

    pub fn with_target(mut self, target: [f32; 3]) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_active_node(mut self, id: impl Into<String>) -> Self {
        self.active_node = Some(id.into());
        self
    }
}

/// Errors raised while mirroring state
#[derive(Error, Debug)]
pub enum EventError {
    #[error("could not encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Message-passing boundary carrying JSON frames
pub trait Transport {
    fn send(&mut self, frame: String) -> Result<(), EventError>;

    /// Take every frame received since the last call
    fn drain(&mut self) -> Vec<String>;
}

/// In-memory transport; frames sent on one end are received by its peer
#[derive(Clone)]
pub struct LoopbackTransport {
    outbox: Arc<Mutex<VecDeque<String>>>,
    inbox: Arc<Mutex<VecDeque<String>>>,
}

impl LoopbackTransport {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));
        (
            Self {
                outbox: Arc::clone(&a),
                inbox: Arc::clone(&b),
            },
            Self { outbox: b, inbox: a },
        )
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, frame: String) -> Result<(), EventError> {
        self.outbox
            .lock()
            .map_err(|_| EventError::Transport("loopback queue poisoned".into()))?
            .push_back(frame);
        Ok(())
    }

    fn drain(&mut self) -> Vec<String> {
        match self.inbox.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }
}

/// Sends local camera changes and dispatches remote ones to subscribers
pub struct CameraSync<T: Transport> {
    transport: T,
    last_sent: Option<CameraMessage>,
    remote: Subscribers<CameraMessage>,
}

impl<T: Transport> CameraSync<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last_sent: None,
            remote: Subscribers::new(),
        }
    }

    /// Subscribe to camera states received from the peer
    pub fn on_message(&mut self, callback: impl Fn(&CameraMessage) + Send + Sync + 'static) -> SubscriptionId {
        self.remote.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.remote.unsubscribe(id)
    }

    /// Send the local camera state; unchanged states are not resent.
    /// Returns whether a frame went out.
    pub fn publish(&mut self, message: &CameraMessage) -> Result<bool, EventError> {
        if self.last_sent.as_ref() == Some(message) {
            return Ok(false);
        }
        self.transport.send(serde_json::to_string(message)?)?;
        self.last_sent = Some(message.clone());
        Ok(true)
    }

    /// Dispatch received frames; malformed frames are dropped with a warning.
    /// Returns the number of messages delivered.
    pub fn poll(&mut self) -> usize {
        let mut delivered = 0;
        for frame in self.transport.drain() {
            match serde_json::from_str::<CameraMessage>(&frame) {
                Ok(message) => {
                    self.remote.notify(&message);
                    delivered += 1;
                }
                Err(err) => tracing::warn!(%err, "dropping malformed camera frame"),
            }
        }
        delivered
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
