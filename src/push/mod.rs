//! Per-mesa server-sent-event fan-out.
//!
//! Each mesa gets a lazily created tokio broadcast channel; HTTP stream
//! handlers subscribe and forward events as SSE frames. Slow subscribers
//! lag and skip rather than block publishers.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{CalibrationRecord, MesaId};

const CHANNEL_CAPACITY: usize = 32;

/// Partial mesa-state update pushed to the device; absent fields are
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CalibrationPush {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corners: Option<CalibrationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapper_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image_index: Option<i32>,
}

/// Event envelope carried on a mesa's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Calibration { data: CalibrationPush },
}

/// Broadcast hub keyed by mesa.
#[derive(Debug, Default)]
pub struct PushHub {
    channels: RwLock<HashMap<MesaId, broadcast::Sender<PushEvent>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a mesa's stream, creating the channel on first use.
    pub fn subscribe(&self, mesa: MesaId) -> broadcast::Receiver<PushEvent> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(mesa)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to a mesa's subscribers. Dropped silently when no
    /// device is listening.
    pub fn publish(&self, mesa: MesaId, event: PushEvent) {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(&mesa) {
            let delivered = sender.send(event).unwrap_or(0);
            debug!(%mesa, subscribers = delivered, "push event published");
        }
    }

    pub fn subscriber_count(&self, mesa: MesaId) -> usize {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&mesa)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}
