//! Per-document participant registry: channels, cursors, presence.
//!
//! Pure in-memory bookkeeping, mutated only by the document router — no
//! locking, no I/O. Presence status is derived from the last activity
//! timestamp: `online` within one minute, `away` within five, evicted
//! beyond that by the periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A participant's outbound frame queue (JSON-encoded, shared per fan-out).
pub type OutboundSender = mpsc::Sender<Arc<str>>;

/// Activity window within which a participant counts as online.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(60);
/// Activity window beyond which a participant is evicted by the sweep.
pub const AWAY_WINDOW: Duration = Duration::from_secs(300);

/// Derived liveness of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
}

/// Stable cursor color, derived from the participant id so every client
/// renders the same person in the same color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl ParticipantColor {
    /// Derive a vivid, stable color from a UUID: the id hash picks a hue,
    /// saturation and lightness are fixed for legibility on white.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = (id.as_u128() % 360) as f32 / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.65, 0.5);
        Self { r, g, b }
    }

    /// `#rrggbb` form for clients that want CSS colors.
    pub fn to_hex(self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let channel = |mut t: f32| {
        if t < 0.0 {
            t += 1.0;
        }
        if t > 1.0 {
            t -= 1.0;
        }
        if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 1.0 / 2.0 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        }
    };
    (channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0))
}

/// Wire-facing view of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSummary {
    pub participant_id: Uuid,
    pub username: String,
    pub color: ParticipantColor,
    pub status: PresenceStatus,
    pub cursor: Option<usize>,
}

struct Participant {
    channel: OutboundSender,
    username: String,
    color: ParticipantColor,
    cursor: Option<usize>,
    last_activity: Instant,
}

impl Participant {
    fn summary(&self, id: Uuid) -> PresenceSummary {
        let status = if self.last_activity.elapsed() < ONLINE_WINDOW {
            PresenceStatus::Online
        } else {
            PresenceStatus::Away
        };
        PresenceSummary {
            participant_id: id,
            username: self.username.clone(),
            color: self.color,
            status,
            cursor: self.cursor,
        }
    }
}

/// Who is connected to one document right now.
#[derive(Default)]
pub struct SessionRegistry {
    participants: HashMap<Uuid, Participant>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or re-add, on reconnect) a participant. The previous channel of
    /// a reconnecting participant is dropped, which ends its writer.
    pub fn join(
        &mut self,
        id: Uuid,
        username: impl Into<String>,
        channel: OutboundSender,
    ) -> PresenceSummary {
        let participant = Participant {
            channel,
            username: username.into(),
            color: ParticipantColor::from_uuid(id),
            cursor: None,
            last_activity: Instant::now(),
        };
        let summary = participant.summary(id);
        self.participants.insert(id, participant);
        summary
    }

    /// Remove a participant; `true` when they were actually present.
    pub fn leave(&mut self, id: Uuid) -> bool {
        self.participants.remove(&id).is_some()
    }

    /// Record a cursor move; `false` for unknown participants.
    pub fn update_cursor(&mut self, id: Uuid, position: usize) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) => {
                p.cursor = Some(position);
                p.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Refresh a participant's activity clock.
    pub fn update_heartbeat(&mut self, id: Uuid) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) => {
                p.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Current presence roster.
    pub fn list_presence(&self) -> Vec<PresenceSummary> {
        let mut roster: Vec<_> = self
            .participants
            .iter()
            .map(|(id, p)| p.summary(*id))
            .collect();
        roster.sort_by_key(|s| s.participant_id);
        roster
    }

    /// Cursor positions of everyone who has reported one.
    pub fn cursor_map(&self) -> HashMap<Uuid, usize> {
        self.participants
            .iter()
            .filter_map(|(id, p)| p.cursor.map(|c| (*id, c)))
            .collect()
    }

    /// Drop everyone idle for longer than `threshold`; returns who was
    /// evicted so the router can notify the others. Dropping the channel
    /// ends the participant's writer task.
    pub fn sweep_inactive(&mut self, threshold: Duration) -> Vec<Uuid> {
        let evicted: Vec<Uuid> = self
            .participants
            .iter()
            .filter(|(_, p)| p.last_activity.elapsed() > threshold)
            .map(|(id, _)| *id)
            .collect();
        for id in &evicted {
            self.participants.remove(id);
        }
        evicted
    }

    /// Outbound channel of one participant.
    pub fn channel_of(&self, id: Uuid) -> Option<&OutboundSender> {
        self.participants.get(&id).map(|p| &p.channel)
    }

    /// Everyone except `exclude`, for delta fan-out.
    pub fn others(&self, exclude: Uuid) -> impl Iterator<Item = (Uuid, &OutboundSender)> {
        self.participants
            .iter()
            .filter(move |(id, _)| **id != exclude)
            .map(|(id, p)| (*id, &p.channel))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, id: Uuid, by: Duration) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.last_activity = Instant::now()
                .checked_sub(by)
                .expect("backdate exceeds monotonic clock range");
        }
    }
}
