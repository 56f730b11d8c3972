// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::time::Duration;

use async_broadcast::{Receiver, RecvError};
use hotpokt_types::event::Event;
use tokio::time::{sleep, timeout};

use crate::memory_network::{MasterMap, SentEnvelope};

/// Default time to wait for an event before failing a test
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait for the first event matching `predicate`, skipping the others.
///
/// Returns `None` if nothing matched within `within`, or the stream closed.
pub async fn wait_for_event(
    events: &mut Receiver<Event>,
    within: Duration,
    predicate: impl Fn(&Event) -> bool,
) -> Option<Event> {
    timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Err(RecvError::Closed) => return None,
                // skipped or lagged behind, keep waiting
                Ok(_) | Err(_) => {}
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Wait until an envelope matching `predicate` went through `master_map`, held ones included.
///
/// Returns `None` if nothing matched within `within`.
pub async fn wait_for_sent(
    master_map: &MasterMap,
    within: Duration,
    predicate: impl Fn(&SentEnvelope) -> bool,
) -> Option<SentEnvelope> {
    timeout(within, async {
        loop {
            if let Some(envelope) = master_map.sent().into_iter().find(|envelope| predicate(envelope)) {
                return envelope;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .ok()
}
