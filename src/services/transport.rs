//! Transport service: playback commands and zone/output/queue streams.

use crate::connection::RoonConnection;
use crate::error::{Result, RoonError};
use crate::message::RoonResponse;
use crate::model::{parse_string_vec, parse_vec, LoopSetting, Output, QueueItem, Zone, ZoneSeek};
use crate::registry::services::TRANSPORT;
use crate::subscription::EventStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

/// Events from a zones subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    /// Initial snapshot.
    Subscribed { zones: Vec<Zone> },
    ZonesRemoved { zone_ids: Vec<String> },
    ZonesAdded { zones: Vec<Zone> },
    ZonesChanged { zones: Vec<Zone> },
    ZonesSeekChanged { seeks: Vec<ZoneSeek> },
}

/// Events from an outputs subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Subscribed { outputs: Vec<Output> },
    OutputsRemoved { output_ids: Vec<String> },
    OutputsAdded { outputs: Vec<Output> },
    OutputsChanged { outputs: Vec<Output> },
}

/// Events from a queue subscription. Current Cores only send the
/// initial snapshot; the incremental variants are handled in case a
/// future server version emits them.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Subscribed { items: Vec<QueueItem> },
    ItemsRemoved { item_ids: Vec<i64> },
    ItemsAdded { items: Vec<QueueItem> },
    ItemsChanged { items: Vec<QueueItem> },
}

/// One active-slot key per subscription kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StreamKind {
    Zones,
    Outputs,
    Queue(String),
}

/// The active slot for one subscription kind. Dropping it closes the
/// cancel channel, which winds down the owning pump task.
struct ActiveStream {
    key: u64,
    _cancel: oneshot::Sender<()>,
}

struct ServiceState {
    selected_zone: Mutex<Option<String>>,
    active: Mutex<HashMap<StreamKind, ActiveStream>>,
    next_active_key: AtomicU64,
    next_subscription_key: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Typed wrapper over `com.roonlabs.transport:2`.
///
/// Commands that act on "the zone" require a zone selected via
/// [`TransportService::select_zone`] and fail locally with
/// `NoZoneSelected` otherwise.
#[derive(Clone)]
pub struct TransportService {
    connection: RoonConnection,
    state: Arc<ServiceState>,
}

impl TransportService {
    pub fn new(connection: RoonConnection) -> Self {
        Self {
            connection,
            state: Arc::new(ServiceState {
                selected_zone: Mutex::new(None),
                active: Mutex::new(HashMap::new()),
                next_active_key: AtomicU64::new(0),
                next_subscription_key: AtomicU64::new(0),
            }),
        }
    }

    /// Select the zone that zone-scoped commands act on.
    pub fn select_zone(&self, zone_or_output_id: impl Into<String>) {
        *lock(&self.state.selected_zone) = Some(zone_or_output_id.into());
    }

    /// Clear the zone selection.
    pub fn clear_zone(&self) {
        *lock(&self.state.selected_zone) = None;
    }

    /// Currently selected zone, if any.
    pub fn selected_zone(&self) -> Option<String> {
        lock(&self.state.selected_zone).clone()
    }

    fn require_zone(&self) -> Result<String> {
        self.selected_zone().ok_or(RoonError::NoZoneSelected)
    }

    // ---- queries ------------------------------------------------------

    pub async fn get_zones(&self) -> Result<Vec<Zone>> {
        let response = self.request("get_zones", json!({})).await?;
        Ok(response
            .body
            .as_ref()
            .map(|body| parse_vec(body, "zones"))
            .unwrap_or_default())
    }

    pub async fn get_outputs(&self) -> Result<Vec<Output>> {
        let response = self.request("get_outputs", json!({})).await?;
        Ok(response
            .body
            .as_ref()
            .map(|body| parse_vec(body, "outputs"))
            .unwrap_or_default())
    }

    // ---- playback control ---------------------------------------------

    pub async fn play(&self) -> Result<()> {
        self.control("play").await
    }

    pub async fn pause(&self) -> Result<()> {
        self.control("pause").await
    }

    pub async fn play_pause(&self) -> Result<()> {
        self.control("playpause").await
    }

    pub async fn stop(&self) -> Result<()> {
        self.control("stop").await
    }

    pub async fn next(&self) -> Result<()> {
        self.control("next").await
    }

    pub async fn previous(&self) -> Result<()> {
        self.control("previous").await
    }

    async fn control(&self, control: &str) -> Result<()> {
        let zone = self.require_zone()?;
        self.command(
            "control",
            json!({ "zone_or_output_id": zone, "control": control }),
        )
        .await
    }

    // ---- volume -------------------------------------------------------

    pub async fn set_volume(&self, output_id: &str, value: f64) -> Result<()> {
        self.change_volume(output_id, "absolute", value).await
    }

    pub async fn adjust_volume(&self, output_id: &str, delta: f64) -> Result<()> {
        self.change_volume(output_id, "relative", delta).await
    }

    /// Adjust volume by device steps rather than absolute units.
    pub async fn step_volume(&self, output_id: &str, steps: f64) -> Result<()> {
        self.change_volume(output_id, "relative_step", steps).await
    }

    async fn change_volume(&self, output_id: &str, how: &str, value: f64) -> Result<()> {
        self.command(
            "change_volume",
            json!({ "output_id": output_id, "how": how, "value": value }),
        )
        .await
    }

    pub async fn mute(&self, output_id: &str) -> Result<()> {
        self.command("mute", json!({ "output_id": output_id, "how": "mute" }))
            .await
    }

    pub async fn unmute(&self, output_id: &str) -> Result<()> {
        self.command("mute", json!({ "output_id": output_id, "how": "unmute" }))
            .await
    }

    pub async fn mute_all(&self) -> Result<()> {
        self.command("mute_all", json!({ "how": "mute" })).await
    }

    pub async fn unmute_all(&self) -> Result<()> {
        self.command("mute_all", json!({ "how": "unmute" })).await
    }

    pub async fn pause_all(&self) -> Result<()> {
        self.command("pause_all", json!({})).await
    }

    // ---- seek ---------------------------------------------------------

    pub async fn seek_absolute(&self, seconds: f64) -> Result<()> {
        self.seek("absolute", seconds).await
    }

    pub async fn seek_relative(&self, seconds: f64) -> Result<()> {
        self.seek("relative", seconds).await
    }

    async fn seek(&self, how: &str, seconds: f64) -> Result<()> {
        let zone = self.require_zone()?;
        self.command(
            "seek",
            json!({ "zone_or_output_id": zone, "how": how, "seconds": seconds }),
        )
        .await
    }

    // ---- settings -----------------------------------------------------

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<()> {
        self.change_settings(json!({ "shuffle": shuffle })).await
    }

    pub async fn set_loop(&self, setting: LoopSetting) -> Result<()> {
        self.change_settings(json!({ "loop": setting.as_str() })).await
    }

    /// Advance to the next loop mode in the Core's cycle.
    pub async fn cycle_loop(&self) -> Result<()> {
        self.set_loop(LoopSetting::Next).await
    }

    pub async fn set_auto_radio(&self, auto_radio: bool) -> Result<()> {
        self.change_settings(json!({ "auto_radio": auto_radio })).await
    }

    async fn change_settings(&self, settings: Value) -> Result<()> {
        let zone = self.require_zone()?;
        let mut body = settings;
        body["zone_or_output_id"] = json!(zone);
        self.command("change_settings", body).await
    }

    // ---- source controls ----------------------------------------------

    pub async fn standby(&self, output_id: &str, control_key: Option<&str>) -> Result<()> {
        self.source_control("standby", output_id, control_key).await
    }

    pub async fn toggle_standby(&self, output_id: &str, control_key: Option<&str>) -> Result<()> {
        self.source_control("toggle_standby", output_id, control_key)
            .await
    }

    pub async fn convenience_switch(
        &self,
        output_id: &str,
        control_key: Option<&str>,
    ) -> Result<()> {
        self.source_control("convenience_switch", output_id, control_key)
            .await
    }

    async fn source_control(
        &self,
        method: &str,
        output_id: &str,
        control_key: Option<&str>,
    ) -> Result<()> {
        let mut body = json!({ "output_id": output_id });
        if let Some(key) = control_key {
            body["control_key"] = json!(key);
        }
        self.command(method, body).await
    }

    // ---- grouping and transfer ----------------------------------------

    pub async fn transfer_zone(&self, from: &str, to: &str) -> Result<()> {
        self.command(
            "transfer_zone",
            json!({ "from_zone_or_output_id": from, "to_zone_or_output_id": to }),
        )
        .await
    }

    pub async fn group_outputs(&self, output_ids: &[&str]) -> Result<()> {
        self.command("group_outputs", json!({ "output_ids": output_ids }))
            .await
    }

    pub async fn ungroup_outputs(&self, output_ids: &[&str]) -> Result<()> {
        self.command("ungroup_outputs", json!({ "output_ids": output_ids }))
            .await
    }

    /// Restart playback from a given queue item.
    pub async fn play_from_here(&self, queue_item_id: i64) -> Result<()> {
        let zone = self.require_zone()?;
        self.command(
            "play_from_here",
            json!({ "zone_or_output_id": zone, "queue_item_id": queue_item_id }),
        )
        .await
    }

    // ---- subscriptions ------------------------------------------------

    /// Subscribe to zone updates. Re-subscribing finishes the previous
    /// stream before the new one is installed.
    pub async fn subscribe_zones(&self) -> Result<EventStream<ZoneEvent>> {
        self.open_stream(StreamKind::Zones, "subscribe_zones", json!({}), parse_zone_events)
            .await
    }

    /// Subscribe to output updates.
    pub async fn subscribe_outputs(&self) -> Result<EventStream<OutputEvent>> {
        self.open_stream(
            StreamKind::Outputs,
            "subscribe_outputs",
            json!({}),
            parse_output_events,
        )
        .await
    }

    /// Subscribe to the play queue of the selected zone.
    pub async fn subscribe_queue(&self, max_item_count: u32) -> Result<EventStream<QueueEvent>> {
        let zone = self.require_zone()?;
        self.open_stream(
            StreamKind::Queue(zone.clone()),
            "subscribe_queue",
            json!({ "zone_or_output_id": zone, "max_item_count": max_item_count }),
            parse_queue_events,
        )
        .await
    }

    /// Open a typed stream with the latest-wins contract: each kind has
    /// one active slot, a newer subscription supersedes the older one,
    /// and a superseded stream's termination must not clear state the
    /// newer stream installed.
    async fn open_stream<T, F>(
        &self,
        kind: StreamKind,
        method: &str,
        mut body: Value,
        parse: F,
    ) -> Result<EventStream<T>>
    where
        T: Send + 'static,
        F: Fn(&RoonResponse) -> Vec<T> + Send + 'static,
    {
        let key = self.state.next_active_key.fetch_add(1, Ordering::SeqCst) + 1;

        // Finish the previous sink first so its consumer terminates:
        // dropping the slot closes the old pump's cancel channel.
        lock(&self.state.active).remove(&kind);

        let subscription_key = self.state.next_subscription_key.fetch_add(1, Ordering::SeqCst);
        body["subscription_key"] = json!(subscription_key);

        let path = format!("{TRANSPORT}/{method}");
        let mut subscription = self.connection.subscribe(&path, Some(body)).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);
        let guard_kind = kind.clone();

        // Install the slot before the pump starts: a pump that ends on
        // its first poll must still find its own entry, otherwise the
        // slot would dangle for a task that already finished.
        lock(&self.state.active).insert(kind, ActiveStream { key, _cancel: cancel_tx });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    response = subscription.next() => {
                        let Some(response) = response else { break };
                        let mut consumer_gone = false;
                        for event in parse(&response) {
                            if tx.send(event).is_err() {
                                consumer_gone = true;
                                break;
                            }
                        }
                        if consumer_gone {
                            break;
                        }
                    }
                }
            }
            // Termination guard: a newer subscription of this kind may
            // own the slot by now; only the active key may clear it.
            let mut active = lock(&state.active);
            if active.get(&guard_kind).map(|entry| entry.key) == Some(key) {
                active.remove(&guard_kind);
            }
            // Dropping `subscription` here fires the unsubscribe;
            // dropping `tx` finishes the consumer stream.
        });

        Ok(EventStream::new(rx))
    }

    // ---- plumbing -----------------------------------------------------

    async fn request(&self, method: &str, body: Value) -> Result<RoonResponse> {
        let response = self
            .connection
            .send(&format!("{TRANSPORT}/{method}"), Some(body))
            .await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(RoonError::CommandFailed(response.error_message()))
        }
    }

    async fn command(&self, method: &str, body: Value) -> Result<()> {
        self.request(method, body).await.map(|_| ())
    }
}

/// Emit one event per non-empty key, in the fixed order removed, added,
/// changed, seek_changed. A frame with no non-empty keys emits nothing.
fn parse_zone_events(response: &RoonResponse) -> Vec<ZoneEvent> {
    let Some(body) = response.body.as_ref() else {
        return Vec::new();
    };
    match response.name.as_str() {
        "Subscribed" => vec![ZoneEvent::Subscribed {
            zones: parse_vec(body, "zones"),
        }],
        "Changed" => {
            let mut events = Vec::new();
            let zone_ids = parse_string_vec(body, "zones_removed");
            if !zone_ids.is_empty() {
                events.push(ZoneEvent::ZonesRemoved { zone_ids });
            }
            let zones: Vec<Zone> = parse_vec(body, "zones_added");
            if !zones.is_empty() {
                events.push(ZoneEvent::ZonesAdded { zones });
            }
            let zones: Vec<Zone> = parse_vec(body, "zones_changed");
            if !zones.is_empty() {
                events.push(ZoneEvent::ZonesChanged { zones });
            }
            let seeks: Vec<ZoneSeek> = parse_vec(body, "zones_seek_changed");
            if !seeks.is_empty() {
                events.push(ZoneEvent::ZonesSeekChanged { seeks });
            }
            events
        }
        _ => Vec::new(),
    }
}

fn parse_output_events(response: &RoonResponse) -> Vec<OutputEvent> {
    let Some(body) = response.body.as_ref() else {
        return Vec::new();
    };
    match response.name.as_str() {
        "Subscribed" => vec![OutputEvent::Subscribed {
            outputs: parse_vec(body, "outputs"),
        }],
        "Changed" => {
            let mut events = Vec::new();
            let output_ids = parse_string_vec(body, "outputs_removed");
            if !output_ids.is_empty() {
                events.push(OutputEvent::OutputsRemoved { output_ids });
            }
            let outputs: Vec<Output> = parse_vec(body, "outputs_added");
            if !outputs.is_empty() {
                events.push(OutputEvent::OutputsAdded { outputs });
            }
            let outputs: Vec<Output> = parse_vec(body, "outputs_changed");
            if !outputs.is_empty() {
                events.push(OutputEvent::OutputsChanged { outputs });
            }
            events
        }
        _ => Vec::new(),
    }
}

fn parse_queue_events(response: &RoonResponse) -> Vec<QueueEvent> {
    let Some(body) = response.body.as_ref() else {
        return Vec::new();
    };
    match response.name.as_str() {
        "Subscribed" => vec![QueueEvent::Subscribed {
            items: parse_vec(body, "items"),
        }],
        "Changed" => {
            let mut events = Vec::new();
            let item_ids: Vec<i64> = body
                .get("items_removed")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
                .unwrap_or_default();
            if !item_ids.is_empty() {
                events.push(QueueEvent::ItemsRemoved { item_ids });
            }
            let items: Vec<QueueItem> = parse_vec(body, "items_added");
            if !items.is_empty() {
                events.push(QueueEvent::ItemsAdded { items });
            }
            let items: Vec<QueueItem> = parse_vec(body, "items_changed");
            if !items.is_empty() {
                events.push(QueueEvent::ItemsChanged { items });
            }
            events
        }
        _ => Vec::new(),
    }
}
