//! Browse service: a stateful, serialized browse session.

use crate::connection::RoonConnection;
use crate::error::{Result, RoonError};
use crate::model::{BrowseList, BrowseResult, LoadResult};
use crate::registry::services::BROWSE;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_LOAD_COUNT: u32 = 100;

/// Arguments to a raw `browse` call. Most callers use the convenience
/// wrappers instead.
#[derive(Debug, Clone, Default)]
pub struct BrowseOpts {
    /// Hierarchy to browse; falls back to the session's current one.
    pub hierarchy: Option<String>,
    /// Item to descend into (from a previous list).
    pub item_key: Option<String>,
    /// Text input for a search or input-prompt item.
    pub input: Option<String>,
    /// Pop back to the hierarchy root.
    pub pop_all: bool,
    /// Pop up this many levels.
    pub pop_levels: Option<u32>,
    /// Re-fetch the current list.
    pub refresh_list: bool,
    /// Persist a display offset for the current list.
    pub set_display_offset: Option<u64>,
}

/// Arguments to a paginated `load` call.
#[derive(Debug, Clone, Default)]
pub struct LoadOpts {
    pub offset: u64,
    /// Items to fetch; defaults to 100.
    pub count: Option<u32>,
    /// Level to load from; defaults to the session's current level.
    pub level: Option<u32>,
}

struct SessionState {
    zone: Mutex<Option<String>>,
    current_hierarchy: Mutex<Option<String>>,
    current_level: Mutex<Option<u32>>,
    current_list: Mutex<Option<BrowseList>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Typed wrapper over `com.roonlabs.browse:1`.
///
/// The session is single by default; multi-session mode tags every body
/// with a generated `multi_session_key` so several sessions can coexist
/// on one connection.
#[derive(Clone)]
pub struct BrowseService {
    connection: RoonConnection,
    multi_session_key: Option<String>,
    state: Arc<SessionState>,
}

impl BrowseService {
    pub fn new(connection: RoonConnection) -> Self {
        Self::build(connection, None)
    }

    /// A service with its own session key, independent of any other
    /// browse session on the connection.
    pub fn new_multi_session(connection: RoonConnection) -> Self {
        let key = uuid::Uuid::new_v4().to_string();
        Self::build(connection, Some(key))
    }

    fn build(connection: RoonConnection, multi_session_key: Option<String>) -> Self {
        Self {
            connection,
            multi_session_key,
            state: Arc::new(SessionState {
                zone: Mutex::new(None),
                current_hierarchy: Mutex::new(None),
                current_level: Mutex::new(None),
                current_list: Mutex::new(None),
            }),
        }
    }

    /// Zone included in action bodies (play/queue actions need one).
    pub fn select_zone(&self, zone_or_output_id: impl Into<String>) {
        *lock(&self.state.zone) = Some(zone_or_output_id.into());
    }

    /// Hierarchy of the current session, if one has been entered.
    pub fn current_hierarchy(&self) -> Option<String> {
        lock(&self.state.current_hierarchy).clone()
    }

    /// Level of the current list.
    pub fn current_level(&self) -> Option<u32> {
        lock(&self.state.current_level).clone()
    }

    /// Metadata of the current list.
    pub fn current_list(&self) -> Option<BrowseList> {
        lock(&self.state.current_list).clone()
    }

    // ---- convenience wrappers -----------------------------------------

    /// Enter a hierarchy at its root (`browse`, `albums`, `artists`,
    /// `playlists`, `internet_radio`, `genres`, `composers`, `search`).
    pub async fn browse_home(&self, hierarchy: &str) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            hierarchy: Some(hierarchy.to_string()),
            pop_all: true,
            ..BrowseOpts::default()
        })
        .await
    }

    /// Descend into an item from the current list.
    pub async fn select_item(&self, item_key: &str) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            item_key: Some(item_key.to_string()),
            ..BrowseOpts::default()
        })
        .await
    }

    /// Answer an input-prompt item (search boxes).
    pub async fn search(&self, item_key: &str, input: &str) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            item_key: Some(item_key.to_string()),
            input: Some(input.to_string()),
            ..BrowseOpts::default()
        })
        .await
    }

    /// Pop up one level.
    pub async fn back(&self) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            pop_levels: Some(1),
            ..BrowseOpts::default()
        })
        .await
    }

    /// Pop back to the hierarchy root.
    pub async fn back_to_root(&self) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            pop_all: true,
            ..BrowseOpts::default()
        })
        .await
    }

    /// Re-fetch the current list.
    pub async fn refresh(&self) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            refresh_list: true,
            ..BrowseOpts::default()
        })
        .await
    }

    /// Remember a scroll position for the current list.
    pub async fn set_display_offset(&self, offset: u64) -> Result<BrowseResult> {
        self.browse(BrowseOpts {
            set_display_offset: Some(offset),
            ..BrowseOpts::default()
        })
        .await
    }

    // ---- raw calls ----------------------------------------------------

    /// Issue a raw `browse` call and update the session cache from the
    /// result.
    pub async fn browse(&self, opts: BrowseOpts) -> Result<BrowseResult> {
        let hierarchy = opts
            .hierarchy
            .clone()
            .or_else(|| self.current_hierarchy())
            .ok_or_else(|| RoonError::BrowseFailed("no hierarchy selected".into()))?;

        let mut body = json!({ "hierarchy": hierarchy });
        if let Some(item_key) = &opts.item_key {
            body["item_key"] = json!(item_key);
        }
        if let Some(input) = &opts.input {
            body["input"] = json!(input);
        }
        if opts.pop_all {
            body["pop_all"] = json!(true);
        }
        if let Some(levels) = opts.pop_levels {
            body["pop_levels"] = json!(levels);
        }
        if opts.refresh_list {
            body["refresh_list"] = json!(true);
        }
        if let Some(offset) = opts.set_display_offset {
            body["set_display_offset"] = json!(offset);
        }
        if let Some(zone) = lock(&self.state.zone).clone() {
            body["zone_or_output_id"] = json!(zone);
        }
        self.tag_session(&mut body);

        let response = self
            .connection
            .send(&format!("{BROWSE}/browse"), Some(body))
            .await?;
        if !response.is_success() {
            return Err(RoonError::BrowseFailed(response.error_message()));
        }

        let result: BrowseResult = response
            .body_as()
            .map_err(|e| RoonError::BrowseFailed(e.to_string()))?;

        *lock(&self.state.current_hierarchy) = Some(hierarchy);
        if let Some(list) = &result.list {
            *lock(&self.state.current_level) = Some(list.level);
            *lock(&self.state.current_list) = Some(list.clone());
        }
        Ok(result)
    }

    /// Load a page of the current list.
    pub async fn load(&self, opts: LoadOpts) -> Result<LoadResult> {
        let hierarchy = self
            .current_hierarchy()
            .ok_or_else(|| RoonError::LoadFailed("no hierarchy selected".into()))?;

        let mut body = json!({
            "hierarchy": hierarchy,
            "offset": opts.offset,
            "count": opts.count.unwrap_or(DEFAULT_LOAD_COUNT),
        });
        if let Some(level) = opts.level.or_else(|| self.current_level()) {
            body["level"] = json!(level);
        }
        self.tag_session(&mut body);

        let response = self
            .connection
            .send(&format!("{BROWSE}/load"), Some(body))
            .await?;
        if !response.is_success() {
            return Err(RoonError::LoadFailed(response.error_message()));
        }
        response
            .body_as()
            .map_err(|e| RoonError::LoadFailed(e.to_string()))
    }

    fn tag_session(&self, body: &mut Value) {
        if let Some(key) = &self.multi_session_key {
            body["multi_session_key"] = json!(key);
        }
    }
}
