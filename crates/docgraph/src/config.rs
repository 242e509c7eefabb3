use serde::{Deserialize, Serialize};

/// Where store calls issued outside a transaction run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// On the submitting thread, before the call returns its [`Deferred`](crate::Deferred).
    Inline,
    /// On a dedicated worker thread per batch.
    #[default]
    Thread,
}

/// Configuration for a [`Mapper`](crate::Mapper).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// How write batches and loads are scheduled.
    pub dispatch: DispatchMode,
    /// Upper bound on store round trips for a single load. A load that would
    /// need more fails with [`MapperError::WaveLimit`](crate::MapperError::WaveLimit).
    pub max_waves: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Thread,
            max_waves: 64,
        }
    }
}

impl MapperConfig {
    /// Run every store call on the caller's thread.
    pub fn inline() -> Self {
        Self {
            dispatch: DispatchMode::Inline,
            ..Default::default()
        }
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
