//! TOML-based application settings.
//!
//! Stores work hours, shuffle cadence, timer defaults, scoring weights
//! and the local network identity. Stored at
//! `~/.config/nextup/settings.toml` (`~/.config/nextup-dev/` when
//! `NEXTUP_ENV=dev`).
//!
//! Settings are normalized on every load and deserialize: weight shares
//! are clamped and rescaled to sum 100 so the scoring engine never sees
//! an inconsistent budget.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::SettingsError;
use crate::period::AllowedPeriod;

/// Current persisted schema version. Version 0 predates the explicit
/// allowed-period enum and needs [`migrate_legacy_period`].
pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Scoring weight configuration. Importance and urgency share a
/// 100-point budget; urgency is split between deadline pressure and
/// repeat-streak pressure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
    #[serde(default = "default_urgency_weight")]
    pub urgency_weight: f64,
    /// Percentage of the urgency share driven by deadlines (0-100);
    /// the remainder is repeat urgency.
    #[serde(default = "default_deadline_share")]
    pub urgency_deadline_share: f64,
    /// Damping factor (0-1) so routine chores do not dominate.
    #[serde(default = "default_repeat_penalty")]
    pub repeat_urgency_penalty: f64,
}

impl ScoringWeights {
    /// Clamp shares into range and rescale importance + urgency to sum
    /// exactly 100.
    pub fn normalize(&mut self) {
        self.importance_weight = self.importance_weight.clamp(0.0, 100.0);
        self.urgency_weight = self.urgency_weight.clamp(0.0, 100.0);
        let sum = self.importance_weight + self.urgency_weight;
        if sum > 0.0 {
            self.importance_weight = self.importance_weight * 100.0 / sum;
            self.urgency_weight = self.urgency_weight * 100.0 / sum;
        } else {
            self.importance_weight = default_importance_weight();
            self.urgency_weight = default_urgency_weight();
        }
        self.urgency_deadline_share = self.urgency_deadline_share.clamp(0.0, 100.0);
        self.repeat_urgency_penalty = self.repeat_urgency_penalty.clamp(0.0, 1.0);
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            importance_weight: default_importance_weight(),
            urgency_weight: default_urgency_weight(),
            urgency_deadline_share: default_deadline_share(),
            repeat_urgency_penalty: default_repeat_penalty(),
        }
    }
}

/// Quiet hours during which non-urgent notifications are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Quiet windows may wrap midnight (22:00-07:00).
    pub fn contains(&self, tod: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= tod && tod < self.end
        } else {
            tod >= self.start || tod < self.end
        }
    }
}

/// Notification toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub play_sound: bool,
    /// Break/no-eligible-task notices; time-up notices always fire.
    #[serde(default = "default_true")]
    pub break_notices: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true, play_sound: true, break_notices: true }
    }
}

/// Local network identity. Never included in synced settings payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetworkIdentity {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub peer_host: Option<String>,
    #[serde(default)]
    pub peer_port: Option<u16>,
}

/// Process-wide application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default = "default_work_start")]
    pub work_start: NaiveTime,
    #[serde(default = "default_work_end")]
    pub work_end: NaiveTime,
    /// Bounds for the gap between automatic shuffles.
    #[serde(default = "default_min_gap")]
    pub min_auto_shuffle_gap_minutes: u32,
    #[serde(default = "default_max_gap")]
    pub max_auto_shuffle_gap_minutes: u32,
    /// Countdown length when no pomodoro mode or override applies.
    #[serde(default = "default_reminder_minutes")]
    pub reminder_minutes: u32,
    #[serde(default)]
    pub timer_mode: crate::task::TimerMode,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Strength of the size multiplier, default 0.2 (bounds 0.8-1.2).
    #[serde(default = "default_size_bias")]
    pub size_bias_strength: f64,
    /// Boost (0-1) applied to repeat urgency of tasks with a completion
    /// history, so kept-up habits keep surfacing.
    #[serde(default)]
    pub streak_bias: f64,
    /// Seed the weighted draw from the calendar date so repeated
    /// shuffles within one day agree.
    #[serde(default = "default_true")]
    pub stable_daily_random: bool,
    #[serde(default = "default_true")]
    pub manual_shuffle_respects_allowed_period: bool,
    #[serde(default)]
    pub network: NetworkIdentity,

    // Sync metadata, same contract as Task.
    #[serde(default)]
    pub event_version: u64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_work_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()
}
fn default_work_end() -> NaiveTime {
    NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default()
}
fn default_min_gap() -> u32 {
    30
}
fn default_max_gap() -> u32 {
    120
}
fn default_reminder_minutes() -> u32 {
    25
}
fn default_importance_weight() -> f64 {
    60.0
}
fn default_urgency_weight() -> f64 {
    40.0
}
fn default_deadline_share() -> f64 {
    75.0
}
fn default_repeat_penalty() -> f64 {
    0.5
}
fn default_size_bias() -> f64 {
    0.2
}
fn default_true() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            work_start: default_work_start(),
            work_end: default_work_end(),
            min_auto_shuffle_gap_minutes: default_min_gap(),
            max_auto_shuffle_gap_minutes: default_max_gap(),
            reminder_minutes: default_reminder_minutes(),
            timer_mode: crate::task::TimerMode::Countdown,
            quiet_hours: None,
            notifications: NotificationsConfig::default(),
            weights: ScoringWeights::default(),
            size_bias_strength: default_size_bias(),
            streak_bias: 0.0,
            stable_daily_random: true,
            manual_shuffle_respects_allowed_period: true,
            network: NetworkIdentity::default(),
            event_version: 1,
            updated_at: Utc::now(),
        }
    }
}

impl AppSettings {
    /// Clamp everything into range. Called on every load/deserialize.
    pub fn normalize(&mut self) {
        self.weights.normalize();
        self.size_bias_strength = self.size_bias_strength.clamp(0.0, 1.0);
        self.streak_bias = self.streak_bias.clamp(0.0, 1.0);
        if self.max_auto_shuffle_gap_minutes < self.min_auto_shuffle_gap_minutes {
            self.max_auto_shuffle_gap_minutes = self.min_auto_shuffle_gap_minutes;
        }
        if self.reminder_minutes == 0 {
            self.reminder_minutes = default_reminder_minutes();
        }
    }

    /// Bump sync metadata after a local edit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.event_version += 1;
        self.updated_at = now;
    }

    /// Copy for the sync payload: identity fields are local-only.
    pub fn sync_view(&self) -> AppSettings {
        let mut copy = self.clone();
        copy.network = NetworkIdentity::default();
        copy
    }

    /// Merge a remote settings record, keeping the local network
    /// identity untouched. Returns false when the incoming record is
    /// stale.
    pub fn merge_remote(&mut self, incoming: &AppSettings) -> bool {
        let newer = incoming.event_version > self.event_version
            || (incoming.event_version == self.event_version
                && incoming.updated_at > self.updated_at);
        if !newer {
            return false;
        }
        let identity = self.network.clone();
        *self = incoming.clone();
        self.network = identity;
        self.normalize();
        true
    }

    /// Load from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut settings: AppSettings =
            toml::from_str(&raw).map_err(|e| SettingsError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if settings.schema_version > SETTINGS_SCHEMA_VERSION {
            return Err(SettingsError::UnsupportedSchema(settings.schema_version));
        }
        settings.schema_version = SETTINGS_SCHEMA_VERSION;
        settings.normalize();
        Ok(settings)
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&settings_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), SettingsError> {
        let raw = toml::to_string_pretty(self).map_err(|e| SettingsError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, raw).map_err(|e| SettingsError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// One-time migration for pre-versioned task records: the retired
/// integer period value 3 meant "custom", but records written before
/// custom windows existed carry no window payload. Those remap to
/// OffWork; anything else unknown degrades to Any.
pub fn migrate_legacy_period(raw: i64, custom: Option<crate::period::PeriodDefinition>) -> AllowedPeriod {
    match (raw, custom) {
        (0, _) => AllowedPeriod::Any,
        (1, _) => AllowedPeriod::Work,
        (2, _) => AllowedPeriod::OffWork,
        (3, Some(definition)) => AllowedPeriod::Custom { definition },
        (3, None) => AllowedPeriod::OffWork,
        _ => AllowedPeriod::Any,
    }
}

/// Returns `~/.config/nextup[-dev]/` based on NEXTUP_ENV.
pub fn data_dir() -> Result<PathBuf, SettingsError> {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config");
    let env = std::env::var("NEXTUP_ENV").unwrap_or_else(|_| "production".to_string());
    let dir = if env == "dev" { base.join("nextup-dev") } else { base.join("nextup") };
    std::fs::create_dir_all(&dir).map_err(|e| SettingsError::LoadFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}

fn settings_path() -> Result<PathBuf, SettingsError> {
    Ok(data_dir()?.join("settings.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn defaults_are_normalized() {
        let mut s = AppSettings::default();
        s.normalize();
        assert_eq!(s.weights.importance_weight + s.weights.urgency_weight, 100.0);
        assert_eq!(s.weights.urgency_deadline_share, 75.0);
    }

    #[test]
    fn normalize_rescales_weight_budget() {
        let mut s = AppSettings::default();
        s.weights.importance_weight = 30.0;
        s.weights.urgency_weight = 30.0;
        s.normalize();
        assert_eq!(s.weights.importance_weight, 50.0);
        assert_eq!(s.weights.urgency_weight, 50.0);
    }

    #[test]
    fn normalize_recovers_from_zero_weights() {
        let mut s = AppSettings::default();
        s.weights.importance_weight = 0.0;
        s.weights.urgency_weight = 0.0;
        s.normalize();
        assert_eq!(s.weights.importance_weight, 60.0);
        assert_eq!(s.weights.urgency_weight, 40.0);
    }

    #[test]
    fn normalize_orders_shuffle_gap_bounds() {
        let mut s = AppSettings::default();
        s.min_auto_shuffle_gap_minutes = 90;
        s.max_auto_shuffle_gap_minutes = 10;
        s.normalize();
        assert_eq!(s.max_auto_shuffle_gap_minutes, 90);
    }

    #[test]
    fn normalize_clamps_streak_bias() {
        let mut s = AppSettings::default();
        s.streak_bias = 2.5;
        s.normalize();
        assert_eq!(s.streak_bias, 1.0);
        s.streak_bias = -0.1;
        s.normalize();
        assert_eq!(s.streak_bias, 0.0);
    }

    #[test]
    fn sync_view_strips_network_identity() {
        let mut s = AppSettings::default();
        s.network.device_id = "nextup-abc".into();
        s.network.listen_port = Some(7600);
        let view = s.sync_view();
        assert_eq!(view.network, NetworkIdentity::default());
    }

    #[test]
    fn merge_remote_keeps_local_identity() {
        let mut local = AppSettings::default();
        local.network.device_id = "nextup-local".into();
        let mut remote = AppSettings::default();
        remote.reminder_minutes = 50;
        remote.event_version = local.event_version + 1;
        remote.updated_at = local.updated_at + Duration::seconds(1);

        assert!(local.merge_remote(&remote.sync_view()));
        assert_eq!(local.reminder_minutes, 50);
        assert_eq!(local.network.device_id, "nextup-local");
    }

    #[test]
    fn merge_remote_drops_stale_record() {
        let mut local = AppSettings::default();
        local.event_version = 5;
        let mut remote = AppSettings::default();
        remote.event_version = 4;
        remote.reminder_minutes = 99;
        assert!(!local.merge_remote(&remote));
        assert_ne!(local.reminder_minutes, 99);
    }

    #[test]
    fn quiet_hours_wrap_midnight() {
        let q = QuietHours {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        };
        assert!(q.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(q.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!q.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut s = AppSettings::default();
        s.reminder_minutes = 40;
        s.save_to(&path).unwrap();
        let loaded = AppSettings::load_from(&path).unwrap();
        assert_eq!(loaded.reminder_minutes, 40);
        assert_eq!(loaded.schema_version, SETTINGS_SCHEMA_VERSION);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppSettings::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.reminder_minutes, 25);
    }

    #[test]
    fn legacy_period_value_three_without_window_is_offwork() {
        assert_eq!(migrate_legacy_period(3, None), AllowedPeriod::OffWork);
        assert_eq!(migrate_legacy_period(1, None), AllowedPeriod::Work);
        assert_eq!(migrate_legacy_period(42, None), AllowedPeriod::Any);
    }
}
