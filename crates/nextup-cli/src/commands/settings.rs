//! Settings commands over the shared settings.toml.

use chrono::{NaiveTime, Utc};
use clap::Subcommand;
use std::error::Error;
use std::sync::Arc;

use nextup_core::events::Event;
use nextup_core::settings::{data_dir, QuietHours};
use nextup_core::sync::{get_or_create_device_id, SyncEngine};
use nextup_core::task::TimerMode;
use nextup_core::{AppSettings, EventBus};

use crate::store::FileStore;

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Get a settings value
    Get {
        /// Key, e.g. "reminder_minutes" or "work_start"
        key: String,
    },
    /// Set a settings value
    Set {
        /// Key
        key: String,
        /// New value
        value: String,
    },
    /// Print all settings as TOML
    List,
    /// Reset settings to defaults (keeps the network identity)
    Reset,
}

pub async fn run(action: SettingsAction) -> Result<(), Box<dyn Error>> {
    match action {
        SettingsAction::Get { key } => {
            let settings = AppSettings::load()?;
            match get(&settings, &key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            }
        }
        SettingsAction::Set { key, value } => {
            let now = Utc::now();
            let mut settings = AppSettings::load()?;
            set(&mut settings, &key, &value)?;
            settings.normalize();
            settings.touch(now);
            settings.save()?;
            record_settings(&settings, now).await?;
            println!("ok");
        }
        SettingsAction::List => {
            let settings = AppSettings::load()?;
            println!("{}", toml::to_string_pretty(&settings)?);
        }
        SettingsAction::Reset => {
            let now = Utc::now();
            let current = AppSettings::load()?;
            let mut fresh = AppSettings::default();
            fresh.network = current.network;
            fresh.event_version = current.event_version;
            fresh.touch(now);
            fresh.save()?;
            record_settings(&fresh, now).await?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}

/// Queue the new settings record so paired devices pick it up.
async fn record_settings(
    settings: &AppSettings,
    now: chrono::DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open()?);
    let engine = SyncEngine::new(
        store,
        EventBus::new(),
        get_or_create_device_id()?,
        settings.network.user_id.clone(),
        &data_dir()?,
    )?;
    engine.record_local(&Event::SettingsUpdated { settings: settings.clone() }, now).await?;
    Ok(())
}

fn get(settings: &AppSettings, key: &str) -> Option<String> {
    Some(match key {
        "work_start" => settings.work_start.to_string(),
        "work_end" => settings.work_end.to_string(),
        "reminder_minutes" => settings.reminder_minutes.to_string(),
        "timer_mode" => match settings.timer_mode {
            TimerMode::Countdown => "countdown".to_string(),
            TimerMode::Pomodoro { focus_minutes, break_minutes, cycles } => {
                format!("pomodoro:{focus_minutes}:{break_minutes}:{cycles}")
            }
        },
        "min_auto_shuffle_gap_minutes" => settings.min_auto_shuffle_gap_minutes.to_string(),
        "max_auto_shuffle_gap_minutes" => settings.max_auto_shuffle_gap_minutes.to_string(),
        "size_bias_strength" => settings.size_bias_strength.to_string(),
        "streak_bias" => settings.streak_bias.to_string(),
        "stable_daily_random" => settings.stable_daily_random.to_string(),
        "manual_shuffle_respects_allowed_period" => {
            settings.manual_shuffle_respects_allowed_period.to_string()
        }
        "importance_weight" => settings.weights.importance_weight.to_string(),
        "urgency_weight" => settings.weights.urgency_weight.to_string(),
        "urgency_deadline_share" => settings.weights.urgency_deadline_share.to_string(),
        "repeat_urgency_penalty" => settings.weights.repeat_urgency_penalty.to_string(),
        "notifications.enabled" => settings.notifications.enabled.to_string(),
        "notifications.play_sound" => settings.notifications.play_sound.to_string(),
        "notifications.break_notices" => settings.notifications.break_notices.to_string(),
        "quiet_hours" => match settings.quiet_hours {
            Some(q) => format!("{}-{}", q.start, q.end),
            None => "off".to_string(),
        },
        "peer" => match (&settings.network.peer_host, settings.network.peer_port) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            _ => "unset".to_string(),
        },
        "listen_port" => {
            settings.network.listen_port.map(|p| p.to_string()).unwrap_or("unset".into())
        }
        _ => return None,
    })
}

fn set(settings: &mut AppSettings, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    match key {
        "work_start" => settings.work_start = parse_time(value)?,
        "work_end" => settings.work_end = parse_time(value)?,
        "reminder_minutes" => settings.reminder_minutes = value.parse()?,
        // "countdown", or "pomodoro:<focus>:<break>:<cycles>".
        "timer_mode" => settings.timer_mode = parse_timer_mode(value)?,
        "min_auto_shuffle_gap_minutes" => settings.min_auto_shuffle_gap_minutes = value.parse()?,
        "max_auto_shuffle_gap_minutes" => settings.max_auto_shuffle_gap_minutes = value.parse()?,
        "size_bias_strength" => settings.size_bias_strength = value.parse()?,
        "streak_bias" => settings.streak_bias = value.parse()?,
        "stable_daily_random" => settings.stable_daily_random = value.parse()?,
        "manual_shuffle_respects_allowed_period" => {
            settings.manual_shuffle_respects_allowed_period = value.parse()?
        }
        "importance_weight" => settings.weights.importance_weight = value.parse()?,
        "urgency_weight" => settings.weights.urgency_weight = value.parse()?,
        "urgency_deadline_share" => settings.weights.urgency_deadline_share = value.parse()?,
        "repeat_urgency_penalty" => settings.weights.repeat_urgency_penalty = value.parse()?,
        "notifications.enabled" => settings.notifications.enabled = value.parse()?,
        "notifications.play_sound" => settings.notifications.play_sound = value.parse()?,
        "notifications.break_notices" => settings.notifications.break_notices = value.parse()?,
        // "22:00-07:00", or "off" to disable.
        "quiet_hours" => {
            settings.quiet_hours = if value == "off" {
                None
            } else {
                let (start, end) =
                    value.split_once('-').ok_or("quiet_hours wants HH:MM-HH:MM or off")?;
                Some(QuietHours { start: parse_time(start)?, end: parse_time(end)? })
            }
        }
        "peer" => {
            let (host, port) = value.split_once(':').ok_or("peer wants host:port")?;
            settings.network.peer_host = Some(host.to_string());
            settings.network.peer_port = Some(port.parse()?);
        }
        "listen_port" => settings.network.listen_port = Some(value.parse()?),
        "user_id" => {
            settings.network.user_id =
                if value == "none" { None } else { Some(value.to_string()) }
        }
        _ => return Err(format!("unknown key: {key}").into()),
    }
    Ok(())
}

fn parse_timer_mode(raw: &str) -> Result<TimerMode, Box<dyn Error>> {
    if raw == "countdown" {
        return Ok(TimerMode::Countdown);
    }
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        ["pomodoro", focus, brk, cycles] => Ok(TimerMode::Pomodoro {
            focus_minutes: focus.parse()?,
            break_minutes: brk.parse()?,
            cycles: cycles.parse()?,
        }),
        _ => Err(format!("bad timer mode '{raw}', want countdown or pomodoro:f:b:c").into()),
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, Box<dyn Error>> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| format!("bad time '{raw}', want HH:MM").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_roundtrip_known_keys() {
        let mut settings = AppSettings::default();
        set(&mut settings, "reminder_minutes", "40").unwrap();
        assert_eq!(get(&settings, "reminder_minutes").unwrap(), "40");

        set(&mut settings, "work_start", "08:30").unwrap();
        assert_eq!(get(&settings, "work_start").unwrap(), "08:30:00");

        set(&mut settings, "quiet_hours", "22:00-07:00").unwrap();
        assert_eq!(get(&settings, "quiet_hours").unwrap(), "22:00:00-07:00:00");
        set(&mut settings, "quiet_hours", "off").unwrap();
        assert_eq!(get(&settings, "quiet_hours").unwrap(), "off");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut settings = AppSettings::default();
        assert!(set(&mut settings, "nope", "1").is_err());
        assert!(get(&settings, "nope").is_none());
    }

    #[test]
    fn timer_mode_parses_both_forms() {
        assert_eq!(parse_timer_mode("countdown").unwrap(), TimerMode::Countdown);
        assert_eq!(
            parse_timer_mode("pomodoro:25:5:4").unwrap(),
            TimerMode::Pomodoro { focus_minutes: 25, break_minutes: 5, cycles: 4 }
        );
        assert!(parse_timer_mode("pomodoro:25").is_err());
    }

    #[test]
    fn peer_endpoint_parses() {
        let mut settings = AppSettings::default();
        set(&mut settings, "peer", "192.168.1.20:7600").unwrap();
        assert_eq!(get(&settings, "peer").unwrap(), "192.168.1.20:7600");
        assert!(set(&mut settings, "peer", "no-port").is_err());
    }
}
