//! Named period management.

use chrono::{NaiveTime, Utc, Weekday};
use clap::Subcommand;
use std::error::Error;
use std::sync::Arc;

use nextup_core::period::{Alignment, PeriodDefinition};
use nextup_core::settings::data_dir;
use nextup_core::storage::Storage;
use nextup_core::sync::{get_or_create_device_id, SyncEngine};
use nextup_core::{AppSettings, EventBus};

use crate::store::FileStore;

#[derive(Subcommand)]
pub enum PeriodAction {
    /// Create or replace a named period
    Add {
        /// Period id, referenced by tasks (`task add --period <id>`)
        id: String,
        /// Display name; defaults to the id
        #[arg(long)]
        name: Option<String>,
        /// Comma-separated weekdays, e.g. mon,tue,fri (default all)
        #[arg(long, default_value = "mon,tue,wed,thu,fri,sat,sun")]
        days: String,
        /// Window start, HH:MM
        #[arg(long, default_value = "00:00")]
        start: String,
        /// Window end, HH:MM
        #[arg(long, default_value = "23:59")]
        end: String,
        /// Ignore start/end, match the whole day
        #[arg(long)]
        all_day: bool,
        /// Bound alignment: fixed, work-hours or off-work-hours
        #[arg(long, default_value = "fixed")]
        align: String,
    },
    /// List named periods
    List {
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete a named period (tasks referencing it fall back to Any)
    Delete {
        /// Period id
        id: String,
    },
}

pub async fn run(action: PeriodAction) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open()?);
    let settings = AppSettings::load()?;
    let engine = SyncEngine::new(
        store.clone(),
        EventBus::new(),
        get_or_create_device_id()?,
        settings.network.user_id.clone(),
        &data_dir()?,
    )?;
    let now = Utc::now();

    match action {
        PeriodAction::Add { id, name, days, start, end, all_day, align } => {
            let existing = store.get_periods().await?.into_iter().find(|p| p.id == id);
            let period = PeriodDefinition {
                name: name.unwrap_or_else(|| id.clone()),
                id,
                weekdays: parse_weekdays(&days)?,
                all_day,
                start: parse_time(&start)?,
                end: parse_time(&end)?,
                alignment: parse_alignment(&align)?,
                event_version: existing.map(|p| p.event_version + 1).unwrap_or(1),
                updated_at: now,
            };
            period.validate().map_err(|msg| format!("invalid period: {msg}"))?;
            store.upsert_period(period.clone()).await?;
            engine.record_period(&period, now).await?;
            println!("Period saved: {}", period.id);
        }
        PeriodAction::List { json } => {
            let periods = store.get_periods().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&periods)?);
            } else {
                for p in &periods {
                    let window = if p.all_day {
                        "all day".to_string()
                    } else {
                        match p.alignment {
                            Alignment::Fixed => format!("{}-{}", p.start, p.end),
                            Alignment::WorkHours => "work hours".to_string(),
                            Alignment::OffWorkHours => "off-work hours".to_string(),
                        }
                    };
                    let days: Vec<String> =
                        p.weekdays.iter().map(|d| d.to_string()).collect();
                    println!("{}  {}  [{}] {}", p.id, p.name, days.join(","), window);
                }
                if periods.is_empty() {
                    println!("no named periods");
                }
            }
        }
        PeriodAction::Delete { id } => {
            if engine.delete_period(&id, now).await? {
                println!("Period deleted: {id}");
            } else {
                eprintln!("no period matches '{id}'");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>, Box<dyn Error>> {
    let mut days = Vec::new();
    for part in raw.split(',') {
        let day = match part.trim().to_ascii_lowercase().as_str() {
            "mon" => Weekday::Mon,
            "tue" => Weekday::Tue,
            "wed" => Weekday::Wed,
            "thu" => Weekday::Thu,
            "fri" => Weekday::Fri,
            "sat" => Weekday::Sat,
            "sun" => Weekday::Sun,
            other => return Err(format!("bad weekday '{other}'").into()),
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}

fn parse_alignment(raw: &str) -> Result<Alignment, Box<dyn Error>> {
    match raw {
        "fixed" => Ok(Alignment::Fixed),
        "work-hours" => Ok(Alignment::WorkHours),
        "off-work-hours" => Ok(Alignment::OffWorkHours),
        _ => Err(format!("bad alignment '{raw}' (fixed, work-hours or off-work-hours)").into()),
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
    fn weekday_list_parses_and_dedupes() {
        assert_eq!(
            parse_weekdays("mon, tue,mon").unwrap(),
            vec![Weekday::Mon, Weekday::Tue]
        );
        assert!(parse_weekdays("mon,funday").is_err());
    }

    #[test]
    fn alignment_names_parse() {
        assert_eq!(parse_alignment("fixed").unwrap(), Alignment::Fixed);
        assert_eq!(parse_alignment("work-hours").unwrap(), Alignment::WorkHours);
        assert!(parse_alignment("sideways").is_err());
    }
}
