//! `toolchat history` — Query the tool-call journal.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Subcommand;
use std::path::Path;
use toolchat_core::journal::{DEFAULT_RECENT_LIMIT, ToolCallLog, ToolCallRecord, format_timestamp};

/// Prompt and response text longer than this is shortened in table output.
const CELL_CHARS: usize = 72;

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Show the most recent tool calls, newest first
    Recent {
        /// How many calls to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show tool calls recorded between two times, oldest first
    Range {
        /// Start time (RFC 3339, or YYYY-MM-DD for the start of that day)
        #[arg(long)]
        start: String,

        /// End time (RFC 3339, or YYYY-MM-DD for the end of that day)
        #[arg(long)]
        end: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one tool call in full
    Show {
        /// Record id
        id: i64,
    },
}

pub async fn run(
    config_path: Option<&Path>,
    action: HistoryAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.journal.enabled {
        return Err("The tool-call journal is disabled (journal.enabled = false)".into());
    }
    let journal = super::open_journal(&config).await?;

    match action {
        HistoryAction::Recent { limit, json } => {
            let records = journal.recent(limit).await?;
            print_records(&records, json)?;
        }
        HistoryAction::Range { start, end, json } => {
            let start = parse_time(&start, false)?;
            let end = parse_time(&end, true)?;
            if end < start {
                return Err("--end is before --start".into());
            }
            let records = journal.by_time_range(start, end).await?;
            print_records(&records, json)?;
        }
        HistoryAction::Show { id } => match journal.get(id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => return Err(format!("No tool call with id {id}").into()),
        },
    }

    Ok(())
}

fn print_records(records: &[ToolCallRecord], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("  No tool calls recorded.");
        return Ok(());
    }

    println!("🔧 Tool calls ({})", records.len());
    println!();
    for record in records {
        println!(
            "  #{:<5} {}  {}",
            record.id,
            format_timestamp(&record.timestamp),
            record.tool_name
        );
        println!("         prompt:    {}", shorten(&record.prompt));
        println!("         arguments: {}", shorten(&record.arguments.to_string()));
        println!("         response:  {}", shorten(&record.response.to_string()));
    }
    Ok(())
}

/// Accept RFC 3339 timestamps or bare dates.
///
/// A bare date means midnight for a range start and the last second of
/// the day for a range end.
fn parse_time(input: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_opt(23, 59, 59)
        } else {
            NaiveTime::from_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Ok(date.and_time(time).and_utc());
        }
    }
    Err(format!(
        "Invalid time '{input}': expected RFC 3339 (2024-03-09T07:05:01Z) or YYYY-MM-DD"
    ))
}

fn shorten(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= CELL_CHARS {
        return single_line;
    }
    let cut: String = single_line.chars().take(CELL_CHARS).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_time("2024-03-09T07:05:01Z", false).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap());

        let offset = parse_time("2024-03-09T09:05:01+02:00", false).unwrap();
        assert_eq!(offset, ts);
    }

    #[test]
    fn bare_dates_cover_the_whole_day() {
        assert_eq!(
            parse_time("2024-03-09", false).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time("2024-03-09", true).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_time("yesterday", false).unwrap_err();
        assert!(err.contains("yesterday"));
    }

    #[test]
    fn shorten_keeps_one_line() {
        assert_eq!(shorten("a\nb"), "a b");
        let long = "y".repeat(200);
        assert!(shorten(&long).ends_with('…'));
    }
}
