use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use thiserror::Error;

use crate::types::{Category, JobPosting, RawPosting};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("cannot derive a posting identity: no listing id and title or company missing")]
    MissingIdentity,
}

/// Canonicalize one parsed posting. `run_time` anchors relative date text
/// and becomes the record's observation timestamp.
///
/// Identity prefers the source listing id; the fallback is the
/// lowercased/trimmed company + title composite. Display fields keep their
/// original casing.
pub fn normalize(
    raw: RawPosting,
    run_time: DateTime<Utc>,
) -> Result<JobPosting, NormalizationError> {
    let title = raw.title.as_deref().map(str::trim).unwrap_or("");
    let company = raw.company.as_deref().map(str::trim).unwrap_or("");

    let listing_id = raw
        .listing_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let identity = match listing_id {
        Some(id) => id.to_owned(),
        None => {
            // The parser already requires these; checked again so a bad
            // caller cannot produce an unkeyed row.
            if title.is_empty() || company.is_empty() {
                return Err(NormalizationError::MissingIdentity);
            }
            format!("{}::{}", company.to_lowercase(), title.to_lowercase())
        }
    };

    Ok(JobPosting {
        identity,
        title: title.to_owned(),
        company: company.to_owned(),
        location: raw.location.as_deref().map(str::trim).unwrap_or("").to_owned(),
        url: raw.url,
        category: raw
            .category
            .as_deref()
            .map(Category::parse)
            .unwrap_or(Category::Other),
        skills: split_skills(raw.skills.iter().map(String::as_str)),
        posted_at: raw
            .posted
            .as_deref()
            .and_then(|text| parse_posted_at(text, run_time)),
        scraped_at: run_time,
    })
}

/// Split skill entries on commas and pipes, trim each tag and drop empties;
/// duplicates collapse into the set.
pub fn split_skills<'a>(entries: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    entries
        .into_iter()
        .flat_map(|entry| entry.split(|c| c == ',' || c == '|'))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// Resolve posting date text against the run time. Handles the site's
/// relative forms ("3 days ago") plus a couple of absolute formats; anything
/// else counts as missing.
pub fn parse_posted_at(text: &str, run_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    if text == "today" || text == "just now" {
        return Some(run_time);
    }
    if text == "yesterday" {
        return Some(run_time - Duration::days(1));
    }
    if let Some(rest) = text.strip_suffix(" ago") {
        let elems = rest.split(' ').collect::<Vec<_>>();
        let amount: i64 = elems.first()?.parse().ok()?;
        let unit = *elems.get(1)?;
        let offset = match unit.trim_end_matches('s') {
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::weeks(amount),
            "month" => Duration::days(amount * 30),
            "year" => Duration::days(amount * 365),
            _ => return None,
        };
        return Some(run_time - offset);
    }
    for format in ["%Y-%m-%d", "%b %d, %Y", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}
