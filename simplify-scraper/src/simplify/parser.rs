use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::RawPosting;

/// Result of scanning one page of markup. `postings` is a finite, one-shot
/// sequence; blocks missing a required field (title or company) are dropped
/// and counted in `skipped` instead of aborting the page.
pub struct ParsedPage {
    pub postings: Vec<RawPosting>,
    pub skipped: u32,
}

/// One-shot scan of a page. No state carries across pages.
pub fn parse_page(markup: &str) -> ParsedPage {
    let doc = Html::parse_document(markup);
    let entry_selector = Selector::parse("div.job-entry").unwrap();

    let mut postings = Vec::new();
    let mut skipped = 0;
    for entry in doc.select(&entry_selector) {
        let raw = parse_entry(entry);
        if raw.title.is_none() || raw.company.is_none() {
            skipped += 1;
            log::warn!(
                "skipping posting block without title/company, listing id: {:?}",
                raw.listing_id
            );
            continue;
        }
        postings.push(raw);
    }
    ParsedPage { postings, skipped }
}

fn parse_entry(entry: ElementRef) -> RawPosting {
    let title_selector = Selector::parse("h3").unwrap();
    let company_selector = Selector::parse("h4").unwrap();
    let location_selector = Selector::parse("p").unwrap();
    let skills_selector = Selector::parse("div.mb-3 div.mt-3").unwrap();
    let category_selector = Selector::parse(r#"div[data-state="closed"] div.mt-3"#).unwrap();
    let posted_selector = Selector::parse("time.posted-date").unwrap();
    let link_selector = Selector::parse("a[href]").unwrap();

    let text_of = |selector: &Selector| -> Option<String> {
        entry
            .select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_owned())
            .filter(|text| !text.is_empty())
    };

    let url = entry.value().attr("data-url").map(String::from);
    let listing_id = url.as_deref().and_then(extract_listing_id).or_else(|| {
        entry
            .select(&link_selector)
            .filter_map(|a| a.value().attr("href"))
            .find_map(extract_listing_id)
    });

    let skills = entry
        .select(&skills_selector)
        .map(|el| el.text().collect::<String>().trim().to_owned())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();
    let category = entry
        .select(&category_selector)
        .map(|el| el.text().collect::<String>().trim().to_owned())
        .find(|text| !text.is_empty());

    RawPosting {
        listing_id,
        title: text_of(&title_selector),
        company: text_of(&company_selector),
        location: text_of(&location_selector),
        url,
        skills,
        category,
        posted: text_of(&posted_selector),
    }
}

/// Postings carry a 36 character listing id in their detail URL.
fn extract_listing_id(url: &str) -> Option<String> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"/([0-9a-fA-F-]{36})").unwrap();
    }
    RE.captures(url)?.get(1).map(|m| m.as_str().to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    const LISTING_ID: &str = "2f5e8a9c-1b3d-4e6f-8a9b-0c1d2e3f4a5b";

    fn entry_html(title: Option<&str>, company: Option<&str>) -> String {
        let title = title.map(|t| format!("<h3>{}</h3>", t)).unwrap_or_default();
        let company = company.map(|c| format!("<h4>{}</h4>", c)).unwrap_or_default();
        format!(
            r#"<div class="job-entry" data-url="https://simplify.jobs/jobs/{id}/apply">
                <div class="bg-white rounded-md">
                    {title}{company}
                    <p>Remote in USA</p>
                </div>
                <div class="relative h-screen">
                    <div class="mb-3"><div class="mt-3">Python</div><div class="mt-3">SQL, Go</div></div>
                    <div data-state="closed"><div class="mt-3">Software Engineering</div></div>
                    <time class="posted-date">3 days ago</time>
                </div>
            </div>"#,
            id = LISTING_ID,
            title = title,
            company = company,
        )
    }

    fn page(entries: &[String]) -> String {
        format!(
            "<div class=\"job-listing-page\">{}</div>",
            entries.concat()
        )
    }

    #[test]
    fn test_parse_full_entry() {
        let markup = page(&[entry_html(Some("Software Engineering Intern"), Some("Acme"))]);
        let parsed = parse_page(&markup);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.postings.len(), 1);
        let raw = &parsed.postings[0];
        assert_eq!(raw.title.as_deref(), Some("Software Engineering Intern"));
        assert_eq!(raw.company.as_deref(), Some("Acme"));
        assert_eq!(raw.location.as_deref(), Some("Remote in USA"));
        assert_eq!(raw.listing_id.as_deref(), Some(LISTING_ID));
        assert_eq!(raw.skills, vec!["Python".to_owned(), "SQL, Go".to_owned()]);
        assert_eq!(raw.category.as_deref(), Some("Software Engineering"));
        assert_eq!(raw.posted.as_deref(), Some("3 days ago"));
    }

    #[test]
    fn test_missing_title_is_skipped_others_survive() {
        let markup = page(&[
            entry_html(Some("Data Intern"), Some("Acme")),
            entry_html(None, Some("Globex")),
            entry_html(Some("Design Intern"), Some("Initech")),
        ]);
        let parsed = parse_page(&markup);
        assert_eq!(parsed.skipped, 1);
        let titles = parsed
            .postings
            .iter()
            .map(|raw| raw.title.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Data Intern", "Design Intern"]);
    }

    #[test]
    fn test_missing_optional_fields_yield_empty() {
        let markup = r#"<div class="job-entry">
            <div class="bg-white rounded-md"><h3>Intern</h3><h4>Acme</h4></div>
        </div>"#;
        let parsed = parse_page(markup);
        assert_eq!(parsed.postings.len(), 1);
        let raw = &parsed.postings[0];
        assert!(raw.location.is_none());
        assert!(raw.listing_id.is_none());
        assert!(raw.skills.is_empty());
        assert!(raw.category.is_none());
        assert!(raw.posted.is_none());
    }

    #[test]
    fn test_extract_listing_id() {
        let url = format!("https://simplify.jobs/jobs/{}/apply", LISTING_ID);
        assert_eq!(extract_listing_id(&url).as_deref(), Some(LISTING_ID));
        assert_eq!(extract_listing_id("https://simplify.jobs/jobs"), None);
    }
}
