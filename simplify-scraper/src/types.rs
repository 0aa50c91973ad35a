use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Login credentials, supplied once when the pipeline authenticates.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The closed set of job categories the dashboard groups by. Free text from
/// the page maps in via [`Category::parse`]; anything unrecognized lands in
/// `Other`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    SoftwareEngineering,
    DataScience,
    HardwareEngineering,
    Design,
    Product,
    Marketing,
    Finance,
    Operations,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SoftwareEngineering => "Software Engineering",
            Category::DataScience => "Data Science",
            Category::HardwareEngineering => "Hardware Engineering",
            Category::Design => "Design",
            Category::Product => "Product",
            Category::Marketing => "Marketing",
            Category::Finance => "Finance",
            Category::Operations => "Operations",
            Category::Other => "Other",
        }
    }

    pub fn parse(text: &str) -> Category {
        let text = text.trim().to_lowercase();
        if text.contains("hardware") || text.contains("electrical") || text.contains("mechanical") {
            Category::HardwareEngineering
        } else if text.contains("data") || text.contains("machine learning") || text.contains("analytics") {
            Category::DataScience
        } else if text.contains("software") || text.contains("developer") || text.contains("engineer") {
            Category::SoftwareEngineering
        } else if text.contains("design") {
            Category::Design
        } else if text.contains("product") {
            Category::Product
        } else if text.contains("marketing") || text.contains("sales") {
            Category::Marketing
        } else if text.contains("finance") || text.contains("accounting") {
            Category::Finance
        } else if text.contains("operations") || text.contains("people") || text.contains("legal") {
            Category::Operations
        } else {
            Category::Other
        }
    }
}

/// One posting as lifted off the page, nothing cleaned up yet. The parser
/// fills in whatever the markup carries; only title and company are required
/// downstream.
#[derive(Debug, Default, Clone)]
pub struct RawPosting {
    pub listing_id: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub skills: Vec<String>,
    pub category: Option<String>,
    pub posted: Option<String>,
}

/// A canonical posting, ready for storage. `identity` is the stable
/// cross-run key; a re-scrape of the same posting derives the same value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobPosting {
    pub identity: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: Option<String>,
    pub category: Category,
    pub skills: BTreeSet<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_category_labels_round_trip() {
        for category in [
            Category::SoftwareEngineering,
            Category::DataScience,
            Category::HardwareEngineering,
            Category::Design,
            Category::Product,
            Category::Marketing,
            Category::Finance,
            Category::Operations,
        ] {
            assert_eq!(Category::parse(category.as_str()), category);
        }
    }

    #[test]
    fn test_category_free_text() {
        assert_eq!(Category::parse("Backend Software Engineering"), Category::SoftwareEngineering);
        assert_eq!(Category::parse("Data & Analytics"), Category::DataScience);
        assert_eq!(Category::parse("Hardware Engineering"), Category::HardwareEngineering);
        assert_eq!(Category::parse("Underwater Basket Weaving"), Category::Other);
    }
}
