use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use simplify_scraper::driver::{PostingWriter, UpsertOutcome, WriteError};
use simplify_scraper::normalize::split_skills;
use simplify_scraper::types::{Category, JobPosting};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: '{0}'")]
    Database(#[from] rusqlite::Error),
    #[error("stored timestamp is not RFC 3339: '{0}'")]
    Timestamp(String),
}

/// Open (or create) the postings database. `:memory:` yields a throwaway
/// in-memory database, which is what the tests run against.
pub fn connect(database_path: &str) -> Result<Connection> {
    let conn = Connection::open(database_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS postings (
            identity   TEXT PRIMARY KEY,
            title      TEXT NOT NULL,
            company    TEXT NOT NULL,
            location   TEXT NOT NULL DEFAULT '',
            url        TEXT,
            category   TEXT NOT NULL,
            skills     TEXT NOT NULL DEFAULT '',
            posted_at  TEXT,
            scraped_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_postings_category ON postings(category);
        ",
    )?;
    Ok(())
}

/// Writer over a single exclusively-owned connection. Duplicate avoidance
/// across runs comes from the identity primary key; within a run the
/// pipeline is the only writer, so read-then-write is safe.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

fn same_content(a: &JobPosting, b: &JobPosting) -> bool {
    a.title == b.title
        && a.company == b.company
        && a.location == b.location
        && a.url == b.url
        && a.category == b.category
        && a.skills == b.skills
        && a.posted_at == b.posted_at
}

#[async_trait]
impl PostingWriter for SqliteStore {
    async fn upsert(
        &mut self,
        posting: &JobPosting,
    ) -> std::result::Result<UpsertOutcome, WriteError> {
        let existing = fetch_posting(&self.conn, &posting.identity)
            .map_err(|e| WriteError(e.to_string()))?;
        let outcome = match &existing {
            None => UpsertOutcome::Inserted,
            // Same content again: leave the row alone entirely.
            Some(row) if same_content(row, posting) => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
        };
        self.conn
            .execute(
                "INSERT INTO postings
                     (identity, title, company, location, url, category, skills, posted_at, scraped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(identity) DO UPDATE SET
                     title = excluded.title,
                     company = excluded.company,
                     location = excluded.location,
                     url = excluded.url,
                     category = excluded.category,
                     skills = excluded.skills,
                     posted_at = excluded.posted_at,
                     scraped_at = excluded.scraped_at",
                params![
                    posting.identity,
                    posting.title,
                    posting.company,
                    posting.location,
                    posting.url,
                    posting.category.as_str(),
                    join_skills(posting),
                    posting.posted_at.map(|t| t.to_rfc3339()),
                    posting.scraped_at.to_rfc3339(),
                ],
            )
            .map_err(|e| WriteError(e.to_string()))?;
        log::debug!("{:?} posting '{}'", outcome, posting.identity);
        Ok(outcome)
    }
}

/// Skills are stored as one pipe-delimited string; the set is sorted, so the
/// stored form is deterministic and splits back into the same set.
fn join_skills(posting: &JobPosting) -> String {
    posting.skills.iter().cloned().collect::<Vec<_>>().join("|")
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::Timestamp(text.to_owned()))
}

/// Read one posting back in canonical form. Skills round-trip through the
/// normalizer's splitter, categories through the closed-set parser.
pub fn fetch_posting(conn: &Connection, identity: &str) -> Result<Option<JobPosting>> {
    let row = conn
        .query_row(
            "SELECT identity, title, company, location, url, category, skills, posted_at, scraped_at
             FROM postings WHERE identity = ?1",
            params![identity],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((identity, title, company, location, url, category, skills, posted_at, scraped_at)) => {
            Ok(Some(JobPosting {
                identity,
                title,
                company,
                location,
                url,
                category: Category::parse(&category),
                skills: split_skills(std::iter::once(skills.as_str())),
                posted_at: posted_at.as_deref().map(parse_timestamp).transpose()?,
                scraped_at: parse_timestamp(&scraped_at)?,
            }))
        }
    }
}

/// One cell of the dashboard aggregation: how many stored postings in
/// `category` ask for `skill`.
#[derive(Debug, PartialEq, Eq)]
pub struct SkillCount {
    pub category: String,
    pub skill: String,
    pub count: u32,
}

/// The dashboard's read interface: explode each row's skill set and count
/// postings per (category, skill) pair.
pub fn category_skill_counts(conn: &Connection) -> Result<Vec<SkillCount>> {
    let mut stmt = conn.prepare("SELECT category, skills FROM postings")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts: BTreeMap<(String, String), u32> = BTreeMap::new();
    for (category, skills) in rows {
        for skill in split_skills(std::iter::once(skills.as_str())) {
            *counts.entry((category.clone(), skill)).or_insert(0) += 1;
        }
    }
    Ok(counts
        .into_iter()
        .map(|((category, skill), count)| SkillCount {
            category,
            skill,
            count,
        })
        .collect())
}

pub struct StorageStats {
    pub postings: u32,
    pub by_category: Vec<(String, u32)>,
}

pub fn storage_stats(conn: &Connection) -> Result<StorageStats> {
    let postings = conn.query_row("SELECT COUNT(*) FROM postings", [], |row| row.get(0))?;
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) FROM postings GROUP BY category ORDER BY COUNT(*) DESC, category",
    )?;
    let by_category = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(StorageStats {
        postings,
        by_category,
    })
}
