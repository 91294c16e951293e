//! Saved watch configuration: sources, keywords and search filters.
//!
//! Lists are replaced wholesale on every save (delete then reinsert inside one
//! transaction), so a reader never observes a half-written list. Filters are a
//! singleton row created with defaults on first read.

use rusqlite::{OptionalExtension, params};
use tracing::{info, instrument};

use crate::db::Database;
use crate::error::DbError;
use crate::models::{Filters, TimeUnit};

/// Trimmed, non-blank entries in input order.
pub fn clean_entries(entries: &[String]) -> Vec<String> {
    indexed_entries(entries).into_iter().map(|(_, e)| e).collect()
}

/// Like [`clean_entries`], each entry paired with its index in `entries`.
pub fn indexed_entries(entries: &[String]) -> Vec<(usize, String)> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i, e.trim()))
        .filter(|(_, e)| !e.is_empty())
        .map(|(i, e)| (i, e.to_string()))
        .collect()
}

#[derive(Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn sources(&self) -> Result<Vec<String>, DbError> {
        self.list("sources", "url").await
    }

    /// Replace all sources; blank entries are dropped. Returns the saved count.
    #[instrument(level = "info", skip_all, fields(count = sources.len()))]
    pub async fn replace_sources(&self, sources: &[String]) -> Result<usize, DbError> {
        self.replace("sources", "url", clean_entries(sources)).await
    }

    pub async fn keywords(&self) -> Result<Vec<String>, DbError> {
        self.list("keywords", "value").await
    }

    /// Replace all keywords; blank entries are dropped. Returns the saved count.
    #[instrument(level = "info", skip_all, fields(count = keywords.len()))]
    pub async fn replace_keywords(&self, keywords: &[String]) -> Result<usize, DbError> {
        self.replace("keywords", "value", clean_entries(keywords)).await
    }

    /// Current filters, inserting the default row if none exists yet.
    pub async fn filters(&self) -> Result<Filters, DbError> {
        self.db
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT exclude_ads, exclude_professional, target_press, time_unit,
                                time_value, exclude_jobs, exclude_training
                         FROM filters WHERE id = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, bool>(0)?,
                                row.get::<_, bool>(1)?,
                                row.get::<_, bool>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, u32>(4)?,
                                row.get::<_, bool>(5)?,
                                row.get::<_, bool>(6)?,
                            ))
                        },
                    )
                    .optional()?;

                match row {
                    Some((ads, pro, press, unit, value, jobs, training)) => Ok(Filters {
                        exclude_ads: ads,
                        exclude_professional: pro,
                        target_press: press,
                        time_unit: unit.parse::<TimeUnit>()?,
                        time_value: value,
                        exclude_jobs: jobs,
                        exclude_training: training,
                    }),
                    None => {
                        let defaults = Filters::default();
                        write_filters(conn, &defaults)?;
                        info!("Default filters created");
                        Ok(defaults)
                    }
                }
            })
            .await
    }

    #[instrument(level = "info", skip_all, fields(unit = %filters.time_unit, value = filters.time_value))]
    pub async fn replace_filters(&self, filters: &Filters) -> Result<(), DbError> {
        let filters = filters.clone();
        self.db.call(move |conn| write_filters(conn, &filters)).await
    }

    async fn list(&self, table: &'static str, column: &'static str) -> Result<Vec<String>, DbError> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("SELECT {column} FROM {table} ORDER BY id"))?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<Vec<String>, _>>()?)
            })
            .await
    }

    async fn replace(
        &self,
        table: &'static str,
        column: &'static str,
        entries: Vec<String>,
    ) -> Result<usize, DbError> {
        let count = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(&format!("DELETE FROM {table}"), [])?;
                {
                    let mut stmt = tx.prepare(&format!("INSERT INTO {table} ({column}) VALUES (?1)"))?;
                    for entry in &entries {
                        stmt.execute(params![entry])?;
                    }
                }
                tx.commit()?;
                Ok(entries.len())
            })
            .await?;
        info!(table, count, "Catalog list replaced");
        Ok(count)
    }
}

fn write_filters(conn: &rusqlite::Connection, f: &Filters) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR REPLACE INTO filters
            (id, exclude_ads, exclude_professional, target_press, time_unit,
             time_value, exclude_jobs, exclude_training)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            f.exclude_ads,
            f.exclude_professional,
            f.target_press,
            f.time_unit.as_str(),
            f.time_value,
            f.exclude_jobs,
            f.exclude_training
        ],
    )?;
    Ok(())
}
