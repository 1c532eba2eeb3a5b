//! Batch repartitioning
//!
//! Plans one monthly partition per month going back from a target date and
//! creates the missing ones in a single batch.

use crate::clock::{Clock, SystemClock};
use crate::lifecycle::{CreateOutcome, PartitionManager, PartitionSpec};
use crate::partitioning::{generate_partition_key, source_query_for_date, Granularity, QueryTemplates};
use crate::{Error, Result};
use chrono::{DateTime, Months, NaiveDate};
use std::sync::Arc;
use tracing::info;

/// Months planned when the caller gives no count: fifteen years
pub const DEFAULT_PARTITION_COUNT: u32 = 180;

/// Summary of a repartition run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepartitionReport {
    pub table: String,
    pub target_date: NaiveDate,
    pub count: u32,
    pub outcome: CreateOutcome,
}

#[derive(Clone)]
pub struct RepartitionPlanner {
    manager: PartitionManager,
    templates: Arc<QueryTemplates>,
    clock: Arc<dyn Clock>,
}

impl RepartitionPlanner {
    pub fn new(manager: PartitionManager, templates: Arc<QueryTemplates>) -> Self {
        Self {
            manager,
            templates,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Same planner creating partitions in `database`.
    pub fn for_database(&self, database: &str) -> Self {
        let mut planner = self.clone();
        planner.manager = self.manager.for_database(database);
        planner
    }

    /// `count` monthly partition specs for `table`, newest first, starting at
    /// the month containing `target`.
    pub fn plan_monthly(
        &self,
        table: &str,
        target: NaiveDate,
        count: u32,
    ) -> Result<Vec<PartitionSpec>> {
        let mut specs = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let date = target
                .checked_sub_months(Months::new(offset))
                .ok_or_else(|| {
                    Error::Internal(format!("{} minus {} months is out of range", target, offset))
                })?;
            specs.push(PartitionSpec {
                table_name: table.to_string(),
                partition_name: generate_partition_key(Some(date), Granularity::Monthly),
                source_query: source_query_for_date(
                    &self.templates,
                    table,
                    Some(date),
                    Granularity::Monthly,
                )?,
            });
        }
        Ok(specs)
    }

    /// Create the missing monthly partitions of `table`.
    ///
    /// `target` defaults to today and `count` to [`DEFAULT_PARTITION_COUNT`].
    pub async fn repartition_monthly(
        &self,
        table: &str,
        target: Option<NaiveDate>,
        count: Option<u32>,
    ) -> Result<RepartitionReport> {
        let target_date = target.unwrap_or_else(|| self.clock.today());
        let count = count.unwrap_or(DEFAULT_PARTITION_COUNT);

        let specs = self.plan_monthly(table, target_date, count)?;
        let outcome = if specs.is_empty() {
            CreateOutcome::default()
        } else {
            self.manager.create_partitions(table, &specs).await?
        };

        info!(
            database = %self.manager.database(),
            table,
            %target_date,
            count,
            created = outcome.created.len(),
            "Repartitioned table by month"
        );
        Ok(RepartitionReport {
            table: table.to_string(),
            target_date,
            count,
            outcome,
        })
    }
}

/// Lenient date parsing for repartition requests. Unparsable input gives `None`.
pub fn parse_target_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        let year = value[..4].parse().ok()?;
        let month = value[4..6].parse().ok()?;
        let day = value[6..].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    ["%Y-%m-%d", "%m-%d-%Y", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Lenient count parsing. Negative counts plan nothing; unparsable input gives `None`.
pub fn parse_count(value: &str) -> Option<u32> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .map(|count| count.clamp(0, u32::MAX as i64) as u32)
}
