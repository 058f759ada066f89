//! On-demand visit statistics
//!
//! Every snapshot is recomputed from the visitor table with independent counting
//! queries. Windows are anchored at the start of the current calendar day in
//! server-local time:
//! - week window starts 7 days before today
//! - month window starts one calendar month before today, clamped to the last
//!   day of the shorter month (03-31 becomes 02-28 or 02-29)
//!
//! The daily histogram covers `today - 6 ..= today` and counts visitors whose
//! last visit falls inside each day. It is computed separately from
//! `week_visits`, so `sum(daily_visits) <= week_visits` holds but the two are not
//! forced to agree.

use chrono::{DateTime, Days, Duration, Local, LocalResult, Months, NaiveDate, NaiveTime, TimeZone};
use std::sync::Arc;
use tracing::warn;

use crate::models::{DailyVisitCount, EntityKind, VisitStats, VisitorFilter};
use crate::storage::{Storage, StorageResult};

/// Number of days in the histogram, today included
pub const HISTOGRAM_DAYS: u64 = 7;

#[derive(Clone)]
pub struct StatsAggregator {
    storage: Arc<dyn Storage>,
}

impl StatsAggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Snapshot as of now in server-local time
    pub async fn stats(&self) -> StorageResult<VisitStats> {
        self.snapshot_at(Local::now()).await
    }

    /// Snapshot with windows anchored at `now` in its own time zone.
    ///
    /// Visitor-derived figures fail the whole snapshot; entity counts degrade to 0.
    pub async fn snapshot_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> StorageResult<VisitStats> {
        let tz = now.timezone();
        let today = now.date_naive();
        let week_ago = today.checked_sub_days(Days::new(7)).unwrap_or(NaiveDate::MIN);
        let month_ago = month_before(today);

        let today_start = start_of_day(&tz, today);
        let week_start = start_of_day(&tz, week_ago);
        let month_start = start_of_day(&tz, month_ago);

        let storage = &self.storage;
        let (
            total_visits,
            today_visits,
            week_visits,
            month_visits,
            new_today,
            new_week,
            new_month,
            returning_visitors,
            total_page_views,
        ) = tokio::try_join!(
            storage.count_visitors(VisitorFilter::All),
            storage.count_visitors(VisitorFilter::LastVisitSince(today_start)),
            storage.count_visitors(VisitorFilter::LastVisitSince(week_start)),
            storage.count_visitors(VisitorFilter::LastVisitSince(month_start)),
            storage.count_visitors(VisitorFilter::FirstVisitSince(today_start)),
            storage.count_visitors(VisitorFilter::FirstVisitSince(week_start)),
            storage.count_visitors(VisitorFilter::FirstVisitSince(month_start)),
            storage.count_visitors(VisitorFilter::Returning),
            storage.total_page_views(),
        )?;

        let avg_visits_per_user = if total_visits > 0 {
            total_page_views as f64 / total_visits as f64
        } else {
            0.0
        };

        let daily_visits = self.daily_histogram(&tz, today).await?;

        let (exhibition_count, exhibit_count, news_count) = tokio::join!(
            self.count_or_zero(EntityKind::Exhibition),
            self.count_or_zero(EntityKind::Exhibit),
            self.count_or_zero(EntityKind::News),
        );

        Ok(VisitStats {
            total_visits,
            today_visits,
            week_visits,
            month_visits,
            new_today,
            new_week,
            new_month,
            returning_visitors,
            total_page_views,
            avg_visits_per_user,
            exhibition_count,
            exhibit_count,
            news_count,
            daily_visits,
        })
    }

    async fn daily_histogram<Tz: TimeZone>(
        &self,
        tz: &Tz,
        today: NaiveDate,
    ) -> StorageResult<Vec<DailyVisitCount>> {
        let mut days = Vec::with_capacity(HISTOGRAM_DAYS as usize);

        for offset in (0..HISTOGRAM_DAYS).rev() {
            let Some(day) = today.checked_sub_days(Days::new(offset)) else {
                continue;
            };
            let next = day.succ_opt().unwrap_or(NaiveDate::MAX);
            let count = self
                .storage
                .count_visitors(VisitorFilter::LastVisitBetween(
                    start_of_day(tz, day),
                    start_of_day(tz, next),
                ))
                .await?;

            days.push(DailyVisitCount {
                date: day.format("%Y-%m-%d").to_string(),
                count,
            });
        }

        Ok(days)
    }

    async fn count_or_zero(&self, kind: EntityKind) -> i64 {
        match self.storage.count_active(kind).await {
            Ok(count) => count,
            Err(e) => {
                warn!(table = kind.table(), error = %e, "Failed to count entities, reporting 0");
                0
            }
        }
    }
}

/// One calendar month before `date`, clamped to the end of the shorter month
pub fn month_before(date: NaiveDate) -> NaiveDate {
    date.checked_sub_months(Months::new(1))
        .unwrap_or(NaiveDate::MIN)
}

/// Unix timestamp of local midnight starting `date` in `tz`
fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        // Midnight skipped by a DST jump: the day starts at the first valid hour
        LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|t| t.timestamp())
            .unwrap_or_else(|| midnight.and_utc().timestamp()),
    }
}
