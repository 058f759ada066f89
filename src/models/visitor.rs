use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One network-address-identified visitor. Exactly one row exists per IP.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visitor {
    pub id: i64,
    pub ip: String,
    pub user_agent: String,
    pub page: String,
    pub referrer: String,
    pub screen_width: i32,
    pub screen_height: i32,
    pub language: String,
    pub visit_count: i64,
    /// Unix timestamp (seconds) of the first recorded visit; never modified after insert
    pub first_visit_at: i64,
    /// Unix timestamp (seconds) of the most recent visit
    pub last_visit_at: i64,
}

/// Body of `POST /museum/visit`. IP and user agent come from the request context.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitRequest {
    pub page: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub screen_width: Option<i32>,
    #[serde(default)]
    pub screen_height: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
}

/// An inbound visit to be merged into the visitor table.
///
/// Empty strings and zero screen dimensions mean "unknown": on an existing visitor
/// they leave the stored referrer/screen/language untouched.
#[derive(Debug, Clone, Default)]
pub struct NewVisit {
    pub ip: String,
    pub user_agent: String,
    pub page: String,
    pub referrer: String,
    pub screen_width: i32,
    pub screen_height: i32,
    pub language: String,
}

impl NewVisit {
    /// Apply this visit to an existing record using the merge rules of the upsert.
    pub(crate) fn merge_into(&self, visitor: &mut Visitor, at: i64) {
        visitor.visit_count += 1;
        visitor.last_visit_at = visitor.last_visit_at.max(at);
        visitor.user_agent = self.user_agent.clone();
        visitor.page = self.page.clone();
        if !self.referrer.is_empty() {
            visitor.referrer = self.referrer.clone();
        }
        if self.screen_width > 0 {
            visitor.screen_width = self.screen_width;
        }
        if self.screen_height > 0 {
            visitor.screen_height = self.screen_height;
        }
        if !self.language.is_empty() {
            visitor.language = self.language.clone();
        }
    }
}

/// Counting predicates over the visitor table. Timestamps are Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorFilter {
    All,
    LastVisitSince(i64),
    FirstVisitSince(i64),
    /// Half-open window `[start, end)` on `last_visit_at`
    LastVisitBetween(i64, i64),
    Returning,
}

impl VisitorFilter {
    pub fn matches(&self, visitor: &Visitor) -> bool {
        match *self {
            VisitorFilter::All => true,
            VisitorFilter::LastVisitSince(t) => visitor.last_visit_at >= t,
            VisitorFilter::FirstVisitSince(t) => visitor.first_visit_at >= t,
            VisitorFilter::LastVisitBetween(start, end) => {
                visitor.last_visit_at >= start && visitor.last_visit_at < end
            }
            VisitorFilter::Returning => visitor.visit_count > 1,
        }
    }
}

/// Visit count for a single calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVisitCount {
    /// `YYYY-MM-DD` in server-local time
    pub date: String,
    pub count: i64,
}

/// Point-in-time visit statistics, recomputed on every query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitStats {
    // Active visitors by period (last_visit_at)
    pub total_visits: i64,
    pub today_visits: i64,
    pub week_visits: i64,
    pub month_visits: i64,

    // New visitors by period (first_visit_at)
    pub new_today: i64,
    pub new_week: i64,
    pub new_month: i64,

    pub returning_visitors: i64,
    pub total_page_views: i64,
    pub avg_visits_per_user: f64,

    pub exhibition_count: i64,
    pub exhibit_count: i64,
    pub news_count: i64,

    /// Trailing seven days ending today, oldest first
    pub daily_visits: Vec<DailyVisitCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> Visitor {
        Visitor {
            id: 1,
            ip: "10.0.0.1".to_string(),
            user_agent: "old-agent".to_string(),
            page: "/old".to_string(),
            referrer: "https://search.example".to_string(),
            screen_width: 1280,
            screen_height: 720,
            language: "ru".to_string(),
            visit_count: 2,
            first_visit_at: 100,
            last_visit_at: 200,
        }
    }

    #[test]
    fn test_merge_keeps_known_optional_fields() {
        let mut visitor = stored();
        let visit = NewVisit {
            ip: "10.0.0.1".to_string(),
            user_agent: "new-agent".to_string(),
            page: "/new".to_string(),
            ..Default::default()
        };

        visit.merge_into(&mut visitor, 300);

        assert_eq!(visitor.visit_count, 3);
        assert_eq!(visitor.last_visit_at, 300);
        assert_eq!(visitor.first_visit_at, 100);
        assert_eq!(visitor.user_agent, "new-agent");
        assert_eq!(visitor.page, "/new");
        assert_eq!(visitor.referrer, "https://search.example");
        assert_eq!(visitor.screen_width, 1280);
        assert_eq!(visitor.screen_height, 720);
        assert_eq!(visitor.language, "ru");
    }

    #[test]
    fn test_merge_never_moves_last_visit_backwards() {
        let mut visitor = stored();
        NewVisit::default().merge_into(&mut visitor, 150);
        assert_eq!(visitor.last_visit_at, 200);
    }

    #[test]
    fn test_filter_window_is_half_open() {
        let visitor = stored();
        assert!(VisitorFilter::LastVisitBetween(200, 201).matches(&visitor));
        assert!(!VisitorFilter::LastVisitBetween(100, 200).matches(&visitor));
        assert!(VisitorFilter::Returning.matches(&visitor));
    }
}
