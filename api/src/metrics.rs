//! Score and completion aggregation over already-scoped enrollment rows.
//!
//! These functions never fail: absence of data is `None` (average) or `0`
//! (rate/count), not an error. Callers are responsible for tenant scoping
//! before anything reaches this module.

use entity::enrollments;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Traffic-light classification of a course's average score.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Health {
    Green,
    Yellow,
    Red,
}

/// No data reads as YELLOW: a course without scores is unproven, not failing.
pub fn health_from_score(score: Option<f64>) -> Health {
    match score {
        None => Health::Yellow,
        Some(value) if value >= 75.0 => Health::Green,
        Some(value) if value >= 50.0 => Health::Yellow,
        Some(_) => Health::Red,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CourseMetrics {
    pub enrolled_count: u64,
    /// Mean of non-null overall scores; `None` when no enrollment has one.
    pub average_score: Option<f64>,
    /// Completed over all enrollments; `0.0` when there are none.
    pub completion_rate: f64,
    pub health: Health,
}

impl CourseMetrics {
    pub fn empty() -> Self {
        Self {
            enrolled_count: 0,
            average_score: None,
            completion_rate: 0.0,
            health: Health::Yellow,
        }
    }
}

pub fn course_metrics(rows: &[enrollments::Model]) -> CourseMetrics {
    if rows.is_empty() {
        return CourseMetrics::empty();
    }
    let scores: Vec<f64> = rows.iter().filter_map(|row| row.score).collect();
    let average_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };
    let completed = rows
        .iter()
        .filter(|row| row.status == enrollments::Status::Completed)
        .count();
    CourseMetrics {
        enrolled_count: rows.len() as u64,
        average_score,
        completion_rate: completed as f64 / rows.len() as f64,
        health: health_from_score(average_score),
    }
}

/// Organization-level average: the mean of per-course averages. Courses
/// without a score (including zero-enrollment courses) do not contribute.
pub fn org_average_score<I>(course_averages: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = course_averages.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    }
}

/// Request-scoped memoization of per-course metrics.
///
/// Injected fresh into every GraphQL request so a dashboard fanning out over
/// the same course twice computes it once. Must never outlive a request;
/// metrics are always derived from current enrollment rows.
#[derive(Debug, Default)]
pub struct MetricsCache {
    inner: Mutex<HashMap<Uuid, CourseMetrics>>,
}

impl MetricsCache {
    pub fn get(&self, course_id: Uuid) -> Option<CourseMetrics> {
        self.inner
            .lock()
            .ok()
            .and_then(|cache| cache.get(&course_id).copied())
    }

    pub fn insert(&self, course_id: Uuid, metrics: CourseMetrics) {
        if let Ok(mut cache) = self.inner.lock() {
            cache.insert(course_id, metrics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::prelude::DateTimeWithTimeZone;

    fn enrollment(score: Option<f64>, status: enrollments::Status) -> enrollments::Model {
        let now: DateTimeWithTimeZone = Utc::now().into();
        enrollments::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            status,
            progress: 0.0,
            score,
            topic_scores: serde_json::json!([]),
            started_at: None,
            completed_at: None,
            last_accessed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn zero_enrollments_is_no_data_not_zero() {
        let metrics = course_metrics(&[]);
        assert_eq!(metrics.enrolled_count, 0);
        assert_eq!(metrics.average_score, None);
        assert_eq!(metrics.completion_rate, 0.0);
        assert_eq!(metrics.health, Health::Yellow);
    }

    #[test]
    fn null_scores_are_excluded_from_the_mean() {
        let rows = vec![
            enrollment(Some(80.0), enrollments::Status::Completed),
            enrollment(None, enrollments::Status::InProgress),
        ];
        let metrics = course_metrics(&rows);
        assert_eq!(metrics.average_score, Some(80.0));
        assert_eq!(metrics.completion_rate, 0.5);
        assert_eq!(metrics.enrolled_count, 2);
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(health_from_score(None), Health::Yellow);
        assert_eq!(health_from_score(Some(74.0)), Health::Yellow);
        assert_eq!(health_from_score(Some(75.0)), Health::Green);
        assert_eq!(health_from_score(Some(50.0)), Health::Yellow);
        assert_eq!(health_from_score(Some(49.0)), Health::Red);
    }

    #[test]
    fn org_average_skips_courses_without_scores() {
        assert_eq!(org_average_score([None, None]), None);
        assert_eq!(org_average_score([Some(60.0), None, Some(80.0)]), Some(70.0));
        assert_eq!(org_average_score([]), None);
    }

    #[test]
    fn cache_memoizes_per_course() {
        let cache = MetricsCache::default();
        let course = Uuid::new_v4();
        assert!(cache.get(course).is_none());
        cache.insert(course, CourseMetrics::empty());
        assert_eq!(cache.get(course), Some(CourseMetrics::empty()));
    }
}
