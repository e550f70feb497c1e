//! Merge direction: which post of a confirmed pair stays canonical.
//!
//! The tie-break chain, first strict winner becomes the target:
//!
//! 1. more votes
//! 2. more comments
//! 3. earlier `created_at`
//! 4. lexicographically smaller id
//!
//! The last step only exists so that the result never depends on argument
//! order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::{MergeCandidate, MergeDirection, Post};

/// The fields the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct Standing<'a> {
    pub id: &'a str,
    pub vote_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a Post> for Standing<'a> {
    fn from(p: &'a Post) -> Self {
        Self {
            id: &p.id,
            vote_count: p.vote_count,
            comment_count: p.comment_count,
            created_at: p.created_at,
        }
    }
}

impl<'a> From<&'a MergeCandidate> for Standing<'a> {
    fn from(c: &'a MergeCandidate) -> Self {
        Self {
            id: &c.post_id,
            vote_count: c.vote_count,
            comment_count: c.comment_count,
            created_at: c.created_at,
        }
    }
}

/// `Greater` when `a` is the more established post.
fn establishment(a: &Standing<'_>, b: &Standing<'_>) -> Ordering {
    a.vote_count
        .cmp(&b.vote_count)
        .then(a.comment_count.cmp(&b.comment_count))
        .then(b.created_at.cmp(&a.created_at))
        .then(b.id.cmp(a.id))
}

/// Decide which of two duplicate posts is merged into the other.
pub fn resolve_direction(a: Standing<'_>, b: Standing<'_>) -> MergeDirection {
    let (target, source) = match establishment(&a, &b) {
        Ordering::Less => (b, a),
        _ => (a, b),
    };
    MergeDirection {
        source_post_id: source.id.to_string(),
        target_post_id: target.id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    type Row = (String, i64, i64, DateTime<Utc>);

    fn standing(id: &str, votes: i64, comments: i64, age_days: i64) -> Row {
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        (id.to_string(), votes, comments, base - Duration::days(age_days))
    }

    fn as_standing(row: &Row) -> Standing<'_> {
        Standing {
            id: &row.0,
            vote_count: row.1,
            comment_count: row.2,
            created_at: row.3,
        }
    }

    fn resolve(a: &Row, b: &Row) -> MergeDirection {
        resolve_direction(as_standing(a), as_standing(b))
    }

    #[test]
    fn more_votes_wins() {
        let a = standing("A", 10, 0, 0);
        let b = standing("B", 3, 50, 100);
        let d = resolve(&a, &b);
        assert_eq!(d.source_post_id, "B");
        assert_eq!(d.target_post_id, "A");
    }

    #[test]
    fn comments_break_vote_tie() {
        let a = standing("A", 5, 1, 100);
        let b = standing("B", 5, 2, 0);
        assert_eq!(resolve(&a, &b).target_post_id, "B");
    }

    #[test]
    fn older_post_breaks_full_tie() {
        let a = standing("A", 5, 2, 1);
        let b = standing("B", 5, 2, 9);
        let d = resolve(&a, &b);
        assert_eq!(d.target_post_id, "B");
        assert_eq!(d.source_post_id, "A");
    }

    #[test]
    fn identical_standing_falls_back_to_id() {
        let a = standing("A", 1, 1, 1);
        let b = standing("B", 1, 1, 1);
        assert_eq!(resolve(&a, &b).target_post_id, "A");
        assert_eq!(resolve(&b, &a).target_post_id, "A");
    }

    #[test]
    fn resolution_is_symmetric() {
        let cases = [
            (standing("A", 10, 0, 0), standing("B", 3, 0, 0)),
            (standing("A", 2, 7, 0), standing("B", 2, 3, 5)),
            (standing("A", 2, 3, 0), standing("B", 2, 3, 5)),
            (standing("A", 0, 0, 3), standing("B", 0, 0, 3)),
        ];
        for (a, b) in &cases {
            assert_eq!(resolve(a, b), resolve(b, a));
        }
    }
}
