// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Condition evaluation against a live `Email` (spec §4.H).
//!
//! Conditions within a rule are AND-only -- there's no OR/grouping in the
//! model, so a rule matches only when every condition matches. String
//! comparisons (`Contains`/`Equals`/etc.) are case-insensitive throughout;
//! only `Label` equality additionally ignores case by design decision (an
//! open question resolved in favor of matching how most providers already
//! normalize label names).

use crate::store::models::{Condition, ConditionField, ConditionOperator, Email};
use chrono::Utc;

/// `thread_size` is the number of emails sharing `email.thread_id`, counted
/// by the caller (the evaluator has no store access of its own).
pub fn matches(email: &Email, conditions: &[Condition], thread_size: i64) -> bool {
    conditions.iter().all(|condition| matches_one(email, condition, thread_size))
}

fn matches_one(email: &Email, condition: &Condition, thread_size: i64) -> bool {
    match condition.field {
        ConditionField::From => compare_str(&email.from.address, condition),
        ConditionField::To => email.to.iter().any(|a| compare_str(&a.address, condition)),
        ConditionField::Cc => email.cc.iter().any(|a| compare_str(&a.address, condition)),
        ConditionField::Subject => compare_str(&email.subject, condition),
        ConditionField::Body => compare_str(email.body_text.as_deref().unwrap_or(""), condition),
        ConditionField::Label => email.labels.iter().any(|l| compare_str(l, condition)),
        ConditionField::HasAttachment => compare_bool(email.has_attachments, condition),
        ConditionField::ThreadSize => compare_count(thread_size, condition),
        ConditionField::Date => compare_date(email.date, condition),
        ConditionField::AgeDays => compare_age_days(email.date, condition),
    }
}

fn compare_str(value: &str, condition: &Condition) -> bool {
    let Some(target) = condition.value.as_str() else { return false };
    let value = value.to_ascii_lowercase();
    let target = target.to_ascii_lowercase();

    match condition.operator {
        ConditionOperator::Equals => value == target,
        ConditionOperator::NotEquals => value != target,
        ConditionOperator::Contains => value.contains(&target),
        ConditionOperator::NotContains => !value.contains(&target),
        ConditionOperator::MatchesRegex => regex::Regex::new(&target).map(|re| re.is_match(&value)).unwrap_or(false),
        ConditionOperator::In => condition
            .value
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).any(|s| s.eq_ignore_ascii_case(&value)))
            .unwrap_or(false),
        ConditionOperator::NotIn => !condition
            .value
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).any(|s| s.eq_ignore_ascii_case(&value)))
            .unwrap_or(false),
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => false,
    }
}

fn compare_bool(value: bool, condition: &Condition) -> bool {
    let target = condition.value.as_bool().unwrap_or(false);
    match condition.operator {
        ConditionOperator::Equals => value == target,
        ConditionOperator::NotEquals => value != target,
        _ => false,
    }
}

fn compare_date(value: chrono::DateTime<Utc>, condition: &Condition) -> bool {
    let Some(target) = condition.value.as_str().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) else {
        return false;
    };
    let target = target.with_timezone(&Utc);
    match condition.operator {
        ConditionOperator::GreaterThan => value > target,
        ConditionOperator::LessThan => value < target,
        ConditionOperator::Equals => value == target,
        ConditionOperator::NotEquals => value != target,
        _ => false,
    }
}

fn compare_count(value: i64, condition: &Condition) -> bool {
    let Some(target) = condition.value.as_i64() else { return false };
    match condition.operator {
        ConditionOperator::GreaterThan => value > target,
        ConditionOperator::LessThan => value < target,
        ConditionOperator::Equals => value == target,
        ConditionOperator::NotEquals => value != target,
        _ => false,
    }
}

fn compare_age_days(date: chrono::DateTime<Utc>, condition: &Condition) -> bool {
    let Some(target_days) = condition.value.as_i64() else { return false };
    let age_days = (Utc::now() - date).num_days();
    match condition.operator {
        ConditionOperator::GreaterThan => age_days > target_days,
        ConditionOperator::LessThan => age_days < target_days,
        ConditionOperator::Equals => age_days == target_days,
        ConditionOperator::NotEquals => age_days != target_days,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Address;
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_email() -> Email {
        Email {
            id: 1,
            account_id: 1,
            provider_message_id: "m".into(),
            thread_id: "t".into(),
            from: Address { address: "Newsletter@Example.com".into(), name: None },
            to: vec![],
            cc: vec![],
            bcc: vec![],
            subject: "Weekly Digest".into(),
            body_text: Some("top stories this week".into()),
            body_html: None,
            snippet: "".into(),
            date: Utc::now(),
            received_at: Utc::now(),
            flags: BTreeSet::new(),
            labels: vec!["Newsletters".into()],
            in_reply_to: None,
            references: vec![],
            raw_headers: BTreeMap::new(),
            size_bytes: 0,
            has_attachments: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn from_contains_is_case_insensitive() {
        let condition = Condition {
            field: ConditionField::From,
            operator: ConditionOperator::Contains,
            value: serde_json::json!("newsletter"),
        };
        assert!(matches(&sample_email(), &[condition], 1));
    }

    #[test]
    fn all_conditions_must_match() {
        let from_match = Condition {
            field: ConditionField::From,
            operator: ConditionOperator::Contains,
            value: serde_json::json!("newsletter"),
        };
        let subject_mismatch = Condition {
            field: ConditionField::Subject,
            operator: ConditionOperator::Contains,
            value: serde_json::json!("invoice"),
        };
        assert!(!matches(&sample_email(), &[from_match, subject_mismatch], 1));
    }

    #[test]
    fn label_match_ignores_case() {
        let condition = Condition {
            field: ConditionField::Label,
            operator: ConditionOperator::Equals,
            value: serde_json::json!("newsletters"),
        };
        assert!(matches(&sample_email(), &[condition], 1));
    }

    #[test]
    fn thread_size_compares_against_caller_supplied_count() {
        let condition = Condition {
            field: ConditionField::ThreadSize,
            operator: ConditionOperator::GreaterThan,
            value: serde_json::json!(3),
        };
        assert!(matches(&sample_email(), &[condition.clone()], 4));
        assert!(!matches(&sample_email(), &[condition], 2));
    }
}
