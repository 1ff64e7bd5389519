// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rules-as-code engine (spec §4.H): condition/action types, validation,
//! evaluation and action application with audit + rollback.

pub mod applier;
pub mod evaluator;

use crate::error::{CoreError, CoreResult, ValidationIssue};
use crate::store::models::{Action, ActionType, Condition, ProviderTag};
use std::collections::HashSet;

/// Structural validation of a rule's actions before it's ever persisted.
/// Semantic condition checking (field/operator/value shape) happens in
/// `evaluator`, since it needs to run against live email data too.
pub fn validate(conditions: &[Condition], actions: &[Action]) -> CoreResult<()> {
    let mut issues = Vec::new();

    if conditions.is_empty() {
        issues.push(ValidationIssue::error("empty_conditions", "conditions"));
    }
    if actions.is_empty() {
        issues.push(ValidationIssue::error("empty_actions", "actions"));
    }

    let has_mark_read = actions.iter().any(|a| a.action_type == ActionType::MarkRead);
    let has_mark_unread = actions.iter().any(|a| a.action_type == ActionType::MarkUnread);
    if has_mark_read && has_mark_unread {
        issues.push(ValidationIssue::error("conflicting_read_state", "actions"));
    }

    if let Some(delete_index) = actions.iter().position(|a| a.action_type == ActionType::Delete) {
        if delete_index != actions.len() - 1 {
            issues.push(ValidationIssue::error("delete_must_be_last", "actions"));
        }
    }

    let mut seen_apply_labels = HashSet::new();
    for (index, action) in actions.iter().enumerate() {
        match action.action_type {
            ActionType::Forward => {
                if action.parameter.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    issues.push(ValidationIssue::error("forward_requires_address", format!("actions[{index}].parameter")));
                }
            }
            ActionType::AddLabel | ActionType::RemoveLabel | ActionType::ApplyLabel | ActionType::MoveFolder => {
                if action.parameter.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    issues.push(ValidationIssue::error("missing_parameter", format!("actions[{index}].parameter")));
                } else if action.action_type == ActionType::ApplyLabel {
                    let label = action.parameter.as_deref().unwrap().to_ascii_lowercase();
                    if !seen_apply_labels.insert(label) {
                        issues.push(ValidationIssue::error("duplicate_apply_label", format!("actions[{index}].parameter")));
                    }
                }
            }
            _ => {}
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(CoreError::ValidationError(issues))
    }
}

/// Gmail has no real folder hierarchy to move a message into -- `MoveFolder`
/// there is really `ApplyLabel` plus removing `INBOX`, which is exactly what
/// the applier's `MoveFolder` handling already does. For Gmail accounts this
/// downgrades the action type itself so `validate`'s single-ApplyLabel check
/// also covers folder moves (spec §4.H).
pub fn rewrite_for_provider(actions: Vec<Action>, provider: ProviderTag) -> Vec<Action> {
    if provider != ProviderTag::Gmail {
        return actions;
    }
    actions
        .into_iter()
        .map(|action| {
            if action.action_type == ActionType::MoveFolder {
                Action {
                    action_type: ActionType::ApplyLabel,
                    parameter: action.parameter,
                }
            } else {
                action
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{ConditionField, ConditionOperator};

    fn sample_condition() -> Condition {
        Condition {
            field: ConditionField::From,
            operator: ConditionOperator::Contains,
            value: serde_json::json!("example.com"),
        }
    }

    #[test]
    fn rejects_conflicting_read_state_actions() {
        let actions = vec![
            Action { action_type: ActionType::MarkRead, parameter: None },
            Action { action_type: ActionType::MarkUnread, parameter: None },
        ];
        let err = validate(&[sample_condition()], &actions).unwrap_err();
        match err {
            CoreError::ValidationError(issues) => {
                assert!(issues.iter().any(|i| i.code == "conflicting_read_state"));
            }
            _ => panic!("expected ValidationError"),
        }
    }

    #[test]
    fn rejects_delete_not_last() {
        let actions = vec![
            Action { action_type: ActionType::Delete, parameter: None },
            Action { action_type: ActionType::MarkRead, parameter: None },
        ];
        let err = validate(&[sample_condition()], &actions).unwrap_err();
        match err {
            CoreError::ValidationError(issues) => {
                assert!(issues.iter().any(|i| i.code == "delete_must_be_last"));
            }
            _ => panic!("expected ValidationError"),
        }
    }

    #[test]
    fn forward_without_address_is_rejected() {
        let actions = vec![Action { action_type: ActionType::Forward, parameter: None }];
        let err = validate(&[sample_condition()], &actions).unwrap_err();
        match err {
            CoreError::ValidationError(issues) => {
                assert!(issues.iter().any(|i| i.code == "forward_requires_address"));
            }
            _ => panic!("expected ValidationError"),
        }
    }

    #[test]
    fn valid_rule_passes() {
        let actions = vec![Action { action_type: ActionType::Archive, parameter: None }];
        assert!(validate(&[sample_condition()], &actions).is_ok());
    }

    #[test]
    fn rejects_duplicate_apply_label_to_same_label() {
        let actions = vec![
            Action { action_type: ActionType::ApplyLabel, parameter: Some("Receipts".into()) },
            Action { action_type: ActionType::ApplyLabel, parameter: Some("receipts".into()) },
        ];
        let err = validate(&[sample_condition()], &actions).unwrap_err();
        match err {
            CoreError::ValidationError(issues) => {
                assert!(issues.iter().any(|i| i.code == "duplicate_apply_label"));
            }
            _ => panic!("expected ValidationError"),
        }
    }

    #[test]
    fn gmail_move_folder_downgrades_to_apply_label() {
        let actions = vec![Action { action_type: ActionType::MoveFolder, parameter: Some("Archive".into()) }];
        let rewritten = rewrite_for_provider(actions, ProviderTag::Gmail);
        assert_eq!(rewritten[0].action_type, ActionType::ApplyLabel);
        assert_eq!(rewritten[0].parameter.as_deref(), Some("Archive"));
    }

    #[test]
    fn non_gmail_move_folder_is_unchanged() {
        let actions = vec![Action { action_type: ActionType::MoveFolder, parameter: Some("Archive".into()) }];
        let rewritten = rewrite_for_provider(actions, ProviderTag::Custom);
        assert_eq!(rewritten[0].action_type, ActionType::MoveFolder);
    }
}
