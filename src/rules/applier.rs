// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Action application, audit capture and rollback (spec §4.H).
//!
//! Rollback restores the `stateBefore` snapshot verbatim onto the email,
//! regardless of whatever else has touched it since (an open question
//! resolved in favor of simplicity: rollback is "go back to this snapshot",
//! not a three-way merge).

use crate::error::{CoreError, CoreResult};
use crate::provider::registry::ProviderRegistry;
use crate::provider::SendMessageRequest;
use crate::rules::evaluator;
use crate::store::models::{Action, ActionType, EmailStateSnapshot, Flag, Rule};
use crate::store::{accounts, audit_store, emails, Store};
use crate::vault::CredentialVault;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    pub matched: bool,
    pub applied_actions: Vec<String>,
    pub audit_entry_id: i64,
}

fn snapshot_of(email: &crate::store::models::Email) -> EmailStateSnapshot {
    EmailStateSnapshot {
        labels: email.labels.clone(),
        flags: email.flags.clone(),
        last_modified: email.updated_at,
    }
}

fn action_label(action: &Action) -> String {
    match action.parameter.as_deref() {
        Some(param) => format!("{:?}:{param}", action.action_type),
        None => format!("{:?}", action.action_type),
    }
}

/// Apply `action` to an in-memory (labels, flags) pair, returning the result
/// without touching the store. Used for both real application and dry-run preview.
fn apply_action_in_memory(labels: &mut Vec<String>, flags: &mut BTreeSet<Flag>, action: &Action) {
    match action.action_type {
        ActionType::AddLabel | ActionType::ApplyLabel => {
            if let Some(label) = &action.parameter {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }
        ActionType::RemoveLabel => {
            if let Some(label) = &action.parameter {
                labels.retain(|l| l != label);
            }
        }
        ActionType::MarkRead => {
            flags.insert(Flag::Seen);
        }
        ActionType::MarkUnread => {
            flags.remove(&Flag::Seen);
        }
        ActionType::Archive => {
            labels.retain(|l| l != "INBOX");
        }
        ActionType::MoveToTrash => {
            flags.insert(Flag::Deleted);
        }
        ActionType::Delete => {
            flags.insert(Flag::Deleted);
        }
        ActionType::MoveFolder => {
            if let Some(folder) = &action.parameter {
                labels.retain(|l| l != "INBOX");
                if !labels.contains(folder) {
                    labels.push(folder.clone());
                }
            }
        }
        ActionType::Forward => {
            // Forwarding sends a copy via the provider adapter; it never
            // mutates this email's own labels/flags.
        }
    }
}

/// Forward `email` to the address in `action.parameter` via the account's
/// own provider adapter (spec §4.H).
async fn apply_forward(
    store: &Store,
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    account_id: i64,
    email: &crate::store::models::Email,
    action: &Action,
) -> CoreResult<()> {
    let Some(to) = action.parameter.clone() else {
        return Err(CoreError::ValidationError(vec![crate::error::ValidationIssue::error(
            "forward_requires_address",
            "action.parameter",
        )]));
    };

    let account = accounts::get_account(store, account_id).await?;
    let provider = registry.resolve(account.provider);
    let credentials = crate::provider::resolve_live_credentials(store, vault, registry, &account).await?;

    provider
        .send_message(
            &credentials,
            SendMessageRequest {
                to: vec![to],
                cc: vec![],
                bcc: vec![],
                subject: format!("Fwd: {}", email.subject),
                body_text: email.body_text.clone().unwrap_or_default(),
                body_html: email.body_html.clone(),
                in_reply_to: None,
                thread_id: None,
            },
        )
        .await?;
    Ok(())
}

/// Evaluate `rule` against `email_id` and, unless `dry_run`, apply its
/// actions in declared order. Forwarding is never simulated -- a dry-run
/// preview skips the actual send and reports `Forward` as unapplied, since
/// there's no meaningful "preview" of an email that was never sent. Always
/// records an audit entry, matched or not.
pub async fn apply_rule(
    store: &Store,
    registry: &ProviderRegistry,
    vault: &CredentialVault,
    rule: &Rule,
    email_id: i64,
    dry_run: bool,
) -> CoreResult<ApplyOutcome> {
    let email = emails::get_email(store, email_id).await?;
    let thread = emails::get_thread(store, email.account_id, &email.thread_id).await?;
    let matched = evaluator::matches(&email, &rule.conditions, thread.len() as i64);

    let state_before = snapshot_of(&email);

    if !matched {
        let entry = audit_store::record_entry(
            store,
            audit_store::NewAuditEntry {
                rule_id: rule.id,
                email_id,
                matched: false,
                applied_actions: vec![],
                dry_run,
                error: None,
                state_before: state_before.clone(),
                state_after: None,
            },
        )
        .await?;
        return Ok(ApplyOutcome {
            matched: false,
            applied_actions: vec![],
            audit_entry_id: entry.id,
        });
    }

    let mut labels = email.labels.clone();
    let mut flags = email.flags.clone();
    let mut applied_actions = Vec::new();

    for action in &rule.actions {
        if action.action_type == ActionType::Forward {
            if !dry_run {
                apply_forward(store, registry, vault, rule.account_id, &email, action).await?;
                applied_actions.push(action_label(action));
            }
            continue;
        }
        apply_action_in_memory(&mut labels, &mut flags, action);
        applied_actions.push(action_label(action));
        if action.action_type == ActionType::Delete {
            break; // validated to be last, but defensive regardless
        }
    }

    let state_after = EmailStateSnapshot {
        labels: labels.clone(),
        flags: flags.clone(),
        last_modified: chrono::Utc::now(),
    };

    if !dry_run {
        emails::set_labels(store, email_id, labels).await?;
        emails::set_flags(store, email_id, flags).await?;
    }

    let entry = audit_store::record_entry(
        store,
        audit_store::NewAuditEntry {
            rule_id: rule.id,
            email_id,
            matched: true,
            applied_actions: applied_actions.clone(),
            dry_run,
            error: None,
            state_before,
            state_after: Some(state_after),
        },
    )
    .await?;

    Ok(ApplyOutcome {
        matched: true,
        applied_actions,
        audit_entry_id: entry.id,
    })
}

#[derive(Debug, Serialize)]
pub struct RollbackPreview {
    pub email_id: i64,
    pub current_labels: Vec<String>,
    pub current_flags: BTreeSet<Flag>,
    pub restored_labels: Vec<String>,
    pub restored_flags: BTreeSet<Flag>,
    pub labels_added_back: Vec<String>,
    pub labels_removed: Vec<String>,
}

/// Diff the named audit entry's `stateBefore` against the email's current
/// state without mutating anything, so a caller can show what `rollback`
/// would change before committing to it.
pub async fn preview_rollback(store: &Store, audit_entry_id: i64) -> CoreResult<RollbackPreview> {
    let entry = audit_store::get_entry(store, audit_entry_id).await?;
    if entry.rolled_back {
        return Err(CoreError::ValidationError(vec![crate::error::ValidationIssue::error(
            "already_rolled_back",
            "auditEntryId",
        )]));
    }
    if entry.dry_run {
        return Err(CoreError::ValidationError(vec![crate::error::ValidationIssue::error(
            "dry_run_not_rollbackable",
            "auditEntryId",
        )]));
    }

    let email = emails::get_email(store, entry.email_id).await?;
    let restored_labels = entry.state_before.labels.clone();

    let labels_added_back: Vec<String> = restored_labels
        .iter()
        .filter(|l| !email.labels.contains(l))
        .cloned()
        .collect();
    let labels_removed: Vec<String> = email
        .labels
        .iter()
        .filter(|l| !restored_labels.contains(l))
        .cloned()
        .collect();

    Ok(RollbackPreview {
        email_id: email.id,
        current_labels: email.labels,
        current_flags: email.flags,
        restored_labels,
        restored_flags: entry.state_before.flags.clone(),
        labels_added_back,
        labels_removed,
    })
}

/// Restore `state_before` from the named audit entry back onto its email.
pub async fn rollback(store: &Store, audit_entry_id: i64) -> CoreResult<()> {
    let entry = audit_store::get_entry(store, audit_entry_id).await?;
    if entry.rolled_back {
        return Err(CoreError::ValidationError(vec![crate::error::ValidationIssue::error(
            "already_rolled_back",
            "auditEntryId",
        )]));
    }
    if entry.dry_run {
        return Err(CoreError::ValidationError(vec![crate::error::ValidationIssue::error(
            "dry_run_not_rollbackable",
            "auditEntryId",
        )]));
    }

    emails::set_labels(store, entry.email_id, entry.state_before.labels.clone()).await?;
    emails::set_flags(store, entry.email_id, entry.state_before.flags.clone()).await?;
    audit_store::mark_rolled_back(store, audit_entry_id).await?;

    Ok(())
}

/// Roll back every entry in `audit_entry_ids`, collecting one result per id
/// so a partial failure doesn't abandon the rest of the batch.
pub async fn rollback_batch(store: &Store, audit_entry_ids: &[i64]) -> Vec<(i64, CoreResult<()>)> {
    let mut results = Vec::with_capacity(audit_entry_ids.len());
    for id in audit_entry_ids {
        results.push((*id, rollback(store, *id).await));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GmailOAuthConfig, OutlookOAuthConfig};
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::emails::{upsert_email, IncomingEmail};
    use crate::store::models::{Address, AuthTag, Condition, ConditionField, ConditionOperator, ProviderTag, RuleTrigger};
    use crate::store::rules_store::{create_rule, NewRule};
    use std::collections::{BTreeMap, BTreeSet};

    fn fixtures() -> (ProviderRegistry, CredentialVault) {
        (
            ProviderRegistry::new(GmailOAuthConfig::default(), OutlookOAuthConfig::default()),
            CredentialVault::new("applier-test-key"),
        )
    }

    async fn seed(store: &Store) -> (i64, Rule) {
        let account = create_account(
            store,
            NewAccount {
                provider: ProviderTag::Custom,
                email: "owner@example.com".into(),
                auth: AuthTag::Imap,
                display_name: None,
                oauth: None,
                imap: None,
            },
        )
        .await
        .unwrap();

        let email = upsert_email(
            store,
            IncomingEmail {
                account_id: account.id,
                provider_message_id: "m1".into(),
                thread_id: "t1".into(),
                from: Address { address: "newsletter@example.com".into(), name: None },
                to: vec![],
                cc: vec![],
                bcc: vec![],
                subject: "Weekly Digest".into(),
                body_text: None,
                body_html: None,
                snippet: "".into(),
                date: chrono::Utc::now(),
                flags: BTreeSet::new(),
                labels: vec!["INBOX".into()],
                in_reply_to: None,
                references: vec![],
                raw_headers: BTreeMap::new(),
                size_bytes: 0,
                has_attachments: false,
                attachments: vec![],
            },
        )
        .await
        .unwrap();

        let rule = create_rule(
            store,
            NewRule {
                account_id: account.id,
                name: "Archive newsletters".into(),
                description: None,
                trigger: RuleTrigger::OnNewEmail,
                conditions: vec![Condition {
                    field: ConditionField::From,
                    operator: ConditionOperator::Contains,
                    value: serde_json::json!("newsletter"),
                }],
                actions: vec![Action {
                    action_type: ActionType::Archive,
                    parameter: None,
                }],
            },
        )
        .await
        .unwrap();

        (email.id, rule)
    }

    #[tokio::test]
    async fn apply_removes_inbox_label_and_records_audit() {
        let store = Store::open_in_memory().await.unwrap();
        let (registry, vault) = fixtures();
        let (email_id, rule) = seed(&store).await;

        let outcome = apply_rule(&store, &registry, &vault, &rule, email_id, false).await.unwrap();
        assert!(outcome.matched);

        let email = emails::get_email(&store, email_id).await.unwrap();
        assert!(!email.labels.contains(&"INBOX".to_string()));
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate_email() {
        let store = Store::open_in_memory().await.unwrap();
        let (registry, vault) = fixtures();
        let (email_id, rule) = seed(&store).await;

        apply_rule(&store, &registry, &vault, &rule, email_id, true).await.unwrap();

        let email = emails::get_email(&store, email_id).await.unwrap();
        assert!(email.labels.contains(&"INBOX".to_string()));
    }

    #[tokio::test]
    async fn rollback_restores_prior_labels() {
        let store = Store::open_in_memory().await.unwrap();
        let (registry, vault) = fixtures();
        let (email_id, rule) = seed(&store).await;

        let outcome = apply_rule(&store, &registry, &vault, &rule, email_id, false).await.unwrap();
        rollback(&store, outcome.audit_entry_id).await.unwrap();

        let email = emails::get_email(&store, email_id).await.unwrap();
        assert!(email.labels.contains(&"INBOX".to_string()));
    }

    #[tokio::test]
    async fn preview_rollback_reports_diff_without_mutating() {
        let store = Store::open_in_memory().await.unwrap();
        let (registry, vault) = fixtures();
        let (email_id, rule) = seed(&store).await;

        let outcome = apply_rule(&store, &registry, &vault, &rule, email_id, false).await.unwrap();
        let preview = preview_rollback(&store, outcome.audit_entry_id).await.unwrap();

        assert!(preview.labels_added_back.contains(&"INBOX".to_string()));
        assert!(!preview.current_labels.contains(&"INBOX".to_string()));

        let email = emails::get_email(&store, email_id).await.unwrap();
        assert!(!email.labels.contains(&"INBOX".to_string()), "preview must not mutate the email");
    }

    #[tokio::test]
    async fn rollback_twice_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let (registry, vault) = fixtures();
        let (email_id, rule) = seed(&store).await;

        let outcome = apply_rule(&store, &registry, &vault, &rule, email_id, false).await.unwrap();
        rollback(&store, outcome.audit_entry_id).await.unwrap();
        let err = rollback(&store, outcome.audit_entry_id).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }
}
