// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Rule CRUD (spec §3 Rule, §4.H).

use crate::error::{CoreError, CoreResult};
use crate::store::models::{Action, Condition, Rule, RuleTrigger};
use crate::store::Store;
use chrono::Utc;
use sqlx::FromRow;

#[derive(FromRow)]
struct RuleRow {
    id: i64,
    account_id: i64,
    name: String,
    description: Option<String>,
    trigger: String,
    conditions_json: String,
    actions_json: String,
    is_active: i64,
    created_at: String,
    updated_at: String,
}

impl RuleRow {
    fn into_rule(self) -> CoreResult<Rule> {
        let trigger = serde_json::from_value(serde_json::Value::String(self.trigger.clone()))
            .map_err(|_| CoreError::IntegrityError(format!("unknown rule trigger: {}", self.trigger)))?;
        Ok(Rule {
            id: self.id,
            account_id: self.account_id,
            name: self.name,
            description: self.description,
            trigger,
            conditions: serde_json::from_str(&self.conditions_json)?,
            actions: serde_json::from_str(&self.actions_json)?,
            is_active: self.is_active != 0,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
            updated_at: chrono::DateTime::parse_from_rfc3339(&self.updated_at)
                .map_err(|e| CoreError::IntegrityError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

pub struct NewRule {
    pub account_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub trigger: RuleTrigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// Inserts a rule already validated by `rules::validate` -- this layer does
/// no semantic checking of its own.
pub async fn create_rule(store: &Store, new: NewRule) -> CoreResult<Rule> {
    let now = Utc::now();
    let trigger_str = crate::error::enum_to_column(new.trigger)?;

    let id = sqlx::query(
        "INSERT INTO rules (account_id, name, description, trigger, conditions_json, actions_json, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(new.account_id)
    .bind(&new.name)
    .bind(&new.description)
    .bind(&trigger_str)
    .bind(serde_json::to_string(&new.conditions)?)
    .bind(serde_json::to_string(&new.actions)?)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(store.pool())
    .await?
    .last_insert_rowid();

    get_rule(store, id).await
}

pub async fn get_rule(store: &Store, id: i64) -> CoreResult<Rule> {
    let row: RuleRow = sqlx::query_as("SELECT * FROM rules WHERE id = ?")
        .bind(id)
        .fetch_optional(store.pool())
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("rule {id}")))?;
    row.into_rule()
}

pub async fn list_rules(store: &Store, account_id: i64) -> CoreResult<Vec<Rule>> {
    let rows: Vec<RuleRow> =
        sqlx::query_as("SELECT * FROM rules WHERE account_id = ? ORDER BY created_at ASC")
            .bind(account_id)
            .fetch_all(store.pool())
            .await?;
    rows.into_iter().map(RuleRow::into_rule).collect()
}

/// Rules eligible for `OnNewEmail` dispatch, in creation order (first-match semantics
/// are left to the evaluator; store-level ordering is stable so that's reproducible).
pub async fn list_active_by_trigger(
    store: &Store,
    account_id: i64,
    trigger: RuleTrigger,
) -> CoreResult<Vec<Rule>> {
    let trigger_str = crate::error::enum_to_column(trigger)?;
    let rows: Vec<RuleRow> = sqlx::query_as(
        "SELECT * FROM rules WHERE account_id = ? AND trigger = ? AND is_active = 1 ORDER BY created_at ASC",
    )
    .bind(account_id)
    .bind(&trigger_str)
    .fetch_all(store.pool())
    .await?;
    rows.into_iter().map(RuleRow::into_rule).collect()
}

pub async fn set_active(store: &Store, id: i64, is_active: bool) -> CoreResult<()> {
    let result = sqlx::query("UPDATE rules SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(is_active as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("rule {id}")));
    }
    Ok(())
}

pub async fn delete_rule(store: &Store, id: i64) -> CoreResult<()> {
    let result = sqlx::query("DELETE FROM rules WHERE id = ?")
        .bind(id)
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("rule {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::accounts::{create_account, NewAccount};
    use crate::store::models::{ActionType, AuthTag, ConditionField, ConditionOperator, ProviderTag};

    async fn seed_account(store: &Store) -> i64 {
        create_account(
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
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn create_list_and_filter_by_trigger() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;

        create_rule(
            &store,
            NewRule {
                account_id,
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

        create_rule(
            &store,
            NewRule {
                account_id,
                name: "Manual cleanup".into(),
                description: None,
                trigger: RuleTrigger::Manual,
                conditions: vec![],
                actions: vec![Action {
                    action_type: ActionType::MarkRead,
                    parameter: None,
                }],
            },
        )
        .await
        .unwrap();

        let all = list_rules(&store, account_id).await.unwrap();
        assert_eq!(all.len(), 2);

        let on_new = list_active_by_trigger(&store, account_id, RuleTrigger::OnNewEmail)
            .await
            .unwrap();
        assert_eq!(on_new.len(), 1);
        assert_eq!(on_new[0].name, "Archive newsletters");
    }

    #[tokio::test]
    async fn deactivated_rule_is_excluded_from_trigger_dispatch() {
        let store = Store::open_in_memory().await.unwrap();
        let account_id = seed_account(&store).await;
        let rule = create_rule(
            &store,
            NewRule {
                account_id,
                name: "Rule".into(),
                description: None,
                trigger: RuleTrigger::OnNewEmail,
                conditions: vec![],
                actions: vec![],
            },
        )
        .await
        .unwrap();

        set_active(&store, rule.id, false).await.unwrap();
        let active = list_active_by_trigger(&store, account_id, RuleTrigger::OnNewEmail)
            .await
            .unwrap();
        assert!(active.is_empty());
    }
}
