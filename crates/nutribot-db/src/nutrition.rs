use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use nutribot_common::{Error, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::conversation_store::{
    ConversationStore, format_timestamp, now_timestamp, parse_timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakfast => "breakfast",
            Self::Lunch => "lunch",
            Self::Dinner => "dinner",
            Self::Snack => "snack",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Some(Self::Breakfast),
            "lunch" => Some(Self::Lunch),
            "dinner" => Some(Self::Dinner),
            "snack" => Some(Self::Snack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNutritionRecord {
    pub calories: f64,
    pub proteins: f64,
    pub carbs: f64,
    pub fats: f64,
    pub meal_type: MealType,
    pub extra_details: Option<String>,
}

impl NewNutritionRecord {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("calories", self.calories),
            ("proteins", self.proteins),
            ("carbs", self.carbs),
            ("fats", self.fats),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NutritionRecord {
    pub id: i64,
    pub user_id: i64,
    pub calories: f64,
    pub proteins: f64,
    pub carbs: f64,
    pub fats: f64,
    pub meal_type: MealType,
    pub extra_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Google Sheets credentials for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadsheetConfig {
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub spreadsheet_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationStore {
    pub fn save_nutrition_record(
        &self,
        user_id: i64,
        record: &NewNutritionRecord,
    ) -> Result<NutritionRecord> {
        self.insert_nutrition_record(user_id, record, Utc::now())
    }

    fn insert_nutrition_record(
        &self,
        user_id: i64,
        record: &NewNutritionRecord,
        created_at: DateTime<Utc>,
    ) -> Result<NutritionRecord> {
        record.validate()?;
        let created = format_timestamp(created_at);
        self.conn
            .execute(
                "INSERT INTO nutrition_records (user_id, calories, proteins, carbs, fats,
                                                meal_type, extra_details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user_id,
                    record.calories,
                    record.proteins,
                    record.carbs,
                    record.fats,
                    record.meal_type.as_str(),
                    record.extra_details,
                    created,
                ],
            )
            .map_err(|e| Error::Persistence(format!("failed to save nutrition record: {e}")))?;

        Ok(NutritionRecord {
            id: self.conn.last_insert_rowid(),
            user_id,
            calories: record.calories,
            proteins: record.proteins,
            carbs: record.carbs,
            fats: record.fats,
            meal_type: record.meal_type,
            extra_details: record.extra_details.clone(),
            created_at: parse_timestamp(&created),
        })
    }

    /// Records whose creation day falls within `[start, end]` (inclusive), oldest first.
    pub fn nutrition_records_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NutritionRecord>> {
        let from = format_timestamp(start.and_time(NaiveTime::MIN).and_utc());
        let until = end
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .map(|dt| format_timestamp(dt.and_utc()))
            .ok_or_else(|| Error::Validation(format!("invalid end date {end}")))?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, calories, proteins, carbs, fats, meal_type, extra_details,
                        created_at
                 FROM nutrition_records
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| Error::Persistence(format!("failed to prepare nutrition query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id, from, until], nutrition_from_row)
            .map_err(|e| Error::Persistence(format!("failed to load nutrition records: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::Persistence(format!("failed to read nutrition row: {e}")))?,
            );
        }
        Ok(records)
    }

    pub fn spreadsheet_config(&self, user_id: i64) -> Result<Option<SpreadsheetConfig>> {
        self.conn
            .query_row(
                "SELECT user_id, access_token, refresh_token, spreadsheet_id, updated_at
                 FROM spreadsheet_configs WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let updated: String = row.get(4)?;
                    Ok(SpreadsheetConfig {
                        user_id: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        spreadsheet_id: row.get(3)?,
                        updated_at: parse_timestamp(&updated),
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to load spreadsheet config: {e}")))
    }

    /// Insert or replace the tokens for a user. An existing spreadsheet id is kept
    /// unless a new one is given.
    pub fn save_spreadsheet_config(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
        spreadsheet_id: Option<&str>,
    ) -> Result<SpreadsheetConfig> {
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO spreadsheet_configs
                     (user_id, access_token, refresh_token, spreadsheet_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                   access_token = excluded.access_token,
                   refresh_token = excluded.refresh_token,
                   spreadsheet_id = COALESCE(excluded.spreadsheet_id, spreadsheet_configs.spreadsheet_id),
                   updated_at = excluded.updated_at",
                params![user_id, access_token, refresh_token, spreadsheet_id, now],
            )
            .map_err(|e| Error::Persistence(format!("failed to save spreadsheet config: {e}")))?;

        self.spreadsheet_config(user_id)?.ok_or_else(|| {
            Error::Persistence(format!("spreadsheet config for user {user_id} vanished"))
        })
    }

    pub fn update_spreadsheet_access_token(&self, user_id: i64, access_token: &str) -> Result<()> {
        self.update_spreadsheet_column(user_id, "access_token", Some(access_token))
    }

    pub fn set_spreadsheet_id(&self, user_id: i64, spreadsheet_id: Option<&str>) -> Result<()> {
        self.update_spreadsheet_column(user_id, "spreadsheet_id", spreadsheet_id)
    }

    fn update_spreadsheet_column(
        &self,
        user_id: i64,
        column: &'static str,
        value: Option<&str>,
    ) -> Result<()> {
        let updated = self
            .conn
            .execute(
                &format!(
                    "UPDATE spreadsheet_configs SET {column} = ?1, updated_at = ?2 WHERE user_id = ?3"
                ),
                params![value, now_timestamp(), user_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to update {column}: {e}")))?;
        if updated == 0 {
            return Err(Error::Persistence(format!(
                "no spreadsheet config for user {user_id}"
            )));
        }
        Ok(())
    }
}

fn nutrition_from_row(row: &Row<'_>) -> rusqlite::Result<NutritionRecord> {
    let meal_type: String = row.get(6)?;
    let created: String = row.get(8)?;
    Ok(NutritionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        calories: row.get(2)?,
        proteins: row.get(3)?,
        carbs: row.get(4)?,
        fats: row.get(5)?,
        meal_type: MealType::parse(&meal_type).unwrap_or(MealType::Snack),
        extra_details: row.get(7)?,
        created_at: parse_timestamp(&created),
    })
}
