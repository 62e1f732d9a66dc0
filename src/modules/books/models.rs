use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ServiceError, ServiceResult};

const MAX_TITLE_LEN: usize = 300;
const MAX_DESCRIPTION_LEN: usize = 5000;

/// Physical condition of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookCondition {
    LikeNew,
    VeryGood,
    Good,
    Fair,
    Poor,
}

impl BookCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LikeNew => "LIKE_NEW",
            Self::VeryGood => "VERY_GOOD",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIKE_NEW" => Some(Self::LikeNew),
            "VERY_GOOD" => Some(Self::VeryGood),
            "GOOD" => Some(Self::Good),
            "FAIR" => Some(Self::Fair),
            "POOR" => Some(Self::Poor),
            _ => None,
        }
    }
}

impl ToSql for BookCondition {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BookCondition {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Self::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown condition {s}").into()))
    }
}

/// A physical book listed by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    /// Ordered author list, never empty
    pub authors: Vec<String>,
    pub condition: BookCondition,
    pub description: Option<String>,
    /// Gate for offering, requesting and discovery
    pub is_available: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Request model for listing a new book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub authors: Vec<String>,
    pub condition: BookCondition,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewBook {
    /// Trim and check the draft.
    pub fn validate(self) -> ServiceResult<Self> {
        Ok(Self {
            title: validate_title(&self.title)?,
            authors: validate_authors(&self.authors)?,
            condition: self.condition,
            description: validate_description(self.description)?,
        })
    }
}

/// Partial update of a book's descriptive fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub condition: Option<BookCondition>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BookPatch {
    /// Apply onto `book`, validating every touched field.
    pub fn apply(self, book: &mut Book) -> ServiceResult<()> {
        if let Some(title) = self.title {
            book.title = validate_title(&title)?;
        }
        if let Some(authors) = self.authors {
            book.authors = validate_authors(&authors)?;
        }
        if let Some(condition) = self.condition {
            book.condition = condition;
        }
        if self.description.is_some() {
            book.description = validate_description(self.description)?;
        }
        Ok(())
    }
}

/// Body of `PUT /api/books/{id}/availability`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityUpdate {
    pub is_available: bool,
}

/// Compact view joined into swap request read models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub condition: BookCondition,
    pub owner_id: String,
}

impl From<&Book> for BookSummary {
    fn from(book: &Book) -> Self {
        Self {
            id: book.id.clone(),
            title: book.title.clone(),
            authors: book.authors.clone(),
            condition: book.condition,
            owner_id: book.owner_id.clone(),
        }
    }
}

fn validate_title(title: &str) -> ServiceResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::validation("title", "title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::validation(
            "title",
            format!("title must be at most {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(title.to_string())
}

fn validate_authors(authors: &[String]) -> ServiceResult<Vec<String>> {
    let cleaned: Vec<String> = authors
        .iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if cleaned.is_empty() {
        return Err(ServiceError::validation(
            "authors",
            "at least one author is required",
        ));
    }
    Ok(cleaned)
}

fn validate_description(description: Option<String>) -> ServiceResult<Option<String>> {
    let Some(description) = description else {
        return Ok(None);
    };
    let description = description.trim();
    if description.is_empty() {
        return Ok(None);
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ServiceError::validation(
            "description",
            format!("description must be at most {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
    Ok(Some(description.to_string()))
}
