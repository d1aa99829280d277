use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use ulid::Ulid;

/// Keys a caller may never set through a partial update.
pub const PROTECTED_PATCH_KEYS: &[&str] =
    &["id", "_id", "user_id", "owner", "created_time", "updated_time"];

pub const MAX_ACTIVITY_DAYS: u16 = 366;
pub const DEFAULT_ACTIVITY_DAYS: u16 = 365;

const CSV_HEADER: &str =
    "id,lcnumber,title,tags,difficulty,solution,notes,completed,created_time,updated_time";

/// Failure taxonomy shared by every layer above the store.
///
/// `Forbidden` deliberately covers both "no such record" and "record owned by
/// another identity" so neither is observable from outside.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DiaryError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiaryError {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AccountId(pub Ulid);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = ulid::DecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProblemId(pub Ulid);

impl ProblemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a caller-supplied record identifier.
    ///
    /// # Errors
    /// Returns `DiaryError::BadRequest` when `raw` is not a valid ULID.
    pub fn parse(raw: &str) -> Result<Self, DiaryError> {
        Ulid::from_string(raw.trim())
            .map(Self)
            .map_err(|_| DiaryError::BadRequest("invalid id format".to_string()))
    }
}

impl Default for ProblemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProblemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity recorded on a problem. Guest is its own variant rather than
/// a reserved account id, so it can never collide with a real account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Owner {
    Account(AccountId),
    Guest,
}

impl Owner {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Guest => "guest",
        }
    }

    #[must_use]
    pub fn account_id(self) -> Option<AccountId> {
        match self {
            Self::Account(id) => Some(id),
            Self::Guest => None,
        }
    }

    /// Rebuild an owner from its persisted `(kind, id)` pair.
    #[must_use]
    pub fn from_parts(kind: &str, id: Option<&str>) -> Option<Self> {
        match (kind, id) {
            ("guest", None) => Some(Self::Guest),
            ("account", Some(raw)) => raw.parse().ok().map(Self::Account),
            _ => None,
        }
    }
}

impl Display for Owner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Account(id) => write!(f, "account:{id}"),
            Self::Guest => write!(f, "guest"),
        }
    }
}

/// Who is making the current request, as resolved from its credentials.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Caller {
    Authenticated(AccountId),
    Anonymous,
}

impl Caller {
    /// Owner value used for every record query and mutation by this caller.
    #[must_use]
    pub fn owner(self) -> Owner {
        match self {
            Self::Authenticated(id) => Owner::Account(id),
            Self::Anonymous => Owner::Guest,
        }
    }

    #[must_use]
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub password_hash: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Problem {
    pub id: ProblemId,
    pub owner: Owner,
    pub lcnumber: String,
    pub title: String,
    pub tags: Vec<String>,
    pub difficulty: String,
    pub solution: String,
    pub notes: String,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_time: OffsetDateTime,
}

impl Problem {
    /// Build a fresh record. The owner always comes from the resolved caller,
    /// never from the request body.
    #[must_use]
    pub fn create(owner: Owner, input: NewProblem, now: OffsetDateTime) -> Self {
        Self {
            id: ProblemId::new(),
            owner,
            lcnumber: input.lcnumber,
            title: input.title,
            tags: input.tags,
            difficulty: input.difficulty,
            solution: input.solution,
            notes: input.notes,
            completed: input.completed,
            created_time: now,
            updated_time: now,
        }
    }
}

/// Create payload. Unknown keys (including any owner or id the client sends)
/// are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct NewProblem {
    pub lcnumber: String,
    pub title: String,
    pub tags: Vec<String>,
    pub difficulty: String,
    pub solution: String,
    pub notes: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProblemPatch {
    #[serde(default)]
    pub lcnumber: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub solution: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

impl ProblemPatch {
    /// Parse a partial update from a raw JSON body.
    ///
    /// # Errors
    /// Returns `DiaryError::BadRequest` when the body is not an object, touches
    /// an identity or timestamp field, names an unknown field, or carries a
    /// value of the wrong type.
    pub fn from_json(value: Value) -> Result<Self, DiaryError> {
        let Value::Object(map) = &value else {
            return Err(DiaryError::BadRequest("update body must be a JSON object".to_string()));
        };

        if let Some(key) = map.keys().find(|key| PROTECTED_PATCH_KEYS.contains(&key.as_str())) {
            return Err(DiaryError::BadRequest(format!("field `{key}` cannot be modified")));
        }

        serde_json::from_value(value)
            .map_err(|err| DiaryError::BadRequest(format!("invalid update data: {err}")))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityDay {
    pub date: String,
    pub count: u32,
}

/// Count completed problems per UTC creation day over the `days` days ending
/// at `today`, oldest first and zero-filled.
///
/// # Errors
/// Returns `DiaryError::Internal` when a calendar date cannot be formatted.
pub fn activity_heatmap(
    problems: &[Problem],
    today: Date,
    days: u16,
) -> Result<Vec<ActivityDay>, DiaryError> {
    let days = days.clamp(1, MAX_ACTIVITY_DAYS);
    let start = today - Duration::days(i64::from(days - 1));

    let mut counts: BTreeMap<Date, u32> = BTreeMap::new();
    for problem in problems.iter().filter(|problem| problem.completed) {
        let day = problem.created_time.to_offset(UtcOffset::UTC).date();
        if day >= start && day <= today {
            *counts.entry(day).or_insert(0) += 1;
        }
    }

    let format = format_description!("[year]-[month]-[day]");
    let mut heatmap = Vec::with_capacity(usize::from(days));
    let mut day = start;
    while day <= today {
        heatmap.push(ActivityDay {
            date: day
                .format(&format)
                .map_err(|err| DiaryError::Internal(format!("failed to format date: {err}")))?,
            count: counts.get(&day).copied().unwrap_or(0),
        });
        match day.next_day() {
            Some(next) => day = next,
            None => break,
        }
    }

    Ok(heatmap)
}

/// Render problems as CSV with every field quoted.
///
/// # Errors
/// Returns `DiaryError::Internal` when a timestamp cannot be formatted.
pub fn problems_to_csv(problems: &[Problem]) -> Result<String, DiaryError> {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for problem in problems {
        let fields = [
            problem.id.to_string(),
            problem.lcnumber.clone(),
            problem.title.clone(),
            problem.tags.join(";"),
            problem.difficulty.clone(),
            problem.solution.clone(),
            problem.notes.clone(),
            problem.completed.to_string(),
            rfc3339(problem.created_time)?,
            rfc3339(problem.updated_time)?,
        ];
        let row = fields.iter().map(|field| csv_quote(field)).collect::<Vec<_>>().join(",");
        out.push_str(&row);
        out.push('\n');
    }

    Ok(out)
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn rfc3339(value: OffsetDateTime) -> Result<String, DiaryError> {
    value
        .format(&Rfc3339)
        .map_err(|err| DiaryError::Internal(format!("failed to format timestamp: {err}")))
}
