use std::path::PathBuf;

use lc_diary_auth::{
    burn_verification, hash_password, require_account, resolve_caller, verify_password,
    IssuedToken, TokenService,
};
use lc_diary_core::{
    activity_heatmap, problems_to_csv, Account, AccountId, ActivityDay, Caller, DiaryError,
    NewProblem, Problem, ProblemId, ProblemPatch, DEFAULT_ACTIVITY_DAYS,
};
use lc_diary_store_sqlite::{AccountInsert, ProblemInsert, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const INVALID_CREDENTIALS: &str = "invalid username or password";

/// Signup and login body.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Outward view of an account. The password hash never leaves the store layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountView {
    pub id: AccountId,
    pub username: String,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self { id: account.id, username: account.username }
    }
}

/// Ownership enforcement over the record store.
///
/// Every record operation takes the already-resolved [`Caller`] and derives
/// the owner filter from it; no method accepts an owner from request data.
#[derive(Debug, Clone)]
pub struct DiaryApi {
    db_path: PathBuf,
    tokens: TokenService,
    token_ttl: Duration,
}

impl DiaryApi {
    #[must_use]
    pub fn new(db_path: PathBuf, tokens: TokenService, token_ttl: Duration) -> Self {
        Self { db_path, tokens, token_ttl }
    }

    fn open_store(&self) -> Result<SqliteStore, DiaryError> {
        SqliteStore::open(&self.db_path).map_err(internal)
    }

    /// Bring the database up to the latest schema. Called once at startup.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn migrate(&self) -> anyhow::Result<SchemaStatus> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        store.schema_status()
    }

    /// Resolve the caller for one request from its `Authorization` header.
    ///
    /// # Errors
    /// Returns `DiaryError::Unauthenticated` for a present but invalid bearer token.
    pub fn resolve_caller(&self, authorization: Option<&str>) -> Result<Caller, DiaryError> {
        resolve_caller(authorization, &self.tokens)
    }

    /// Register a new account.
    ///
    /// # Errors
    /// Returns `BadRequest` for a blank username or empty password, `Conflict`
    /// when the username is taken, and `Internal` on store or hashing failure.
    pub fn signup(&self, request: &Credentials) -> Result<AccountView, DiaryError> {
        let username = request.username.trim();
        if username.is_empty() {
            return Err(DiaryError::BadRequest("username is required".to_string()));
        }
        if request.password.is_empty() {
            return Err(DiaryError::BadRequest("password is required".to_string()));
        }

        let mut store = self.open_store()?;
        if store.count_accounts_by_username(username).map_err(internal)? > 0 {
            tracing::info!(username, "signup rejected: username taken");
            return Err(username_taken());
        }

        let password_hash = hash_password(&request.password).map_err(|err| {
            tracing::error!(error = %err, "password hashing failed");
            DiaryError::Internal("internal server error".to_string())
        })?;
        let account = Account { id: AccountId::new(), username: username.to_string(), password_hash };

        match store.insert_account(&account).map_err(internal)? {
            AccountInsert::Inserted => {
                tracing::info!(username, account = %account.id, "account created");
                Ok(account.into())
            }
            AccountInsert::UsernameTaken => {
                tracing::info!(username, "signup lost username race");
                Err(username_taken())
            }
        }
    }

    /// Exchange credentials for a signed token.
    ///
    /// # Errors
    /// Returns `Unauthenticated` with one fixed message for both an unknown
    /// username and a wrong password; `Internal` on store or signing failure.
    pub fn login(&self, request: &Credentials) -> Result<IssuedToken, DiaryError> {
        let store = self.open_store()?;
        let Some(account) =
            store.find_account_by_username(request.username.trim()).map_err(internal)?
        else {
            burn_verification(&request.password);
            tracing::debug!("login rejected");
            return Err(DiaryError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        };

        if !verify_password(&account.password_hash, &request.password) {
            tracing::debug!(account = %account.id, "login rejected");
            return Err(DiaryError::Unauthenticated(INVALID_CREDENTIALS.to_string()));
        }

        self.tokens.issue(account.id, self.token_ttl).map_err(|err| {
            tracing::error!(error = %err, "token signing failed");
            DiaryError::Internal("internal server error".to_string())
        })
    }

    /// The authenticated caller's own account.
    ///
    /// # Errors
    /// Returns `Unauthenticated` for anonymous callers or when the token's
    /// account no longer exists.
    pub fn me(&self, caller: Caller) -> Result<AccountView, DiaryError> {
        let account_id = require_account(caller)?;
        let store = self.open_store()?;
        store
            .find_account(account_id)
            .map_err(internal)?
            .map(AccountView::from)
            .ok_or_else(|| DiaryError::Unauthenticated("account not found".to_string()))
    }

    /// # Errors
    /// Returns `Internal` when the store cannot be read.
    pub fn list_problems(&self, caller: Caller) -> Result<Vec<Problem>, DiaryError> {
        let store = self.open_store()?;
        store.list_problems(caller.owner()).map_err(internal)
    }

    /// Record a new problem owned by `caller`.
    ///
    /// # Errors
    /// Returns `Unauthenticated` when the caller's token names an account that
    /// does not exist, and `Internal` when the store write fails.
    pub fn create_problem(&self, caller: Caller, input: NewProblem) -> Result<Problem, DiaryError> {
        let problem = Problem::create(caller.owner(), input, OffsetDateTime::now_utc());
        let mut store = self.open_store()?;
        match store.insert_problem(&problem).map_err(internal)? {
            ProblemInsert::Inserted => {
                tracing::info!(owner = %problem.owner, problem_id = %problem.id, "problem created");
                Ok(problem)
            }
            ProblemInsert::UnknownOwner => {
                tracing::debug!(owner = %problem.owner, "create rejected: token account not found");
                Err(DiaryError::Unauthenticated("account not found".to_string()))
            }
        }
    }

    /// Apply `patch` to the caller's own problem `raw_id`.
    ///
    /// # Errors
    /// Returns `BadRequest` for a malformed id. When no record matches both id
    /// and owner, returns `Forbidden` for an authenticated caller and
    /// `Unauthenticated` for an anonymous one.
    pub fn update_problem(
        &self,
        caller: Caller,
        raw_id: &str,
        patch: &ProblemPatch,
    ) -> Result<Problem, DiaryError> {
        let id = ProblemId::parse(raw_id)?;
        let owner = caller.owner();
        let mut store = self.open_store()?;
        match store
            .update_problem(id, owner, patch, OffsetDateTime::now_utc())
            .map_err(internal)?
        {
            Some(problem) => {
                tracing::info!(owner = %owner, problem_id = %id, "problem updated");
                Ok(problem)
            }
            None => Err(ownership_miss(caller, id)),
        }
    }

    /// Delete the caller's own problem `raw_id`, returning its id.
    ///
    /// # Errors
    /// Same outcomes as [`Self::update_problem`].
    pub fn delete_problem(&self, caller: Caller, raw_id: &str) -> Result<ProblemId, DiaryError> {
        let id = ProblemId::parse(raw_id)?;
        let owner = caller.owner();
        let mut store = self.open_store()?;
        if store.delete_problem(id, owner).map_err(internal)? == 0 {
            return Err(ownership_miss(caller, id));
        }
        tracing::info!(owner = %owner, problem_id = %id, "problem deleted");
        Ok(id)
    }

    /// Completed-problem counts per day over the last `days` days (default 365).
    ///
    /// # Errors
    /// Returns `Internal` when the store cannot be read.
    pub fn activity(&self, caller: Caller, days: Option<u16>) -> Result<Vec<ActivityDay>, DiaryError> {
        let problems = self.list_problems(caller)?;
        activity_heatmap(
            &problems,
            OffsetDateTime::now_utc().date(),
            days.unwrap_or(DEFAULT_ACTIVITY_DAYS),
        )
    }

    /// # Errors
    /// Returns `Internal` when the store cannot be read.
    pub fn export_csv(&self, caller: Caller) -> Result<String, DiaryError> {
        let problems = self.list_problems(caller)?;
        problems_to_csv(&problems)
    }
}

fn internal(err: anyhow::Error) -> DiaryError {
    tracing::error!(error = ?err, "store operation failed");
    DiaryError::Internal("internal server error".to_string())
}

fn username_taken() -> DiaryError {
    DiaryError::Conflict("username already exists".to_string())
}

fn ownership_miss(caller: Caller, id: ProblemId) -> DiaryError {
    tracing::info!(owner = %caller.owner(), problem_id = %id, "no problem matched id and owner");
    if caller.is_authenticated() {
        DiaryError::Forbidden("problem not found or not owned by caller".to_string())
    } else {
        DiaryError::Unauthenticated("sign in to modify this problem".to_string())
    }
}
