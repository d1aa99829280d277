use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lc_diary_core::{Account, AccountId, Owner, Problem, ProblemId, ProblemPatch};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
  account_id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS problems (
  problem_id TEXT PRIMARY KEY,
  owner_kind TEXT NOT NULL CHECK (owner_kind IN ('account','guest')),
  owner_id TEXT,
  lcnumber TEXT NOT NULL,
  title TEXT NOT NULL,
  tags_json TEXT NOT NULL,
  difficulty TEXT NOT NULL,
  solution TEXT NOT NULL,
  notes TEXT NOT NULL,
  completed INTEGER NOT NULL CHECK (completed IN (0,1)),
  created_at_ns INTEGER NOT NULL,
  updated_at_ns INTEGER NOT NULL,
  CHECK ((owner_kind = 'guest' AND owner_id IS NULL)
      OR (owner_kind = 'account' AND owner_id IS NOT NULL)),
  FOREIGN KEY (owner_id) REFERENCES accounts(account_id)
);

CREATE INDEX IF NOT EXISTS idx_problems_owner ON problems(owner_kind, owner_id);
";

const PROBLEM_COLUMNS: &str = "problem_id, owner_kind, owner_id, lcnumber, title, tags_json, \
     difficulty, solution, notes, completed, created_at_ns, updated_at_ns";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountInsert {
    Inserted,
    UsernameTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemInsert {
    Inserted,
    /// The owning account does not exist.
    UnknownOwner,
}

impl SqliteStore {
    /// Open a SQLite-backed diary store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database is newer
    /// than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied schema migration");
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Insert a new account. A username collision is reported as a value, not
    /// an error, so racing signups resolve cleanly on the unique index.
    ///
    /// # Errors
    /// Returns an error for any failure other than the username constraint.
    pub fn insert_account(&mut self, account: &Account) -> Result<AccountInsert> {
        let result = self.conn.execute(
            "INSERT INTO accounts(account_id, username, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                account.id.to_string(),
                account.username,
                account.password_hash,
                now_rfc3339()?,
            ],
        );

        match result {
            Ok(_) => Ok(AccountInsert::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(AccountInsert::UsernameTaken)
            }
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    /// Count accounts with exactly this username (case-sensitive).
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn count_accounts_by_username(&self, username: &str) -> Result<u64> {
        let count = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM accounts WHERE username = ?1",
                params![username],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to count accounts by username")?;
        u64::try_from(count).context("negative account count")
    }

    /// # Errors
    /// Returns an error when the query fails or the stored id is corrupt.
    pub fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.find_account_where("username = ?1", username)
    }

    /// # Errors
    /// Returns an error when the query fails or the stored id is corrupt.
    pub fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.find_account_where("account_id = ?1", &id.to_string())
    }

    fn find_account_where(&self, predicate: &str, value: &str) -> Result<Option<Account>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT account_id, username, password_hash FROM accounts WHERE {predicate}"
                ),
                params![value],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to look up account")?;

        row.map(|(id, username, password_hash)| {
            Ok(Account { id: AccountId(parse_ulid(&id)?), username, password_hash })
        })
        .transpose()
    }

    /// List every problem recorded under `owner`, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_problems(&self, owner: Owner) -> Result<Vec<Problem>> {
        let (owner_kind, owner_id) = owner_params(owner);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PROBLEM_COLUMNS} FROM problems
                 WHERE owner_kind = ?1 AND owner_id IS ?2
                 ORDER BY created_at_ns DESC, problem_id DESC"
            ))
            .context("failed to prepare problem listing")?;

        let rows = stmt
            .query_map(params![owner_kind, owner_id], ProblemRow::from_row)
            .context("failed to query problems by owner")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read problem rows")?;

        rows.into_iter().map(ProblemRow::into_problem).collect()
    }

    /// Insert a new problem. An owner account that does not exist is reported
    /// as a value so callers can treat it as an identity failure.
    ///
    /// # Errors
    /// Returns an error when serialization fails or the insert fails for any
    /// reason other than the owner foreign key.
    pub fn insert_problem(&mut self, problem: &Problem) -> Result<ProblemInsert> {
        let (owner_kind, owner_id) = owner_params(problem.owner);
        let result = self.conn.execute(
            &format!(
                "INSERT INTO problems({PROBLEM_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                problem.id.to_string(),
                owner_kind,
                owner_id,
                problem.lcnumber,
                problem.title,
                serde_json::to_string(&problem.tags).context("failed to serialize tags")?,
                problem.difficulty,
                problem.solution,
                problem.notes,
                problem.completed,
                unix_nanos(problem.created_time)?,
                unix_nanos(problem.updated_time)?,
            ],
        );

        match result {
            Ok(_) => Ok(ProblemInsert::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Ok(ProblemInsert::UnknownOwner)
            }
            Err(err) => Err(err).context("failed to insert problem"),
        }
    }

    /// Apply `patch` to the problem matching both `id` and `owner` in one
    /// statement. Returns `None` when nothing matched; the two cases (missing
    /// id, other owner) are indistinguishable here.
    ///
    /// `updated_at` never moves backwards, even if the wall clock does.
    ///
    /// # Errors
    /// Returns an error when serialization, the update, or row decoding fails.
    pub fn update_problem(
        &mut self,
        id: ProblemId,
        owner: Owner,
        patch: &ProblemPatch,
        now: OffsetDateTime,
    ) -> Result<Option<Problem>> {
        let (owner_kind, owner_id) = owner_params(owner);
        let tags_json = patch
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize tags")?;

        let row = self
            .conn
            .query_row(
                &format!(
                    "UPDATE problems SET
                       lcnumber = COALESCE(?4, lcnumber),
                       title = COALESCE(?5, title),
                       tags_json = COALESCE(?6, tags_json),
                       difficulty = COALESCE(?7, difficulty),
                       solution = COALESCE(?8, solution),
                       notes = COALESCE(?9, notes),
                       completed = COALESCE(?10, completed),
                       updated_at_ns = MAX(updated_at_ns, ?11)
                     WHERE problem_id = ?1 AND owner_kind = ?2 AND owner_id IS ?3
                     RETURNING {PROBLEM_COLUMNS}"
                ),
                params![
                    id.to_string(),
                    owner_kind,
                    owner_id,
                    patch.lcnumber,
                    patch.title,
                    tags_json,
                    patch.difficulty,
                    patch.solution,
                    patch.notes,
                    patch.completed,
                    unix_nanos(now)?,
                ],
                ProblemRow::from_row,
            )
            .optional()
            .context("failed to update problem")?;

        row.map(ProblemRow::into_problem).transpose()
    }

    /// Delete the problem matching both `id` and `owner` in one statement.
    /// Returns the number of rows removed (0 or 1).
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_problem(&mut self, id: ProblemId, owner: Owner) -> Result<usize> {
        let (owner_kind, owner_id) = owner_params(owner);
        self.conn
            .execute(
                "DELETE FROM problems WHERE problem_id = ?1 AND owner_kind = ?2 AND owner_id IS ?3",
                params![id.to_string(), owner_kind, owner_id],
            )
            .context("failed to delete problem")
    }
}

struct ProblemRow {
    problem_id: String,
    owner_kind: String,
    owner_id: Option<String>,
    lcnumber: String,
    title: String,
    tags_json: String,
    difficulty: String,
    solution: String,
    notes: String,
    completed: bool,
    created_at_ns: i64,
    updated_at_ns: i64,
}

impl ProblemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            problem_id: row.get(0)?,
            owner_kind: row.get(1)?,
            owner_id: row.get(2)?,
            lcnumber: row.get(3)?,
            title: row.get(4)?,
            tags_json: row.get(5)?,
            difficulty: row.get(6)?,
            solution: row.get(7)?,
            notes: row.get(8)?,
            completed: row.get(9)?,
            created_at_ns: row.get(10)?,
            updated_at_ns: row.get(11)?,
        })
    }

    fn into_problem(self) -> Result<Problem> {
        let owner = Owner::from_parts(&self.owner_kind, self.owner_id.as_deref()).ok_or_else(|| {
            anyhow!("corrupt owner on problem {}: kind={}", self.problem_id, self.owner_kind)
        })?;

        Ok(Problem {
            id: ProblemId(parse_ulid(&self.problem_id)?),
            owner,
            lcnumber: self.lcnumber,
            title: self.title,
            tags: serde_json::from_str(&self.tags_json).context("failed to deserialize tags")?,
            difficulty: self.difficulty,
            solution: self.solution,
            notes: self.notes,
            completed: self.completed,
            created_time: from_unix_nanos(self.created_at_ns)?,
            updated_time: from_unix_nanos(self.updated_at_ns)?,
        })
    }
}

fn owner_params(owner: Owner) -> (&'static str, Option<String>) {
    (owner.kind(), owner.account_id().map(|id| id.to_string()))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn unix_nanos(value: OffsetDateTime) -> Result<i64> {
    i64::try_from(value.unix_timestamp_nanos())
        .with_context(|| format!("timestamp out of storable range: {value}"))
}

fn from_unix_nanos(value: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value))
        .with_context(|| format!("invalid stored timestamp: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use lc_diary_core::NewProblem;
    use time::macros::datetime;
    use time::Duration;

    use super::*;

    fn memory_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("lc-diary-store-{}.sqlite3", Ulid::new()))
    }

    fn cleanup(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn seed_account(store: &mut SqliteStore, username: &str) -> Result<AccountId> {
        let account = Account {
            id: AccountId::new(),
            username: username.to_string(),
            password_hash: "$argon2id$fixture".to_string(),
        };
        assert_eq!(store.insert_account(&account)?, AccountInsert::Inserted);
        Ok(account.id)
    }

    fn mk_problem(owner: Owner, title: &str, created: OffsetDateTime) -> Problem {
        Problem::create(
            owner,
            NewProblem {
                lcnumber: "42".to_string(),
                title: title.to_string(),
                tags: vec!["two-pointers".to_string()],
                difficulty: "Hard".to_string(),
                ..NewProblem::default()
            },
            created,
        )
    }

    // Test IDs: TDB-001
    #[test]
    fn migrate_is_idempotent_and_reports_status() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        assert_eq!(store.schema_status()?.pending_versions, vec![1]);
        store.migrate()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    // Test IDs: TDB-002
    #[test]
    fn duplicate_username_is_reported_as_taken() -> Result<()> {
        let mut store = memory_store()?;
        seed_account(&mut store, "alice")?;

        let duplicate = Account {
            id: AccountId::new(),
            username: "alice".to_string(),
            password_hash: "$argon2id$other".to_string(),
        };
        assert_eq!(store.insert_account(&duplicate)?, AccountInsert::UsernameTaken);
        assert_eq!(store.count_accounts_by_username("alice")?, 1);
        assert_eq!(store.count_accounts_by_username("Alice")?, 0);
        Ok(())
    }

    // Test IDs: TDB-003
    #[test]
    fn account_lookups_round_trip() -> Result<()> {
        let mut store = memory_store()?;
        let id = seed_account(&mut store, "bob")?;

        let Some(by_name) = store.find_account_by_username("bob")? else {
            return Err(anyhow!("account bob not found by username"));
        };
        assert_eq!(by_name.id, id);
        assert_eq!(store.find_account(id)?.map(|account| account.username), Some("bob".to_string()));
        assert!(store.find_account_by_username("BOB")?.is_none());
        assert!(store.find_account(AccountId::new())?.is_none());
        Ok(())
    }

    // Test IDs: TDB-004
    #[test]
    fn list_is_scoped_to_owner() -> Result<()> {
        let mut store = memory_store()?;
        let alice = Owner::Account(seed_account(&mut store, "alice")?);
        let bob = Owner::Account(seed_account(&mut store, "bob")?);

        store.insert_problem(&mk_problem(alice, "alice-1", datetime!(2026-01-01 00:00 UTC)))?;
        store.insert_problem(&mk_problem(alice, "alice-2", datetime!(2026-01-02 00:00 UTC)))?;
        store.insert_problem(&mk_problem(bob, "bob-1", datetime!(2026-01-01 00:00 UTC)))?;
        store.insert_problem(&mk_problem(Owner::Guest, "guest-1", datetime!(2026-01-01 00:00 UTC)))?;

        let titles = |owner| -> Result<Vec<String>> {
            Ok(store.list_problems(owner)?.into_iter().map(|problem| problem.title).collect())
        };
        assert_eq!(titles(alice)?, vec!["alice-2".to_string(), "alice-1".to_string()]);
        assert_eq!(titles(bob)?, vec!["bob-1".to_string()]);
        assert_eq!(titles(Owner::Guest)?, vec!["guest-1".to_string()]);
        Ok(())
    }

    // Test IDs: TDB-005
    #[test]
    fn problem_round_trips_through_storage() -> Result<()> {
        let mut store = memory_store()?;
        let owner = Owner::Account(seed_account(&mut store, "alice")?);
        let mut problem = mk_problem(owner, "Trapping Rain Water", OffsetDateTime::now_utc());
        problem.notes = "monotonic stack".to_string();
        problem.completed = true;
        store.insert_problem(&problem)?;

        assert_eq!(store.list_problems(owner)?, vec![problem]);
        Ok(())
    }

    // Test IDs: TDB-006
    #[test]
    fn problem_owned_by_unknown_account_is_rejected() -> Result<()> {
        let mut store = memory_store()?;
        let orphan = mk_problem(Owner::Account(AccountId::new()), "orphan", OffsetDateTime::now_utc());
        assert_eq!(store.insert_problem(&orphan)?, ProblemInsert::UnknownOwner);
        assert!(store.list_problems(orphan.owner)?.is_empty());

        let duplicate_id = mk_problem(Owner::Guest, "first", OffsetDateTime::now_utc());
        assert_eq!(store.insert_problem(&duplicate_id)?, ProblemInsert::Inserted);
        assert!(store.insert_problem(&duplicate_id).is_err());
        Ok(())
    }

    // Test IDs: TDB-010
    #[test]
    fn only_username_collisions_report_taken() -> Result<()> {
        let mut store = memory_store()?;
        let account = Account {
            id: AccountId::new(),
            username: "alice".to_string(),
            password_hash: "$argon2id$fixture".to_string(),
        };
        assert_eq!(store.insert_account(&account)?, AccountInsert::Inserted);

        let same_id = Account { username: "bob".to_string(), ..account.clone() };
        assert!(store.insert_account(&same_id).is_err());
        assert!(store.find_account_by_username("bob")?.is_none());
        Ok(())
    }

    // Test IDs: TDB-007
    #[test]
    fn update_applies_only_for_matching_owner() -> Result<()> {
        let mut store = memory_store()?;
        let alice = Owner::Account(seed_account(&mut store, "alice")?);
        let bob = Owner::Account(seed_account(&mut store, "bob")?);
        let created = datetime!(2026-01-01 00:00 UTC);
        let problem = mk_problem(alice, "original", created);
        store.insert_problem(&problem)?;

        let patch = ProblemPatch { title: Some("hijacked".to_string()), ..ProblemPatch::default() };
        let later = created + Duration::hours(1);
        assert!(store.update_problem(problem.id, bob, &patch, later)?.is_none());
        assert!(store.update_problem(problem.id, Owner::Guest, &patch, later)?.is_none());
        assert!(store.update_problem(ProblemId::new(), alice, &patch, later)?.is_none());
        assert_eq!(store.list_problems(alice)?, vec![problem.clone()]);

        let patch = ProblemPatch {
            completed: Some(true),
            tags: Some(vec!["stack".to_string()]),
            ..ProblemPatch::default()
        };
        let Some(updated) = store.update_problem(problem.id, alice, &patch, later)? else {
            return Err(anyhow!("owner update did not match"));
        };
        assert!(updated.completed);
        assert_eq!(updated.tags, vec!["stack".to_string()]);
        assert_eq!(updated.title, "original");
        assert_eq!(updated.owner, alice);
        assert_eq!(updated.created_time, created);
        assert_eq!(updated.updated_time, later);
        Ok(())
    }

    // Test IDs: TDB-008
    #[test]
    fn updated_time_never_moves_backwards() -> Result<()> {
        let mut store = memory_store()?;
        let created = datetime!(2026-01-01 12:00 UTC);
        let problem = mk_problem(Owner::Guest, "clock", created);
        store.insert_problem(&problem)?;

        let patch = ProblemPatch::default();
        let earlier = created - Duration::minutes(5);
        let Some(updated) = store.update_problem(problem.id, Owner::Guest, &patch, earlier)? else {
            return Err(anyhow!("guest update did not match"));
        };
        assert_eq!(updated.updated_time, created);
        Ok(())
    }

    // Test IDs: TDB-009
    #[test]
    fn delete_applies_only_for_matching_owner() -> Result<()> {
        let mut store = memory_store()?;
        let alice = Owner::Account(seed_account(&mut store, "alice")?);
        let bob = Owner::Account(seed_account(&mut store, "bob")?);
        let problem = mk_problem(alice, "keep me", OffsetDateTime::now_utc());
        store.insert_problem(&problem)?;

        assert_eq!(store.delete_problem(problem.id, bob)?, 0);
        assert_eq!(store.delete_problem(problem.id, Owner::Guest)?, 0);
        assert_eq!(store.list_problems(alice)?.len(), 1);

        assert_eq!(store.delete_problem(problem.id, alice)?, 1);
        assert_eq!(store.delete_problem(problem.id, alice)?, 0);
        assert!(store.list_problems(alice)?.is_empty());
        Ok(())
    }

    // Test IDs: TCONC-001
    #[test]
    fn concurrent_deletes_match_exactly_once() -> Result<()> {
        let db_path = unique_temp_db_path();
        let (problem_id, alice, bob) = {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
            let alice = Owner::Account(seed_account(&mut init, "alice")?);
            let bob = Owner::Account(seed_account(&mut init, "bob")?);
            let problem = mk_problem(alice, "contended", OffsetDateTime::now_utc());
            init.insert_problem(&problem)?;
            (problem.id, alice, bob)
        };

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = Vec::new();
        for index in 0..threads {
            let path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            let caller = if index % 2 == 0 { alice } else { bob };
            handles.push(thread::spawn(move || -> Result<(Owner, usize)> {
                let mut store = SqliteStore::open(&path)?;
                barrier.wait();
                Ok((caller, store.delete_problem(problem_id, caller)?))
            }));
        }

        let mut owner_deletes = 0;
        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("delete thread panicked"));
            };
            let (caller, deleted) = thread_result?;
            if caller == bob {
                assert_eq!(deleted, 0);
            }
            owner_deletes += deleted;
        }
        assert_eq!(owner_deletes, 1);

        cleanup(&db_path)
    }

    // Test IDs: TCONC-002
    #[test]
    fn concurrent_foreign_updates_never_touch_record() -> Result<()> {
        let db_path = unique_temp_db_path();
        let (problem, bob) = {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
            let alice = Owner::Account(seed_account(&mut init, "alice")?);
            let bob = Owner::Account(seed_account(&mut init, "bob")?);
            let problem = mk_problem(alice, "alice only", OffsetDateTime::now_utc());
            init.insert_problem(&problem)?;
            (problem, bob)
        };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let path = db_path.clone();
            let problem_id = problem.id;
            handles.push(thread::spawn(move || -> Result<usize> {
                let mut store = SqliteStore::open(&path)?;
                let patch =
                    ProblemPatch { title: Some("bob was here".to_string()), ..ProblemPatch::default() };
                let mut matched = 0;
                for _ in 0..20 {
                    if store
                        .update_problem(problem_id, bob, &patch, OffsetDateTime::now_utc())?
                        .is_some()
                    {
                        matched += 1;
                    }
                }
                Ok(matched)
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("update thread panicked"));
            };
            assert_eq!(thread_result?, 0);
        }

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(store.list_problems(problem.owner)?, vec![problem]);

        cleanup(&db_path)
    }
}
