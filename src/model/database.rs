use log::{debug, error, info, trace};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, Connection, OptionalExtension, Result as SqlResult, Row};
use thiserror::Error;

use super::{GetUsersResult, RedactedUser, UpdateUserRequest, User};
use crate::{
    auth::{HashError, PasswordHasher},
    config::DatabaseSettings,
};

/// Number of users returned by [`UserStore::get_users`].
pub const PAGE_SIZE: i64 = 10;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with email {0} already exists")]
    Conflict(String),

    #[error("expected to affect at most one row, affected {0}")]
    UnexpectedRowCount(usize),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// Data access for users.
///
/// Lookups take an optional email and an optional id and match a user if
/// *either* one matches. Passing `None` for both matches nothing.
pub trait UserStore: Send + Sync {
    /// Check the backend is reachable and create the schema if it is missing.
    /// Calling this again has no further effect.
    fn initialize(&self) -> Result<()>;

    fn exists(&self, email: Option<&str>, id: Option<&str>) -> Result<bool>;

    /// Hash the password and insert the user.
    ///
    /// Fails with [`StoreError::Conflict`] if the email is taken.
    fn add_user(&self, user: User) -> Result<RedactedUser>;

    /// Returns `None` if no user matches.
    fn get_user(&self, email: Option<&str>, id: Option<&str>) -> Result<Option<User>>;

    /// Get [`PAGE_SIZE`] users starting at `offset`, along with the total count.
    fn get_users(&self, offset: u16) -> Result<GetUsersResult>;

    /// Returns `false` if no user matched.
    fn delete_user(&self, email: Option<&str>, id: Option<&str>) -> Result<bool>;

    /// Returns `false` if no user has the request's id.
    fn update_user(&self, request: &UpdateUserRequest) -> Result<bool>;

    fn search(&self, value: &str) -> Result<Vec<RedactedUser>>;

    fn total_user_count(&self) -> Result<i64>;
}

pub struct SqliteUserStore {
    pool: Pool<SqliteConnectionManager>,
    hasher: PasswordHasher,
}

/// Build the store.
impl SqliteUserStore {
    /// Open the connection pool and initialize the schema.
    pub fn open(settings: &DatabaseSettings, hasher: PasswordHasher) -> Result<SqliteUserStore> {
        let manager = SqliteConnectionManager::file(&settings.path).with_init(|conn| {
            conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
        });

        let pool = Pool::builder()
            .max_size(settings.max_connections)
            .min_idle(Some(settings.min_idle.min(settings.max_connections)))
            .idle_timeout(Some(settings.idle_timeout))
            .connection_timeout(settings.connection_timeout)
            .build(manager)?;

        trace!("Opened connection pool for {}", settings.path.display());

        let store = SqliteUserStore { pool, hasher };
        store.initialize()?;

        info!(
            "Connected to {} (pool size {})",
            settings.path.display(),
            settings.max_connections
        );

        Ok(store)
    }

    /// Insert a user whose password is already hashed.
    /// The UNIQUE constraint on `email` is the authoritative conflict check.
    fn insert(&self, user: &User) -> Result<RedactedUser> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO users (email, password_hash, first_name, last_name, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &user.email,
                &user.password,
                &user.first_name,
                &user.last_name,
                &user.notes,
            ),
        )
        .map_err(|err| conflict_or(err, &user.email))?;

        let rowid = conn.last_insert_rowid();
        let user = conn.query_row(
            "SELECT email, id, first_name, last_name, notes, created_at
             FROM users WHERE rowid = ?1",
            (rowid,),
            map_redacted_user,
        )?;

        Ok(user)
    }
}

impl UserStore for SqliteUserStore {
    fn initialize(&self) -> Result<()> {
        let conn = self.pool.get()?;

        conn.query_row("SELECT 1", (), |row| row.get::<usize, i64>(0))?;
        trace!("Pinged database");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
                id            TEXT NOT NULL PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
                password_hash TEXT NOT NULL,
                first_name    TEXT NOT NULL,
                last_name     TEXT NOT NULL,
                notes         TEXT,
                created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )?;

        debug!("Initialized users table");

        Ok(())
    }

    fn exists(&self, email: Option<&str>, id: Option<&str>) -> Result<bool> {
        let conn = self.pool.get()?;

        let exists = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = ?1 OR id = ?2)",
            (email, id),
            |row| row.get(0),
        )?;

        trace!("User (email: {:?}, id: {:?}) exists: {}", email, id, exists);

        Ok(exists)
    }

    fn add_user(&self, user: User) -> Result<RedactedUser> {
        if self.exists(Some(&user.email), None)? {
            debug!("Email {} already exists", user.email);
            return Err(StoreError::Conflict(user.email));
        }

        debug!("Adding user {} to database", user.email);

        let password = self.hasher.hash(&user.password)?;
        let user = User { password, ..user };

        let added = self.insert(&user)?;

        debug!("Added user {} as {:?}", added.email, added.id);

        Ok(added)
    }

    fn get_user(&self, email: Option<&str>, id: Option<&str>) -> Result<Option<User>> {
        debug!("Getting user (email: {:?}, id: {:?})", email, id);

        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT email, id, password_hash, first_name, last_name, notes, created_at
                 FROM users WHERE email = ?1 OR id = ?2
                 ORDER BY rowid LIMIT 1",
                (email, id),
                map_user,
            )
            .optional()?;

        Ok(user)
    }

    fn get_users(&self, offset: u16) -> Result<GetUsersResult> {
        trace!("Getting users from offset {}", offset);

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT email, id, first_name, last_name, notes, created_at
             FROM users ORDER BY rowid LIMIT ?1 OFFSET ?2",
        )?;
        let users = stmt
            .query_map((PAGE_SIZE, offset), map_redacted_user)?
            .collect::<SqlResult<Vec<_>>>()?;

        let total = count_users(&conn)?;

        Ok(GetUsersResult { users, total })
    }

    fn delete_user(&self, email: Option<&str>, id: Option<&str>) -> Result<bool> {
        if !self.exists(email, id)? {
            debug!("User not found (email: {:?}, id: {:?})", email, id);
            return Ok(false);
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let deleted = tx.execute("DELETE FROM users WHERE email = ?1 OR id = ?2", (email, id))?;

        if deleted > 1 {
            // email and id matched two different users
            tx.rollback()?;
            error!(
                "Refusing to delete {} users (email: {:?}, id: {:?})",
                deleted, email, id
            );
            return Err(StoreError::UnexpectedRowCount(deleted));
        }

        tx.commit()?;

        debug!(
            "Deleted {} user(s) (email: {:?}, id: {:?})",
            deleted, email, id
        );

        Ok(deleted == 1)
    }

    fn update_user(&self, request: &UpdateUserRequest) -> Result<bool> {
        debug!("Updating user {}", request.id);

        let conn = self.pool.get()?;
        let updated = conn
            .execute(
                "UPDATE users SET first_name = ?1, last_name = ?2, notes = ?3, email = ?4
                 WHERE id = ?5",
                (
                    &request.first_name,
                    &request.last_name,
                    &request.notes,
                    &request.email,
                    &request.id,
                ),
            )
            .map_err(|err| conflict_or(err, &request.email))?;

        Ok(updated == 1)
    }

    fn search(&self, value: &str) -> Result<Vec<RedactedUser>> {
        if value.is_empty() {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(value));
        trace!("Searching users for {}", pattern);

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            r"SELECT email, id, first_name, last_name, notes, created_at
              FROM users
              WHERE email LIKE ?1 ESCAPE '\'
                 OR id LIKE ?1 ESCAPE '\'
                 OR password_hash LIKE ?1 ESCAPE '\'
                 OR first_name LIKE ?1 ESCAPE '\'
                 OR last_name LIKE ?1 ESCAPE '\'
                 OR CAST(created_at AS TEXT) LIKE ?1 ESCAPE '\'
              ORDER BY rowid",
        )?;
        let users = stmt
            .query_map((&pattern,), map_redacted_user)?
            .collect::<SqlResult<Vec<_>>>()?;

        debug!("Search for {:?} matched {} user(s)", value, users.len());

        Ok(users)
    }

    fn total_user_count(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        Ok(count_users(&conn)?)
    }
}

// Helpers
fn count_users(conn: &Connection) -> SqlResult<i64> {
    conn.query_row("SELECT COUNT(id) FROM users", (), |row| row.get(0))
}

/// Map `email, id, password_hash, first_name, last_name, notes, created_at`.
fn map_user(row: &Row) -> SqlResult<User> {
    Ok(User {
        email: row.get(0)?,
        id: row.get(1)?,
        password: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Map `email, id, first_name, last_name, notes, created_at`.
fn map_redacted_user(row: &Row) -> SqlResult<RedactedUser> {
    Ok(RedactedUser {
        email: row.get(0)?,
        id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        notes: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Turn a UNIQUE violation into [`StoreError::Conflict`], pass anything else through.
fn conflict_or(err: rusqlite::Error, email: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            debug!("Unique constraint rejected email {}", email);
            StoreError::Conflict(email.to_string())
        }
        _ => StoreError::Sql(err),
    }
}

/// Escape `LIKE` wildcards so they match literally (with `ESCAPE '\'`).
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::HashingSettings;

    fn store() -> (SqliteUserStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = DatabaseSettings {
            path: dir.path().join("users.sqlite3"),
            max_connections: 2,
            ..Default::default()
        };
        let hasher = PasswordHasher::new(&HashingSettings {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();

        (SqliteUserStore::open(&settings, hasher).unwrap(), dir)
    }

    fn user(email: &str) -> User {
        User {
            email: email.to_string(),
            password: "password123".to_string(),
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn added_user_can_be_read_back() {
        let (store, _dir) = store();

        let added = store.add_user(user("john.doe@example.com")).unwrap();
        assert!(added.id.as_deref().is_some_and(|id| !id.is_empty()));
        assert!(added.created_at.is_some());

        let found = store
            .get_user(Some("john.doe@example.com"), None)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, added.id);
        assert_eq!(RedactedUser::from(found.clone()), added);

        let by_id = store.get_user(None, added.id.as_deref()).unwrap().unwrap();
        assert_eq!(by_id.email, "john.doe@example.com");
    }

    #[test]
    fn stores_a_hash_instead_of_the_password() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();

        let stored = store.get_user(Some("a@b.com"), None).unwrap().unwrap();

        assert_ne!(stored.password, "password123");
        assert!(store.hasher.verify("password123", &stored.password));
    }

    #[test]
    fn missing_user_is_none() {
        let (store, _dir) = store();

        assert!(store.get_user(Some("nobody@example.com"), None).unwrap().is_none());
        assert!(store.get_user(None, None).unwrap().is_none());
        assert!(!store.exists(Some("nobody@example.com"), Some("nope")).unwrap());
    }

    #[test]
    fn duplicate_email_always_conflicts() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                store.add_user(user("a@b.com")),
                Err(StoreError::Conflict(email)) if email == "a@b.com"
            ));
        }
        // emails are unique regardless of case
        assert!(matches!(
            store.add_user(user("A@B.com")),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.total_user_count().unwrap(), 1);

        assert!(store.delete_user(Some("a@b.com"), None).unwrap());
        assert!(store.add_user(user("a@b.com")).is_ok());
    }

    #[test]
    fn unique_constraint_catches_what_the_precheck_misses() {
        let (store, _dir) = store();
        let mut hashed = user("race@example.com");
        hashed.password = store.hasher.hash("pw").unwrap();

        store.insert(&hashed).unwrap();

        assert!(matches!(
            store.insert(&hashed),
            Err(StoreError::Conflict(email)) if email == "race@example.com"
        ));
    }

    #[test]
    fn pages_through_users_in_insertion_order() {
        let (store, _dir) = store();
        for i in 0..12 {
            store.add_user(user(&format!("user{}@example.com", i))).unwrap();
        }

        let first = store.get_users(0).unwrap();
        assert_eq!(first.users.len(), 10);
        assert_eq!(first.total, 12);
        assert_eq!(first.users[0].email, "user0@example.com");

        let second = store.get_users(10).unwrap();
        assert_eq!(second.users.len(), 2);
        assert_eq!(second.users[1].email, "user11@example.com");

        let past_end = store.get_users(500).unwrap();
        assert!(past_end.users.is_empty());
        assert_eq!(past_end.total, 12);

        assert_eq!(
            first.users.len() + second.users.len(),
            store.total_user_count().unwrap() as usize
        );
    }

    #[test]
    fn deleting_unknown_user_changes_nothing() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();

        assert!(!store.delete_user(Some("x@y.com"), Some("missing")).unwrap());
        assert!(!store.delete_user(None, None).unwrap());
        assert_eq!(store.total_user_count().unwrap(), 1);
    }

    #[test]
    fn refuses_to_delete_two_users_at_once() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();
        let other = store.add_user(user("c@d.com")).unwrap();

        assert!(matches!(
            store.delete_user(Some("a@b.com"), other.id.as_deref()),
            Err(StoreError::UnexpectedRowCount(2))
        ));
        assert_eq!(store.total_user_count().unwrap(), 2);
    }

    #[test]
    fn update_changes_only_mutable_fields() {
        let (store, _dir) = store();
        let added = store.add_user(user("a@b.com")).unwrap();
        let before = store.get_user(Some("a@b.com"), None).unwrap().unwrap();

        let request = UpdateUserRequest {
            id: added.id.clone().unwrap(),
            email: "new@b.com".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Roe".to_string(),
            notes: Some("moved".to_string()),
        };
        assert!(store.update_user(&request).unwrap());

        let after = store.get_user(None, added.id.as_deref()).unwrap().unwrap();
        assert_eq!(after.email, "new@b.com");
        assert_eq!(after.first_name, "Jane");
        assert_eq!(after.last_name, "Roe");
        assert_eq!(after.notes.as_deref(), Some("moved"));
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.password, before.password);
    }

    #[test]
    fn update_of_unknown_id_is_false() {
        let (store, _dir) = store();

        let request = UpdateUserRequest {
            id: "missing".to_string(),
            email: "a@b.com".to_string(),
            first_name: "A".to_string(),
            last_name: "B".to_string(),
            notes: None,
        };

        assert!(!store.update_user(&request).unwrap());
    }

    #[test]
    fn update_to_a_taken_email_conflicts() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();
        let other = store.add_user(user("c@d.com")).unwrap();

        let request = UpdateUserRequest {
            id: other.id.unwrap(),
            email: "a@b.com".to_string(),
            first_name: "C".to_string(),
            last_name: "D".to_string(),
            notes: None,
        };

        assert!(matches!(
            store.update_user(&request),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn search_matches_substrings_case_insensitively() {
        let (store, _dir) = store();
        store.add_user(user("john.doe@example.com")).unwrap();
        let mut janelle = user("jr@other.org");
        janelle.first_name = "Janelle".to_string();
        store.add_user(janelle).unwrap();

        let found = store.search("EXAMPLE").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "john.doe@example.com");

        let found = store.search("aNeLl").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first_name, "Janelle");
    }

    #[test]
    fn search_with_nothing_to_match_is_empty() {
        let (store, _dir) = store();
        store.add_user(user("john.doe@example.com")).unwrap();

        assert!(store.search("").unwrap().is_empty());
        assert!(store.search("~missing~").unwrap().is_empty());
        // wildcards are literal
        assert!(store.search("%").unwrap().is_empty());
        assert!(store.search("_").unwrap().is_empty());
    }

    #[test]
    fn initialize_is_idempotent() {
        let (store, _dir) = store();
        store.add_user(user("a@b.com")).unwrap();

        store.initialize().unwrap();
        store.initialize().unwrap();

        assert_eq!(store.total_user_count().unwrap(), 1);
    }

    #[test]
    fn default_pool_only_opens_what_it_needs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DatabaseSettings {
            path: dir.path().join("users.sqlite3"),
            ..Default::default()
        };
        let hasher = PasswordHasher::new(&HashingSettings {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();

        let store = SqliteUserStore::open(&settings, hasher).unwrap();
        store.add_user(user("a@b.com")).unwrap();

        assert!(store.pool.state().connections < settings.max_connections);
    }

    #[test]
    fn min_idle_above_pool_size_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DatabaseSettings {
            path: dir.path().join("users.sqlite3"),
            max_connections: 2,
            min_idle: 5,
            ..Default::default()
        };
        let hasher = PasswordHasher::new(&HashingSettings {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();

        let store = SqliteUserStore::open(&settings, hasher).unwrap();

        assert!(store.pool.state().connections <= 2);
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
