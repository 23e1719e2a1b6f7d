//! User and company storage over the shared database.
//!
//! Every user belongs to a company; warehouse authorization always goes
//! through `company_id`, never through emails or user ids. Individuals get
//! a single-member company auto-created at registration.

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{parse_opt_ts, parse_ts, ts, Db};
use crate::domain::{Company, User};

pub struct UserStore {
    db: Db,
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        name: row.get("name")?,
        phone: row.get("phone")?,
        role: row.get("role")?,
        is_active: row.get("is_active")?,
        company_id: row.get("company_id")?,
        company_role: row.get("company_role")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?).unwrap_or_else(Utc::now),
        last_login_at: parse_opt_ts(row.get("last_login_at")?),
    })
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Seed a default admin when none exists yet.
    pub async fn ensure_default_admin(&self, email: &str, password: &str) -> Result<()> {
        let conn = self.db.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE role = 'admin'", [], |row| row.get(0))
            .context("check for admin users")?;
        if count > 0 {
            return Ok(());
        }

        let password_hash = hash(password, DEFAULT_COST).context("hash admin password")?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, role, is_active, created_at)
             VALUES (?1, ?2, ?3, 'Platform Admin', 'admin', 1, ?4)",
            params![Uuid::new_v4().to_string(), email, password_hash, ts(Utc::now())],
        )
        .context("insert default admin")?;

        info!(email, "Default admin user created");
        warn!("Change the default admin password before exposing this instance");
        Ok(())
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.db.lock().await;
        get_by_email(&conn, email)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], user_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Verify credentials; stamps `last_login_at` on success.
    pub async fn verify_login(&self, email: &str, password: &str) -> Result<Option<User>> {
        let conn = self.db.lock().await;
        let Some(user) = get_by_email(&conn, email)? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        let valid = verify(password, &user.password_hash).context("verify password")?;
        if !valid {
            return Ok(None);
        }
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![ts(Utc::now()), user.id],
        )?;
        Ok(Some(user))
    }

    /// Register a user, auto-creating a single-member company.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: &str,
        company_name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<User> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        if get_by_email(&tx, email)?.is_some() {
            anyhow::bail!("email already registered");
        }

        let now = Utc::now();
        let company = Company {
            id: Uuid::new_v4().to_string(),
            name: company_name.unwrap_or(name).to_string(),
            company_type: if company_name.is_some() { "business" } else { "individual" }.into(),
            created_at: now,
        };
        tx.execute(
            "INSERT INTO companies (id, name, company_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![company.id, company.name, company.company_type, ts(now)],
        )
        .context("insert company")?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash(password, DEFAULT_COST).context("hash password")?,
            name: name.to_string(),
            phone: phone.map(str::to_string),
            role: role.to_string(),
            is_active: true,
            company_id: Some(company.id.clone()),
            company_role: Some("admin".into()),
            created_at: now,
            last_login_at: None,
        };
        tx.execute(
            "INSERT INTO users (id, email, password_hash, name, phone, role, is_active,
                                company_id, company_role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, 'admin', ?8)",
            params![
                user.id,
                user.email,
                user.password_hash,
                user.name,
                user.phone,
                user.role,
                user.company_id,
                ts(now),
            ],
        )
        .context("insert user")?;

        tx.commit()?;
        info!(user = %user.id, role = %user.role, "User registered");
        Ok(user)
    }
}

fn get_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE email = ?1")?;
    let mut rows = stmt.query_map(params![email], user_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_admin_created_once() {
        let store = UserStore::new(Db::open_in_memory().unwrap());
        store.ensure_default_admin("admin@wex.test", "admin123").await.unwrap();
        store.ensure_default_admin("admin@wex.test", "admin123").await.unwrap();

        let admin = store.get_by_email("admin@wex.test").await.unwrap().unwrap();
        assert_eq!(admin.role, "admin");
    }

    #[tokio::test]
    async fn test_register_creates_company_and_verifies_login() {
        let store = UserStore::new(Db::open_in_memory().unwrap());
        let user = store
            .register("owner@example.com", "hunter22", "Pat Owner", "supplier", Some("Dock Co"), None)
            .await
            .unwrap();
        assert!(user.company_id.is_some());
        assert_eq!(user.company_role.as_deref(), Some("admin"));

        // Correct password
        let verified = store.verify_login("owner@example.com", "hunter22").await.unwrap();
        assert!(verified.is_some());
        // Wrong password
        assert!(store.verify_login("owner@example.com", "nope").await.unwrap().is_none());
        // Unknown user
        assert!(store.verify_login("ghost@example.com", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = UserStore::new(Db::open_in_memory().unwrap());
        store
            .register("dup@example.com", "pw", "One", "buyer", None, None)
            .await
            .unwrap();
        assert!(store
            .register("dup@example.com", "pw", "Two", "buyer", None, None)
            .await
            .is_err());
    }
}
