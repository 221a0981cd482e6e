//! # User Repository
//!
//! Staff accounts. Emails are unique; the engine reports duplicates as
//! `DbError::UniqueViolation`.

use async_trait::async_trait;
use tracing::{debug, info};

use kiosk_core::{NewUser, User, UserPatch, UserRole};

use crate::error::DbResult;
use crate::executor::{SqlExecutor, SqlValue};
use crate::repository::{Entity, Field, Repository, TableRepository, ToFields};

impl ToFields for NewUser {
    fn to_fields(&self) -> Vec<Field> {
        vec![
            Field::set("email", self.email.as_str()),
            Field::set("name", self.name.as_str()),
            Field::set("password_hash", self.password_hash.as_str()),
            Field::set("role", self.role),
            Field::set("is_active", self.is_active.unwrap_or(true)),
        ]
    }
}

impl ToFields for UserPatch {
    fn to_fields(&self) -> Vec<Field> {
        vec![
            Field::maybe("email", self.email.clone()),
            Field::maybe("name", self.name.clone()),
            Field::maybe("password_hash", self.password_hash.clone()),
            Field::maybe("role", self.role),
            Field::maybe("is_active", self.is_active),
        ]
    }
}

/// Repository for staff accounts.
#[derive(Debug, Clone)]
pub struct UserRepository {
    base: TableRepository<User>,
}

impl UserRepository {
    pub fn new(executor: SqlExecutor) -> Self {
        UserRepository {
            base: TableRepository::new(executor),
        }
    }

    /// Inserts an account. Unset `is_active` means active.
    pub async fn create(&self, user: &NewUser) -> DbResult<i64> {
        let id = self.base.insert(user.to_fields()).await?;
        info!(id, email = %user.email, role = %user.role, "User created");
        Ok(id)
    }

    pub async fn update(&self, id: i64, patch: &UserPatch) -> DbResult<()> {
        debug!(id, "Updating user");
        self.base.update_fields(id, patch.to_fields()).await
    }

    /// Looks up an account by sign-in email (exact match).
    pub async fn find_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT * FROM {} WHERE email = ?", User::TABLE);
        self.base
            .executor()
            .query_one(&sql, &[SqlValue::from(email)])
            .await
    }

    /// Active accounts, alphabetical by name.
    pub async fn find_active(&self) -> DbResult<Vec<User>> {
        let sql = format!(
            "SELECT * FROM {} WHERE is_active = 1 ORDER BY name ASC, id ASC",
            User::TABLE
        );
        self.base.executor().query_all(&sql, &[]).await
    }

    pub async fn find_by_role(&self, role: UserRole) -> DbResult<Vec<User>> {
        let sql = format!(
            "SELECT * FROM {} WHERE role = ? ORDER BY name ASC, id ASC",
            User::TABLE
        );
        self.base.executor().query_all(&sql, &[role.into()]).await
    }

    /// Active accounts allowed to run administrative tooling.
    pub async fn find_privileged(&self) -> DbResult<Vec<User>> {
        let mut users = self.find_active().await?;
        users.retain(|user| user.role.is_privileged());
        debug!(count = users.len(), "Privileged accounts loaded");
        Ok(users)
    }

    /// Deactivates an account without deleting its history.
    pub async fn deactivate(&self, id: i64) -> DbResult<()> {
        let patch = UserPatch {
            is_active: Some(false),
            ..Default::default()
        };
        self.update(id, &patch).await
    }
}

#[async_trait]
impl Repository for UserRepository {
    type Entity = User;
    type New = NewUser;
    type Patch = UserPatch;

    fn table(&self) -> &TableRepository<User> {
        &self.base
    }

    async fn create(&self, data: &NewUser) -> DbResult<i64> {
        UserRepository::create(self, data).await
    }

    async fn update(&self, id: i64, patch: &UserPatch) -> DbResult<()> {
        UserRepository::update(self, id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::test_support::database;

    fn new_user(email: &str, name: &str, role: UserRole) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: name.to_string(),
            password_hash: "$argon2id$v=19$stub".to_string(),
            role,
            is_active: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_email() {
        let db = database().await;
        let users = db.users();

        let id = users
            .create(&new_user("ana@shop.test", "Ana", UserRole::Manager))
            .await
            .unwrap();

        let user = users.find_by_email("ana@shop.test").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.name, "Ana");
        assert_eq!(user.role, UserRole::Manager);
        assert!(user.is_active);

        assert!(users.find_by_email("nobody@shop.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let db = database().await;
        let users = db.users();
        users
            .create(&new_user("dup@shop.test", "First", UserRole::Cashier))
            .await
            .unwrap();

        let err = users
            .create(&new_user("dup@shop.test", "Second", UserRole::Cashier))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(users.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_patch_and_deactivate() {
        let db = database().await;
        let users = db.users();
        let id = users
            .create(&new_user("bo@shop.test", "Bo", UserRole::Cashier))
            .await
            .unwrap();
        let other = users
            .create(&new_user("cy@shop.test", "Cy", UserRole::Admin))
            .await
            .unwrap();

        users
            .update(
                id,
                &UserPatch {
                    role: Some(UserRole::Manager),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        users.deactivate(other).await.unwrap();

        let bo = users.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(bo.role, UserRole::Manager);
        assert_eq!(bo.email, "bo@shop.test");

        let active = users.find_active().await.unwrap();
        assert_eq!(active.iter().map(|u| u.id).collect::<Vec<_>>(), vec![id]);

        let managers = users.find_by_role(UserRole::Manager).await.unwrap();
        assert_eq!(managers.len(), 1);

        let err = users.deactivate(999).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_find_privileged_skips_inactive_accounts() {
        let db = database().await;
        let users = db.users();
        let admin = users
            .create(&new_user("ad@shop.test", "Ad", UserRole::Admin))
            .await
            .unwrap();
        let dev = users
            .create(&new_user("de@shop.test", "De", UserRole::Developer))
            .await
            .unwrap();
        users
            .create(&new_user("ca@shop.test", "Ca", UserRole::Cashier))
            .await
            .unwrap();
        let retired = users
            .create(&new_user("zz@shop.test", "Zz", UserRole::Admin))
            .await
            .unwrap();
        users.deactivate(retired).await.unwrap();

        let privileged = users.find_privileged().await.unwrap();
        assert_eq!(
            privileged.iter().map(|u| u.id).collect::<Vec<_>>(),
            vec![admin, dev]
        );
    }
}
