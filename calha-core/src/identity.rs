use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::{Record, Store};
use crate::{CoreError, CoreResult, FieldError, Page};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Stored user record. Never hand this out; use [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    /// Argon2id PHC string, salt included
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Record for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Public view of a user, without credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name,
            email: user.email,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| CoreError::Internal(format!("password salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
}

fn password_matches(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str, errors: &mut Vec<FieldError>) {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => errors.push(FieldError::new("email", "must be a valid e-mail address")),
    }
}

/// User registration and credential checks
pub struct UserRegistry {
    store: Arc<dyn Store<User>>,
    // serializes the email uniqueness check with the insert
    registration: Mutex<()>,
}

impl UserRegistry {
    pub fn new(store: Arc<dyn Store<User>>) -> Self {
        Self {
            store,
            registration: Mutex::new(()),
        }
    }

    pub async fn register(&self, new_user: NewUser) -> CoreResult<UserProfile> {
        let _guard = self.registration.lock().await;
        self.insert(new_user).await
    }

    /// Create `admin` with the admin role unless some admin already exists.
    /// Returns the new profile, or `None` when nothing was created.
    pub async fn ensure_admin(&self, admin: NewUser) -> CoreResult<Option<UserProfile>> {
        let _guard = self.registration.lock().await;
        let admins = self.store.find(&|u: &User| u.role == Role::Admin).await?;
        if !admins.is_empty() {
            tracing::debug!("Admin user already present");
            return Ok(None);
        }

        let profile = self
            .insert(NewUser {
                role: Role::Admin,
                ..admin
            })
            .await?;
        Ok(Some(profile))
    }

    // Caller holds the registration lock.
    async fn insert(&self, new_user: NewUser) -> CoreResult<UserProfile> {
        let email = normalize_email(&new_user.email);
        let full_name = new_user.full_name.trim().to_string();

        let mut errors = Vec::new();
        if full_name.is_empty() {
            errors.push(FieldError::new("full_name", "is required"));
        }
        validate_email(&email, &mut errors);
        if new_user.password.is_empty() {
            errors.push(FieldError::new("password", "is required"));
        }
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors));
        }

        if self.find_by_email(&email).await?.is_some() {
            return Err(CoreError::Conflict(format!("email {email} is already registered")));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            full_name,
            email,
            password_hash: hash_password(&new_user.password)?,
            role: new_user.role,
            created_at: Utc::now(),
        };

        let user = self.store.create(user).await?;
        tracing::info!(user_id = %user.id, role = ?user.role, "User registered");
        Ok(user.into())
    }

    pub async fn verify_credentials(&self, email: &str, password: &str) -> CoreResult<UserProfile> {
        let user = self
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(CoreError::Unauthorized)?;

        if !password_matches(password, &user.password_hash) {
            return Err(CoreError::Unauthorized);
        }
        Ok(user.into())
    }

    pub async fn get_by_id(&self, id: &str) -> CoreResult<UserProfile> {
        self.store
            .get(id)
            .await?
            .map(UserProfile::from)
            .ok_or_else(|| CoreError::not_found("User", id))
    }

    pub async fn list(&self, page: usize, limit: usize) -> CoreResult<Page<UserProfile>> {
        let users = self.store.find(&|_: &User| true).await?;
        let profiles = users.into_iter().map(UserProfile::from).collect();
        Ok(Page::paginate(profiles, page, limit))
    }

    pub async fn delete(&self, id: &str) -> CoreResult<()> {
        if !self.store.delete(id).await? {
            return Err(CoreError::not_found("User", id));
        }
        tracing::info!(user_id = %id, "User deleted");
        Ok(())
    }

    pub async fn update(&self, id: &str, update: UserUpdate) -> CoreResult<UserProfile> {
        let mut partial = serde_json::Map::new();
        if let Some(full_name) = update.full_name {
            let full_name = full_name.trim().to_string();
            if full_name.is_empty() {
                return Err(CoreError::Validation(vec![FieldError::new(
                    "full_name",
                    "is required",
                )]));
            }
            partial.insert("full_name".to_string(), json!(full_name));
        }
        if let Some(role) = update.role {
            partial.insert("role".to_string(), json!(role));
        }

        self.store
            .update_fields(id, partial.into())
            .await?
            .map(UserProfile::from)
            .ok_or_else(|| CoreError::not_found("User", id))
    }

    async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let matches = self.store.find(&|u: &User| u.email == email).await?;
        Ok(matches.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;

    fn registry() -> UserRegistry {
        UserRegistry::new(Arc::new(MemoryStore::<User>::new()))
    }

    fn maria() -> NewUser {
        NewUser {
            full_name: "Maria Souza".to_string(),
            email: "Maria@Example.com".to_string(),
            password: "s3cret".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let registry = registry();
        let profile = registry.register(maria()).await.unwrap();
        assert_eq!(profile.email, "maria@example.com");

        let logged_in = registry.verify_credentials("MARIA@example.com", "s3cret").await.unwrap();
        assert_eq!(logged_in.id, profile.id);

        let err = registry.verify_credentials("maria@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let registry = registry();
        registry.register(maria()).await.unwrap();
        let err = registry.register(maria()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_reports_every_invalid_field() {
        let registry = registry();
        let err = registry
            .register(NewUser {
                full_name: " ".to_string(),
                email: "nope".to_string(),
                password: String::new(),
                role: Role::User,
            })
            .await
            .unwrap_err();

        let CoreError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["full_name", "email", "password"]);
    }

    #[tokio::test]
    async fn test_update_role() {
        let registry = registry();
        let profile = registry.register(maria()).await.unwrap();
        let updated = registry
            .update(&profile.id, UserUpdate { full_name: None, role: Some(Role::Admin) })
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.full_name, "Maria Souza");

        let missing = registry.update("missing", UserUpdate::default()).await.unwrap_err();
        assert!(matches!(missing, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_password_is_stored_hashed() {
        let store = Arc::new(MemoryStore::<User>::new());
        let registry = UserRegistry::new(store.clone());
        let profile = registry.register(maria()).await.unwrap();

        let stored = store.get(&profile.id).await.unwrap().unwrap();
        assert!(stored.password_hash.starts_with("$argon2"));
        assert!(!stored.password_hash.contains("s3cret"));

        let again = registry
            .register(NewUser { email: "outra@example.com".to_string(), ..maria() })
            .await
            .unwrap();
        let other = store.get(&again.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, other.password_hash);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let registry = registry();
        let first = registry.register(maria()).await.unwrap();
        registry
            .register(NewUser { email: "joao@example.com".to_string(), ..maria() })
            .await
            .unwrap();

        let page = registry.list(1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.data[0].id, first.id);

        registry.delete(&first.id).await.unwrap();
        assert_eq!(registry.list(1, 10).await.unwrap().total, 1);
        assert!(matches!(registry.get_by_id(&first.id).await, Err(CoreError::NotFound { .. })));
        assert!(matches!(registry.delete(&first.id).await, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_ensure_admin_creates_only_once() {
        let registry = registry();
        let admin = NewUser {
            full_name: "Administrador".to_string(),
            email: "admin@admin.com".to_string(),
            password: "admin123".to_string(),
            role: Role::User,
        };

        let created = registry.ensure_admin(admin.clone()).await.unwrap().unwrap();
        assert_eq!(created.role, Role::Admin);

        let second = registry
            .ensure_admin(NewUser { email: "root@admin.com".to_string(), ..admin })
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(registry.list(1, 10).await.unwrap().total, 1);

        let logged_in = registry.verify_credentials("admin@admin.com", "admin123").await.unwrap();
        assert_eq!(logged_in.id, created.id);
    }
}
