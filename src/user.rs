use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, Result};

const MIN_PASSWORD_LEN: usize = 8;

/// An operator or user account as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "crate::log_entry::string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub name: String,
    pub email: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(ConsoleError::Validation("username is required".into()));
        }
        if self.name.trim().is_empty() {
            return Err(ConsoleError::Validation("name is required".into()));
        }
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ConsoleError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
}

impl UserPatch {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_none()
            && self.email.is_none()
            && self.is_active.is_none()
            && self.is_admin.is_none()
        {
            return Err(ConsoleError::Validation("nothing to update".into()));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

/// Server-side user listing parameters.
#[derive(Debug, Clone)]
pub struct UserQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub role_admin: Option<bool>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            role_admin: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl UserQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("status", status.to_string()));
        }
        if let Some(admin) = self.role_admin {
            pairs.push(("role_admin", admin.to_string()));
        }
        pairs.push(("limit", self.limit.to_string()));
        pairs.push(("offset", self.offset.to_string()));
        pairs
    }
}

fn validate_email(email: &str) -> Result<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ConsoleError::Validation(format!("'{email}' is not a valid email")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user() -> NewUser {
        NewUser {
            username: "ops".into(),
            password: "correct-horse".into(),
            name: "Ops Team".into(),
            email: "ops@example.com".into(),
        }
    }

    #[test]
    fn test_new_user_validation() {
        assert!(new_user().validate().is_ok());

        let mut short = new_user();
        short.password = "1234567".into();
        assert!(short.validate().is_err());

        let mut bad_email = new_user();
        bad_email.email = "ops.example.com".into();
        assert!(bad_email.validate().is_err());
    }

    #[test]
    fn test_user_query_defaults() {
        let pairs = UserQuery::default().query_pairs();
        assert_eq!(
            pairs,
            vec![("limit", "100".to_string()), ("offset", "0".to_string())]
        );
    }

    #[test]
    fn test_user_deserializes_with_numeric_id() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 3,
            "username": "alice",
            "is_admin": true
        }))
        .unwrap();
        assert_eq!(user.id, "3");
        assert_eq!(user.display_name(), "alice");
        assert!(!user.is_active);
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = UserPatch {
            is_active: Some(false),
            ..UserPatch::default()
        };
        assert!(patch.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "is_active": false })
        );
        assert!(UserPatch::default().validate().is_err());
    }
}
