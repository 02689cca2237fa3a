use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Application roles carried in the JWT `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Owner,
    Clinic,
    Welfare,
    Admin,
}

impl UserRole {
    pub fn parse(role: &str) -> Option<Self> {
        match role.to_ascii_uppercase().as_str() {
            "OWNER" => Some(UserRole::Owner),
            "CLINIC" => Some(UserRole::Clinic),
            "WELFARE" => Some(UserRole::Welfare),
            "ADMIN" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Owner => "OWNER",
            UserRole::Clinic => "CLINIC",
            UserRole::Welfare => "WELFARE",
            UserRole::Admin => "ADMIN",
        }
    }
}

impl User {
    /// The user's application role, when the token carried a recognized one.
    pub fn user_role(&self) -> Option<UserRole> {
        self.role.as_deref().and_then(UserRole::parse)
    }
}
