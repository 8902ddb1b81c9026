//! Stored OAuth credentials for external providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider name for Google / Gmail connections
pub const PROVIDER_GOOGLE: &str = "google";

/// OAuth tokens linking a user to one external provider account.
///
/// At most one connection exists per (user, provider) pair; re-authorizing
/// replaces the stored tokens in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    /// User this connection belongs to
    pub user_id: Uuid,

    /// Provider name ("google")
    pub provider: String,

    /// Provider-side account id
    pub provider_account_id: Option<String>,

    /// Provider-side account email
    pub provider_account_email: Option<String>,

    /// Current access token
    pub access_token: String,

    /// Refresh token, absent if the provider never issued one
    pub refresh_token: Option<String>,

    /// When the access token expires
    pub expires_at: Option<DateTime<Utc>>,

    /// Token type as reported by the provider (usually "Bearer")
    pub token_type: Option<String>,

    /// Granted OAuth scopes
    pub scope: Option<String>,

    /// Last time the tokens were written
    pub updated_at: DateTime<Utc>,
}

impl ProviderConnection {
    /// Whether the access token has expired as of `now`.
    ///
    /// Connections without an expiry are treated as non-expiring.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Fields supplied when creating or replacing a connection
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub provider: String,
    pub provider_account_id: Option<String>,
    pub provider_account_email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn connection(expires_at: Option<DateTime<Utc>>) -> ProviderConnection {
        ProviderConnection {
            user_id: Uuid::new_v4(),
            provider: PROVIDER_GOOGLE.to_string(),
            provider_account_id: Some("123".to_string()),
            provider_account_email: Some("a@b.c".to_string()),
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
            token_type: Some("Bearer".to_string()),
            scope: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(connection(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!connection(Some(now + Duration::hours(1))).is_expired(now));
        assert!(!connection(None).is_expired(now));
    }
}
