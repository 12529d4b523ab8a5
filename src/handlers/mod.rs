pub mod orders;
pub mod payments;
pub mod stock;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Caller identity propagated by a trusted upstream proxy. Both headers are
/// optional; endpoints only use this to attribute audit and history rows.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<i64>,
    pub email: Option<String>,
}

impl Caller {
    /// The string recorded as the acting party, preferring the email.
    pub fn actor(&self) -> Option<String> {
        self.email
            .clone()
            .or_else(|| self.user_id.map(|id| format!("user:{}", id)))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let email = parts
            .headers
            .get("x-actor-email")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Caller { user_id, email })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_prefers_email_over_id() {
        let caller = Caller {
            user_id: Some(3),
            email: Some("ops@example.com".into()),
        };
        assert_eq!(caller.actor().as_deref(), Some("ops@example.com"));

        let id_only = Caller {
            user_id: Some(3),
            email: None,
        };
        assert_eq!(id_only.actor().as_deref(), Some("user:3"));

        assert_eq!(Caller::default().actor(), None);
    }
}
