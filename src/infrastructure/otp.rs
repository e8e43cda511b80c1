use crate::domain::authorization::{AuthenticationChallenge, AuthenticationMethod, Authorization};
use crate::domain::ports::ScaProvider;
use crate::error::{RailError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Sandbox SCA provider. Codes are kept in memory instead of being sent to
/// the payer; tests and the CLI read them back with [`delivered_code`].
///
/// [`delivered_code`]: InMemoryOtpProvider::delivered_code
#[derive(Debug, Default)]
pub struct InMemoryOtpProvider {
    codes: Mutex<HashMap<String, String>>,
    fixed_code: Option<String>,
    redirect_base: Option<String>,
}

impl InMemoryOtpProvider {
    /// Issues a random six digit code per challenge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the same code for every challenge.
    pub fn with_fixed_code(code: impl Into<String>) -> Self {
        Self {
            fixed_code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn with_redirect_base(mut self, base: impl Into<String>) -> Self {
        self.redirect_base = Some(base.into());
        self
    }

    pub fn delivered_code(&self, challenge_token: &str) -> Option<String> {
        self.codes
            .lock()
            .ok()
            .and_then(|codes| codes.get(challenge_token).cloned())
    }

    fn next_code(&self) -> String {
        match &self.fixed_code {
            Some(code) => code.clone(),
            None => format!("{:06}", rand::thread_rng().gen_range(0..1_000_000)),
        }
    }
}

#[async_trait]
impl ScaProvider for InMemoryOtpProvider {
    async fn issue(
        &self,
        authorization: &Authorization,
        method: AuthenticationMethod,
        expires_at: DateTime<Utc>,
    ) -> Result<AuthenticationChallenge> {
        let token = format!("sca_{}", Uuid::new_v4().simple());
        let code = self.next_code();
        self.codes
            .lock()
            .map_err(|_| RailError::RailAuthentication("OTP store unavailable".into()))?
            .insert(token.clone(), code);

        let redirect_url = match method {
            AuthenticationMethod::OauthRedirect => Some(format!(
                "{}/authorize?challenge={}",
                self.redirect_base
                    .as_deref()
                    .unwrap_or("https://sca.sandbox.invalid"),
                token
            )),
            _ => None,
        };

        debug!(authorization_id = %authorization.id, challenge = %token, ?method, "SCA challenge issued");
        Ok(AuthenticationChallenge {
            method,
            challenge_token: token,
            redirect_url,
            expires_at,
        })
    }

    async fn verify(&self, challenge: &AuthenticationChallenge, response: &str) -> Result<bool> {
        let mut codes = self
            .codes
            .lock()
            .map_err(|_| RailError::RailAuthentication("OTP store unavailable".into()))?;
        let matched = codes
            .get(&challenge.challenge_token)
            .is_some_and(|code| code == response.trim());
        if matched {
            codes.remove(&challenge.challenge_token);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::BankAccount;
    use crate::domain::idempotency::IdempotencyKey;
    use crate::domain::money::{Currency, Money};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn authorization() -> Authorization {
        let now = Utc::now();
        Authorization::new(
            Money::new(dec!(1.00), Currency::Eur).unwrap(),
            BankAccount::from_iban("Alice", "DE89370400440532013000", None).unwrap(),
            BankAccount::from_iban("Bob", "GB82WEST12345698765432", None).unwrap(),
            IdempotencyKey::generate(now),
            None,
            now,
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn test_issued_code_verifies_once() {
        let provider = InMemoryOtpProvider::new();
        let expires_at = Utc::now() + Duration::minutes(5);
        let challenge = provider
            .issue(&authorization(), AuthenticationMethod::SmsOtp, expires_at)
            .await
            .unwrap();

        let code = provider.delivered_code(&challenge.challenge_token).unwrap();
        assert_eq!(code.len(), 6);
        assert!(!provider.verify(&challenge, "not-it").await.unwrap());
        assert!(provider.verify(&challenge, &code).await.unwrap());
        assert!(!provider.verify(&challenge, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_redirect_challenge_carries_url() {
        let provider = InMemoryOtpProvider::with_fixed_code("123456")
            .with_redirect_base("https://bank.example");
        let challenge = provider
            .issue(
                &authorization(),
                AuthenticationMethod::OauthRedirect,
                Utc::now() + Duration::minutes(10),
            )
            .await
            .unwrap();
        let url = challenge.redirect_url.unwrap();
        assert!(url.starts_with("https://bank.example/authorize?challenge=sca_"));
    }
}
