//! ID 令牌校验
//!
//! 令牌为 HS256 签名的 JWT，签发方和受众必须与配置一致。
//! 登录方式来自嵌套的 `firebase.sign_in_provider` 声明。

use application::{IdentityError, IdentityVerifier};
use async_trait::async_trait;
use domain::AuthToken;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ProviderClaims {
    #[serde(default)]
    sign_in_provider: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    picture: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    firebase: ProviderClaims,
}

impl From<IdTokenClaims> for AuthToken {
    fn from(claims: IdTokenClaims) -> Self {
        AuthToken {
            subject: claims.sub,
            name: claims.name,
            picture_url: claims.picture,
            provider: claims.firebase.sign_in_provider,
            email_address: claims.email,
            email_verified: claims.email_verified,
        }
    }
}

pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify_id_token(&self, raw_token: &str) -> Result<AuthToken, IdentityError> {
        if raw_token.trim().is_empty() {
            return Err(IdentityError::InvalidToken("empty id token".to_string()));
        }

        let data = decode::<IdTokenClaims>(raw_token, &self.key, &self.validation)
            .map_err(|err| IdentityError::InvalidToken(err.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(IdentityError::InvalidToken("missing subject".to_string()));
        }
        Ok(data.claims.into())
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    const SECRET: &str = "an-identity-secret-for-tests-only";

    #[derive(Serialize)]
    struct Provider<'a> {
        sign_in_provider: &'a str,
    }

    #[derive(Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        iss: &'a str,
        aud: &'a str,
        exp: i64,
        name: &'a str,
        picture: &'a str,
        email: &'a str,
        email_verified: bool,
        firebase: Provider<'a>,
    }

    fn token(secret: &str, iss: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: "subject-1",
            iss,
            aud: "chat",
            exp: chrono::Utc::now().timestamp() + exp_offset,
            name: "Alice",
            picture: "https://example.com/a.png",
            email: "alice@example.com",
            email_verified: true,
            firebase: Provider {
                sign_in_provider: "google.com",
            },
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier() -> JwtIdentityVerifier {
        JwtIdentityVerifier::new(SECRET, "https://issuer.test", "chat")
    }

    #[tokio::test]
    async fn valid_token_maps_every_claim() {
        let auth = verifier()
            .verify_id_token(&token(SECRET, "https://issuer.test", 600))
            .await
            .unwrap();

        assert_eq!(auth.subject, "subject-1");
        assert_eq!(auth.name, "Alice");
        assert_eq!(auth.picture_url, "https://example.com/a.png");
        assert_eq!(auth.provider, "google.com");
        assert_eq!(auth.email_address, "alice@example.com");
        assert!(auth.email_verified);
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let err = verifier().verify_id_token("  ").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn wrong_signature_issuer_or_expiry_is_rejected() {
        let verifier = verifier();

        for raw in [
            token("another-secret-of-enough-length", "https://issuer.test", 600),
            token(SECRET, "https://elsewhere.test", 600),
            token(SECRET, "https://issuer.test", -3600),
        ] {
            let err = verifier.verify_id_token(&raw).await.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidToken(_)));
        }
    }
}
