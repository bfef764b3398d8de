use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};

use crate::domain::entity::TokenClaims;
use crate::error::AuthSessionError;

/// CredentialIssuer は資格情報の署名・検証を担う外部コラボレーターのトレイト。
///
/// `verify` は署名と有効期限のみを検査する。セッションの生存確認は TokenManager が行う。
#[cfg_attr(test, mockall::automock)]
pub trait CredentialIssuer: Send + Sync {
    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthSessionError>;
    fn verify(&self, token: &str) -> Result<TokenClaims, AuthSessionError>;
}

/// JwtCredentialIssuer は HS256 の JWT を発行・検証する CredentialIssuer 実装。
pub struct JwtCredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialIssuer {
    pub fn new(secret: &SecretString, issuer: &str) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.validate_aud = false;
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation,
        }
    }
}

impl CredentialIssuer for JwtCredentialIssuer {
    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthSessionError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthSessionError::Internal(format!("failed to sign token: {e}")))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, AuthSessionError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    AuthSessionError::InvalidCredential("token expired".to_string())
                }
                _ => AuthSessionError::InvalidCredential(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::TokenType;
    use chrono::Duration;

    fn issuer() -> JwtCredentialIssuer {
        JwtCredentialIssuer::new(&SecretString::new("test-secret".to_string()), "k1s0-auth")
    }

    #[test]
    fn sign_and_verify() {
        let claims = TokenClaims::new(
            "user-1",
            Some("sess-1"),
            Some("device-1"),
            TokenType::Refresh,
            "k1s0-auth",
            Duration::days(7),
        );
        let token = issuer().sign(&claims).unwrap();
        let verified = issuer().verify(&token).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims =
            TokenClaims::new("user-1", None, None, TokenType::Access, "k1s0-auth", Duration::minutes(15));
        claims.exp = claims.iat - 60;
        let token = issuer().sign(&claims).unwrap();
        let err = issuer().verify(&token).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims =
            TokenClaims::new("user-1", None, None, TokenType::Access, "k1s0-auth", Duration::minutes(15));
        let other = JwtCredentialIssuer::new(&SecretString::new("other".to_string()), "k1s0-auth");
        let token = other.sign(&claims).unwrap();
        assert!(matches!(
            issuer().verify(&token),
            Err(AuthSessionError::InvalidCredential(_))
        ));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let claims =
            TokenClaims::new("user-1", None, None, TokenType::Access, "someone-else", Duration::minutes(15));
        let token = issuer().sign(&claims).unwrap();
        assert!(issuer().verify(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(issuer().verify("not-a-token").is_err());
    }
}
