//! Token pairs and their extraction from login/refresh responses

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bastion_config::TokenSource;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::errors::{HttpError, HttpResult};
use crate::types::HttpResponse;

/// Access and refresh token issued together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    /// Build a pair, rejecting empty tokens
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> HttpResult<Self> {
        let pair = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        };
        pair.validate()?;
        Ok(pair)
    }

    pub fn validate(&self) -> HttpResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(HttpError::InvalidRequest("access token must not be empty".to_string()));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(HttpError::InvalidRequest("refresh token must not be empty".to_string()));
        }
        Ok(())
    }

    /// `exp` claim of the access token, if it is a JWT carrying one
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        expires_at(&self.access_token)
    }
}

/// Decode the `exp` claim of a JWT without verifying it
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: JsonValue = serde_json::from_slice(&bytes).ok()?;
    let exp = match claims.get("exp")? {
        JsonValue::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64))?,
        _ => return None,
    };
    Utc.timestamp_opt(exp, 0).single()
}

/// Whether the token's `exp` claim falls within `skew` of now
///
/// Opaque tokens are never considered expired; the server decides.
pub fn is_expired(token: &str, skew: Duration) -> bool {
    is_expired_at(token, skew, Utc::now())
}

pub fn is_expired_at(token: &str, skew: Duration, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Some(exp) => {
            let skew = ChronoDuration::from_std(skew).unwrap_or_else(|_| ChronoDuration::zero());
            exp - skew <= now
        }
        None => false,
    }
}

/// Pull a token pair out of a login or refresh response
///
/// A response without a refresh token keeps `previous_refresh`, as servers
/// commonly rotate only the access token.
pub fn extract_tokens(
    source: &TokenSource,
    response: &HttpResponse,
    previous_refresh: Option<&str>,
) -> HttpResult<TokenPair> {
    let (access, refresh) = match source {
        TokenSource::Body {
            access_token_field,
            refresh_token_field,
            ..
        } => (
            lookup_str(&response.body, access_token_field),
            lookup_str(&response.body, refresh_token_field),
        ),
        TokenSource::Cookies {
            access_cookie,
            refresh_cookie,
        } => (
            set_cookie_value(response, access_cookie),
            set_cookie_value(response, refresh_cookie),
        ),
    };

    let access = access.ok_or_else(|| {
        HttpError::InvalidJson("authentication response did not contain an access token".to_string())
    })?;
    let refresh = refresh.or_else(|| previous_refresh.map(str::to_string)).ok_or_else(|| {
        HttpError::InvalidJson("authentication response did not contain a refresh token".to_string())
    })?;

    TokenPair::new(access, refresh)
}

/// User payload returned by login, `Null` when absent
pub fn extract_user(source: &TokenSource, response: &HttpResponse) -> JsonValue {
    match source {
        TokenSource::Body {
            user_field: Some(field),
            ..
        } => lookup(&response.body, field).cloned().unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

/// Follow a dotted path such as `data.tokens.access`
fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

fn lookup_str(value: &JsonValue, path: &str) -> Option<String> {
    lookup(value, path)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn set_cookie_value(response: &HttpResponse, name: &str) -> Option<String> {
    response.header_all("set-cookie").into_iter().find_map(|cookie| {
        let pair = cookie.split(';').next()?;
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name && !value.trim().is_empty()).then(|| value.trim().to_string())
    })
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_pair_validation() {
        assert!(TokenPair::new("a1", "r1").is_ok());
        assert!(TokenPair::new("", "r1").is_err());
        assert!(TokenPair::new("a1", "  ").is_err());
    }

    #[test]
    fn test_token_pair_serde() {
        let pair = TokenPair::new("a1", "r1").unwrap();
        let value = serde_json::to_value(&pair).unwrap();
        assert_eq!(value, json!({"accessToken": "a1", "refreshToken": "r1"}));
    }

    #[test]
    fn test_jwt_expiry() {
        let now = Utc::now();
        let past = jwt_with_exp(now.timestamp() - 60);
        let soon = jwt_with_exp(now.timestamp() + 10);
        let later = jwt_with_exp(now.timestamp() + 3600);

        assert!(is_expired_at(&past, Duration::ZERO, now));
        assert!(is_expired_at(&soon, Duration::from_secs(30), now));
        assert!(!is_expired_at(&later, Duration::from_secs(30), now));
        assert_eq!(expires_at(&later).map(|exp| exp.timestamp()), Some(now.timestamp() + 3600));
    }

    #[test]
    fn test_opaque_tokens_never_expire() {
        assert_eq!(expires_at("opaque-token"), None);
        assert_eq!(expires_at("a.b.c"), None);
        assert!(!is_expired("opaque-token", Duration::from_secs(30)));
    }

    #[test]
    fn test_extract_from_body() {
        let source = TokenSource::Body {
            access_token_field: "data.access".to_string(),
            refresh_token_field: "data.refresh".to_string(),
            user_field: Some("data.user".to_string()),
        };
        let response = HttpResponse::new(
            200,
            json!({"data": {"access": "a1", "refresh": "r1", "user": {"id": 7}}}),
        );

        let pair = extract_tokens(&source, &response, None).unwrap();
        assert_eq!(pair, TokenPair::new("a1", "r1").unwrap());
        assert_eq!(extract_user(&source, &response), json!({"id": 7}));
    }

    #[test]
    fn test_extract_keeps_previous_refresh_token() {
        let source = TokenSource::default();
        let response = HttpResponse::new(200, json!({"accessToken": "a2"}));

        let pair = extract_tokens(&source, &response, Some("r1")).unwrap();
        assert_eq!(pair.refresh_token, "r1");

        assert!(extract_tokens(&source, &response, None).is_err());
    }

    #[test]
    fn test_extract_from_cookies() {
        let source = TokenSource::Cookies {
            access_cookie: "at".to_string(),
            refresh_cookie: "rt".to_string(),
        };
        let response = HttpResponse::new(200, JsonValue::Null)
            .with_header("set-cookie", "at=a1; Path=/; HttpOnly")
            .with_header("set-cookie", "rt=r1; Path=/auth; HttpOnly");

        let pair = extract_tokens(&source, &response, None).unwrap();
        assert_eq!(pair, TokenPair::new("a1", "r1").unwrap());
        assert_eq!(extract_user(&source, &response), JsonValue::Null);
    }
}
