//! Request authentication policies.
//!
//! [`apply_authentication`] mutates an outbound request descriptor to carry
//! the credential, per the policy of the credential type.  The descriptor is
//! transport-agnostic; the HTTP client that finally sends it lives with the
//! node implementations.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::CredentialTypeDefinition;
use crate::CredentialError;

/// An outbound request before authentication is applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

impl RequestDescriptor {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// Mutate `request` to carry the given decrypted credential payload.
///
/// Built-in policies: `httpBasicAuth` (Basic header), `apiKey` (configurable
/// header, optional prefix), and the OAuth2 family (`Bearer` token).
///
/// # Errors
/// [`CredentialError::UnsupportedAuthType`] when the type has no policy;
/// [`CredentialError::ValidationFailed`] when the payload lacks the fields
/// the policy needs.
pub fn apply_authentication(
    request: &mut RequestDescriptor,
    credential_type: &CredentialTypeDefinition,
    payload: &Map<String, Value>,
) -> Result<(), CredentialError> {
    let text = |field: &str| -> Result<&str, CredentialError> {
        payload
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CredentialError::ValidationFailed(format!("payload is missing '{field}'"))
            })
    };

    match credential_type.name.as_str() {
        "httpBasicAuth" => {
            let token = BASE64_STANDARD.encode(format!("{}:{}", text("username")?, text("password")?));
            request
                .headers
                .insert("Authorization".into(), format!("Basic {token}"));
            Ok(())
        }
        "apiKey" => {
            let key = text("apiKey")?;
            let header = payload
                .get("headerName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("Authorization");
            let value = match payload.get("prefix").and_then(Value::as_str) {
                Some(prefix) if !prefix.is_empty() => format!("{prefix} {key}"),
                _ => key.to_owned(),
            };
            request.headers.insert(header.to_owned(), value);
            Ok(())
        }
        _ if credential_type.is_oauth2() => {
            let token = text("accessToken")?;
            request
                .headers
                .insert("Authorization".into(), format!("Bearer {token}"));
            Ok(())
        }
        other => Err(CredentialError::UnsupportedAuthType(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialTypeRegistry;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn basic_auth_sets_the_expected_header() {
        let registry = CredentialTypeRegistry::with_core_types();
        let def = registry.get("httpBasicAuth").unwrap();
        let mut request = RequestDescriptor::new("GET", "https://x/y");

        apply_authentication(
            &mut request,
            &def,
            &object(json!({ "username": "alice", "password": "s3cret" })),
        )
        .unwrap();

        assert_eq!(
            request.headers["Authorization"],
            format!("Basic {}", BASE64_STANDARD.encode("alice:s3cret"))
        );
    }

    #[test]
    fn api_key_honours_header_name_and_prefix() {
        let registry = CredentialTypeRegistry::with_core_types();
        let def = registry.get("apiKey").unwrap();

        let mut request = RequestDescriptor::new("GET", "https://x/y");
        apply_authentication(
            &mut request,
            &def,
            &object(json!({ "apiKey": "k-123", "headerName": "X-Api-Key" })),
        )
        .unwrap();
        assert_eq!(request.headers["X-Api-Key"], "k-123");

        let mut request = RequestDescriptor::new("GET", "https://x/y");
        apply_authentication(
            &mut request,
            &def,
            &object(json!({ "apiKey": "k-123", "prefix": "Bearer" })),
        )
        .unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer k-123");
    }

    #[test]
    fn oauth2_family_uses_the_bearer_token() {
        let registry = CredentialTypeRegistry::with_core_types();
        let def = registry.get("oAuth2Api").unwrap();
        let mut request = RequestDescriptor::new("POST", "https://x/y");

        apply_authentication(&mut request, &def, &object(json!({ "accessToken": "tok" }))).unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer tok");
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let def = CredentialTypeDefinition {
            name: "ftpAccount".into(),
            display_name: "FTP".into(),
            extends: vec![],
            properties: vec![],
            test: None,
        };
        let mut request = RequestDescriptor::new("GET", "https://x/y");
        assert!(matches!(
            apply_authentication(&mut request, &def, &Map::new()),
            Err(CredentialError::UnsupportedAuthType(_))
        ));
    }
}
