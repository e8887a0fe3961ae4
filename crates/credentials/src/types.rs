//! Credential type definitions, property schemas, and the type registry.
//!
//! A credential type declares the shape of its payload through a list of
//! property descriptors.  Properties can be conditionally visible based on
//! sibling values (`DisplayOptions`); validation evaluates visibility first,
//! so a hidden-by-condition property is never required.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CredentialError;

// ---------------------------------------------------------------------------
// Property descriptors
// ---------------------------------------------------------------------------

/// What kind of value a credential property holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyKind {
    String,
    Password,
    Number,
    Boolean,
    Options,
    Hidden,
}

/// Conditional visibility for a property, keyed on sibling property values.
///
/// `show`: the property is visible only when every listed sibling currently
/// holds one of the listed values.  `hide`: the property is hidden when any
/// listed sibling holds one of the listed values.  `hide` wins over `show`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayOptions {
    #[serde(default)]
    pub show: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub hide: HashMap<String, Vec<Value>>,
}

impl DisplayOptions {
    /// Evaluate visibility against the current payload values.
    pub fn is_visible(&self, payload: &Map<String, Value>) -> bool {
        for (sibling, values) in &self.hide {
            if payload.get(sibling).is_some_and(|v| values.contains(v)) {
                return false;
            }
        }
        for (sibling, values) in &self.show {
            if !payload.get(sibling).is_some_and(|v| values.contains(v)) {
                return false;
            }
        }
        true
    }
}

/// One property of a credential payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialProperty {
    pub name: String,
    pub display_name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values for `PropertyKind::Options`.
    #[serde(default)]
    pub options: Option<Vec<Value>>,
    #[serde(default)]
    pub display_options: Option<DisplayOptions>,
}

impl CredentialProperty {
    fn new(name: &str, display_name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind,
            required: false,
            default: None,
            options: None,
            display_options: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

// ---------------------------------------------------------------------------
// Type definitions
// ---------------------------------------------------------------------------

/// Result of a credential-type test hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub success: bool,
    pub message: String,
}

/// A test hook supplied by the type definition.  Plain function pointers keep
/// the registry cheap to share and immutable after startup.
pub type TestHook = fn(&Map<String, Value>) -> TestOutcome;

/// A registered credential type.
#[derive(Clone)]
pub struct CredentialTypeDefinition {
    /// Registry key, e.g. `httpBasicAuth`.
    pub name: String,
    pub display_name: String,
    /// Parent type names; membership of `oAuth2Api` marks the OAuth2 family.
    pub extends: Vec<String>,
    pub properties: Vec<CredentialProperty>,
    pub test: Option<TestHook>,
}

impl std::fmt::Debug for CredentialTypeDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialTypeDefinition")
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl CredentialTypeDefinition {
    /// Whether this type belongs to the OAuth2 family.
    pub fn is_oauth2(&self) -> bool {
        self.name == "oAuth2Api" || self.extends.iter().any(|e| e == "oAuth2Api")
    }

    /// Validate a payload against this type's property schema.
    ///
    /// Visibility is evaluated first: a property is required only when it is
    /// visible under the current payload.  Hidden-kind properties are not
    /// validated at all.
    ///
    /// # Errors
    /// [`CredentialError::ValidationFailed`] naming the offending property.
    pub fn validate(&self, payload: &Map<String, Value>) -> Result<(), CredentialError> {
        for property in &self.properties {
            if property.kind == PropertyKind::Hidden {
                continue;
            }
            let visible = property
                .display_options
                .as_ref()
                .map_or(true, |d| d.is_visible(payload));
            if !visible {
                continue;
            }

            let value = payload.get(&property.name);
            let missing = match value {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if missing {
                if property.required && property.default.is_none() {
                    return Err(CredentialError::ValidationFailed(format!(
                        "property '{}' is required",
                        property.name
                    )));
                }
                continue;
            }
            let value = value.expect("checked above");

            let kind_ok = match property.kind {
                PropertyKind::String | PropertyKind::Password => value.is_string(),
                PropertyKind::Number => value.is_number(),
                PropertyKind::Boolean => value.is_boolean(),
                PropertyKind::Options => property
                    .options
                    .as_ref()
                    .is_some_and(|allowed| allowed.contains(value)),
                PropertyKind::Hidden => true,
            };
            if !kind_ok {
                return Err(CredentialError::ValidationFailed(format!(
                    "property '{}' has the wrong type or an unsupported value",
                    property.name
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide credential-type registry.
///
/// Populated during the startup "register core + register plugins" phase and
/// read-only afterwards, so readers need no synchronization.
#[derive(Debug, Default)]
pub struct CredentialTypeRegistry {
    types: HashMap<String, Arc<CredentialTypeDefinition>>,
}

impl CredentialTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in types.
    pub fn with_core_types() -> Self {
        let mut registry = Self::new();
        registry.register(http_basic_auth());
        registry.register(api_key());
        registry.register(oauth2_api());
        registry
    }

    pub fn register(&mut self, definition: CredentialTypeDefinition) {
        self.types
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<Arc<CredentialTypeDefinition>> {
        self.types.get(name).cloned()
    }

    /// Resolve a type or fail with [`CredentialError::UnknownCredentialType`].
    pub fn resolve(&self, name: &str) -> Result<Arc<CredentialTypeDefinition>, CredentialError> {
        self.get(name)
            .ok_or_else(|| CredentialError::UnknownCredentialType(name.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Built-in types
// ---------------------------------------------------------------------------

fn http_basic_auth() -> CredentialTypeDefinition {
    CredentialTypeDefinition {
        name: "httpBasicAuth".into(),
        display_name: "Basic Auth".into(),
        extends: vec![],
        properties: vec![
            CredentialProperty::new("username", "Username", PropertyKind::String).required(),
            CredentialProperty::new("password", "Password", PropertyKind::Password).required(),
        ],
        test: Some(|payload| {
            let ok = payload.get("username").is_some_and(|v| v.is_string())
                && payload.get("password").is_some_and(|v| v.is_string());
            TestOutcome {
                success: ok,
                message: if ok {
                    "Credential format is valid".into()
                } else {
                    "Username and password are required".into()
                },
            }
        }),
    }
}

fn api_key() -> CredentialTypeDefinition {
    CredentialTypeDefinition {
        name: "apiKey".into(),
        display_name: "API Key".into(),
        extends: vec![],
        properties: vec![
            CredentialProperty::new("apiKey", "API Key", PropertyKind::Password).required(),
            CredentialProperty::new("headerName", "Header Name", PropertyKind::String)
                .with_default(Value::String("Authorization".into())),
            CredentialProperty::new("prefix", "Value Prefix", PropertyKind::String),
        ],
        test: Some(|payload| {
            let ok = payload.get("apiKey").is_some_and(|v| v.is_string());
            TestOutcome {
                success: ok,
                message: if ok {
                    "Credential format is valid".into()
                } else {
                    "apiKey is required".into()
                },
            }
        }),
    }
}

fn oauth2_api() -> CredentialTypeDefinition {
    CredentialTypeDefinition {
        name: "oAuth2Api".into(),
        display_name: "OAuth2 API".into(),
        extends: vec![],
        properties: vec![
            CredentialProperty {
                name: "grantType".into(),
                display_name: "Grant Type".into(),
                kind: PropertyKind::Options,
                required: true,
                default: Some(Value::String("authorizationCode".into())),
                options: Some(vec![
                    Value::String("authorizationCode".into()),
                    Value::String("clientCredentials".into()),
                ]),
                display_options: None,
            },
            CredentialProperty {
                name: "authUrl".into(),
                display_name: "Authorization URL".into(),
                kind: PropertyKind::String,
                required: true,
                default: None,
                options: None,
                // Client-credentials flows never hit the authorization
                // endpoint, so the URL is only demanded for auth-code grants.
                display_options: Some(DisplayOptions {
                    show: HashMap::from([(
                        "grantType".into(),
                        vec![Value::String("authorizationCode".into())],
                    )]),
                    hide: HashMap::new(),
                }),
            },
            CredentialProperty::new("accessTokenUrl", "Access Token URL", PropertyKind::String)
                .required(),
            CredentialProperty::new("clientId", "Client ID", PropertyKind::String).required(),
            CredentialProperty::new("clientSecret", "Client Secret", PropertyKind::Password)
                .required(),
            CredentialProperty::new("scope", "Scope", PropertyKind::String),
            // Filled in by the OAuth flow, never typed by the user.
            CredentialProperty::new("accessToken", "Access Token", PropertyKind::Hidden),
            CredentialProperty::new("refreshToken", "Refresh Token", PropertyKind::Hidden),
        ],
        test: Some(|payload| {
            let has_token = payload
                .get("accessToken")
                .and_then(Value::as_str)
                .is_some_and(|t| !t.is_empty());
            if has_token {
                TestOutcome {
                    success: true,
                    message: "Access token present".into(),
                }
            } else {
                // Valid shape without a token is not a failure; the user has
                // simply not completed the OAuth flow yet.
                TestOutcome {
                    success: true,
                    message: "Credential format is valid but no access token has been granted yet"
                        .into(),
                }
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn required_property_must_be_present_and_typed() {
        let def = http_basic_auth();
        assert!(def
            .validate(&object(json!({ "username": "alice", "password": "pw" })))
            .is_ok());
        assert!(def.validate(&object(json!({ "username": "alice" }))).is_err());
        assert!(def
            .validate(&object(json!({ "username": "alice", "password": 42 })))
            .is_err());
    }

    #[test]
    fn visibility_gates_requiredness() {
        let def = oauth2_api();

        // authUrl is required for authorizationCode …
        let missing_auth_url = object(json!({
            "grantType": "authorizationCode",
            "accessTokenUrl": "https://auth.example/token",
            "clientId": "id",
            "clientSecret": "secret",
        }));
        assert!(def.validate(&missing_auth_url).is_err());

        // … but invisible (and therefore not required) for clientCredentials.
        let client_credentials = object(json!({
            "grantType": "clientCredentials",
            "accessTokenUrl": "https://auth.example/token",
            "clientId": "id",
            "clientSecret": "secret",
        }));
        assert!(def.validate(&client_credentials).is_ok());
    }

    #[test]
    fn hidden_properties_are_never_validated() {
        let def = oauth2_api();
        let payload = object(json!({
            "grantType": "clientCredentials",
            "accessTokenUrl": "https://auth.example/token",
            "clientId": "id",
            "clientSecret": "secret",
            "accessToken": 12345,
        }));
        assert!(def.validate(&payload).is_ok());
    }

    #[test]
    fn options_kind_enforces_the_enum() {
        let def = oauth2_api();
        let payload = object(json!({
            "grantType": "implicit",
            "accessTokenUrl": "https://auth.example/token",
            "clientId": "id",
            "clientSecret": "secret",
        }));
        assert!(def.validate(&payload).is_err());
    }

    #[test]
    fn oauth2_test_hook_reports_missing_token_as_non_failure() {
        let def = oauth2_api();
        let hook = def.test.unwrap();
        let outcome = hook(&object(json!({
            "grantType": "clientCredentials",
            "accessTokenUrl": "https://auth.example/token",
            "clientId": "id",
            "clientSecret": "secret",
        })));
        assert!(outcome.success);
        assert!(outcome.message.contains("no access token"));
    }
}
