//! `httpRequest` — call an external HTTP API, optionally authenticated.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use credentials::RequestDescriptor;

use crate::descriptor::{CredentialDefinition, NodeDescriptor};
use crate::item::{main_port, Item, PairedItem, PortData};
use crate::properties::{NodeProperty, PropertyKind};
use crate::traits::{InvocationContext, NodeType};
use crate::NodeError;

pub struct HttpRequest {
    descriptor: NodeDescriptor,
}

impl HttpRequest {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let descriptor = NodeDescriptor::new("httpRequest", "HTTP Request", 1)
            .with_group(&["action"])
            .with_properties(vec![
                NodeProperty::new("url", "URL", PropertyKind::String).required(),
                NodeProperty::new("method", "Method", PropertyKind::Options)
                    .with_default(Value::String("GET".into()))
                    .with_options(vec![
                        json!("GET"),
                        json!("POST"),
                        json!("PUT"),
                        json!("PATCH"),
                        json!("DELETE"),
                    ]),
                NodeProperty::new("headers", "Headers", PropertyKind::Collection),
                NodeProperty::new("body", "Body", PropertyKind::Json),
                NodeProperty::new("authentication", "Authentication", PropertyKind::Options)
                    .with_default(Value::String("none".into()))
                    .with_options(vec![
                        json!("none"),
                        json!("httpBasicAuth"),
                        json!("apiKey"),
                        json!("oAuth2Api"),
                    ]),
            ])
            .with_credentials(vec![
                CredentialDefinition {
                    credential_type: "httpBasicAuth".into(),
                    required: false,
                },
                CredentialDefinition {
                    credential_type: "apiKey".into(),
                    required: false,
                },
                CredentialDefinition {
                    credential_type: "oAuth2Api".into(),
                    required: false,
                },
            ]);
        Self { descriptor }
    }
}

#[async_trait]
impl NodeType for HttpRequest {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: &InvocationContext) -> Result<PortData, NodeError> {
        let url = ctx.require_str("url")?;
        let method = ctx.param_str("method", "GET");
        let authentication = ctx.param_str("authentication", "none");

        debug!(%method, %url, "dispatching HTTP request");
        let mut request = RequestDescriptor::new(&method, &url);
        if let Some(headers) = ctx.parameters.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = value.as_str().map_or_else(|| value.to_string(), str::to_owned);
                request.headers.insert(name.clone(), value);
            }
        }
        request.body = ctx.parameters.get("body").cloned().filter(|b| !b.is_null());

        let response = if authentication == "none" {
            ctx.helpers.request(request, &ctx.cancel).await?
        } else {
            let payload = ctx.credentials.get(&authentication).ok_or_else(|| {
                NodeError::Fatal(format!(
                    "credential of type '{authentication}' is not available to this node"
                ))
            })?;
            ctx.helpers
                .request_with_authentication(&authentication, payload, request, &ctx.cancel)
                .await?
        };

        Ok(main_port(vec![Item {
            json: response,
            binary: None,
            paired_item: Some(PairedItem { item: 0, input: None }),
        }]))
    }
}
