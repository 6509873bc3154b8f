//! Envelope rendering.
//!
//! Every envelope is compiled once, when the registry is handed to the
//! renderer, and registered under its `group/service` slot. Caller parameters
//! are allow-listed against the template's declared parameters, merged with
//! the builtin variables and substituted with handlebars in strict mode, so an
//! unresolved placeholder is an error.

use crate::config::ClientIdentity;
use crate::error::GatewayError;
use crate::registry::TemplateRegistry;
use crate::template::Template;
use handlebars::Handlebars;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Fresh random identifier, e.g. for `<xroad:id>`.
pub const VAR_UUID: &str = "generate_uuid";
/// X-Road client identity block. Use `{{{generate_client}}}` so it is not escaped.
pub const VAR_CLIENT: &str = "generate_client";
/// Configured X-Road instance name.
pub const VAR_INSTANCE: &str = "generate_instance";

/// Reserved variable names; callers cannot override these.
pub const BUILTIN_VARIABLES: &[&str] = &[VAR_UUID, VAR_CLIENT, VAR_INSTANCE];

/// Renders templates into wire envelopes.
pub struct Renderer {
    handlebars: Handlebars<'static>,
    identity: ClientIdentity,
    client_block: String,
}

impl Renderer {
    /// Create a renderer with no compiled envelopes.
    pub fn new(identity: ClientIdentity) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);

        let client_block = client_block(&identity);
        Self {
            handlebars,
            identity,
            client_block,
        }
    }

    /// Create a renderer with every envelope in `registry` compiled.
    pub fn for_registry(
        identity: ClientIdentity,
        registry: &TemplateRegistry,
    ) -> Result<Self, GatewayError> {
        let mut renderer = Self::new(identity);
        for (group, service, template) in registry.iter() {
            renderer.register(group, service, template)?;
        }
        Ok(renderer)
    }

    /// Compile the envelope of `template` into the `group/service` slot.
    pub fn register(
        &mut self,
        group: &str,
        service: &str,
        template: &Template,
    ) -> Result<(), GatewayError> {
        let name = slot_name(group, service);
        self.handlebars
            .register_template_string(&name, template.envelope())
            .map_err(|e| GatewayError::Template(format!("{}: invalid envelope: {}", name, e)))
    }

    /// Render the compiled envelope of `group/service` with the caller's parameters.
    ///
    /// `template` supplies the declared parameters. Undeclared caller keys are
    /// dropped. Builtins win over caller values.
    pub fn render(
        &self,
        group: &str,
        service: &str,
        template: &Template,
        params: &HashMap<String, String>,
    ) -> Result<String, GatewayError> {
        let name = slot_name(group, service);
        if !self.handlebars.has_template(&name) {
            return Err(GatewayError::Internal(format!("No compiled envelope for {}", name)));
        }

        let context = self.context(template, params);
        self.handlebars
            .render(&name, &Value::Object(context))
            .map_err(|e| GatewayError::Render(e.to_string()))
    }

    fn context(&self, template: &Template, params: &HashMap<String, String>) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert(VAR_UUID.to_string(), Value::String(Uuid::new_v4().to_string()));
        context.insert(VAR_CLIENT.to_string(), Value::String(self.client_block.clone()));
        context.insert(
            VAR_INSTANCE.to_string(),
            Value::String(self.identity.instance.clone()),
        );

        for (key, value) in params {
            if template.declares(key) && !context.contains_key(key) {
                context.insert(key.clone(), Value::String(value.clone()));
            }
        }
        context
    }
}

fn slot_name(group: &str, service: &str) -> String {
    format!("{}/{}", group, service)
}

fn client_block(identity: &ClientIdentity) -> String {
    format!(
        "<xroad:client id:objectType=\"SUBSYSTEM\">\n\
         <id:xRoadInstance>{}</id:xRoadInstance>\n\
         <id:memberClass>{}</id:memberClass>\n\
         <id:memberCode>{}</id:memberCode>\n\
         <id:subsystemCode>{}</id:subsystemCode>\n\
         </xroad:client>",
        xml_escape(&identity.instance),
        xml_escape(&identity.member_class),
        xml_escape(&identity.member_code),
        xml_escape(&identity.subsystem_code)
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
