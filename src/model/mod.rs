//! Desired state of one managed virtual machine, one instance per watched file.
//!
//! # Data Flow
//! ```text
//! <watched dir>/<file>.json
//!     → InstanceConfig (registry entry for the file path)
//!         ├── server:       ServerInfo  → login, distribution, ram, cloud (ProviderRef)
//!         ├── installation: InstallationInfo → server / database / framework / language, packages
//!         └── parameters:   ParametersInfo
//! ```
//!
//! # Design Decisions
//! - The three sections keep their live instances across reloads of the file
//! - `cloud` names a provider; the converter resolves it through the
//!   `ProviderDirectory` handed down in the apply context

use std::collections::HashMap;

use crate::document::{Document, Fields};
use crate::reconcile::{ApplyContext, ConfigError, Configurable, Element, Schema, Shared};
use crate::vps::{ProviderDirectory, VpsProvider};

/// Root object of a per-machine file.
#[derive(Default)]
pub struct InstanceConfig {
    pub server: Option<Shared<ServerInfo>>,
    pub installation: Option<Shared<InstallationInfo>>,
    pub parameters: Option<Shared<ParametersInfo>>,
}

impl Configurable for InstanceConfig {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("server", |c: &mut InstanceConfig| &mut c.server).preserve();
        schema.field("installation", |c: &mut InstanceConfig| &mut c.installation).preserve();
        schema.field("parameters", |c: &mut InstanceConfig| &mut c.parameters).preserve();
    }
}

#[derive(Default)]
pub struct ServerInfo {
    pub login: Option<Shared<LoginInfo>>,
    pub distribution: Option<String>,
    /// Memory in MB.
    pub ram: u32,
    pub cloud: Option<ProviderRef>,
}

impl Configurable for ServerInfo {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("login", |s: &mut ServerInfo| &mut s.login);
        schema.field("distribution", |s: &mut ServerInfo| &mut s.distribution);
        schema.field("ram", |s: &mut ServerInfo| &mut s.ram);
        schema.field("cloud", |s: &mut ServerInfo| &mut s.cloud);
        schema.converter(|_s: &ServerInfo, doc: &Document, cx: &ApplyContext<'_>| ProviderRef::resolve(doc, cx));
    }
}

/// A configured provider, looked up by name.
#[derive(Clone)]
pub struct ProviderRef {
    pub name: String,
    pub provider: Shared<dyn VpsProvider>,
}

impl std::fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRef").field("name", &self.name).finish()
    }
}

impl ProviderRef {
    /// `"east"`, or `{"type": "linode", "name": "east"}`; an object without a name refers to its type.
    fn resolve(doc: &Document, cx: &ApplyContext<'_>) -> Result<Self, ConfigError> {
        let name = match doc {
            Document::Object(fields) => fields
                .get("name")
                .or_else(|| fields.get(cx.reconciler().discriminator()))
                .and_then(Document::as_str),
            other => other.as_str(),
        }
        .ok_or_else(|| ConfigError::ShapeMismatch {
            key: "cloud".to_string(),
            expected: "provider name",
            found: doc.kind(),
        })?;

        let directory = cx.capability::<ProviderDirectory>()?;
        let provider = directory.get(name).ok_or_else(|| ConfigError::UnmappedVariant {
            element: "provider",
            variant: name.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            provider,
        })
    }
}

impl Element for ProviderRef {
    const IDENTITY: bool = false;

    fn pass_through(key: &str, doc: &Document) -> Result<Option<Self>, ConfigError> {
        if doc.is_null() {
            return Ok(None);
        }
        Err(ConfigError::InstantiationFailure {
            element: "provider reference",
            reason: format!("`{}` needs a converter", key),
        })
    }

    fn instantiate() -> Result<Self, ConfigError> {
        Err(ConfigError::InstantiationFailure {
            element: "provider reference",
            reason: "providers are referenced, never built in place".to_string(),
        })
    }

    fn descend(&self, _fields: &Fields, _cx: &mut ApplyContext<'_>) -> Result<(), ConfigError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct LoginInfo {
    pub username: String,
    pub password: Option<String>,
    pub port: u16,
}

impl Default for LoginInfo {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: None,
            port: 22,
        }
    }
}

impl Configurable for LoginInfo {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("username", |l: &mut LoginInfo| &mut l.username);
        schema.field("password", |l: &mut LoginInfo| &mut l.password);
        schema.field("port", |l: &mut LoginInfo| &mut l.port);
    }
}

/// A named, optionally versioned piece of software.
#[derive(Debug, Default)]
pub struct Component {
    pub name: String,
    pub version: Option<String>,
}

impl Configurable for Component {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("name", |c: &mut Component| &mut c.name);
        schema.field("version", |c: &mut Component| &mut c.version);
    }
}

#[derive(Default)]
pub struct InstallationInfo {
    pub server: Option<Shared<Component>>,
    pub database: Option<Shared<Component>>,
    pub framework: Option<Shared<Component>>,
    pub language: Option<Shared<Component>>,
    pub packages: Vec<Shared<Component>>,
}

impl Configurable for InstallationInfo {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("server", |i: &mut InstallationInfo| &mut i.server);
        schema.field("database", |i: &mut InstallationInfo| &mut i.database);
        schema.field("framework", |i: &mut InstallationInfo| &mut i.framework);
        schema.field("language", |i: &mut InstallationInfo| &mut i.language);
        schema.field("packages", |i: &mut InstallationInfo| &mut i.packages);
    }
}

/// Free-form settings handed to the installation.
#[derive(Debug, Default)]
pub struct ParametersInfo {
    pub hostname: Option<String>,
    pub timezone: Option<String>,
    pub env: HashMap<String, String>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl Configurable for ParametersInfo {
    fn declare(schema: &mut Schema<Self>) {
        schema.field("hostname", |p: &mut ParametersInfo| &mut p.hostname);
        schema.field("timezone", |p: &mut ParametersInfo| &mut p.timezone);
        schema.field("env", |p: &mut ParametersInfo| &mut p.env);
        schema.field("extra", |p: &mut ParametersInfo| &mut p.extra);
    }
}
