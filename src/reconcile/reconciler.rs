//! Applying documents onto live objects.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;

use crate::document::{Document, Fields};
use crate::observability::metrics;
use crate::reconcile::binding::{
    Binding, Configurable, Element, ElementRule, FieldValue, KeyOps, Outcome, Pending, Shared, TypedOps,
};
use crate::reconcile::error::{ConfigError, Diagnostic};
use crate::reconcile::resolver::BindingResolver;

/// Keys with this prefix never raise an unknown-key diagnostic.
pub const DEFAULT_IGNORE_PREFIX: &str = "__";

/// Key naming the variant of an allocator-built element.
pub const DEFAULT_DISCRIMINATOR: &str = "type";

/// Typed services handed to converters and allocators.
#[derive(Clone, Default)]
pub struct Capabilities {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: Arc<T>) -> Self {
        self.entries.insert(TypeId::of::<T>(), value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }
}

/// Summary of one `apply`.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub diagnostics: Vec<Diagnostic>,
    /// Key paths whose value was written.
    pub committed: Vec<String>,
    /// Key paths whose change was vetoed.
    pub vetoed: Vec<String>,
    /// Key paths bound only to hooks.
    pub notified: Vec<String>,
}

impl ApplyReport {
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().map(|d| match d {
            Diagnostic::UnknownKey { path, .. } => path.as_str(),
        })
    }
}

/// State threaded through one `apply`, nested reconciliations included.
pub struct ApplyContext<'a> {
    reconciler: &'a Reconciler,
    capabilities: &'a Capabilities,
    report: &'a mut ApplyReport,
    path: Vec<String>,
}

impl<'a> ApplyContext<'a> {
    pub fn reconciler(&self) -> &'a Reconciler {
        self.reconciler
    }

    /// A capability registered by the caller of `apply_with`.
    pub fn capability<T: Any + Send + Sync>(&self) -> Result<&'a T, ConfigError> {
        self.capabilities
            .get::<T>()
            .ok_or(ConfigError::MissingCapability(std::any::type_name::<T>()))
    }

    /// Dotted path of the key currently being reconciled.
    pub fn path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('.');
            }
            out.push_str(segment);
        }
        out
    }

    fn enter(&mut self, segment: &str) {
        self.path.push(segment.to_string());
    }

    fn leave(&mut self) {
        self.path.pop();
    }
}

/// Where an element is being built: the owning object, the key, and the rule for its elements.
pub struct Site<'s, O, E> {
    pub(crate) owner: &'s O,
    pub(crate) key: &'s str,
    pub(crate) rule: &'s ElementRule<O, E>,
    pub(crate) preserve: bool,
    pub(crate) discriminator: &'s str,
}

/// A candidate value plus the nested reconciliations it still needs.
pub struct Assembled<'d, V: FieldValue> {
    pub(crate) value: V,
    pub(crate) pending: Pending<'d, V::Elem>,
}

/// Applies documents to configurable objects through resolved bindings.
#[derive(Clone)]
pub struct Reconciler {
    resolver: Arc<BindingResolver>,
    ignore_prefix: String,
    discriminator: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// A reconciler backed by the process-wide binding cache.
    pub fn new() -> Self {
        static GLOBAL: OnceLock<Arc<BindingResolver>> = OnceLock::new();
        Self::with_resolver(GLOBAL.get_or_init(|| Arc::new(BindingResolver::new())).clone())
    }

    pub fn with_resolver(resolver: Arc<BindingResolver>) -> Self {
        Self {
            resolver,
            ignore_prefix: DEFAULT_IGNORE_PREFIX.to_string(),
            discriminator: DEFAULT_DISCRIMINATOR.to_string(),
        }
    }

    pub fn ignore_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ignore_prefix = prefix.into();
        self
    }

    pub fn discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.discriminator = key.into();
        self
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub fn resolver(&self) -> &BindingResolver {
        &self.resolver
    }

    /// Reconcile `target` against `doc`.
    ///
    /// Keys are processed in document order. A fatal error stops the walk;
    /// keys handled before it stay committed.
    pub fn apply<T: Configurable>(&self, target: &mut T, doc: &Document) -> Result<ApplyReport, ConfigError> {
        self.apply_with(target, doc, &Capabilities::default())
    }

    pub fn apply_with<T: Configurable>(
        &self,
        target: &mut T,
        doc: &Document,
        capabilities: &Capabilities,
    ) -> Result<ApplyReport, ConfigError> {
        let fields = doc.as_object().ok_or(ConfigError::NotAnObject(doc.kind()))?;
        let mut report = ApplyReport::default();
        let mut cx = ApplyContext {
            reconciler: self,
            capabilities,
            report: &mut report,
            path: Vec::new(),
        };
        self.apply_fields(target, fields, &mut cx)?;
        Ok(report)
    }

    /// Same as [`apply_with`](Self::apply_with), holding the write lock of a shared instance.
    pub fn apply_shared<T: Configurable>(
        &self,
        target: &Shared<T>,
        doc: &Document,
        capabilities: &Capabilities,
    ) -> Result<ApplyReport, ConfigError> {
        let mut guard = target
            .write()
            .map_err(|_| ConfigError::Poisoned(std::any::type_name::<T>()))?;
        self.apply_with(&mut *guard, doc, capabilities)
    }

    pub(crate) fn apply_fields<T: Configurable>(
        &self,
        target: &mut T,
        fields: &Fields,
        cx: &mut ApplyContext<'_>,
    ) -> Result<(), ConfigError> {
        for (key, value) in fields.iter() {
            let Some(binding) = self.resolver.resolve::<T>(key)? else {
                if !key.starts_with(self.ignore_prefix.as_str()) {
                    cx.enter(key);
                    let path = cx.path();
                    cx.leave();
                    tracing::warn!(path = %path, owner = std::any::type_name::<T>(), "configuration key is ignored");
                    metrics::record_unknown_key();
                    cx.report.diagnostics.push(Diagnostic::UnknownKey {
                        owner: std::any::type_name::<T>(),
                        path,
                    });
                }
                continue;
            };

            cx.enter(key);
            let path = cx.path();
            let outcome = binding.ops.reconcile(&binding, target, value, cx);
            cx.leave();

            match outcome? {
                Outcome::Committed => cx.report.committed.push(path),
                Outcome::Notified => cx.report.notified.push(path),
                Outcome::Vetoed => cx.report.vetoed.push(path),
            }
        }
        Ok(())
    }
}

impl<O: Configurable, V: FieldValue> KeyOps<O> for TypedOps<O, V> {
    fn reconcile(
        &self,
        binding: &Binding<O>,
        owner: &mut O,
        doc: &Document,
        cx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ConfigError> {
        let previous = self.access.map(|access| access(owner).clone());
        let reconciler = cx.reconciler();
        let assembled = {
            let site = Site {
                owner: &*owner,
                key: binding.key(),
                rule: &self.rule,
                preserve: binding.preserve,
                discriminator: reconciler.discriminator(),
            };
            V::assemble(previous.as_ref(), doc, &site, cx)?
        };

        let vetoed = match &self.pre {
            Some(pre) => !(**pre)(owner, &assembled.value),
            None => false,
        };
        if vetoed {
            tracing::debug!(path = %cx.path(), "change vetoed");
        } else if let Some(access) = self.access {
            *access(owner) = assembled.value.clone();
        }

        for (segment, element, fields) in &assembled.pending {
            if !segment.is_empty() {
                cx.enter(segment);
            }
            let result = element.descend(fields, cx);
            if !segment.is_empty() {
                cx.leave();
            }
            result?;
        }

        if vetoed {
            return Ok(Outcome::Vetoed);
        }
        if let Some(post) = &self.post {
            (**post)(owner, &assembled.value);
        }

        Ok(if self.access.is_some() { Outcome::Committed } else { Outcome::Notified })
    }
}

/// Serde pass-through for scalar values.
pub(crate) fn deserialize<T: DeserializeOwned>(key: &str, doc: &Document) -> Result<T, ConfigError> {
    serde_json::from_value(doc.to_value()).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

type Built<'d, E> = Option<(E, Option<Cow<'d, Fields>>)>;

/// Build one element from `doc`; `None` for null.
fn construct<'d, O, E: Element>(
    doc: &'d Document,
    site: &Site<'_, O, E>,
    cx: &ApplyContext<'_>,
) -> Result<Built<'d, E>, ConfigError> {
    if let Some(convert) = &site.rule.converter {
        if doc.is_null() {
            return Ok(None);
        }
        let element = (**convert)(site.owner, doc, cx)?;
        return Ok(Some((element, doc.as_object().map(Cow::Borrowed))));
    }

    if let Some(allocate) = &site.rule.allocator {
        let fields = match doc {
            Document::Object(fields) => fields,
            _ if doc.is_null() => return Ok(None),
            _ => {
                return Err(ConfigError::ShapeMismatch {
                    key: site.key.to_string(),
                    expected: "object",
                    found: doc.kind(),
                })
            }
        };
        let variant = fields
            .get(site.discriminator)
            .and_then(Document::as_str)
            .ok_or_else(|| ConfigError::MissingDiscriminator {
                element: std::any::type_name::<E>(),
                discriminator: site.discriminator.to_string(),
            })?;
        let element = (**allocate)(site.owner, variant, cx)?;
        return Ok(Some((element, Some(Cow::Owned(fields.without(site.discriminator))))));
    }

    match doc {
        Document::Object(fields) => Ok(Some((E::instantiate()?, Some(Cow::Borrowed(fields))))),
        _ => Ok(E::pass_through(site.key, doc)?.map(|element| (element, None))),
    }
}

/// Preservation: the live instance wins when both sides are non-null.
fn keep<O, E: Element>(site: &Site<'_, O, E>, previous: Option<&E>, candidate: E) -> E {
    match previous {
        Some(previous) if site.preserve && E::IDENTITY => previous.clone(),
        _ => candidate,
    }
}

pub(crate) fn assemble_scalar<'d, O, V>(
    doc: &'d Document,
    site: &Site<'_, O, V>,
    cx: &ApplyContext<'_>,
) -> Result<Assembled<'d, V>, ConfigError>
where
    V: FieldValue<Elem = V> + Element + DeserializeOwned,
{
    let value = match &site.rule.converter {
        Some(convert) => (**convert)(site.owner, doc, cx)?,
        None => deserialize::<V>(site.key, doc)?,
    };
    Ok(Assembled {
        value,
        pending: Vec::new(),
    })
}

pub(crate) fn assemble_single<'d, O, E: Element>(
    previous: Option<&E>,
    doc: &'d Document,
    site: &Site<'_, O, E>,
    cx: &ApplyContext<'_>,
) -> Result<Assembled<'d, Option<E>>, ConfigError> {
    if let Document::Sequence(_) = doc {
        return Err(ConfigError::ShapeMismatch {
            key: site.key.to_string(),
            expected: "single value",
            found: "sequence",
        });
    }

    let mut pending = Vec::new();
    let value = match construct(doc, site, cx)? {
        None => None,
        Some((candidate, nested)) => {
            let element = keep(site, previous, candidate);
            if let Some(fields) = nested {
                pending.push((String::new(), element.clone(), fields));
            }
            Some(element)
        }
    };
    Ok(Assembled { value, pending })
}

pub(crate) fn assemble_sequence<'d, O, E: Element>(
    previous: Option<&[E]>,
    doc: &'d Document,
    site: &Site<'_, O, E>,
    cx: &ApplyContext<'_>,
) -> Result<Assembled<'d, Vec<E>>, ConfigError> {
    let items: &[Document] = match doc {
        Document::Sequence(items) => items.as_slice(),
        _ if doc.is_null() => &[],
        _ => {
            return Err(ConfigError::ShapeMismatch {
                key: site.key.to_string(),
                expected: "sequence",
                found: doc.kind(),
            })
        }
    };

    let mut value = Vec::with_capacity(items.len());
    let mut pending = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some((candidate, nested)) = construct(item, site, cx)? else {
            return Err(ConfigError::ShapeMismatch {
                key: format!("{}[{}]", site.key, index),
                expected: "non-null element",
                found: "null",
            });
        };
        let element = keep(site, previous.and_then(|p| p.get(index)), candidate);
        if let Some(fields) = nested {
            pending.push((format!("[{}]", index), element.clone(), fields));
        }
        value.push(element);
    }
    Ok(Assembled { value, pending })
}

pub(crate) fn assemble_mapping<'d, O, E: Element>(
    previous: Option<&HashMap<String, E>>,
    doc: &'d Document,
    site: &Site<'_, O, E>,
    cx: &ApplyContext<'_>,
) -> Result<Assembled<'d, HashMap<String, E>>, ConfigError> {
    let entries = match doc {
        Document::Object(fields) => Some(fields),
        _ if doc.is_null() => None,
        _ => {
            return Err(ConfigError::ShapeMismatch {
                key: site.key.to_string(),
                expected: "mapping",
                found: doc.kind(),
            })
        }
    };

    let mut value = HashMap::new();
    let mut pending = Vec::new();
    for (name, item) in entries.into_iter().flat_map(Fields::iter) {
        let Some((candidate, nested)) = construct(item, site, cx)? else {
            return Err(ConfigError::ShapeMismatch {
                key: format!("{}.{}", site.key, name),
                expected: "non-null entry",
                found: "null",
            });
        };
        let element = keep(site, previous.and_then(|p| p.get(name)), candidate);
        if let Some(fields) = nested {
            pending.push((name.to_string(), element.clone(), fields));
        }
        value.insert(name.to_string(), element);
    }
    Ok(Assembled { value, pending })
}
