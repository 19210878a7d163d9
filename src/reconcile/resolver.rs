//! Key → binding resolution with a process-lifetime memo.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::reconcile::binding::{Binding, Configurable, CtorKind, Erased, Parts, Schema, Shape, Strategy, TypeTag};
use crate::reconcile::error::ConfigError;

type Resolution = Result<Option<Erased>, ConfigError>;

/// Resolves and caches bindings per (type, key).
///
/// Results are immutable once stored, failures included. Concurrent first
/// resolutions of the same pair may both compute; the first insert wins.
#[derive(Default)]
pub struct BindingResolver {
    schemas: DashMap<TypeId, Erased>,
    bindings: DashMap<(TypeId, String), Resolution>,
}

impl BindingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The declared schema of `O`, built once.
    pub fn schema<O: Configurable>(&self) -> Arc<Schema<O>> {
        let id = TypeId::of::<O>();
        let cached = self.schemas.get(&id).map(|entry| entry.value().clone());
        let erased = match cached {
            Some(erased) => erased,
            None => {
                let built: Erased = Arc::new(Schema::<O>::build());
                self.schemas.entry(id).or_insert(built).value().clone()
            }
        };
        match erased.downcast::<Schema<O>>() {
            Ok(schema) => schema,
            // Keyed by TypeId::of::<O>, so only a Schema<O> is ever stored.
            Err(_) => Arc::new(Schema::<O>::build()),
        }
    }

    /// Binding for `key` on `O`, or `None` when nothing matches.
    pub fn resolve<O: Configurable>(&self, key: &str) -> Result<Option<Arc<Binding<O>>>, ConfigError> {
        let cache_key = (TypeId::of::<O>(), key.to_string());
        let cached = self.bindings.get(&cache_key).map(|entry| entry.value().clone());
        let resolution = match cached {
            Some(resolution) => resolution,
            None => {
                let computed = self.compute::<O>(key);
                match &computed {
                    // Unmatched keys are not memoised.
                    Ok(None) => return Ok(None),
                    Err(e) => {
                        tracing::error!(key = %key, owner = std::any::type_name::<O>(), error = %e, "binding resolution failed");
                    }
                    Ok(Some(_)) => {}
                }
                self.bindings.entry(cache_key).or_insert(computed).value().clone()
            }
        };
        match resolution? {
            None => Ok(None),
            Some(erased) => erased.downcast::<Binding<O>>().map(Some).map_err(|_: Arc<dyn Any + Send + Sync>| {
                ConfigError::TypeConflict {
                    owner: std::any::type_name::<O>(),
                    key: key.to_string(),
                    expected: std::any::type_name::<Binding<O>>(),
                    found: "foreign cache entry",
                }
            }),
        }
    }

    /// Number of memoised (type, key) pairs.
    pub fn cached(&self) -> usize {
        self.bindings.len()
    }

    fn compute<O: Configurable>(&self, key: &str) -> Resolution {
        let schema = self.schema::<O>();
        let owner = schema.owner();

        let mut fields = schema
            .fields
            .iter()
            .filter(|f| f.configurable && f.name.eq_ignore_ascii_case(key));
        let field = fields.next();
        if let (Some(first), Some(second)) = (field, fields.next()) {
            return Err(ConfigError::AmbiguousField {
                owner,
                key: key.to_string(),
                first: first.name,
                second: second.name,
            });
        }

        let pre = single(schema.pre_hooks.iter().filter(|h| h.name.eq_ignore_ascii_case(key)), owner, key, "pre-change hook")?;
        let post = single(schema.post_hooks.iter().filter(|h| h.name.eq_ignore_ascii_case(key)), owner, key, "on-change hook")?;

        // (value type, element type, shape, materializer) agreed on by every declaration
        let mut agreed: Option<(TypeTag, TypeTag, Shape, _)> = None;
        let declared = field
            .map(|f| (f.value, f.element, f.shape, f.materialize))
            .into_iter()
            .chain(pre.map(|h| (h.value, h.element, h.shape, h.materialize)))
            .chain(post.map(|h| (h.value, h.element, h.shape, h.materialize)));
        for candidate in declared {
            match &agreed {
                None => agreed = Some(candidate),
                Some(current) if current.0 != candidate.0 => {
                    return Err(ConfigError::TypeConflict {
                        owner,
                        key: key.to_string(),
                        expected: current.0.name,
                        found: candidate.0.name,
                    })
                }
                Some(_) => {}
            }
        }
        let Some((value, element, shape, materialize)) = agreed else {
            return Ok(None);
        };

        let constructors = |kind: CtorKind, label: &'static str| {
            single(
                schema.constructors.iter().filter(|c| c.kind == kind && c.element == element),
                owner,
                key,
                label,
            )
        };
        let converter = constructors(CtorKind::Converter, "converter")?;
        let allocator = constructors(CtorKind::Allocator, "allocator")?;
        if converter.is_some() && allocator.is_some() {
            return Err(ConfigError::ConflictingConstructors {
                owner,
                element: element.name,
            });
        }

        let parts = Parts {
            owner,
            key,
            access: field.and_then(|f| f.access.as_ref()),
            pre: pre.map(|h| &h.hook),
            post: post.map(|h| &h.hook),
            converter: converter.map(|c| &c.ctor),
            allocator: allocator.map(|c| &c.ctor),
        };
        let ops = materialize(&parts)?;
        let strategy = match (converter, allocator) {
            (Some(_), _) => Strategy::Converter,
            (None, Some(_)) => Strategy::Allocator,
            (None, None) => Strategy::Direct,
        };

        tracing::debug!(key = %key, owner, value_type = value.name, ?strategy, "binding resolved");
        let binding = Binding {
            key: key.to_string(),
            field: field.map(|f| f.name),
            shape,
            value_type: value.name,
            element_type: element.name,
            strategy,
            preserve: field.map(|f| f.preserve).unwrap_or(false),
            has_pre: pre.is_some(),
            has_post: post.is_some(),
            ops,
        };
        Ok(Some(Arc::new(binding)))
    }
}

fn single<'s, T>(
    mut matches: impl Iterator<Item = &'s T>,
    owner: &'static str,
    key: &str,
    kind: &'static str,
) -> Result<Option<&'s T>, ConfigError> {
    let first = matches.next();
    if first.is_some() && matches.next().is_some() {
        return Err(ConfigError::AmbiguousMethod {
            owner,
            key: key.to_string(),
            kind,
        });
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::reconcile::binding::{Shared, Shape};

    #[derive(Default)]
    struct Item;

    impl Configurable for Item {
        fn declare(_schema: &mut Schema<Self>) {}
    }

    #[derive(Default)]
    struct Target {
        name: String,
        alias: String,
        items: Vec<Shared<Item>>,
        count: u32,
        secret: String,
    }

    impl Configurable for Target {
        fn declare(schema: &mut Schema<Self>) {
            schema.field("name", |t: &mut Target| &mut t.name);
            schema.field("Alias", |t: &mut Target| &mut t.alias);
            schema.field("ALIAS", |t: &mut Target| &mut t.alias);
            schema.field("items", |t: &mut Target| &mut t.items).preserve();
            schema.field("count", |t: &mut Target| &mut t.count);
            schema.internal("secret");
            schema.pre_change("count", |_t: &mut Target, _v: &String| true);
            schema.on_change("twice", |_t: &mut Target, _v: &u32| {});
            schema.on_change("twice", |_t: &mut Target, _v: &u32| {});
        }
    }

    #[derive(Default)]
    struct Clashing {
        items: Vec<Shared<Item>>,
    }

    impl Configurable for Clashing {
        fn declare(schema: &mut Schema<Self>) {
            schema.field("items", |c: &mut Clashing| &mut c.items);
            schema.converter(|_c: &Clashing, _doc: &Document, _cx: &crate::reconcile::ApplyContext<'_>| {
                Ok(crate::reconcile::shared(Item))
            });
            schema.allocator(|_c: &Clashing, _variant: &str, _cx: &crate::reconcile::ApplyContext<'_>| {
                Ok(crate::reconcile::shared(Item))
            });
        }
    }

    #[test]
    fn test_resolves_field_binding() {
        let resolver = BindingResolver::new();
        let binding = resolver.resolve::<Target>("ITEMS").unwrap().unwrap();
        assert_eq!(binding.field(), Some("items"));
        assert_eq!(binding.shape(), Shape::Sequence);
        assert_eq!(binding.strategy(), Strategy::Direct);
        assert!(binding.preserves_instances());
        assert!(!binding.has_pre_change());
    }

    #[test]
    fn test_resolution_is_memoised() {
        let resolver = BindingResolver::new();
        let first = resolver.resolve::<Target>("name").unwrap().unwrap();
        let second = resolver.resolve::<Target>("name").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.resolve::<Target>("missing").unwrap().is_none());
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_unmatched_keys_are_not_memoised() {
        let resolver = BindingResolver::new();
        for i in 0..100 {
            assert!(resolver.resolve::<Target>(&format!("stray{}", i)).unwrap().is_none());
        }
        assert_eq!(resolver.cached(), 0);
        assert!(resolver.resolve::<Target>("name").unwrap().is_some());
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_internal_member_is_not_bound() {
        let resolver = BindingResolver::new();
        assert!(resolver.resolve::<Target>("secret").unwrap().is_none());
    }

    #[test]
    fn test_ambiguity_and_conflicts() {
        let resolver = BindingResolver::new();
        assert!(matches!(
            resolver.resolve::<Target>("alias"),
            Err(ConfigError::AmbiguousField { .. })
        ));
        assert!(matches!(
            resolver.resolve::<Target>("twice"),
            Err(ConfigError::AmbiguousMethod { kind: "on-change hook", .. })
        ));
        assert!(matches!(
            resolver.resolve::<Target>("count"),
            Err(ConfigError::TypeConflict { .. })
        ));
        assert!(matches!(
            resolver.resolve::<Clashing>("items"),
            Err(ConfigError::ConflictingConstructors { .. })
        ));
        // failures are memoised too
        assert!(resolver.resolve::<Target>("alias").is_err());
    }
}
