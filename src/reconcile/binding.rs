//! Binding declarations.
//!
//! # Responsibilities
//! - Let each configurable type declare its keys, hooks and constructors
//! - Describe field value shapes (scalar / object / sequence / mapping)
//! - Describe how elements are built (direct, converter, allocator) and descended into
//!
//! # Design Decisions
//! - Declarations are explicit and checked at compile time for types; the
//!   resolver checks the cross-declaration invariants (ambiguity, conflicts)
//! - Identity-bearing values are `Shared<T>`: preservation keeps the same `Arc`

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::document::{Document, Fields};
use crate::reconcile::error::ConfigError;
use crate::reconcile::reconciler::{self, ApplyContext, Assembled, Site};

/// A live, identity-bearing configuration object.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wrap a value as a [`Shared`] instance.
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

/// A type whose keys are bound through a [`Schema`].
pub trait Configurable: Default + Send + Sync + 'static {
    fn declare(schema: &mut Schema<Self>);
}

/// Object-safe face of a configurable value, used for nested and polymorphic targets.
pub trait Reconcile: Send + Sync {
    fn reconcile(&mut self, fields: &Fields, cx: &mut ApplyContext<'_>) -> Result<(), ConfigError>;
}

impl<T: Configurable> Reconcile for T {
    fn reconcile(&mut self, fields: &Fields, cx: &mut ApplyContext<'_>) -> Result<(), ConfigError> {
        let reconciler = cx.reconciler();
        reconciler.apply_fields(self, fields, cx)
    }
}

/// Shape of the value a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Object,
    Sequence,
    Mapping,
}

/// How elements are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Converter,
    Allocator,
}

/// Runtime type identity plus a readable name.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A single element of a field: the field value itself for scalars, or the
/// items of an object / sequence / mapping field.
pub trait Element: Clone + Send + Sync + 'static {
    /// Whether values carry identity, i.e. preservation applies.
    const IDENTITY: bool;

    /// Build from a value when no converter or allocator exists and the value
    /// is not an object. `Ok(None)` stands for null.
    fn pass_through(key: &str, doc: &Document) -> Result<Option<Self>, ConfigError>;

    /// Default construction for object values.
    fn instantiate() -> Result<Self, ConfigError>;

    /// Apply nested fields to a constructed element.
    fn descend(&self, fields: &Fields, cx: &mut ApplyContext<'_>) -> Result<(), ConfigError>;
}

/// A complete field value: a scalar, `Option<E>`, `Vec<E>` or `HashMap<String, E>`.
pub trait FieldValue: Clone + Send + Sync + 'static {
    type Elem: Element;
    const SHAPE: Shape;

    /// Build a candidate value from `doc`, matching against `previous` for preservation.
    fn assemble<'d, O>(
        previous: Option<&Self>,
        doc: &'d Document,
        site: &Site<'_, O, Self::Elem>,
        cx: &ApplyContext<'_>,
    ) -> Result<Assembled<'d, Self>, ConfigError>;
}

impl<T: Configurable> Element for Shared<T> {
    const IDENTITY: bool = true;

    fn pass_through(key: &str, doc: &Document) -> Result<Option<Self>, ConfigError> {
        object_only(key, doc)
    }

    fn instantiate() -> Result<Self, ConfigError> {
        Ok(shared(T::default()))
    }

    fn descend(&self, fields: &Fields, cx: &mut ApplyContext<'_>) -> Result<(), ConfigError> {
        descend_shared(self, fields, cx)
    }
}

/// Null passes through as `None`; any other scalar is a shape error.
#[doc(hidden)]
pub fn object_only<E>(key: &str, doc: &Document) -> Result<Option<E>, ConfigError> {
    if doc.is_null() {
        return Ok(None);
    }
    Err(ConfigError::ShapeMismatch {
        key: key.to_string(),
        expected: "object",
        found: doc.kind(),
    })
}

#[doc(hidden)]
pub fn descend_shared<T: Reconcile + ?Sized + 'static>(
    value: &Shared<T>,
    fields: &Fields,
    cx: &mut ApplyContext<'_>,
) -> Result<(), ConfigError> {
    let mut guard = value
        .write()
        .map_err(|_| ConfigError::Poisoned(std::any::type_name::<T>()))?;
    guard.reconcile(fields, cx)
}

/// Implement [`Element`] for `Shared<dyn Capability>` so a polymorphic field
/// can hold any variant built by an allocator or converter.
#[macro_export]
macro_rules! polymorphic_element {
    ($($cap:ty),+ $(,)?) => {$(
        impl $crate::reconcile::Element for $crate::reconcile::Shared<$cap> {
            const IDENTITY: bool = true;

            fn pass_through(
                key: &str,
                doc: &$crate::document::Document,
            ) -> Result<Option<Self>, $crate::reconcile::ConfigError> {
                $crate::reconcile::binding::object_only(key, doc)
            }

            fn instantiate() -> Result<Self, $crate::reconcile::ConfigError> {
                Err($crate::reconcile::ConfigError::InstantiationFailure {
                    element: std::any::type_name::<$cap>(),
                    reason: "polymorphic type needs an allocator or converter".to_string(),
                })
            }

            fn descend(
                &self,
                fields: &$crate::document::Fields,
                cx: &mut $crate::reconcile::ApplyContext<'_>,
            ) -> Result<(), $crate::reconcile::ConfigError> {
                $crate::reconcile::binding::descend_shared(self, fields, cx)
            }
        }
    )+};
}

macro_rules! scalar_value {
    ($($t:ty),+ $(,)?) => {$(
        impl Element for $t {
            const IDENTITY: bool = false;

            fn pass_through(key: &str, doc: &Document) -> Result<Option<Self>, ConfigError> {
                if doc.is_null() {
                    return Ok(None);
                }
                reconciler::deserialize::<$t>(key, doc).map(Some)
            }

            fn instantiate() -> Result<Self, ConfigError> {
                Err(ConfigError::InstantiationFailure {
                    element: std::any::type_name::<$t>(),
                    reason: "scalar types are not built from objects".to_string(),
                })
            }

            fn descend(&self, _fields: &Fields, _cx: &mut ApplyContext<'_>) -> Result<(), ConfigError> {
                Ok(())
            }
        }

        impl FieldValue for $t {
            type Elem = $t;
            const SHAPE: Shape = Shape::Scalar;

            fn assemble<'d, O>(
                _previous: Option<&Self>,
                doc: &'d Document,
                site: &Site<'_, O, Self::Elem>,
                cx: &ApplyContext<'_>,
            ) -> Result<Assembled<'d, Self>, ConfigError> {
                reconciler::assemble_scalar(doc, site, cx)
            }
        }
    )+};
}

scalar_value!(String, bool, i32, i64, u8, u16, u32, u64, usize, f64, serde_json::Value);

impl<E: Element> FieldValue for Option<E> {
    type Elem = E;
    const SHAPE: Shape = if E::IDENTITY { Shape::Object } else { Shape::Scalar };

    fn assemble<'d, O>(
        previous: Option<&Self>,
        doc: &'d Document,
        site: &Site<'_, O, E>,
        cx: &ApplyContext<'_>,
    ) -> Result<Assembled<'d, Self>, ConfigError> {
        reconciler::assemble_single(previous.and_then(Option::as_ref), doc, site, cx)
    }
}

impl<E: Element> FieldValue for Vec<E> {
    type Elem = E;
    const SHAPE: Shape = Shape::Sequence;

    fn assemble<'d, O>(
        previous: Option<&Self>,
        doc: &'d Document,
        site: &Site<'_, O, E>,
        cx: &ApplyContext<'_>,
    ) -> Result<Assembled<'d, Self>, ConfigError> {
        reconciler::assemble_sequence(previous.map(Vec::as_slice), doc, site, cx)
    }
}

impl<E: Element> FieldValue for HashMap<String, E> {
    type Elem = E;
    const SHAPE: Shape = Shape::Mapping;

    fn assemble<'d, O>(
        previous: Option<&Self>,
        doc: &'d Document,
        site: &Site<'_, O, E>,
        cx: &ApplyContext<'_>,
    ) -> Result<Assembled<'d, Self>, ConfigError> {
        reconciler::assemble_mapping(previous, doc, site, cx)
    }
}

pub type Converter<O, E> =
    Arc<dyn Fn(&O, &Document, &ApplyContext<'_>) -> Result<E, ConfigError> + Send + Sync>;
pub type Allocator<O, E> =
    Arc<dyn Fn(&O, &str, &ApplyContext<'_>) -> Result<E, ConfigError> + Send + Sync>;
pub(crate) type PreHook<O, V> = Arc<dyn Fn(&mut O, &V) -> bool + Send + Sync>;
pub(crate) type PostHook<O, V> = Arc<dyn Fn(&mut O, &V) + Send + Sync>;

/// Construction rule for the elements of one key.
pub struct ElementRule<O, E> {
    pub(crate) converter: Option<Converter<O, E>>,
    pub(crate) allocator: Option<Allocator<O, E>>,
}

impl<O, E> ElementRule<O, E> {
    pub fn strategy(&self) -> Strategy {
        match (&self.converter, &self.allocator) {
            (Some(_), _) => Strategy::Converter,
            (None, Some(_)) => Strategy::Allocator,
            (None, None) => Strategy::Direct,
        }
    }
}

// Erased payloads stored in the schema; downcast by the resolver once the
// value type has been agreed on.
pub(crate) struct Access<O, V>(pub(crate) fn(&mut O) -> &mut V);
pub(crate) struct PreHookBox<O, V>(pub(crate) PreHook<O, V>);
pub(crate) struct PostHookBox<O, V>(pub(crate) PostHook<O, V>);
pub(crate) struct ConverterBox<O, E>(pub(crate) Converter<O, E>);
pub(crate) struct AllocatorBox<O, E>(pub(crate) Allocator<O, E>);

pub(crate) type Erased = Arc<dyn Any + Send + Sync>;
pub(crate) type Materialize<O> = fn(&Parts<'_>) -> Result<Box<dyn KeyOps<O>>, ConfigError>;

pub(crate) struct FieldDecl<O> {
    pub(crate) name: &'static str,
    pub(crate) value: TypeTag,
    pub(crate) element: TypeTag,
    pub(crate) shape: Shape,
    pub(crate) preserve: bool,
    pub(crate) configurable: bool,
    pub(crate) access: Option<Erased>,
    pub(crate) materialize: Materialize<O>,
}

pub(crate) struct HookDecl<O> {
    pub(crate) name: &'static str,
    pub(crate) value: TypeTag,
    pub(crate) element: TypeTag,
    pub(crate) shape: Shape,
    pub(crate) hook: Erased,
    pub(crate) materialize: Materialize<O>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CtorKind {
    Converter,
    Allocator,
}

pub(crate) struct CtorDecl {
    pub(crate) element: TypeTag,
    pub(crate) kind: CtorKind,
    pub(crate) ctor: Erased,
}

/// Pieces gathered by the resolver for one key.
pub(crate) struct Parts<'s> {
    pub(crate) owner: &'static str,
    pub(crate) key: &'s str,
    pub(crate) access: Option<&'s Erased>,
    pub(crate) pre: Option<&'s Erased>,
    pub(crate) post: Option<&'s Erased>,
    pub(crate) converter: Option<&'s Erased>,
    pub(crate) allocator: Option<&'s Erased>,
}

/// Declared keys, hooks and constructors of one configurable type.
pub struct Schema<O> {
    pub(crate) owner: &'static str,
    pub(crate) fields: Vec<FieldDecl<O>>,
    pub(crate) pre_hooks: Vec<HookDecl<O>>,
    pub(crate) post_hooks: Vec<HookDecl<O>>,
    pub(crate) constructors: Vec<CtorDecl>,
}

/// Options for a freshly declared field.
pub struct FieldOptions<'s> {
    preserve: &'s mut bool,
}

impl FieldOptions<'_> {
    /// Keep the live instance when both the previous and the new value are non-null.
    pub fn preserve(self) -> Self {
        *self.preserve = true;
        self
    }
}

impl<O: Configurable> Schema<O> {
    pub(crate) fn build() -> Self {
        let mut schema = Schema {
            owner: std::any::type_name::<O>(),
            fields: Vec::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            constructors: Vec::new(),
        };
        O::declare(&mut schema);
        schema
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Bind `name` to a field.
    pub fn field<V: FieldValue>(&mut self, name: &'static str, access: fn(&mut O) -> &mut V) -> FieldOptions<'_> {
        let index = self.fields.len();
        self.fields.push(FieldDecl {
            name,
            value: TypeTag::of::<V>(),
            element: TypeTag::of::<V::Elem>(),
            shape: V::SHAPE,
            preserve: false,
            configurable: true,
            access: Some(Arc::new(Access(access))),
            materialize: materialize::<O, V>,
        });
        FieldOptions {
            preserve: &mut self.fields[index].preserve,
        }
    }

    /// Record a member that documents must not configure (derived state).
    pub fn internal(&mut self, name: &'static str) {
        self.fields.push(FieldDecl {
            name,
            value: TypeTag::of::<()>(),
            element: TypeTag::of::<()>(),
            shape: Shape::Scalar,
            preserve: false,
            configurable: false,
            access: None,
            materialize: |_| Err(ConfigError::InstantiationFailure {
                element: "internal member",
                reason: "not configurable".to_string(),
            }),
        });
    }

    /// Hook run with the candidate value before commit; returning `false` vetoes.
    pub fn pre_change<V, F>(&mut self, name: &'static str, hook: F)
    where
        V: FieldValue,
        F: Fn(&mut O, &V) -> bool + Send + Sync + 'static,
    {
        self.pre_hooks.push(HookDecl {
            name,
            value: TypeTag::of::<V>(),
            element: TypeTag::of::<V::Elem>(),
            shape: V::SHAPE,
            hook: Arc::new(PreHookBox::<O, V>(Arc::new(hook))),
            materialize: materialize::<O, V>,
        });
    }

    /// Hook run with the final value after commit and nested reconciliation.
    pub fn on_change<V, F>(&mut self, name: &'static str, hook: F)
    where
        V: FieldValue,
        F: Fn(&mut O, &V) + Send + Sync + 'static,
    {
        self.post_hooks.push(HookDecl {
            name,
            value: TypeTag::of::<V>(),
            element: TypeTag::of::<V::Elem>(),
            shape: V::SHAPE,
            hook: Arc::new(PostHookBox::<O, V>(Arc::new(hook))),
            materialize: materialize::<O, V>,
        });
    }

    /// Build elements of type `E` from raw document values.
    pub fn converter<E, F>(&mut self, convert: F)
    where
        E: Element,
        F: Fn(&O, &Document, &ApplyContext<'_>) -> Result<E, ConfigError> + Send + Sync + 'static,
    {
        self.constructors.push(CtorDecl {
            element: TypeTag::of::<E>(),
            kind: CtorKind::Converter,
            ctor: Arc::new(ConverterBox::<O, E>(Arc::new(convert))),
        });
    }

    /// Build empty elements of type `E` from the discriminator of an object value.
    pub fn allocator<E, F>(&mut self, allocate: F)
    where
        E: Element,
        F: Fn(&O, &str, &ApplyContext<'_>) -> Result<E, ConfigError> + Send + Sync + 'static,
    {
        self.constructors.push(CtorDecl {
            element: TypeTag::of::<E>(),
            kind: CtorKind::Allocator,
            ctor: Arc::new(AllocatorBox::<O, E>(Arc::new(allocate))),
        });
    }
}

/// Typed operations for one resolved key.
pub(crate) struct TypedOps<O, V: FieldValue> {
    pub(crate) access: Option<fn(&mut O) -> &mut V>,
    pub(crate) pre: Option<PreHook<O, V>>,
    pub(crate) post: Option<PostHook<O, V>>,
    pub(crate) rule: ElementRule<O, V::Elem>,
}

pub(crate) trait KeyOps<O>: Send + Sync {
    fn reconcile(
        &self,
        binding: &Binding<O>,
        owner: &mut O,
        doc: &Document,
        cx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ConfigError>;
}

/// Result of reconciling one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The value was written into the field.
    Committed,
    /// There is no field; hooks received the value.
    Notified,
    /// The pre-change hook rejected the value.
    Vetoed,
}

fn downcast<T: Any + Send + Sync>(erased: Option<&Erased>, parts: &Parts<'_>) -> Result<Option<Arc<T>>, ConfigError> {
    match erased {
        None => Ok(None),
        Some(erased) => erased.clone().downcast::<T>().map(Some).map_err(|_| ConfigError::TypeConflict {
            owner: parts.owner,
            key: parts.key.to_string(),
            expected: std::any::type_name::<T>(),
            found: "a differently typed declaration",
        }),
    }
}

fn materialize<O: Configurable, V: FieldValue>(parts: &Parts<'_>) -> Result<Box<dyn KeyOps<O>>, ConfigError> {
    let access = downcast::<Access<O, V>>(parts.access, parts)?.map(|a| a.0);
    let pre = downcast::<PreHookBox<O, V>>(parts.pre, parts)?.map(|h| h.0.clone());
    let post = downcast::<PostHookBox<O, V>>(parts.post, parts)?.map(|h| h.0.clone());
    let converter = downcast::<ConverterBox<O, V::Elem>>(parts.converter, parts)?.map(|c| c.0.clone());
    let allocator = downcast::<AllocatorBox<O, V::Elem>>(parts.allocator, parts)?.map(|a| a.0.clone());
    Ok(Box::new(TypedOps {
        access,
        pre,
        post,
        rule: ElementRule { converter, allocator },
    }))
}

/// Resolved binding of one (type, key) pair.
pub struct Binding<O> {
    pub(crate) key: String,
    pub(crate) field: Option<&'static str>,
    pub(crate) shape: Shape,
    pub(crate) value_type: &'static str,
    pub(crate) element_type: &'static str,
    pub(crate) strategy: Strategy,
    pub(crate) preserve: bool,
    pub(crate) has_pre: bool,
    pub(crate) has_post: bool,
    pub(crate) ops: Box<dyn KeyOps<O>>,
}

impl<O> Binding<O> {
    /// The document key this binding was resolved for.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Declared name of the bound field, if any.
    pub fn field(&self) -> Option<&'static str> {
        self.field
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn value_type(&self) -> &'static str {
        self.value_type
    }

    pub fn element_type(&self) -> &'static str {
        self.element_type
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn preserves_instances(&self) -> bool {
        self.preserve
    }

    pub fn has_pre_change(&self) -> bool {
        self.has_pre
    }

    pub fn has_on_change(&self) -> bool {
        self.has_post
    }
}

impl<O> std::fmt::Debug for Binding<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("field", &self.field)
            .field("shape", &self.shape)
            .field("value_type", &self.value_type)
            .field("strategy", &self.strategy)
            .field("preserve", &self.preserve)
            .finish()
    }
}

/// Nested work queued while assembling a value: an element plus the fields to apply to it.
pub(crate) type Pending<'d, E> = Vec<(String, E, Cow<'d, Fields>)>;
