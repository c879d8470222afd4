//! Type-erased service values.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

type Erased = Arc<dyn Any + Send + Sync>;
type PropertyFn = fn(&(dyn Any + Send + Sync), &str) -> Option<Service>;

/// Local overrides for a single invocation: dependency name → value.
///
/// A key that is present wins over the registry, even when its value is
/// [`Service::null`].
pub type Locals = HashMap<String, Service>;

/// Values that expose named properties to dotted lookups (`config.db.host`).
pub trait Properties: Any + Send + Sync {
    /// Returns the property called `key`, or `None` when there is none.
    fn property(&self, key: &str) -> Option<Service>;
}

/// A resolved service: a shared, type-erased value.
///
/// Cloning is cheap and preserves identity, see [`Service::ptr_eq`].
#[derive(Clone, Default)]
pub struct Service {
    inner: Option<Erased>,
    type_name: &'static str,
    primitive: bool,
    properties: Option<PropertyFn>,
}

impl Service {
    /// The absent value.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: Some(value),
            type_name: std::any::type_name::<T>(),
            primitive: is_primitive::<T>(),
            properties: None,
        }
    }

    /// Wraps a value whose properties can be reached through dotted names.
    pub fn with_properties<T: Properties>(value: T) -> Self {
        Self {
            properties: Some(property_of::<T>),
            ..Self::new(value)
        }
    }

    /// Wraps JSON data. `null` maps to [`Service::null`], scalars count as
    /// primitives, objects and arrays expose their members as properties.
    pub fn json(value: serde_json::Value) -> Self {
        if value.is_null() {
            return Self::null();
        }
        let primitive = !(value.is_object() || value.is_array());
        Self {
            primitive,
            ..Self::with_properties(value)
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// `true` for non-null values that are not primitives (numbers, strings, booleans, ...).
    pub fn is_object(&self) -> bool {
        self.inner.is_some() && !self.primitive
    }

    /// Name of the wrapped Rust type, `"null"` when absent.
    pub fn type_name(&self) -> &'static str {
        if self.inner.is_some() {
            self.type_name
        } else {
            "null"
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone()?.downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_deref()?.downcast_ref::<T>()
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    /// Identity comparison: both handles point at the same value, or both are null.
    pub fn ptr_eq(&self, other: &Service) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Reads one property. `Ok(None)` means the value has no such property,
    /// `Err(())` means the value is null and cannot be walked.
    pub(crate) fn property(&self, key: &str) -> Result<Option<Service>, ()> {
        let inner = self.inner.as_deref().ok_or(())?;
        Ok(self.properties.and_then(|get| get(inner, key)))
    }

    /// Human readable rendering used in diagnostics.
    pub fn render(&self) -> String {
        let Some(inner) = self.inner.as_deref() else {
            return "null".to_string();
        };
        if let Some(json) = inner.downcast_ref::<serde_json::Value>() {
            return match json {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
        render_primitive(inner).unwrap_or_else(|| format!("[object {}]", short_type_name(self.type_name)))
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("type", &self.type_name())
            .field("value", &self.render())
            .finish()
    }
}

impl From<serde_json::Value> for Service {
    fn from(value: serde_json::Value) -> Self {
        Service::json(value)
    }
}

impl From<&'static str> for Service {
    fn from(value: &'static str) -> Self {
        Service::new(value)
    }
}

impl From<String> for Service {
    fn from(value: String) -> Self {
        Service::new(value)
    }
}

impl Properties for serde_json::Value {
    fn property(&self, key: &str) -> Option<Service> {
        match self {
            serde_json::Value::Object(map) => map.get(key).cloned().map(Service::json),
            serde_json::Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .map(Service::json),
            _ => None,
        }
    }
}

impl Properties for HashMap<String, Service> {
    fn property(&self, key: &str) -> Option<Service> {
        self.get(key).cloned()
    }
}

impl Properties for BTreeMap<String, Service> {
    fn property(&self, key: &str) -> Option<Service> {
        self.get(key).cloned()
    }
}

fn property_of<T: Properties>(value: &(dyn Any + Send + Sync), key: &str) -> Option<Service> {
    value.downcast_ref::<T>()?.property(key)
}

fn is_primitive<T: Any>() -> bool {
    let id = TypeId::of::<T>();
    [
        TypeId::of::<()>(),
        TypeId::of::<bool>(),
        TypeId::of::<char>(),
        TypeId::of::<String>(),
        TypeId::of::<&'static str>(),
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
    ]
    .contains(&id)
}

fn render_primitive(value: &(dyn Any + Send + Sync)) -> Option<String> {
    macro_rules! try_render {
        ($($t:ty),*) => {
            $(
                if let Some(v) = value.downcast_ref::<$t>() {
                    return Some(v.to_string());
                }
            )*
        };
    }
    try_render!(
        String, &'static str, bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64,
        u128, usize, f32, f64
    );
    if value.is::<()>() {
        return Some("undefined".to_string());
    }
    None
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
