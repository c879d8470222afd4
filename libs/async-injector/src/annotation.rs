//! Callables, their dependency annotations, and the arguments handed to them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use regex::Regex;

use crate::service::Service;

type FunctionFn = dyn Fn(Args) -> BoxFuture<'static, Result<Service>> + Send + Sync;
type ConstructorFn = dyn Fn(Args) -> Result<Constructed> + Send + Sync;

/// Result of running a constructor.
#[derive(Debug, Clone)]
pub enum Constructed {
    /// The freshly built instance.
    Instance(Service),
    /// The constructor body also returned a value. An object replaces the
    /// fresh instance; a primitive (or null) is discarded in its favour.
    Returned { instance: Service, returned: Service },
}

impl Constructed {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Constructed::Instance(Service::new(value))
    }

    pub fn returning(instance: Service, returned: Service) -> Self {
        Constructed::Returned { instance, returned }
    }

    /// Applies constructor return-value semantics.
    pub fn into_service(self) -> Service {
        match self {
            Constructed::Instance(instance) => instance,
            Constructed::Returned { instance, returned } => {
                if returned.is_object() {
                    returned
                } else {
                    instance
                }
            }
        }
    }
}

/// How a callable is applied: as a plain call or with construction semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallMode {
    Invoke,
    Construct,
}

#[derive(Clone)]
enum Body {
    Function(Arc<FunctionFn>),
    Constructor(Arc<ConstructorFn>),
}

/// A function or constructor the injector can call with resolved dependencies.
///
/// Dependency names come from an attached annotation ([`annotate`]) or, when
/// absent, from the injector's [`AnnotationExtractor`].
#[derive(Clone)]
pub struct Callable {
    body: Body,
    inject: Option<Arc<[String]>>,
    signature: Option<Arc<str>>,
}

impl Callable {
    /// An asynchronous function.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Service>> + Send + 'static,
    {
        let body: Arc<FunctionFn> =
            Arc::new(move |args| -> BoxFuture<'static, Result<Service>> { Box::pin(f(args)) });
        Self::from_body(Body::Function(body))
    }

    /// A synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Service> + Send + Sync + 'static,
    {
        let body: Arc<FunctionFn> = Arc::new(move |args| -> BoxFuture<'static, Result<Service>> {
            let out = f(args);
            Box::pin(async move { out })
        });
        Self::from_body(Body::Function(body))
    }

    /// A constructor-like callable, see [`Constructed`].
    pub fn constructor<F>(f: F) -> Self
    where
        F: Fn(Args) -> Result<Constructed> + Send + Sync + 'static,
    {
        Self::from_body(Body::Constructor(Arc::new(f)))
    }

    fn from_body(body: Body) -> Self {
        Self {
            body,
            inject: None,
            signature: None,
        }
    }

    /// Attaches source-like signature text (`function(/* baz */ a, abc)`,
    /// `class Foo { constructor(bar) }`) for the default extractor to parse.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(Arc::from(signature.into()));
        self
    }

    /// Explicitly attached dependency names.
    pub fn annotations(&self) -> Option<&[String]> {
        self.inject.as_deref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.body, Body::Constructor(_))
    }

    /// Applies the callable.
    ///
    /// Constructing a plain function keeps an object result and otherwise
    /// yields a fresh empty object. A constructor refuses a plain call.
    pub(crate) async fn call(&self, args: Args, mode: CallMode) -> Result<Service> {
        match (&self.body, mode) {
            (Body::Function(f), CallMode::Invoke) => f(args).await,
            (Body::Function(f), CallMode::Construct) => {
                let returned = f(args).await?;
                if returned.is_object() {
                    Ok(returned)
                } else {
                    Ok(Service::with_properties(HashMap::<String, Service>::new()))
                }
            }
            (Body::Constructor(c), CallMode::Construct) => c(args).map(Constructed::into_service),
            (Body::Constructor(_), CallMode::Invoke) => Err(anyhow!(
                "constructor cannot be invoked without construction"
            )),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("constructor", &self.is_constructor())
            .field("inject", &self.inject)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Attaches an ordered list of dependency names to a callable.
pub fn annotate<I, S>(names: I, mut callable: Callable) -> Callable
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    callable.inject = Some(names.into_iter().map(Into::into).collect());
    callable
}

/// Something handed to `invoke` / `instantiate` or registered as a provider.
#[derive(Debug, Clone)]
pub enum Invocable {
    Callable(Callable),
    /// Array-annotation form: dependency names followed by the target.
    Array(Vec<String>, Box<Invocable>),
    /// Any non-callable value; invoking it fails.
    Value(Service),
}

impl Invocable {
    pub fn array<I, S>(names: I, target: impl Into<Invocable>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocable::Array(
            names.into_iter().map(Into::into).collect(),
            Box::new(target.into()),
        )
    }

    /// Folds the array form into an annotated callable. Returns the offending
    /// value when there is nothing callable to invoke.
    pub fn unwrap_callable(self) -> std::result::Result<Callable, Invocable> {
        match self {
            Invocable::Callable(callable) => Ok(callable),
            Invocable::Array(names, target) => match *target {
                Invocable::Callable(callable) => Ok(annotate(names, callable)),
                other => Err(Invocable::Array(names, Box::new(other))),
            },
            value @ Invocable::Value(_) => Err(value),
        }
    }

    /// Array-form definitions are unwrapped eagerly when registered; anything
    /// malformed is kept as-is and fails once invoked.
    pub(crate) fn normalized(self) -> Invocable {
        match self {
            Invocable::Array(..) => match self.unwrap_callable() {
                Ok(callable) => Invocable::Callable(callable),
                Err(raw) => raw,
            },
            other => other,
        }
    }
}

impl fmt::Display for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocable::Callable(c) => match c.signature() {
                Some(sig) => f.write_str(sig),
                None => f.write_str("[function]"),
            },
            Invocable::Array(names, target) => {
                for name in names {
                    write!(f, "{name},")?;
                }
                write!(f, "{target}")
            }
            Invocable::Value(v) => f.write_str(&v.render()),
        }
    }
}

impl From<Callable> for Invocable {
    fn from(callable: Callable) -> Self {
        Invocable::Callable(callable)
    }
}

impl From<Service> for Invocable {
    fn from(value: Service) -> Self {
        Invocable::Value(value)
    }
}

/// Resolved arguments for one call, in declaration order.
#[derive(Debug, Clone)]
pub struct Args {
    context: Service,
    names: Arc<[String]>,
    values: Vec<Service>,
}

impl Args {
    pub fn new(context: Service, names: Arc<[String]>, values: Vec<Service>) -> Self {
        Self {
            context,
            names,
            values,
        }
    }

    pub(crate) fn with_context(mut self, context: Service) -> Self {
        self.context = context;
        self
    }

    /// The receiver the callable was invoked on; null when none was given.
    pub fn context(&self) -> &Service {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Service] {
        &self.values
    }

    pub fn service(&self, index: usize) -> Result<Service> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("missing argument #{index} (got {})", self.values.len()))
    }

    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        let service = self.service(index)?;
        service.downcast::<T>().ok_or_else(|| {
            anyhow!(
                "argument #{index} is {}, expected {}",
                service.type_name(),
                std::any::type_name::<T>()
            )
        })
    }

    pub fn named<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| anyhow!("no argument named \"{name}\""))?;
        self.get(index)
    }
}

/// Supplies dependency names for callables that carry no explicit annotation.
pub trait AnnotationExtractor: Send + Sync {
    fn extract(&self, callable: &Callable) -> Vec<String>;
}

/// Default extractor: explicit annotation, then the attached signature, then none.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureExtractor;

impl AnnotationExtractor for SignatureExtractor {
    fn extract(&self, callable: &Callable) -> Vec<String> {
        parse_annotations(callable)
    }
}

/// Ordered dependency names of `callable`.
pub fn parse_annotations(callable: &Callable) -> Vec<String> {
    if let Some(names) = callable.annotations() {
        return names.to_vec();
    }
    callable
        .signature()
        .map(parse_signature)
        .unwrap_or_default()
}

fn fn_args() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:async\s+)?(?:function\s*[^(]*)?(?:\(\s*([^)]*)\)|(\w+))")
            .expect("valid function signature regex")
    })
}

fn ctor_args() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"constructor\s*[^(]*\(\s*([^)]*)\)").expect("valid constructor regex")
    })
}

fn arg_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\*([^*]*)\*/").expect("valid comment regex"))
}

/// Parses parameter names out of signature text. A `/* name */` comment
/// overrides the parameter it precedes.
pub fn parse_signature(signature: &str) -> Vec<String> {
    let signature = signature.trim();
    let is_class = signature.starts_with("class")
        && signature[5..].starts_with(|c: char| c.is_whitespace() || c == '{');
    let re = if is_class { ctor_args() } else { fn_args() };

    let Some(caps) = re.captures(signature) else {
        return Vec::new();
    };
    let args = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or("");
    if args.trim().is_empty() {
        return Vec::new();
    }

    args.split(',')
        .map(|arg| {
            arg_comment()
                .captures(arg)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .unwrap_or(arg)
                .trim()
                .to_string()
        })
        .collect()
}
