//! Method registry and provider signatures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::CallContext;
use crate::errors::{RegistryError, RpcError};

/// Declared call signature of a provider.
///
/// The connection id is always passed positionally through [`CallContext`];
/// the signature describes the keyword arguments carried in `data`.
#[derive(Clone, Debug, Default)]
pub struct MethodSignature {
    required: Vec<String>,
    optional: Vec<String>,
    accepts_extra: bool,
}

impl MethodSignature {
    /// A signature taking no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signature accepting any arguments.
    pub fn any() -> Self {
        Self {
            accepts_extra: true,
            ..Self::default()
        }
    }

    /// Add a required argument.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Add an optional argument.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.optional.push(name.into());
        self
    }

    /// Accept arguments beyond the declared ones.
    #[must_use]
    pub fn accept_extra(mut self) -> Self {
        self.accepts_extra = true;
        self
    }

    /// Validate decoded `data` and return it as an argument map.
    pub fn check(&self, data: Value) -> Result<Map<String, Value>, RpcError> {
        let Value::Object(args) = data else {
            return Err(RpcError::IncorrectSignature {
                message: "arguments must be a JSON object".into(),
            });
        };

        if let Some(missing) = self.required.iter().find(|name| !args.contains_key(*name)) {
            return Err(RpcError::IncorrectSignature {
                message: format!("missing required argument '{missing}'"),
            });
        }

        if !self.accepts_extra {
            if let Some(unexpected) = args
                .keys()
                .find(|k| !self.required.contains(k) && !self.optional.contains(k))
            {
                return Err(RpcError::IncorrectSignature {
                    message: format!("unexpected argument '{unexpected}'"),
                });
            }
        }

        Ok(args)
    }
}

/// Trait implemented by every RPC method provider.
#[async_trait]
pub trait RpcMethod: Send + Sync {
    /// Arguments this provider accepts. Defaults to anything.
    fn signature(&self) -> MethodSignature {
        MethodSignature::any()
    }

    /// Execute the method.
    async fn call(&self, ctx: CallContext, args: Map<String, Value>) -> Result<Value, RpcError>;
}

/// Provider backed by an async closure. Built with [`from_fn`].
pub struct FnMethod<F> {
    signature: MethodSignature,
    f: F,
}

/// Wrap an async closure as a provider with the given signature.
pub fn from_fn<F, Fut>(signature: MethodSignature, f: F) -> FnMethod<F>
where
    F: Fn(CallContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send,
{
    FnMethod { signature, f }
}

#[async_trait]
impl<F, Fut> RpcMethod for FnMethod<F>
where
    F: Fn(CallContext, Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RpcError>> + Send,
{
    fn signature(&self) -> MethodSignature {
        self.signature.clone()
    }

    async fn call(&self, ctx: CallContext, args: Map<String, Value>) -> Result<Value, RpcError> {
        (self.f)(ctx, args).await
    }
}

/// Registry mapping method names to providers. Lookup is by exact name.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn RpcMethod>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a provider under a method name.
    pub fn register(
        &mut self,
        method: &str,
        handler: impl RpcMethod + 'static,
    ) -> Result<(), RegistryError> {
        self.register_arc(method, Arc::new(handler))
    }

    /// Register an already shared provider.
    pub fn register_arc(
        &mut self,
        method: &str,
        handler: Arc<dyn RpcMethod>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(method) {
            return Err(RegistryError::DuplicateMethod(method.to_owned()));
        }
        let _ = self.handlers.insert(method.to_owned(), handler);
        Ok(())
    }

    /// Look up the provider for `method`.
    pub fn get(&self, method: &str) -> Result<Arc<dyn RpcMethod>, RpcError> {
        self.handlers
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::MethodNotFound {
                method: method.to_owned(),
            })
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
