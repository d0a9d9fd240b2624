//! Pre-registration hooks.
//!
//! Before a held request is registered, an ordered chain of hooks inspects
//! the [`RequestContext`]. Each hook may let the request through, assign the
//! subscriber ID it should wait under, or abort the registration entirely.
//!
//! ```rust
//! use tenvis_linger_core::hooks::{hook_fn, HookChain, PathParamId, Verdict};
//!
//! let mut chain = HookChain::new();
//! chain.push(PathParamId::new("id"));
//! chain.push(hook_fn(|ctx| {
//!     if ctx.header("x-banned").is_some() {
//!         Verdict::abort(403, "banned")
//!     } else {
//!         Verdict::Continue
//!     }
//! }));
//! assert_eq!(chain.len(), 2);
//! ```

use crate::listener::SubscriberId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What the request-handling side knows about an incoming long-poll request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path as received.
    pub path: String,
    /// Route parameters extracted by the router.
    pub params: HashMap<String, String>,
    /// Request headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Remote peer address, if known.
    pub remote_addr: Option<String>,
}

impl RequestContext {
    /// Create a context for a request path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a route parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add a header. The name is stored lowercase.
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the remote address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Get a route parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Get a header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Why a hook refused a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// HTTP-like status code.
    pub status: u16,
    /// Human readable reason.
    pub reason: String,
}

impl Rejection {
    /// Create a rejection.
    #[must_use]
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// A `401 Unauthorized` rejection.
    #[must_use]
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(401, reason)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

/// Outcome of a single hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed to the next hook without changing the subscriber ID.
    Continue,
    /// Proceed and wait under this subscriber ID. A later `Assign` overrides it.
    Assign(SubscriberId),
    /// Stop; the request is not registered.
    Abort(Rejection),
}

impl Verdict {
    /// Shorthand for [`Verdict::Assign`].
    #[must_use]
    pub fn assign(id: impl Into<SubscriberId>) -> Self {
        Self::Assign(id.into())
    }

    /// Shorthand for [`Verdict::Abort`].
    #[must_use]
    pub fn abort(status: u16, reason: impl Into<String>) -> Self {
        Self::Abort(Rejection::new(status, reason))
    }
}

/// A check run before a long-poll request is registered.
#[async_trait]
pub trait PreRegistrationHook: Send + Sync {
    /// Inspect the request.
    async fn check(&self, ctx: &RequestContext) -> Verdict;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Ordered list of hooks.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn PreRegistrationHook>>,
}

impl HookChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    pub fn push(&mut self, hook: impl PreRegistrationHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    /// Append a shared hook.
    pub fn push_shared(&mut self, hook: Arc<dyn PreRegistrationHook>) {
        self.hooks.push(hook);
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, hook: impl PreRegistrationHook + 'static) -> Self {
        self.push(hook);
        self
    }

    /// Number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Check if the chain has no hooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order, starting from `subscriber`.
    ///
    /// Returns the subscriber ID the request should wait under (`None` for a
    /// broadcast wait).
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] produced; later hooks do not run.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        mut subscriber: Option<SubscriberId>,
    ) -> Result<Option<SubscriberId>, Rejection> {
        for hook in &self.hooks {
            match hook.check(ctx).await {
                Verdict::Continue => {}
                Verdict::Assign(id) => subscriber = Some(id),
                Verdict::Abort(rejection) => {
                    debug!(hook = hook.name(), path = %ctx.path, %rejection, "Registration aborted");
                    return Err(rejection);
                }
            }
        }
        Ok(subscriber)
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}

/// A hook backed by a synchronous closure. See [`hook_fn`].
pub struct FnHook<F> {
    f: F,
}

/// Adapt a closure into a [`PreRegistrationHook`].
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&RequestContext) -> Verdict + Send + Sync,
{
    FnHook { f }
}

#[async_trait]
impl<F> PreRegistrationHook for FnHook<F>
where
    F: Fn(&RequestContext) -> Verdict + Send + Sync,
{
    async fn check(&self, ctx: &RequestContext) -> Verdict {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Use a route parameter as the subscriber ID (the `/poll/:id` pattern).
///
/// Aborts with `400` if the route did not capture the parameter.
#[derive(Debug, Clone)]
pub struct PathParamId {
    param: String,
}

impl PathParamId {
    /// Read the subscriber ID from route parameter `param`.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

#[async_trait]
impl PreRegistrationHook for PathParamId {
    async fn check(&self, ctx: &RequestContext) -> Verdict {
        match ctx.param(&self.param) {
            Some(id) if !id.is_empty() => Verdict::assign(id),
            _ => Verdict::abort(400, format!("missing path parameter '{}'", self.param)),
        }
    }

    fn name(&self) -> &str {
        "path_param_id"
    }
}

/// Use a request header as the subscriber ID when present.
#[derive(Debug, Clone)]
pub struct HeaderId {
    header: String,
}

impl HeaderId {
    /// Read the subscriber ID from header `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

#[async_trait]
impl PreRegistrationHook for HeaderId {
    async fn check(&self, ctx: &RequestContext) -> Verdict {
        match ctx.header(&self.header) {
            Some(id) if !id.is_empty() => Verdict::assign(id),
            _ => Verdict::Continue,
        }
    }

    fn name(&self) -> &str {
        "header_id"
    }
}

/// Require `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    /// Accept only this token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl PreRegistrationHook for BearerToken {
    async fn check(&self, ctx: &RequestContext) -> Verdict {
        let presented = ctx
            .header("authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == self.token => Verdict::Continue,
            Some(_) => Verdict::Abort(Rejection::unauthorized("invalid token")),
            None => Verdict::Abort(Rejection::unauthorized("missing bearer token")),
        }
    }

    fn name(&self) -> &str {
        "bearer_token"
    }
}
