// Copyright 2025 the wirekit authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::trace;

use crate::http::{HttpRequest, HttpResponse};
use crate::utils::{panic_message, run_callback};
use crate::{AppError, AppResult};

pub type RouteHandler = Arc<dyn Fn(&HttpRequest) -> AppResult<HttpResponse> + Send + Sync>;
type FilterHook = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&AppError) + Send + Sync>;

struct RouteDescriptor {
    method: String,
    path: String,
    handler: RouteHandler,
}

struct DefaultRouteDescriptor {
    method: String,
    handler: RouteHandler,
}

/// Route table for the HTTP server, built up front and immutable once the
/// server consumes it.
///
/// Matching is exact-string on the lowercased method and the path, in
/// registration order, so the first of two identical registrations wins
/// deterministically. A default route catches every path for its method.
pub struct Router {
    name: String,
    routes: Vec<RouteDescriptor>,
    default_routes: Vec<DefaultRouteDescriptor>,
    filter: Option<FilterHook>,
    error_hook: Option<ErrorHook>,
}

impl Router {
    pub fn new() -> Router {
        Router::named("router")
    }

    /// A named router; the name appears in `NoHandler` errors so hosts
    /// running several servers can tell the route tables apart.
    pub fn named(name: &str) -> Router {
        Router {
            name: name.to_string(),
            routes: Vec::new(),
            default_routes: Vec::new(),
            filter: None,
            error_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a handler for an exact (method, path) pair. The method is
    /// lowercased at registration.
    pub fn route<F>(mut self, method: &str, path: &str, handler: F) -> Router
    where
        F: Fn(&HttpRequest) -> AppResult<HttpResponse> + Send + Sync + 'static,
    {
        self.routes.push(RouteDescriptor {
            method: method.to_lowercase(),
            path: path.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Registers a catch-all handler for a method, consulted only when no
    /// exact route matches.
    pub fn default_route<F>(mut self, method: &str, handler: F) -> Router
    where
        F: Fn(&HttpRequest) -> AppResult<HttpResponse> + Send + Sync + 'static,
    {
        self.default_routes.push(DefaultRouteDescriptor {
            method: method.to_lowercase(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Registers the access filter, run before routing. Returning `false`
    /// rejects the request with a 403 and the handler is never invoked.
    pub fn filter<F>(mut self, hook: F) -> Router
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(hook));
        self
    }

    /// Registers the error hook, invoked with every per-request error.
    /// Without one, per-request errors are logged and swallowed.
    pub fn error_hook<F>(mut self, hook: F) -> Router
    where
        F: Fn(&AppError) + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Selects and runs the handler for a request. A panicking handler is
    /// caught and reported as an error.
    pub(crate) fn dispatch(&self, request: &HttpRequest) -> AppResult<HttpResponse> {
        trace!(
            "dispatching {} {} in {}",
            request.method,
            request.path,
            self.name
        );
        let handler = self
            .select(&request.method, &request.path)
            .ok_or_else(|| AppError::NoHandler {
                method: request.method.clone(),
                path: request.path.clone(),
                router: self.name.clone(),
            })?
            .clone();
        match catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(result) => result,
            Err(payload) => Err(AppError::HandlerPanic(panic_message(&*payload))),
        }
    }

    fn select(&self, method: &str, path: &str) -> Option<&RouteHandler> {
        self.routes
            .iter()
            .find(|route| route.method == method && route.path == path)
            .map(|route| &route.handler)
            .or_else(|| {
                self.default_routes
                    .iter()
                    .find(|route| route.method == method)
                    .map(|route| &route.handler)
            })
    }

    /// Runs the filter if one is registered. A panicking filter is an
    /// error, not a rejection.
    pub(crate) fn run_filter(&self, request: &HttpRequest) -> AppResult<bool> {
        let hook = match &self.filter {
            Some(hook) => hook.clone(),
            None => return Ok(true),
        };
        match catch_unwind(AssertUnwindSafe(|| hook(request))) {
            Ok(allowed) => Ok(allowed),
            Err(payload) => Err(AppError::HandlerPanic(panic_message(&*payload))),
        }
    }

    pub(crate) fn report_error(&self, error: &AppError) {
        if let Some(hook) = &self.error_hook {
            let hook = hook.clone();
            run_callback("error hook", move || hook(error));
        }
    }
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}
