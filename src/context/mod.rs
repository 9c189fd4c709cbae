//! Per-request context handed down the middleware chain.
//!
//! A [`Context`] owns the parsed [`Request`] and, once the router has matched
//! a route, the [`PathParams`] captured from its pattern.

use std::collections::HashMap;

use crate::Request;

/// Path parameters extracted from the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request state passed to every middleware and, finally, to the route handler.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Create a context for a request that has not been routed yet.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: PathParams::new(),
        }
    }

    /// Create a context carrying the parameters captured by a matched route.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Split the context back into its request, dropping any parameters.
    pub fn into_request(self) -> Request {
        self.request
    }
}
