//! Declarative HTTP connectors for enrichkit.
//!
//! A [`ConnectorDocument`] describes one outbound API call: which input type
//! it accepts, how to render the request, and how to map the response into
//! output entities. The [`TemplateEngine`] executes documents with:
//! - `{{ variable }}` rendering with per-placeholder URL encoding
//! - private/metadata target blocking before every attempt and redirect hop
//! - bounded retries with exponential backoff
//! - JSON, XML and plain-text response decoding

pub mod decode;
pub mod document;
pub mod engine;
pub mod extract;
pub mod http;
pub mod mapping;
pub mod render;
pub mod ssrf;

pub use document::{
    ConnectorDocument, DocumentFormat, Expect, HttpMethod, InputSpec, OutputSpec, RequestSpec,
    ResponseSpec, RetrySpec, SecretSpec,
};
pub use engine::{TemplateEngine, build_request, template_values};
pub use extract::extract_nested_value;
pub use http::{HttpCaller, HttpResponse, RenderedRequest, RetryPolicy};
pub use render::{Encoding, render, render_value, render_with};
pub use ssrf::{SsrfGuard, is_blocked_ip};
