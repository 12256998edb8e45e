//! # Endpoint Path Templates
//!
//! Endpoints such as `machines/{machine_id}/pallets` depend on identifiers from
//! the session. A `PathTemplate` renders them and refuses to produce a path
//! with a hole in it: a missing identifier is a [`PreconditionError`], raised
//! before any request leaves the process.

use url::{form_urlencoded, Url};

use crate::errors::PreconditionError;
use crate::session::SessionContext;

/// A relative endpoint path with `{placeholder}` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    resource: String,
    template: String,
}

impl PathTemplate {
    /// `resource` names the thing being fetched in error messages.
    pub fn new(resource: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            template: template.into(),
        }
    }

    /// The resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The raw template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of all placeholders, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    names.push(&after[..end]);
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Fills every placeholder from `session`, percent-encoding the values.
    ///
    /// Placeholders in the path are encoded as path segments (`M 7` becomes
    /// `M%207`, `/` becomes `%2F`); placeholders after `?` are form-encoded.
    ///
    /// # Errors
    /// [`PreconditionError::MissingParameter`] for the first placeholder the
    /// session cannot satisfy.
    pub fn render(&self, session: &SessionContext) -> Result<String, PreconditionError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        let mut in_query = false;
        while let Some(start) = rest.find('{') {
            let literal = &rest[..start];
            in_query |= literal.contains('?');
            out.push_str(literal);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                // Unbalanced brace, keep it literally
                out.push_str(&rest[start..]);
                return Ok(out);
            };
            let name = &after[..end];
            let value = session.require(name, &self.resource)?;
            if in_query {
                out.extend(form_urlencoded::byte_serialize(value.as_bytes()));
            } else {
                out.push_str(&encode_path_segment(value));
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Percent-encodes `value` as a single path segment.
fn encode_path_segment(value: &str) -> String {
    let encoded = Url::parse("http://segment/").ok().and_then(|mut scratch| {
        scratch.path_segments_mut().ok()?.clear().push(value);
        Some(scratch.path().trim_start_matches('/').to_string())
    });
    // An http base always accepts path segments
    encoded.unwrap_or_else(|| form_urlencoded::byte_serialize(value.as_bytes()).collect())
}
