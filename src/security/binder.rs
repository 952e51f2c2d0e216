//! Placeholder counting and user-scoped parameter binding.

use super::literals::{EscapedQuery, LiteralSpan};
use crate::constants::{PLACEHOLDER, USER_SCOPE_MARKER};
use crate::UserId;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// The template and the bound parameters disagree on the placeholder count.
///
/// This is a defect in the escaping/binding contract, not a caller error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parameter binding mismatch: {placeholders} placeholders, {parameters} parameters")]
pub struct BinderInvariantViolation {
    pub placeholders: usize,
    pub parameters: usize,
}

/// A query template plus the values bound to its placeholders.
///
/// Only [`ParameterBinder::bind`] constructs one, so the parameter count
/// always matches the template's placeholder count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterizedQuery {
    template: String,
    parameters: Vec<UserId>,
}

impl ParameterizedQuery {
    /// Get the template text (`%s` placeholders, `%%` for a literal percent).
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Get the bound parameters in placeholder order.
    pub fn parameters(&self) -> &[UserId] {
        &self.parameters
    }

    /// Count placeholders the way a driver substituting the template sees them.
    pub fn placeholder_count(&self) -> usize {
        count_template_placeholders(&self.template)
    }

    /// Render the template into a driver's native syntax.
    ///
    /// `%%` becomes `%` and the n-th `%s` (1-based) becomes `placeholder(n)`.
    /// A `%` followed by anything else is copied unchanged.
    pub fn render_with(&self, placeholder: impl Fn(usize) -> String) -> String {
        let mut rendered = String::with_capacity(self.template.len() + 8);
        let mut ordinal = 0;
        for_each_piece(&self.template, |piece| match piece {
            TemplatePiece::Text(text) => rendered.push_str(text),
            TemplatePiece::Percent => rendered.push('%'),
            TemplatePiece::Placeholder => {
                ordinal += 1;
                rendered.push_str(&placeholder(ordinal));
            }
        });
        rendered
    }
}

/// Replaces the scope marker with placeholders and binds the user id.
#[derive(Debug, Clone)]
pub struct ParameterBinder {
    marker: String,
}

impl ParameterBinder {
    /// Create a binder for a custom scope marker.
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Get the scope marker this binder substitutes.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Bind `user_id` once per placeholder outside string literals.
    ///
    /// The scope marker is replaced only outside literals, so a marker quoted
    /// by the generator stays literal text and never becomes a placeholder the
    /// driver would substitute inside a string.
    pub fn bind(
        &self,
        escaped: &EscapedQuery,
        user_id: UserId,
    ) -> Result<ParameterizedQuery, BinderInvariantViolation> {
        let mut template = String::with_capacity(escaped.as_str().len() + 8);
        let mut placeholders = 0;

        for (idx, span) in LiteralSpan::split(escaped.as_str()).enumerate() {
            if idx > 0 {
                template.push('\'');
            }
            match span {
                LiteralSpan::Outside(text) => {
                    let text = text.replace(&self.marker, PLACEHOLDER);
                    placeholders += text.matches(PLACEHOLDER).count();
                    template.push_str(&text);
                }
                LiteralSpan::Literal(text) => template.push_str(text),
            }
        }

        let query = ParameterizedQuery {
            template,
            parameters: vec![user_id; placeholders],
        };

        let seen_by_driver = query.placeholder_count();
        if seen_by_driver != query.parameters.len() {
            error!(
                placeholders = seen_by_driver,
                parameters = query.parameters.len(),
                "Binder invariant violated; refusing to dispatch"
            );
            return Err(BinderInvariantViolation {
                placeholders: seen_by_driver,
                parameters: query.parameters.len(),
            });
        }

        debug!(parameters = placeholders, "Bound user scope parameters");
        Ok(query)
    }
}

impl Default for ParameterBinder {
    fn default() -> Self {
        Self::with_marker(USER_SCOPE_MARKER)
    }
}

enum TemplatePiece<'a> {
    Text(&'a str),
    Percent,
    Placeholder,
}

/// Walk a template, treating `%%` as an escaped percent and `%s` as a
/// placeholder anywhere in the text.
fn for_each_piece<'a>(template: &'a str, mut visit: impl FnMut(TemplatePiece<'a>)) {
    let bytes = template.as_bytes();
    let mut start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let piece = match bytes.get(idx + 1) {
                Some(b'%') => Some(TemplatePiece::Percent),
                Some(b's') => Some(TemplatePiece::Placeholder),
                _ => None,
            };
            if let Some(piece) = piece {
                if start < idx {
                    visit(TemplatePiece::Text(&template[start..idx]));
                }
                visit(piece);
                idx += 2;
                start = idx;
                continue;
            }
        }
        idx += 1;
    }

    if start < template.len() {
        visit(TemplatePiece::Text(&template[start..]));
    }
}

fn count_template_placeholders(template: &str) -> usize {
    let mut count = 0;
    for_each_piece(template, |piece| {
        if matches!(piece, TemplatePiece::Placeholder) {
            count += 1;
        }
    });
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::escape;

    fn bind(query: &str, user_id: UserId) -> Result<ParameterizedQuery, BinderInvariantViolation> {
        let escaped = escape(query).unwrap();
        ParameterBinder::default().bind(&escaped, user_id)
    }

    #[test]
    fn test_bind_single_scope_with_percent_literal() {
        let bound = bind(
            "SELECT * FROM events WHERE user_id = {user_id} AND label = '50% off'",
            7,
        )
        .unwrap();
        assert_eq!(
            bound.template(),
            "SELECT * FROM events WHERE user_id = %s AND label = '50%% off'"
        );
        assert_eq!(bound.parameters(), &[7]);
    }

    #[test]
    fn test_bind_join_scoped_twice() {
        let bound = bind(
            "SELECT * FROM a JOIN b ON a.user_id = {user_id} WHERE b.user_id = {user_id}",
            99,
        )
        .unwrap();
        assert_eq!(bound.parameters(), &[99, 99]);
        assert_eq!(bound.placeholder_count(), 2);
    }

    #[test]
    fn test_bind_counts_existing_placeholders() {
        let bound = bind("SELECT * FROM t WHERE user_id = %s", 3).unwrap();
        assert_eq!(bound.template(), "SELECT * FROM t WHERE user_id = %s");
        assert_eq!(bound.parameters(), &[3]);
    }

    #[test]
    fn test_bind_ignores_placeholders_inside_literals() {
        let bound = bind("SELECT * FROM t WHERE note = '%s' AND user_id = %s", 5).unwrap();
        assert_eq!(bound.template(), "SELECT * FROM t WHERE note = '%%s' AND user_id = %s");
        assert_eq!(bound.parameters(), &[5]);
    }

    #[test]
    fn test_quoted_marker_stays_literal() {
        let bound = bind("SELECT * FROM t WHERE user_id = '{user_id}'", 5).unwrap();
        assert_eq!(bound.template(), "SELECT * FROM t WHERE user_id = '{user_id}'");
        assert!(bound.parameters().is_empty());
    }

    #[test]
    fn test_no_placeholders() {
        let bound = bind("SELECT * FROM t WHERE user_id = 12", 12).unwrap();
        assert!(bound.parameters().is_empty());
        assert_eq!(bound.placeholder_count(), 0);
    }

    #[test]
    fn test_invariant_violation_on_escaped_percent_outside_literal() {
        // The naive count sees one `%s`; a driver sees `%%` followed by `s`.
        let err = bind("SELECT * FROM t WHERE user_id = %%s", 1).unwrap_err();
        assert_eq!(
            err,
            BinderInvariantViolation {
                placeholders: 0,
                parameters: 1,
            }
        );
    }

    #[test]
    fn test_unescaped_literal_trips_invariant() {
        // Skipping the escaper leaves a `%s` inside a literal for the driver.
        let unescaped = EscapedQuery("SELECT * FROM t WHERE note = '%s' AND user_id = %s".into());
        let err = ParameterBinder::default().bind(&unescaped, 1).unwrap_err();
        assert_eq!(err.placeholders, 2);
        assert_eq!(err.parameters, 1);
    }

    #[test]
    fn test_custom_marker() {
        let binder = ParameterBinder::with_marker(":uid");
        let escaped = escape("SELECT * FROM t WHERE user_id = :uid").unwrap();
        let bound = binder.bind(&escaped, 8).unwrap();
        assert_eq!(bound.template(), "SELECT * FROM t WHERE user_id = %s");
        assert_eq!(binder.marker(), ":uid");
    }

    #[test]
    fn test_render_with_native_placeholders() {
        let bound = bind(
            "SELECT a % 2 FROM t WHERE user_id = {user_id} AND x LIKE '5%' OR owner = {user_id}",
            1,
        )
        .unwrap();
        let rendered = bound.render_with(|n| format!("@P{}", n));
        assert_eq!(
            rendered,
            "SELECT a % 2 FROM t WHERE user_id = @P1 AND x LIKE '5%' OR owner = @P2"
        );
    }

    #[test]
    fn test_count_template_placeholders() {
        assert_eq!(count_template_placeholders("%s %s %%s %% %"), 2);
        assert_eq!(count_template_placeholders(""), 0);
        assert_eq!(count_template_placeholders("100%"), 0);
    }
}
