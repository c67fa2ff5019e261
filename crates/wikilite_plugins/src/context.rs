use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Permission level of the user a render or action is performed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Read,
    Write,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Read => "read",
            Role::Write => "write",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub name: String,
    pub role: Role,
}

/// Opaque request data handed to plugins as their `context` argument.
///
/// `slug` and `caller` also drive render caching and cache invalidation;
/// everything in `extra` is forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<Caller>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    #[must_use]
    pub fn with_caller(mut self, name: impl Into<String>, role: Role) -> Self {
        self.caller = Some(Caller {
            name: name.into(),
            role,
        });
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The slug, ignoring empty strings
    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref().filter(|s| !s.is_empty())
    }

    pub fn role(&self) -> Option<Role> {
        self.caller.as_ref().map(|c| c.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_flat() {
        let ctx = RenderContext::new()
            .with_slug("main-page")
            .with_caller("ada", Role::Write)
            .with_extra("theme", "dark");

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["slug"], "main-page");
        assert_eq!(json["caller"]["role"], "write");
        assert_eq!(json["theme"], "dark");
    }

    #[test]
    fn test_empty_slug_is_absent() {
        let ctx = RenderContext::new().with_slug("");
        assert_eq!(ctx.slug(), None);
        assert_eq!(ctx.role(), None);
    }
}
