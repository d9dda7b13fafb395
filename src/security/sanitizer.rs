//! Request payload sanitization.
//!
//! # Responsibilities
//! - Walk query, path parameters and body as one `serde_json::Value` tree
//! - Strip disallowed HTML
//! - Detect or excise injection signatures per category
//! - Manage toggles and skip-lists at runtime
//!
//! # Modes
//! - Permissive: matched substrings are removed until nothing matches
//! - Strict: the first match rejects the whole request
//!
//! Settings live in an `ArcSwap` snapshot so administrative changes apply
//! to the next request without locking in-flight ones.

use arc_swap::ArcSwap;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::config::schema::SanitizerConfig;
use crate::routing::matcher::{PathPattern, PatternError};
use crate::security::payload::{PayloadBody, RequestPayload};

/// Tags kept by the permissive HTML transform. Attributes are always dropped.
const SAFE_TAGS: [&str; 10] = ["b", "i", "em", "strong", "u", "p", "br", "ul", "ol", "li"];

/// Upper bound on permissive excision passes.
const MAX_PASSES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeMode {
    Strict,
    Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SqlInjection,
    NosqlInjection,
    PathTraversal,
    ScriptInjection,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SqlInjection => "sql_injection",
            Category::NosqlInjection => "nosql_injection",
            Category::PathTraversal => "path_traversal",
            Category::ScriptInjection => "script_injection",
        }
    }

    fn enabled(&self, config: &SanitizerConfig) -> bool {
        match self {
            Category::SqlInjection => config.sql_injection,
            Category::NosqlInjection => config.nosql_injection,
            Category::PathTraversal => config.path_traversal,
            Category::ScriptInjection => config.script_tags,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("potential {category} in `{field}`")]
pub struct SanitizeError {
    pub category: Category,
    pub field: String,
}

const SQL_PATTERNS: &[&str] = &[
    r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
    r"(?i)\bunion\s+(all\s+)?select\b",
    r"(?i);\s*(drop|delete|truncate|alter|insert|update|create|exec|execute|shutdown)\b[^;]*",
    r"(?i)\b(drop|truncate|alter)\s+(table|database|schema)\b",
    r";\s*--[^\r\n]*",
    r"'\s*--[^\r\n]*",
    r"(?s)/\*.*?\*/",
    r"(?i)\b(xp_cmdshell|sp_executesql)\b",
    r"(?i)\bwaitfor\s+delay\b",
    r"(?i)\b(sleep|benchmark)\s*\(\s*\d+",
];

const NOSQL_PATTERNS: &[&str] = &[
    r"\$(where|ne|eq|gt|gte|lt|lte|in|nin|or|and|not|nor|regex|exists|expr|elemMatch)\b",
    r"(?i)\bdb\.\w+\.(find|insert|update|remove|drop|aggregate)\w*\s*\(",
    r#"\{\s*"?\$\w+"?\s*:"#,
];

const PATH_PATTERNS: &[&str] = &[
    r"\.\.[/\\]",
    r"(?i)%2e%2e(%2f|%5c|/|\\)",
    r"(?i)\.\.%(2f|5c)",
    r"(?i)%252e%252e",
    r"(?i)/etc/(passwd|shadow|hosts)\b",
    r"(?i)\b[a-z]:\\windows\\",
    r"(%00|\x00)",
];

const SCRIPT_PATTERNS: &[&str] = &[
    r"(?is)<script\b[^>]*>.*?</script\s*>",
    r"(?i)</?script\b[^>]*>?",
    r"(?i)\b(javascript|vbscript)\s*:",
    r"(?i)\bon[a-z]+\s*=",
    r"(?i)data\s*:\s*text/html",
    r"(?i)\bexpression\s*\(",
    r"(?i)\beval\s*\(",
];

struct CategoryPatterns {
    category: Category,
    patterns: Vec<Regex>,
}

struct Patterns {
    categories: Vec<CategoryPatterns>,
    /// Elements removed together with their content.
    blocks: Vec<Regex>,
    comment: Regex,
    tag: Regex,
}

fn compile(sources: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    sources.iter().map(|s| Regex::new(s)).collect()
}

impl Patterns {
    fn new() -> Result<Self, regex::Error> {
        let categories = [
            (Category::SqlInjection, SQL_PATTERNS),
            (Category::NosqlInjection, NOSQL_PATTERNS),
            (Category::PathTraversal, PATH_PATTERNS),
            (Category::ScriptInjection, SCRIPT_PATTERNS),
        ]
        .into_iter()
        .map(|(category, sources)| -> Result<CategoryPatterns, regex::Error> {
            Ok(CategoryPatterns {
                category,
                patterns: compile(sources)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            categories,
            blocks: compile(&[
                r"(?is)<script\b[^>]*>.*?</script\s*>",
                r"(?is)<style\b[^>]*>.*?</style\s*>",
            ])?,
            comment: Regex::new(r"(?s)<!--.*?-->")?,
            tag: Regex::new(r"(?s)<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>")?,
        })
    }

    /// First enabled category with a match.
    fn detect(&self, config: &SanitizerConfig, input: &str) -> Option<Category> {
        self.categories
            .iter()
            .filter(|c| c.category.enabled(config))
            .find(|c| c.patterns.iter().any(|p| p.is_match(input)))
            .map(|c| c.category)
    }

    fn excise(&self, config: &SanitizerConfig, input: &str) -> String {
        let mut out = input.to_string();
        for group in self.categories.iter().filter(|c| c.category.enabled(config)) {
            for pattern in &group.patterns {
                if pattern.is_match(&out) {
                    out = pattern.replace_all(&out, "").into_owned();
                }
            }
        }
        out
    }

    fn strip_html(&self, input: &str, keep_safe: bool) -> String {
        if !input.contains('<') {
            return input.to_string();
        }
        let mut out = input.to_string();
        for block in &self.blocks {
            out = block.replace_all(&out, "").into_owned();
        }
        out = self.comment.replace_all(&out, "").into_owned();
        self.tag
            .replace_all(&out, |caps: &Captures<'_>| {
                let name = caps[2].to_ascii_lowercase();
                if keep_safe && SAFE_TAGS.contains(&name.as_str()) {
                    format!("<{}{}>", &caps[1], name)
                } else {
                    String::new()
                }
            })
            .into_owned()
    }
}

/// Live settings with route skip patterns compiled.
struct Settings {
    config: SanitizerConfig,
    skip_routes: Vec<PathPattern>,
}

impl Settings {
    fn compile(config: SanitizerConfig) -> Result<Self, PatternError> {
        let skip_routes = config
            .skip_routes
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            skip_routes,
        })
    }

    fn skips_field(&self, path: &str, name: &str) -> bool {
        self.config
            .skip_fields
            .iter()
            .any(|f| f == path || f == name)
    }

    fn skips_route(&self, path: &str) -> bool {
        self.skip_routes.iter().any(|p| p.matches(path))
    }
}

/// Partial update of the toggles. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SanitizerUpdate {
    pub enabled: Option<bool>,
    pub strict: Option<bool>,
    pub html: Option<bool>,
    pub sql_injection: Option<bool>,
    pub nosql_injection: Option<bool>,
    pub path_traversal: Option<bool>,
    pub script_tags: Option<bool>,
}

impl SanitizerUpdate {
    fn apply(&self, config: &mut SanitizerConfig) {
        let fields = [
            (self.enabled, &mut config.enabled),
            (self.strict, &mut config.strict),
            (self.html, &mut config.html),
            (self.sql_injection, &mut config.sql_injection),
            (self.nosql_injection, &mut config.nosql_injection),
            (self.path_traversal, &mut config.path_traversal),
            (self.script_tags, &mut config.script_tags),
        ];
        for (update, target) in fields {
            if let Some(value) = update {
                *target = value;
            }
        }
    }
}

/// Per-leaf hooks for the payload walker.
trait Visitor {
    /// Whether an object key survives.
    fn visit_key(&mut self, path: &str, key: &str) -> Result<bool, SanitizeError>;

    fn visit_str(&mut self, path: &str, name: &str, value: &mut String)
        -> Result<(), SanitizeError>;
}

fn walk<V: Visitor>(
    value: &mut Value,
    path: &str,
    name: &str,
    visitor: &mut V,
) -> Result<(), SanitizeError> {
    match value {
        Value::String(s) => visitor.visit_str(path, name, s),
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, &format!("{}[{}]", path, i), name, visitor)?;
            }
            Ok(())
        }
        Value::Object(map) => walk_map(map, path, visitor),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn walk_map<V: Visitor>(
    map: &mut Map<String, Value>,
    path: &str,
    visitor: &mut V,
) -> Result<(), SanitizeError> {
    let mut dropped = Vec::new();
    for (key, child) in map.iter_mut() {
        let child_path = format!("{}.{}", path, key);
        if !visitor.visit_key(&child_path, key)? {
            dropped.push(key.clone());
            continue;
        }
        walk(child, &child_path, key, visitor)?;
    }
    for key in dropped {
        map.remove(&key);
    }
    Ok(())
}

/// Applies the string transform and records whether anything changed.
struct Cleaner<'a> {
    sanitizer: &'a Sanitizer,
    settings: &'a Settings,
    mode: SanitizeMode,
    changed: bool,
}

impl Visitor for Cleaner<'_> {
    fn visit_key(&mut self, path: &str, key: &str) -> Result<bool, SanitizeError> {
        if !key.starts_with('$') || !self.settings.config.nosql_injection {
            return Ok(true);
        }
        match self.mode {
            SanitizeMode::Strict => Err(SanitizeError {
                category: Category::NosqlInjection,
                field: path.to_string(),
            }),
            SanitizeMode::Permissive => {
                tracing::debug!(field = %path, "Dropping operator key");
                self.changed = true;
                Ok(false)
            }
        }
    }

    fn visit_str(
        &mut self,
        path: &str,
        name: &str,
        value: &mut String,
    ) -> Result<(), SanitizeError> {
        if self.settings.skips_field(path, name) {
            return Ok(());
        }
        let cleaned = self
            .sanitizer
            .clean(&self.settings.config, self.mode, path, value)?;
        if cleaned != *value {
            tracing::debug!(field = %path, "Sanitized field");
            *value = cleaned;
            self.changed = true;
        }
        Ok(())
    }
}

pub struct Sanitizer {
    patterns: Patterns,
    settings: ArcSwap<Settings>,
}

/// Errors raised while building the sanitizer.
#[derive(Debug, thiserror::Error)]
pub enum SanitizerSetupError {
    #[error("invalid skip route: {0}")]
    SkipRoute(#[from] PatternError),
    #[error("invalid signature pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl Sanitizer {
    pub fn new(config: &SanitizerConfig) -> Result<Self, SanitizerSetupError> {
        Ok(Self {
            patterns: Patterns::new()?,
            settings: ArcSwap::from_pointee(Settings::compile(config.clone())?),
        })
    }

    /// Current settings.
    pub fn config(&self) -> SanitizerConfig {
        self.settings.load().config.clone()
    }

    /// Replace all settings at once.
    pub fn replace(&self, config: &SanitizerConfig) -> Result<(), PatternError> {
        self.settings.store(Arc::new(Settings::compile(config.clone())?));
        Ok(())
    }

    fn modify(&self, f: impl Fn(&mut SanitizerConfig)) -> Result<SanitizerConfig, PatternError> {
        let mut next = self.config();
        f(&mut next);
        self.replace(&next)?;
        tracing::info!(
            enabled = next.enabled,
            strict = next.strict,
            "Sanitizer settings updated"
        );
        Ok(next)
    }

    pub fn update(&self, update: &SanitizerUpdate) -> SanitizerConfig {
        // Toggles never touch the skip routes, so recompiling cannot fail.
        let mut next = self.config();
        update.apply(&mut next);
        let settings = Settings {
            skip_routes: self.settings.load().skip_routes.clone(),
            config: next.clone(),
        };
        self.settings.store(Arc::new(settings));
        tracing::info!(enabled = next.enabled, strict = next.strict, "Sanitizer toggles updated");
        next
    }

    pub fn add_skip_field(&self, field: &str) -> Result<SanitizerConfig, PatternError> {
        let field = field.trim().to_string();
        self.modify(|c| {
            if !c.skip_fields.contains(&field) {
                c.skip_fields.push(field.clone());
            }
        })
    }

    pub fn remove_skip_field(&self, field: &str) -> Result<SanitizerConfig, PatternError> {
        let field = field.trim();
        self.modify(|c| c.skip_fields.retain(|f| f != field))
    }

    pub fn add_skip_route(&self, route: &str) -> Result<SanitizerConfig, PatternError> {
        let route = route.trim().to_string();
        PathPattern::parse(&route)?;
        self.modify(|c| {
            if !c.skip_routes.contains(&route) {
                c.skip_routes.push(route.clone());
            }
        })
    }

    pub fn remove_skip_route(&self, route: &str) -> Result<SanitizerConfig, PatternError> {
        let route = route.trim();
        self.modify(|c| c.skip_routes.retain(|r| r != route))
    }

    /// Mode for a request, honoring a per-route or per-request override.
    pub fn effective_mode(&self, mode: Option<SanitizeMode>) -> SanitizeMode {
        mode.unwrap_or(if self.settings.load().config.strict {
            SanitizeMode::Strict
        } else {
            SanitizeMode::Permissive
        })
    }

    /// True if requests to `path` are inspected at all.
    pub fn applies_to(&self, path: &str) -> bool {
        let settings = self.settings.load();
        settings.config.enabled && !settings.skips_route(path)
    }

    fn clean(
        &self,
        config: &SanitizerConfig,
        mode: SanitizeMode,
        field: &str,
        input: &str,
    ) -> Result<String, SanitizeError> {
        match mode {
            SanitizeMode::Strict => {
                if let Some(category) = self.patterns.detect(config, input) {
                    return Err(SanitizeError {
                        category,
                        field: field.to_string(),
                    });
                }
                Ok(if config.html {
                    self.patterns.strip_html(input, false)
                } else {
                    input.to_string()
                })
            }
            SanitizeMode::Permissive => {
                let mut current = input.to_string();
                for _ in 0..MAX_PASSES {
                    let mut next = if config.html {
                        self.patterns.strip_html(&current, true)
                    } else {
                        current.clone()
                    };
                    next = self.patterns.excise(config, &next);
                    if next == current {
                        break;
                    }
                    current = next;
                }
                Ok(current)
            }
        }
    }

    /// Sanitize an arbitrary value outside the request path.
    ///
    /// `field` names the value for skip-list lookups and error reporting.
    pub fn sanitize_value(
        &self,
        field: &str,
        mut value: Value,
        mode: Option<SanitizeMode>,
    ) -> Result<Value, SanitizeError> {
        let settings = self.settings.load();
        if !settings.config.enabled {
            return Ok(value);
        }
        let mut cleaner = Cleaner {
            sanitizer: self,
            settings: &settings,
            mode: self.effective_mode(mode),
            changed: false,
        };
        let name = field.rsplit('.').next().unwrap_or(field);
        walk(&mut value, field, name, &mut cleaner)?;
        Ok(value)
    }

    /// Sanitize every caller-controlled part of the request in place.
    ///
    /// Returns whether anything was modified.
    pub fn sanitize_payload(
        &self,
        path: &str,
        payload: &mut RequestPayload,
        mode: Option<SanitizeMode>,
    ) -> Result<bool, SanitizeError> {
        let settings = self.settings.load();
        if !settings.config.enabled || settings.skips_route(path) {
            return Ok(false);
        }
        let mut cleaner = Cleaner {
            sanitizer: self,
            settings: &settings,
            mode: self.effective_mode(mode),
            changed: false,
        };

        for (name, value) in payload.params.iter_mut() {
            cleaner.visit_str(&format!("params.{}", name), name, value)?;
        }
        walk_map(&mut payload.query, "query", &mut cleaner)?;
        match &mut payload.body {
            PayloadBody::Json(Value::Object(map)) | PayloadBody::Form(map) => {
                walk_map(map, "body", &mut cleaner)?
            }
            PayloadBody::Json(value) => walk(value, "body", "body", &mut cleaner)?,
            PayloadBody::None | PayloadBody::Opaque => {}
        }

        Ok(cleaner.changed)
    }
}
