use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlIdError {
    #[error("xmlid '{0}' is missing the '.' after the domaincode")]
    MissingDomain(String),
    #[error("xmlid '{0}' is missing the '__' before the slug")]
    MissingSlug(String),
    #[error("invalid domaincode '{0}'")]
    Domaincode(String),
    #[error("invalid entity '{0}'")]
    Entity(String),
    #[error("invalid template '{0}'")]
    Template(String),
    #[error("invalid slug '{0}'")]
    Slug(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XmlId {
    pub domaincode: String,
    pub entity: String,
    pub template: Option<String>,
    pub slug: String,
}

fn domaincode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+$").expect("valid regex"))
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("valid regex"))
}

fn legacy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<dc>[a-z_][a-z0-9_]*)\.(?P<entity>[a-z]+)(?:[_-](?P<variant>[a-z_]+))?\.(?P<slug>[a-z0-9_-]+)$")
            .expect("valid regex")
    })
}

fn legacy_partner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<dc>[a-z_][a-z0-9_]*)\.(?P<kind>[a-z]+)_(?P<id>[0-9]+)$").expect("valid regex")
    })
}

impl XmlId {
    pub fn new(
        domaincode: &str,
        entity: &str,
        template: Option<&str>,
        slug: &str,
    ) -> Result<Self, XmlIdError> {
        if !domaincode_re().is_match(domaincode) {
            return Err(XmlIdError::Domaincode(domaincode.to_string()));
        }
        if !word_re().is_match(entity) {
            return Err(XmlIdError::Entity(entity.to_string()));
        }
        if let Some(t) = template {
            if !word_re().is_match(t) {
                return Err(XmlIdError::Template(t.to_string()));
            }
        }
        if !slug_re().is_match(slug) || slug.contains("__") {
            return Err(XmlIdError::Slug(slug.to_string()));
        }
        Ok(XmlId {
            domaincode: domaincode.to_string(),
            entity: entity.to_string(),
            template: template.map(str::to_string),
            slug: slug.to_string(),
        })
    }

    pub fn parse(s: &str) -> Result<Self, XmlIdError> {
        let (domaincode, rest) = s
            .split_once('.')
            .ok_or_else(|| XmlIdError::MissingDomain(s.to_string()))?;
        let (head, slug) = rest
            .split_once("__")
            .ok_or_else(|| XmlIdError::MissingSlug(s.to_string()))?;
        let (entity, template) = match head.split_once('-') {
            Some((e, t)) => (e, Some(t)),
            None => (head, None),
        };
        XmlId::new(domaincode, entity, template, slug)
    }

    /// Build an xmlid whose slug is derived from free text.
    pub fn from_name(
        domaincode: &str,
        entity: &str,
        template: Option<&str>,
        name: &str,
    ) -> Result<Self, XmlIdError> {
        XmlId::new(domaincode, entity, template, &slugify(name))
    }
}

impl fmt::Display for XmlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domaincode, self.entity)?;
        if let Some(t) = &self.template {
            write!(f, "-{}", t)?;
        }
        write!(f, "__{}", self.slug)
    }
}

impl std::str::FromStr for XmlId {
    type Err = XmlIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        XmlId::parse(s)
    }
}

/// Lowercase slug with single underscores between words.
pub fn slugify(text: &str) -> String {
    slug::slugify(text).replace('-', "_")
}

/// Rewrite a legacy dotted xmlid into the current format.
///
/// Ids that already parse are returned unchanged. Returns `None` when the
/// input matches neither format.
pub fn migrate_legacy(old: &str) -> Option<String> {
    if XmlId::parse(old).is_ok() {
        return Some(old.to_string());
    }

    if let Some(c) = legacy_re().captures(old) {
        let dc = &c["dc"];
        let entity = &c["entity"];
        let raw_slug = &c["slug"];
        let (template, slug) = match c.name("variant") {
            Some(v) => (Some(v.as_str().replace('_', "")), raw_slug.to_string()),
            // images used `dc.image.subject-identifier`
            None if entity == "image" && raw_slug.contains('-') => {
                let (subject, ident) = raw_slug.split_once('-')?;
                (Some(subject.replace('_', "")), ident.to_string())
            }
            None => (None, raw_slug.to_string()),
        };
        let slug = collapse_underscores(&slug.replace('-', "_"));
        return XmlId::new(dc, entity, template.as_deref(), &slug)
            .ok()
            .map(|x| x.to_string());
    }

    if let Some(c) = legacy_partner_re().captures(old) {
        return XmlId::new(&c["dc"], "partner", Some(&c["kind"]), &c["id"])
            .ok()
            .map(|x| x.to_string());
    }

    None
}

fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out
}
