use std::borrow::Cow;

use crate::rules::{self, IdMatcher};
use crate::{NormalizationConfig, NormalizerError, PathTemplate, UNKNOWN_TEMPLATE};

/// A single segment of a route template.
#[derive(Debug)]
enum RouteSegment {
    /// A literal segment, stored lowercased and percent-decoded.
    Static(String),
    /// A parameter. Holds the placeholder as it appears in the template, e.g. `:id`.
    Param(String),
}

#[derive(Debug)]
struct Route {
    segments: Vec<RouteSegment>,
    template: PathTemplate,
}

impl Route {
    fn parse(template: &str) -> Result<Self, NormalizerError> {
        let invalid = |reason| NormalizerError::InvalidTemplate {
            template: template.to_owned(),
            reason,
        };

        if !template.starts_with('/') {
            return Err(invalid("templates must start with a slash"));
        }
        if template.contains(['?', '#']) {
            return Err(invalid("templates must not contain a query or fragment"));
        }

        let mut segments = Vec::new();
        for raw in template.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = raw.strip_prefix(':') {
                let valid_name = !name.is_empty()
                    && name
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
                if !valid_name {
                    return Err(invalid("parameter names must be non-empty snake case"));
                }
                segments.push(RouteSegment::Param(raw.to_owned()));
                continue;
            }

            let segment = decode_segment(raw);
            if rules::is_numeric(&segment) || rules::is_uuid(&segment) {
                return Err(invalid("static segments must not look like identifiers"));
            } else if segment == "." || segment == ".." {
                return Err(invalid("templates must not contain dot segments"));
            } else {
                segments.push(RouteSegment::Static(segment));
            }
        }

        let mut canonical = String::new();
        for segment in &segments {
            canonical.push('/');
            match segment {
                RouteSegment::Static(s) | RouteSegment::Param(s) => canonical.push_str(s),
            }
        }
        if canonical.is_empty() {
            canonical.push('/');
        }

        if canonical == UNKNOWN_TEMPLATE {
            return Err(invalid("the unknown template is reserved"));
        }

        Ok(Self {
            segments,
            template: PathTemplate::new(canonical),
        })
    }

    fn matches(&self, segments: &[String], rules: &[IdMatcher]) -> bool {
        self.segments.len() == segments.len()
            && self
                .segments
                .iter()
                .zip(segments)
                .all(|(expected, actual)| match expected {
                    RouteSegment::Static(s) => s == actual,
                    RouteSegment::Param(placeholder) => {
                        placeholder == actual || rules.iter().any(|rule| rule.matches(actual))
                    }
                })
    }
}

/// Decodes percent-encoded bytes in a path segment and lowercases the result.
///
/// Invalid escapes are kept verbatim and invalid UTF-8 is replaced, so decoding never fails.
fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = bytes.get(i + 1..i + 3)
            && let Ok(hex) = std::str::from_utf8(hex)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            decoded.push(byte);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&decoded).to_lowercase()
}

/// Strips scheme and authority if the client reported a full URL instead of a path.
fn strip_origin(raw: &str) -> Cow<'_, str> {
    let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Cow::Borrowed(raw);
    }

    match url::Url::parse(raw) {
        Ok(url) => Cow::Owned(url.path().to_owned()),
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Splits a raw path into canonical segments.
///
/// Removes query and fragment, empty segments (duplicate and trailing slashes) and resolves dot
/// segments. Backslashes are treated as separators like browsers do.
fn split_segments(raw: &str) -> Vec<String> {
    let path = strip_origin(raw.trim());
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            segment => segments.push(decode_segment(segment)),
        }
    }

    segments
}

/// Rewrites raw URL paths into route templates.
///
/// Routes are matched in configuration order. Static segments compare case-insensitively after
/// percent-decoding; parameter segments accept any segment matched by one of the id rules, or the
/// placeholder itself so that normalizing a template yields the same template. Paths matching
/// no route map to [`PathTemplate::unknown`].
#[derive(Debug)]
pub struct PathNormalizer {
    routes: Vec<Route>,
    rules: Vec<IdMatcher>,
    max_segments: usize,
    unknown: PathTemplate,
}

impl PathNormalizer {
    /// Compiles the configured routes and rules.
    pub fn new(config: &NormalizationConfig) -> Result<Self, NormalizerError> {
        let routes = config
            .routes
            .iter()
            .map(|template| Route::parse(template))
            .collect::<Result<_, _>>()?;

        let rules = config
            .id_rules
            .iter()
            .map(IdMatcher::compile)
            .collect::<Result<_, _>>()?;

        Ok(Self {
            routes,
            rules,
            max_segments: config.max_segments,
            unknown: PathTemplate::unknown(),
        })
    }

    /// Maps a raw path onto its route template.
    ///
    /// This function is total and deterministic. It never returns any part of the input that is
    /// not also part of a configured template.
    pub fn normalize(&self, raw_path: &str) -> PathTemplate {
        let segments = split_segments(raw_path);

        if segments.len() > self.max_segments || is_unknown_placeholder(&segments) {
            return self.unknown.clone();
        }

        self.routes
            .iter()
            .find(|route| route.matches(&segments, &self.rules))
            .map(|route| route.template.clone())
            .unwrap_or_else(|| self.unknown.clone())
    }

    /// Returns all templates this normalizer can produce, including the unknown template.
    pub fn templates(&self) -> impl Iterator<Item = &PathTemplate> {
        self.routes
            .iter()
            .map(|route| &route.template)
            .chain(std::iter::once(&self.unknown))
    }
}

fn is_unknown_placeholder(segments: &[String]) -> bool {
    matches!(segments, [segment] if segment == &UNKNOWN_TEMPLATE[1..])
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use crate::IdRule;

    use super::*;

    fn normalizer() -> PathNormalizer {
        PathNormalizer::new(&NormalizationConfig::default()).unwrap()
    }

    const SAMPLE_PATHS: &[&str] = &[
        "/",
        "",
        "/event/abc123-uuid/manage",
        "/event/42",
        "/unknown-route",
        "/event/6b9e7a1c-3f2d-4c5b-9a8e-7d6c5b4a3f2e/tickets",
        "/EVENT/42/Manage/",
        "//event//42//",
        "/event/42?utm_source=newsletter#top",
        "https://tickets.example.com/org/acme-2024/events?page=3",
        "/event/%34%32",
        "/account/../billing",
        "/event\\42\\sponsors",
        "/événements/42",
        "/search/42",
        "/:unknown",
        "/event/:id/manage",
        "/org/:id",
        "/a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p/q/r",
        "/event/manage",
        "%%%",
        "/event/%ZZ",
    ];

    #[test]
    fn test_documented_examples() {
        let normalizer = normalizer();
        assert_eq!(
            normalizer.normalize("/event/abc123-uuid/manage").as_str(),
            "/event/:id/manage"
        );
        assert_eq!(normalizer.normalize("/event/42").as_str(), "/event/:id");
        assert_eq!(normalizer.normalize("/unknown-route").as_str(), "/:unknown");
    }

    #[test]
    fn test_root() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("/").as_str(), "/");
        assert_eq!(normalizer.normalize("").as_str(), "/");
        assert_eq!(normalizer.normalize("/?ref=home").as_str(), "/");
    }

    #[test]
    fn test_variations_share_template() {
        let normalizer = normalizer();
        let variants = [
            "/event/42/manage",
            "/EVENT/42/Manage/",
            "//event//42//manage",
            "/event/42/manage?tab=settings",
            "/event/42/manage#danger-zone",
            "/event/%34%32/%6Danage",
            "https://tickets.example.com/event/42/manage",
            "/event\\42\\manage",
        ];

        for variant in variants {
            assert_eq!(
                normalizer.normalize(variant).as_str(),
                "/event/:id/manage",
                "{variant}"
            );
        }
    }

    #[test]
    fn test_static_segments_are_not_ids() {
        let normalizer = normalizer();
        assert_eq!(normalizer.normalize("/event/manage").as_str(), "/:unknown");
        assert_eq!(normalizer.normalize("/events/create").as_str(), "/events/create");
    }

    #[test]
    fn test_idempotent() {
        let normalizer = normalizer();
        for path in SAMPLE_PATHS {
            let once = normalizer.normalize(path);
            let twice = normalizer.normalize(once.as_str());
            assert_eq!(once, twice, "{path}");
        }

        for template in normalizer.templates() {
            assert_eq!(&normalizer.normalize(template.as_str()), template);
        }
    }

    #[test]
    fn test_never_leaks_identifiers() {
        let normalizer = normalizer();
        let ids = [
            "42",
            "1700000000",
            "6b9e7a1c-3f2d-4c5b-9a8e-7d6c5b4a3f2e",
            "6b9e7a1c3f2d4c5b9a8e7d6c5b4a3f2e",
        ];
        let shapes = [
            "/event/{}",
            "/event/{}/manage",
            "/{}",
            "/org/{}/events",
            "/unknown/{}",
            "/events/{}/create",
            "/{}/{}",
        ];

        for id in ids {
            for shape in shapes {
                let path = shape.replace("{}", id);
                let template = normalizer.normalize(&path);
                assert!(
                    !template.as_str().split('/').any(|segment| segment == id),
                    "{path} leaked into {template}"
                );
            }
        }
    }

    #[test]
    fn test_depth_limit() {
        let normalizer = normalizer();
        let deep = "/event".repeat(100);
        assert!(normalizer.normalize(&deep).is_unknown());
    }

    #[test]
    fn test_templates_are_bounded() {
        let normalizer = normalizer();
        let config = NormalizationConfig::default();
        assert_eq!(normalizer.templates().count(), config.routes.len() + 1);
    }

    #[test]
    fn test_first_route_wins() {
        let config = NormalizationConfig {
            routes: vec!["/event/:id".to_owned(), "/event/:slug".to_owned()],
            ..Default::default()
        };
        let normalizer = PathNormalizer::new(&config).unwrap();
        assert_eq!(normalizer.normalize("/event/42").as_str(), "/event/:id");
        assert_eq!(normalizer.normalize("/event/:slug").as_str(), "/event/:slug");
    }

    #[test]
    fn test_custom_rule() {
        let config = NormalizationConfig {
            routes: vec!["/tag/:name".to_owned()],
            id_rules: vec![IdRule::Pattern {
                pattern: "[a-z]{3,12}".to_owned(),
            }],
            ..Default::default()
        };
        let normalizer = PathNormalizer::new(&config).unwrap();
        assert_eq!(normalizer.normalize("/tag/Music").as_str(), "/tag/:name");
        assert_eq!(normalizer.normalize("/tag/42").as_str(), "/:unknown");
    }

    #[test]
    fn test_canonical_template_spelling() {
        let config = NormalizationConfig {
            routes: vec!["/Account/Settings/".to_owned()],
            ..Default::default()
        };
        let normalizer = PathNormalizer::new(&config).unwrap();
        assert_eq!(
            normalizer.normalize("/account/settings").as_str(),
            "/account/settings"
        );
    }

    #[test]
    fn test_rejects_invalid_templates() {
        for template in [
            "event/:id",
            "/event/42",
            "/event/6b9e7a1c-3f2d-4c5b-9a8e-7d6c5b4a3f2e",
            "/event/:",
            "/event/:Id",
            "/:unknown",
            "/event?id=1",
            "/event/../admin",
        ] {
            let config = NormalizationConfig {
                routes: vec![template.to_owned()],
                ..Default::default()
            };
            assert!(
                matches!(
                    PathNormalizer::new(&config),
                    Err(NormalizerError::InvalidTemplate { .. })
                ),
                "{template}"
            );
        }
    }

    #[test]
    fn test_config_from_yaml() {
        let config: NormalizationConfig = serde_yaml::from_str(
            r#"
routes:
  - /
  - /event/:id
id_rules:
  - type: numeric
  - type: hex
    min_length: 8
"#,
        )
        .unwrap();

        assert_eq!(config.routes.len(), 2);
        assert_eq!(
            config.id_rules,
            [IdRule::Numeric, IdRule::Hex { min_length: 8 }]
        );
        assert_eq!(config.max_segments, 16);
    }
}
