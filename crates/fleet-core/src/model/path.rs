// ── Identity & Path Model (C1) ──
//
// Pure parsing and matching over dotted parameter paths. No I/O; this
// module is a library consumed by the USP and CWMP engines and by the
// device registry. Grammar: segment names match `[A-Za-z][A-Za-z0-9_]*`;
// the only separator is `.`; a trailing `.` denotes an object (non-leaf);
// a `Name.{index}` segment pair is a 1-based instance index.

use std::fmt;

/// One segment of a parsed path: either a plain name or a 1-based
/// instance index immediately following its owning object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Name(String),
    Instance(u32),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => f.write_str(n),
            Self::Instance(i) => write!(f, "{i}"),
        }
    }
}

/// A parsed `Device.WiFi.Radio.1.Enable`-style path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPath {
    segments: Vec<PathSegment>,
    /// Whether the original string ended in `.`, i.e. names an object
    /// rather than a leaf parameter.
    is_object: bool,
}

impl ParameterPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        self.is_object
    }

    /// Parse a dotted path string per the C1 grammar.
    ///
    /// # Errors
    /// Returns [`InvalidPath`] when any segment violates the grammar:
    /// empty segments, a leading digit in a name segment, or a character
    /// outside `[A-Za-z0-9_]`.
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        if raw.is_empty() {
            return Err(InvalidPath { path: raw.to_string(), reason: "empty path".into() });
        }

        let is_object = raw.ends_with('.');
        let trimmed = raw.strip_suffix('.').unwrap_or(raw);

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(InvalidPath {
                    path: raw.to_string(),
                    reason: "empty segment (consecutive or leading '.')".into(),
                });
            }

            if let Ok(index) = part.parse::<u32>() {
                if index == 0 {
                    return Err(InvalidPath {
                        path: raw.to_string(),
                        reason: "instance indices are 1-based".into(),
                    });
                }
                segments.push(PathSegment::Instance(index));
                continue;
            }

            validate_name(part).map_err(|reason| InvalidPath { path: raw.to_string(), reason })?;
            segments.push(PathSegment::Name(part.to_string()));
        }

        Ok(Self { segments, is_object })
    }

    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        let mut s = self
            .segments
            .iter()
            .map(std::string::ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        if self.is_object {
            s.push('.');
        }
        s
    }
}

impl fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("empty segment name".into());
    };
    if !first.is_ascii_alphabetic() {
        return Err(format!("segment {name:?} must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("segment {name:?} contains an invalid character"));
    }
    Ok(())
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid path {path:?}: {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: String,
}

/// One segment of a `PathPattern`: a literal name/index, or `*` which
/// matches exactly one segment of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(PathSegment),
    Wildcard,
}

/// A path pattern: either a literal path or a dotted pattern with `*`
/// matching a single segment, as used by `getParameters` and
/// `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
    is_object: bool,
}

impl PathPattern {
    /// Parse a pattern string. Reuses the path grammar for literal
    /// segments; a bare `*` token is the wildcard.
    ///
    /// # Errors
    /// Returns [`InvalidPath`] under the same conditions as
    /// [`ParameterPath::parse`].
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        if raw.is_empty() {
            return Err(InvalidPath { path: raw.to_string(), reason: "empty pattern".into() });
        }
        let is_object = raw.ends_with('.');
        let trimmed = raw.strip_suffix('.').unwrap_or(raw);

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(InvalidPath {
                    path: raw.to_string(),
                    reason: "empty segment in pattern".into(),
                });
            }
            if part == "*" {
                segments.push(PatternSegment::Wildcard);
                continue;
            }
            if let Ok(index) = part.parse::<u32>() {
                segments.push(PatternSegment::Literal(PathSegment::Instance(index)));
                continue;
            }
            validate_name(part).map_err(|reason| InvalidPath { path: raw.to_string(), reason })?;
            segments.push(PatternSegment::Literal(PathSegment::Name(part.to_string())));
        }

        Ok(Self { segments, is_object })
    }

    /// A pattern that matches every leaf and every object, used as the
    /// implicit default for `getParameters` calls with no filter.
    #[must_use]
    pub fn match_all() -> Self {
        Self { segments: vec![PatternSegment::Wildcard], is_object: false }
    }

    /// Whether `path` matches this pattern: same segment count, object
    /// flag matches, and each segment either matches a wildcard or is
    /// structurally equal.
    #[must_use]
    pub fn matches(&self, path: &ParameterPath) -> bool {
        if self.is_object != path.is_object || self.segments.len() != path.segments.len() {
            return false;
        }
        self.segments.iter().zip(path.segments.iter()).all(|(pat, seg)| match pat {
            PatternSegment::Wildcard => true,
            PatternSegment::Literal(lit) => lit == seg,
        })
    }

    /// `true` if this pattern has no wildcard segments, i.e. can only
    /// ever match one concrete path.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        !self.segments.iter().any(|s| matches!(s, PatternSegment::Wildcard))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            parts.push(match seg {
                PatternSegment::Wildcard => "*".to_string(),
                PatternSegment::Literal(l) => l.to_string(),
            });
        }
        let mut s = parts.join(".");
        if self.is_object {
            s.push('.');
        }
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leaf_path() {
        let p = ParameterPath::parse("Device.WiFi.Radio.1.Enable").unwrap();
        assert!(!p.is_object());
        assert_eq!(p.segments().len(), 5);
        assert_eq!(p.segments()[3], PathSegment::Instance(1));
    }

    #[test]
    fn parses_object_path() {
        let p = ParameterPath::parse("Device.WiFi.SSID.").unwrap();
        assert!(p.is_object());
        assert_eq!(p.to_canonical_string(), "Device.WiFi.SSID.");
    }

    #[test]
    fn rejects_leading_digit_segment() {
        assert!(ParameterPath::parse("1Device.Foo").is_err());
    }

    #[test]
    fn rejects_zero_instance_index() {
        assert!(ParameterPath::parse("Device.WiFi.Radio.0.Enable").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(ParameterPath::parse("Device..Foo").is_err());
    }

    #[test]
    fn rejects_invalid_character() {
        assert!(ParameterPath::parse("Device.Wi-Fi.Enable").is_err());
    }

    #[test]
    fn pattern_wildcard_matches_any_single_segment() {
        let pattern = PathPattern::parse("Device.WiFi.Radio.*.Channel").unwrap();
        let a = ParameterPath::parse("Device.WiFi.Radio.1.Channel").unwrap();
        let b = ParameterPath::parse("Device.WiFi.Radio.2.Channel").unwrap();
        let c = ParameterPath::parse("Device.WiFi.Radio.1.Enable").unwrap();
        assert!(pattern.matches(&a));
        assert!(pattern.matches(&b));
        assert!(!pattern.matches(&c));
    }

    #[test]
    fn pattern_respects_object_flag() {
        let pattern = PathPattern::parse("Device.WiFi.SSID.").unwrap();
        let obj = ParameterPath::parse("Device.WiFi.SSID.").unwrap();
        let leaf = ParameterPath::parse("Device.WiFi.SSID").unwrap();
        assert!(pattern.matches(&obj));
        assert!(!pattern.matches(&leaf));
    }

    #[test]
    fn literal_pattern_has_no_wildcards() {
        let pattern = PathPattern::parse("Device.DeviceInfo.SoftwareVersion").unwrap();
        assert!(pattern.is_literal());
        let wild = PathPattern::parse("Device.DeviceInfo.*").unwrap();
        assert!(!wild.is_literal());
    }
}
