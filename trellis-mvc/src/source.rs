//! Parameter source classification
//!
//! Every action parameter is classified once, when its descriptor is built,
//! into the set of request locations its value may be drawn from. The body is
//! exclusive: a parameter annotated [`SourceAnnotation::FromBody`] cannot
//! also name a query, header or form source.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use thiserror::Error;

/// Explicit source marker attached to a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceAnnotation {
    FromQuery,
    FromHeader,
    FromForm,
    FromBody,
}

impl SourceAnnotation {
    /// The single source this annotation selects
    pub fn source(self) -> ParameterSourceSet {
        match self {
            SourceAnnotation::FromQuery => ParameterSourceSet::QUERY,
            SourceAnnotation::FromHeader => ParameterSourceSet::HEADER,
            SourceAnnotation::FromForm => ParameterSourceSet::FORM,
            SourceAnnotation::FromBody => ParameterSourceSet::BODY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceAnnotation::FromQuery => "from-query",
            SourceAnnotation::FromHeader => "from-header",
            SourceAnnotation::FromForm => "from-form",
            SourceAnnotation::FromBody => "from-body",
        }
    }
}

impl fmt::Display for SourceAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request location a raw value was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSource {
    Query,
    Header,
    Form,
    Body,
}

impl ParameterSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterSource::Query => "query",
            ParameterSource::Header => "header",
            ParameterSource::Form => "form",
            ParameterSource::Body => "body",
        }
    }
}

impl fmt::Display for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two annotations on one parameter that cannot be combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{annotation} cannot be combined with {conflicts_with}")]
pub struct SourceConflict {
    pub annotation: SourceAnnotation,
    pub conflicts_with: SourceAnnotation,
}

/// Bit set of the locations a parameter may be bound from
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParameterSourceSet(u8);

impl ParameterSourceSet {
    pub const NONE: Self = Self(0);
    pub const QUERY: Self = Self(1);
    pub const HEADER: Self = Self(1 << 1);
    pub const FORM: Self = Self(1 << 2);
    pub const BODY: Self = Self(1 << 3);
    /// Every non-body source
    pub const ANY: Self = Self(Self::QUERY.0 | Self::HEADER.0 | Self::FORM.0);

    /// Classify a parameter's annotations.
    ///
    /// No annotation at all yields [`ParameterSourceSet::ANY`]. Combining
    /// `FromBody` with any other annotation is a conflict reporting the first
    /// offending pair.
    pub fn classify(annotations: &[SourceAnnotation]) -> Result<Self, SourceConflict> {
        if annotations.is_empty() {
            return Ok(Self::ANY);
        }

        let mut set = Self::NONE;
        let mut first_request_source: Option<SourceAnnotation> = None;
        let mut body = false;

        for &annotation in annotations {
            match annotation {
                SourceAnnotation::FromBody => {
                    if let Some(other) = first_request_source {
                        return Err(SourceConflict {
                            annotation,
                            conflicts_with: other,
                        });
                    }
                    body = true;
                }
                other => {
                    if body {
                        return Err(SourceConflict {
                            annotation: other,
                            conflicts_with: SourceAnnotation::FromBody,
                        });
                    }
                    first_request_source.get_or_insert(other);
                }
            }
            set |= annotation.source();
        }

        Ok(set)
    }

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether the body is the only eligible source
    pub fn is_body_only(self) -> bool {
        self == Self::BODY
    }

    /// Eligible request sources in lookup priority: query, header, form
    pub fn request_sources(self) -> impl Iterator<Item = ParameterSource> {
        [
            (Self::QUERY, ParameterSource::Query),
            (Self::HEADER, ParameterSource::Header),
            (Self::FORM, ParameterSource::Form),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, source)| source)
    }
}

impl BitOr for ParameterSourceSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParameterSourceSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ParameterSourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ParameterSourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        if *self == Self::ANY {
            return f.write_str("Any");
        }
        let names: Vec<&str> = [
            (Self::QUERY, "Query"),
            (Self::HEADER, "Header"),
            (Self::FORM, "Form"),
            (Self::BODY, "Body"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join("|"))
    }
}
