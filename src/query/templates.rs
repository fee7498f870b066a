// Query Templates Module
// Selectors and the parameterized LogQL expressions built on top of them.

use crate::errors::PickError;
use crate::generator::LogFormat;
use crate::labels::{quote, LabelModel, FORMAT_LABEL};
use std::fmt;

/// Preferred label for stream selection in templates.
const PRIMARY_LABEL: &str = "app";

/// Preferred label for `sum by (...)` grouping.
const GROUP_LABEL: &str = "namespace";

/// An equality matcher `name="value"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Matcher {
    pub name: String,
    pub value: String,
}

impl Matcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, quote(&self.value))
    }
}

/// A stream selector with at least one matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector(Vec<Matcher>);

impl Selector {
    /// Returns `None` when `matchers` is empty.
    pub fn new(matchers: Vec<Matcher>) -> Option<Self> {
        if matchers.is_empty() {
            None
        } else {
            Some(Self(matchers))
        }
    }

    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![Matcher::new(name, value)])
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, matcher) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", matcher)?;
        }
        f.write_str("}")
    }
}

/// Label names the templates are rendered against.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub model: &'a LabelModel,
    /// Label whose value selects the stream.
    pub primary: &'a str,
    /// Label used for grouping, when the model has a second one.
    pub group: Option<&'a str>,
}

impl<'a> TemplateContext<'a> {
    /// `app` when configured, otherwise the first non-`format` label.
    /// Grouping uses `namespace` when configured, otherwise any other label.
    pub fn new(model: &'a LabelModel) -> Self {
        let primary = if model.contains(PRIMARY_LABEL) {
            PRIMARY_LABEL
        } else {
            model
                .label_names()
                .find(|name| *name != FORMAT_LABEL)
                .unwrap_or(FORMAT_LABEL)
        };
        let group = if model.contains(GROUP_LABEL) && primary != GROUP_LABEL {
            Some(GROUP_LABEL)
        } else {
            model.label_names().find(|name| *name != primary)
        };
        Self {
            model,
            primary,
            group,
        }
    }

    fn has_json(&self) -> bool {
        self.model.formats().contains(&LogFormat::Json)
    }

    fn selector(&self, draw: f64) -> Result<Selector, PickError> {
        let value = self.model.pick_value(self.primary, draw)?;
        Ok(Selector::single(self.primary, value))
    }
}

/// Metric expressions valid for both instant and range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstantTemplate {
    Rate,
    SumByRate,
    RegexFilterRate,
    LineFilterRate,
    JsonStatusRate,
    LogfmtClientRate,
    UnwrapSumOverTime,
    UnwrapQuantileOverTime,
}

impl InstantTemplate {
    pub const ALL: [InstantTemplate; 8] = [
        InstantTemplate::Rate,
        InstantTemplate::SumByRate,
        InstantTemplate::RegexFilterRate,
        InstantTemplate::LineFilterRate,
        InstantTemplate::JsonStatusRate,
        InstantTemplate::LogfmtClientRate,
        InstantTemplate::UnwrapSumOverTime,
        InstantTemplate::UnwrapQuantileOverTime,
    ];

    /// Whether the template can be rendered against `ctx`.
    pub fn is_supported(&self, ctx: &TemplateContext<'_>) -> bool {
        match self {
            InstantTemplate::Rate
            | InstantTemplate::JsonStatusRate
            | InstantTemplate::LogfmtClientRate => true,
            InstantTemplate::SumByRate
            | InstantTemplate::RegexFilterRate
            | InstantTemplate::LineFilterRate
            | InstantTemplate::UnwrapSumOverTime
            | InstantTemplate::UnwrapQuantileOverTime => ctx.group.is_some(),
        }
    }

    /// Render with the primary label value picked by `draw`.
    pub fn render(&self, ctx: &TemplateContext<'_>, draw: f64) -> Result<String, PickError> {
        let selector = ctx.selector(draw)?;
        let group = ctx.group.unwrap_or(ctx.primary);
        let query = match self {
            InstantTemplate::Rate => format!("rate({selector}[5m])"),
            InstantTemplate::SumByRate => {
                format!("sum by ({group}) (rate({selector} [5m]))")
            }
            InstantTemplate::RegexFilterRate => {
                format!(r#"sum by ({group}) (rate({selector} |~ ".*a" [5m]))"#)
            }
            InstantTemplate::LineFilterRate => {
                format!(r#"sum by ({group}) (rate({selector} |= "USB" [5m]))"#)
            }
            InstantTemplate::JsonStatusRate => {
                format!(r#"sum by (status) (rate({selector} | json | __error__ = "" [5m]))"#)
            }
            InstantTemplate::LogfmtClientRate => format!(
                r#"sum by (_client) (rate({selector} | logfmt | __error__ = "" | _client = "" [5m]))"#
            ),
            InstantTemplate::UnwrapSumOverTime => format!(
                r#"sum by ({group}) (sum_over_time({selector} | json | __error__ = "" | unwrap bytes [5m]))"#
            ),
            InstantTemplate::UnwrapQuantileOverTime => format!(
                r#"quantile_over_time(0.99, {selector} | json | __error__ = "" | unwrap bytes [5m]) by ({group})"#
            ),
        };
        Ok(query)
    }
}

/// Expressions for range queries: every metric template plus raw stream
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeTemplate {
    Metric(InstantTemplate),
    Selector,
    NegatedLineFilter,
    RegexLineFilter,
    JsonStatusFilter,
}

impl RangeTemplate {
    pub fn all() -> impl Iterator<Item = RangeTemplate> {
        InstantTemplate::ALL
            .into_iter()
            .map(RangeTemplate::Metric)
            .chain([
                RangeTemplate::Selector,
                RangeTemplate::NegatedLineFilter,
                RangeTemplate::RegexLineFilter,
                RangeTemplate::JsonStatusFilter,
            ])
    }

    pub fn is_supported(&self, ctx: &TemplateContext<'_>) -> bool {
        match self {
            RangeTemplate::Metric(template) => template.is_supported(ctx),
            RangeTemplate::Selector
            | RangeTemplate::NegatedLineFilter
            | RangeTemplate::RegexLineFilter => true,
            // needs a `json` stream to select and a primary label besides `format`
            RangeTemplate::JsonStatusFilter => ctx.has_json() && ctx.primary != FORMAT_LABEL,
        }
    }

    pub fn render(&self, ctx: &TemplateContext<'_>, draw: f64) -> Result<String, PickError> {
        if let RangeTemplate::Metric(template) = self {
            return template.render(ctx, draw);
        }
        let selector = ctx.selector(draw)?;
        let query = match self {
            RangeTemplate::Metric(_) | RangeTemplate::Selector => selector.to_string(),
            RangeTemplate::NegatedLineFilter => format!(r#"{selector} |= "USB" != "USB""#),
            RangeTemplate::RegexLineFilter => format!(r#"{selector} |~ "US.*(a|o)""#),
            RangeTemplate::JsonStatusFilter => {
                let mut matchers = selector.matchers().to_vec();
                matchers.push(Matcher::new(FORMAT_LABEL, LogFormat::Json.as_str()));
                let selector = Selector(matchers);
                format!("{selector} | json | status < 300")
            }
        };
        Ok(query)
    }
}

/// Expressions built from values returned by label discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryTemplate {
    /// `{primary="v"} |= "GET" != "GET"`
    NegatedLineFilter,
    /// `{group="v"} |~ "GET|POST"`
    RegexLineFilter,
    /// `{format="v"} | json | method = "GET"`
    JsonMethod,
    /// `{format="v"} | json | bytes > 10000`
    JsonBytes,
}

impl DiscoveryTemplate {
    pub const ALL: [DiscoveryTemplate; 4] = [
        DiscoveryTemplate::NegatedLineFilter,
        DiscoveryTemplate::RegexLineFilter,
        DiscoveryTemplate::JsonMethod,
        DiscoveryTemplate::JsonBytes,
    ];

    /// The label whose discovered value parameterizes the template.
    pub fn label<'a>(&self, ctx: &TemplateContext<'a>) -> Option<&'a str> {
        match self {
            DiscoveryTemplate::NegatedLineFilter => Some(ctx.primary),
            DiscoveryTemplate::RegexLineFilter => ctx.group,
            DiscoveryTemplate::JsonMethod | DiscoveryTemplate::JsonBytes => Some(FORMAT_LABEL),
        }
    }

    pub fn render(&self, selector: &Selector) -> String {
        match self {
            DiscoveryTemplate::NegatedLineFilter => format!(r#"{selector} |= "GET" != "GET""#),
            DiscoveryTemplate::RegexLineFilter => format!(r#"{selector} |~ "GET|POST""#),
            DiscoveryTemplate::JsonMethod => format!(r#"{selector} | json | method = "GET""#),
            DiscoveryTemplate::JsonBytes => format!("{selector} | json | bytes > 10000"),
        }
    }
}
