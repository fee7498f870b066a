//! Query workload generation.
//!
//! [`QueryBuilder`] composes requests for the five read endpoints over the
//! label space of a [`LabelModel`]. Expressions come from enumerated
//! templates (see [`templates`]) rendered with values drawn from the model,
//! so no selector ever names a label the model does not know.

pub mod request;
pub mod templates;

pub use request::{QueryKind, QueryRequest, TimeRange};
pub use templates::{
    DiscoveryTemplate, InstantTemplate, Matcher, RangeTemplate, Selector, TemplateContext,
};

use crate::errors::{ModelError, PickError};
use crate::generator::LogFormat;
use crate::labels::{LabelModel, FORMAT_LABEL, NAME_LABEL};
use crate::weighted::WeightedSelector;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default result limit for instant and range queries.
pub const DEFAULT_LIMIT: usize = 1000;

/// Label values returned by discovery, keyed by label name.
pub type DiscoveredLabels = BTreeMap<String, Vec<String>>;

/// Look-back windows of the read scenario: 15m, 30m, 1h, 3h, 12h.
pub fn default_time_ranges() -> Vec<(TimeRange, f64)> {
    vec![
        (TimeRange::from_mins(15), 0.2),
        (TimeRange::from_mins(30), 0.2),
        (TimeRange::from_hours(1), 0.3),
        (TimeRange::from_hours(3), 0.2),
        (TimeRange::from_hours(12), 0.1),
    ]
}

/// Look-back windows of the discovery flow, picked uniformly.
pub fn default_discovery_ranges() -> Vec<TimeRange> {
    [1, 5, 10, 15].into_iter().map(TimeRange::from_mins).collect()
}

/// Queries derived from a successful discovery round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredQueries {
    /// Issued as both range and instant queries.
    pub expressions: Vec<String>,
    /// Issued as series queries.
    pub selectors: Vec<Selector>,
}

impl DiscoveredQueries {
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty() && self.selectors.is_empty()
    }
}

/// Builds query requests over a shared label model.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    model: Arc<LabelModel>,
    instant_templates: Vec<InstantTemplate>,
    range_templates: Vec<RangeTemplate>,
    ranges: WeightedSelector<TimeRange>,
    limit: Option<usize>,
}

impl QueryBuilder {
    /// Templates the model cannot satisfy are left out here, once.
    pub fn new(
        model: Arc<LabelModel>,
        ranges: WeightedSelector<TimeRange>,
        limit: Option<usize>,
    ) -> Self {
        let ctx = TemplateContext::new(&model);
        let instant_templates = InstantTemplate::ALL
            .into_iter()
            .filter(|t| t.is_supported(&ctx))
            .collect();
        let range_templates = RangeTemplate::all()
            .filter(|t| t.is_supported(&ctx))
            .collect();

        Self {
            model,
            instant_templates,
            range_templates,
            ranges,
            limit,
        }
    }

    /// Builder with the default range pool and limit.
    pub fn with_defaults(model: Arc<LabelModel>) -> Result<Self, ModelError> {
        let ranges = WeightedSelector::new(default_time_ranges())?;
        Ok(Self::new(model, ranges, Some(DEFAULT_LIMIT)))
    }

    pub fn model(&self) -> &LabelModel {
        &self.model
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn instant_templates(&self) -> &[InstantTemplate] {
        &self.instant_templates
    }

    pub fn range_templates(&self) -> &[RangeTemplate] {
        &self.range_templates
    }

    fn context(&self) -> TemplateContext<'_> {
        TemplateContext::new(&self.model)
    }

    pub fn labels_query(&self, range: TimeRange) -> QueryRequest {
        QueryRequest::Labels { range }
    }

    /// Values of one label. Fails for labels outside the model.
    pub fn label_values_query(
        &self,
        name: &str,
        range: TimeRange,
    ) -> Result<QueryRequest, ModelError> {
        if !self.model.contains(name) {
            return Err(ModelError::UnknownLabel(name.to_string()));
        }
        Ok(QueryRequest::LabelValues {
            label: name.to_string(),
            range,
        })
    }

    pub fn series_query(&self, selector: Selector, range: TimeRange) -> QueryRequest {
        QueryRequest::Series { selector, range }
    }

    pub fn instant_query(
        &self,
        expression: impl Into<String>,
        limit: Option<usize>,
    ) -> QueryRequest {
        QueryRequest::Instant {
            query: expression.into(),
            limit,
        }
    }

    pub fn range_query(
        &self,
        expression: impl Into<String>,
        range: TimeRange,
        limit: Option<usize>,
    ) -> QueryRequest {
        QueryRequest::Range {
            query: expression.into(),
            range,
            limit,
        }
    }

    pub fn random_time_range<R: Rng + ?Sized>(&self, rng: &mut R) -> TimeRange {
        *self.ranges.sample(rng)
    }

    /// A selector over `terms` distinct model labels (at least one).
    pub fn random_selector<R: Rng + ?Sized>(&self, rng: &mut R, terms: usize) -> Selector {
        let mut names: Vec<&str> = self.model.label_names().collect();
        names.shuffle(rng);
        names.truncate(terms.max(1));
        names.sort_unstable();

        let matchers = names
            .into_iter()
            .filter_map(|name| {
                let value = self.model.sample_value(name, rng)?;
                Some(Matcher::new(name, value))
            })
            .collect();
        // the model always holds the format label
        Selector::new(matchers)
            .unwrap_or_else(|| Selector::single(FORMAT_LABEL, LogFormat::Json.as_str()))
    }

    pub fn random_instant_expression<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<String, PickError> {
        let template = self
            .instant_templates
            .choose(rng)
            .copied()
            .unwrap_or(InstantTemplate::Rate);
        template.render(&self.context(), rng.random())
    }

    pub fn random_range_expression<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<String, PickError> {
        let template = self
            .range_templates
            .choose(rng)
            .copied()
            .unwrap_or(RangeTemplate::Selector);
        template.render(&self.context(), rng.random())
    }

    /// A random request of the given family.
    pub fn random_query<R: Rng + ?Sized>(
        &self,
        kind: QueryKind,
        rng: &mut R,
    ) -> Result<QueryRequest, PickError> {
        let request = match kind {
            QueryKind::Labels => self.labels_query(self.random_time_range(rng)),
            QueryKind::LabelValues => {
                let names: Vec<&str> = self.model.label_names().collect();
                let name = names.choose(rng).copied().unwrap_or(FORMAT_LABEL);
                QueryRequest::LabelValues {
                    label: name.to_string(),
                    range: self.random_time_range(rng),
                }
            }
            QueryKind::Series => {
                let selector = self.random_selector(rng, 1);
                self.series_query(selector, self.random_time_range(rng))
            }
            QueryKind::Range => {
                let expression = self.random_range_expression(rng)?;
                self.range_query(expression, self.random_time_range(rng), self.limit)
            }
            QueryKind::Instant => {
                let expression = self.random_instant_expression(rng)?;
                self.instant_query(expression, self.limit)
            }
        };
        Ok(request)
    }

    /// Expressions and series selectors built from discovered label values.
    ///
    /// Only labels and values the model knows are used; `__name__` and labels
    /// without known discovered values are ignored.
    pub fn discovered_queries<R: Rng + ?Sized>(
        &self,
        discovered: &DiscoveredLabels,
        rng: &mut R,
    ) -> DiscoveredQueries {
        let mut pick = |name: &str| -> Option<Selector> {
            if name == NAME_LABEL || !self.model.contains(name) {
                return None;
            }
            let known: Vec<&String> = discovered
                .get(name)?
                .iter()
                .filter(|value| self.model.contains_value(name, value))
                .collect();
            let value = known.choose(rng)?;
            Some(Selector::single(name, (*value).clone()))
        };

        let ctx = self.context();
        let expressions = DiscoveryTemplate::ALL
            .iter()
            .filter_map(|template| {
                let selector = pick(template.label(&ctx)?)?;
                Some(template.render(&selector))
            })
            .collect();

        let selectors = discovered.keys().filter_map(|name| pick(name)).collect();

        DiscoveredQueries {
            expressions,
            selectors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LabelConfig, LabelSampling};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn builder() -> QueryBuilder {
        let model = LabelModel::from_cardinalities([("app", 5), ("namespace", 1), ("pod", 10)])
            .unwrap();
        QueryBuilder::with_defaults(Arc::new(model)).unwrap()
    }

    /// Label names used inside `{...}` selectors of `query`.
    fn selector_labels(query: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = query;
        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|c| open + c).unwrap();
            for term in rest[open + 1..close].split(", ") {
                let (name, value) = term.split_once('=').unwrap();
                assert!(value.starts_with('"') && value.ends_with('"'), "{term}");
                names.push(name.to_string());
            }
            rest = &rest[close + 1..];
        }
        names
    }

    #[test]
    fn test_builders() {
        let builder = builder();
        let range = TimeRange::from_mins(30);

        assert_eq!(builder.labels_query(range), QueryRequest::Labels { range });
        assert!(builder.label_values_query("pod", range).is_ok());
        assert_eq!(
            builder.label_values_query("cluster", range).unwrap_err(),
            ModelError::UnknownLabel("cluster".to_string())
        );

        let request = builder.range_query(r#"{app="app-0"}"#, range, builder.limit());
        assert_eq!(request.kind(), QueryKind::Range);
        assert!(request
            .params(chrono::Utc::now())
            .contains(&("limit", "1000".to_string())));
    }

    #[test]
    fn test_selectors_only_reference_model_labels() {
        let builder = builder();
        let known: HashSet<&str> = builder.model().label_names().collect();
        let mut rng = SmallRng::seed_from_u64(9);

        for terms in 0..6 {
            let selector = builder.random_selector(&mut rng, terms);
            assert!(!selector.matchers().is_empty());
            assert!(selector.matchers().len() <= known.len());
            for matcher in selector.matchers() {
                assert!(known.contains(matcher.name.as_str()));
                assert!(builder.model().contains_value(&matcher.name, &matcher.value));
            }
        }

        for _ in 0..500 {
            for query in [
                builder.random_instant_expression(&mut rng).unwrap(),
                builder.random_range_expression(&mut rng).unwrap(),
            ] {
                let names = selector_labels(&query);
                assert!(!names.is_empty(), "{query}");
                for name in names {
                    assert!(known.contains(name.as_str()), "{name} in {query}");
                }
            }
        }
    }

    #[test]
    fn test_random_query_kinds() {
        let builder = builder();
        let mut rng = SmallRng::seed_from_u64(4);
        for kind in QueryKind::ALL {
            let request = builder.random_query(kind, &mut rng).unwrap();
            assert_eq!(request.kind(), kind);
        }
    }

    #[test]
    fn test_random_time_range_from_pool() {
        let builder = builder();
        let pool: HashSet<TimeRange> = default_time_ranges().into_iter().map(|(r, _)| r).collect();
        let mut rng = SmallRng::seed_from_u64(1);
        let seen: HashSet<TimeRange> = (0..1000)
            .map(|_| builder.random_time_range(&mut rng))
            .collect();
        assert_eq!(seen, pool);
    }

    #[test]
    fn test_templates_filtered_by_model() {
        let config = LabelConfig::empty()
            .enumerated(FORMAT_LABEL, ["logfmt"])
            .cardinality("app", 3);
        let model = LabelModel::new(&config, LabelSampling::Uniform).unwrap();
        let builder = QueryBuilder::with_defaults(Arc::new(model)).unwrap();

        assert!(!builder
            .range_templates()
            .contains(&RangeTemplate::JsonStatusFilter));
        assert_eq!(builder.instant_templates().len(), InstantTemplate::ALL.len());

        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..200 {
            let query = builder.random_range_expression(&mut rng).unwrap();
            assert!(!query.contains(r#"format="json""#), "{query}");
        }
    }

    #[test]
    fn test_discovered_queries() {
        let builder = builder();
        let mut rng = SmallRng::seed_from_u64(6);
        let discovered: DiscoveredLabels = [
            ("app", vec!["app-3"]),
            ("namespace", vec!["namespace-0"]),
            ("format", vec!["json"]),
            ("pod", vec!["pod-7"]),
            ("instance", vec!["vu1.host"]),
            ("__name__", vec!["logs"]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
        .collect();

        let queries = builder.discovered_queries(&discovered, &mut rng);
        assert_eq!(
            queries.expressions,
            vec![
                r#"{app="app-3"} |= "GET" != "GET""#,
                r#"{namespace="namespace-0"} |~ "GET|POST""#,
                r#"{format="json"} | json | method = "GET""#,
                r#"{format="json"} | json | bytes > 10000"#,
            ]
        );
        let selectors: Vec<String> = queries.selectors.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            selectors,
            vec![
                r#"{app="app-3"}"#,
                r#"{format="json"}"#,
                r#"{namespace="namespace-0"}"#,
                r#"{pod="pod-7"}"#,
            ]
        );
    }

    #[test]
    fn test_discovered_queries_skip_missing_labels() {
        let builder = builder();
        let mut rng = SmallRng::seed_from_u64(6);
        let discovered: DiscoveredLabels = [
            ("app".to_string(), Vec::new()),
            ("pod".to_string(), vec!["pod-1".to_string()]),
        ]
        .into_iter()
        .collect();

        let queries = builder.discovered_queries(&discovered, &mut rng);
        assert!(queries.expressions.is_empty());
        assert_eq!(queries.selectors, vec![Selector::single("pod", "pod-1")]);

        let empty = builder.discovered_queries(&DiscoveredLabels::new(), &mut rng);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_discovered_queries_skip_unknown_values() {
        let builder = builder();
        let discovered: DiscoveredLabels = [
            ("app".to_string(), vec!["stale-app".to_string()]),
            ("pod".to_string(), vec!["pod-99".to_string(), "pod-2".to_string()]),
        ]
        .into_iter()
        .collect();

        for seed in 0..20 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let queries = builder.discovered_queries(&discovered, &mut rng);
            assert!(queries.expressions.iter().all(|e| !e.contains("stale-app")));
            assert_eq!(queries.selectors, vec![Selector::single("pod", "pod-2")]);
        }
    }
}
