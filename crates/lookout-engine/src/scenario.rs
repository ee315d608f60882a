//! Scripted runs against an in-memory document.
//!
//! A scenario seeds a [`MemoryDocument`], replays timed tree edits and
//! location changes, and reports how one joined wait settled.

use crate::api::Lookout;
use crate::condition::{Condition, Predicate};
use crate::config::LookoutConfig;
use crate::error::{BoxError, ValidationError};
use crate::navigation::NavigationOptions;
use crate::sink::ErrorReport;
use crate::watcher::ElementMap;
use lookout_common::{Document, DocumentError, NodeId, Selector};
use lookout_dom::{ElementSpec, MemoryDocument};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Failed to build initial document: {0}")]
    Setup(#[source] ApplyError),
    #[error("Invalid wait: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Wait ended without an outcome")]
    NoOutcome,
}

/// Why a node or event could not be applied to the document.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("{0} matches nothing")]
    NoMatch(Selector),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Initial document location.
    #[serde(default = "default_location")]
    pub location: String,
    /// Elements present before the wait starts, inserted in order.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Edits applied while the wait runs.
    #[serde(default)]
    pub events: Vec<TimedEvent>,
    pub wait: WaitSpec,
    /// Record location changes while the wait runs.
    #[serde(default)]
    pub watch_navigation: bool,
}

fn default_location() -> String {
    "about:blank".to_string()
}

/// An element and where to insert it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// First match becomes the parent.
    #[serde(default = "default_parent")]
    pub parent: Selector,
    #[serde(flatten)]
    pub element: ElementSpec,
}

fn default_parent() -> Selector {
    Selector::from("body")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Offset from the start of the wait.
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

/// One edit. `navigate` changes the location without a tree record, so it is
/// only observed with the next edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Insert(NodeSpec),
    Remove(Selector),
    SetAttribute {
        selector: Selector,
        name: String,
        value: String,
    },
    Navigate(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub predicates: Vec<PredicateSpec>,
    /// Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

/// Declarative predicates over the scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateSpec {
    LocationContains {
        value: String,
    },
    AttributeEquals {
        selector: Selector,
        name: String,
        value: String,
    },
    CountAtLeast {
        selector: Selector,
        count: usize,
    },
}

impl PredicateSpec {
    fn into_predicate(self, document: Arc<MemoryDocument>) -> Predicate {
        match self {
            PredicateSpec::LocationContains { value } => {
                Predicate::new(move || document.location().contains(&value))
            }
            PredicateSpec::AttributeEquals {
                selector,
                name,
                value,
            } => Predicate::fallible(move || {
                let Some(node) = document.query_one(&selector)? else {
                    return Ok(false);
                };
                Ok(document.attribute(node, &name)?.as_deref() == Some(value.as_str()))
            }),
            PredicateSpec::CountAtLeast { selector, count } => {
                Predicate::fallible(move || -> Result<bool, BoxError> {
                    Ok(document.query_all(&selector)?.len() >= count)
                })
            }
        }
    }
}

impl Scenario {
    pub fn from_yaml(content: &str) -> Result<Self, ScenarioError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }
}

/// `tag#id.class` summary of a matched element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedElement {
    pub node: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationRecord {
    pub at_ms: u64,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub succeeded: bool,
    pub elapsed_ms: u64,
    pub elements: BTreeMap<String, Vec<MatchedElement>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub navigations: Vec<NavigationRecord>,
}

impl ScenarioReport {
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.succeeded {
            let _ = writeln!(out, "Conditions satisfied after {}ms", self.elapsed_ms);
        } else {
            let _ = writeln!(out, "Wait failed after {}ms", self.elapsed_ms);
        }
        for (selector, matches) in &self.elements {
            let described: Vec<&str> = matches.iter().map(|m| m.description.as_str()).collect();
            let _ = writeln!(out, "  {} -> {}", selector, described.join(", "));
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "  error: {}", error);
        }
        for nav in &self.navigations {
            let _ = writeln!(out, "  navigated at {}ms: {} -> {}", nav.at_ms, nav.from, nav.to);
        }
        out
    }
}

enum Outcome {
    Satisfied(BTreeMap<String, Vec<MatchedElement>>),
    Failed(ErrorReport),
}

pub struct ScenarioRunner {
    config: LookoutConfig,
}

impl ScenarioRunner {
    pub fn new(config: LookoutConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, scenario: Scenario) -> Result<ScenarioReport, ScenarioError> {
        let document = Arc::new(MemoryDocument::new(scenario.location.clone()));
        for node in scenario.nodes {
            insert(&document, node).map_err(ScenarioError::Setup)?;
        }
        let lookout = Lookout::from_config(document.clone(), &self.config);
        let start = Instant::now();

        let navigations = Arc::new(Mutex::new(Vec::new()));
        let navigation = scenario.watch_navigation.then(|| {
            let navigations = navigations.clone();
            lookout.on_url_change(NavigationOptions::default(), move |change| {
                navigations.lock().push(NavigationRecord {
                    at_ms: elapsed_ms(start),
                    from: change.previous_url,
                    to: change.current_url,
                });
                Ok(())
            })
        });

        let wait = scenario.wait;
        let mut conditions: Vec<Condition> =
            wait.selectors.into_iter().map(Condition::from).collect();
        conditions.extend(
            wait.predicates
                .into_iter()
                .map(|spec| Condition::Predicate(spec.into_predicate(document.clone()))),
        );
        let mut options = lookout.wait_options(conditions);
        if let Some(activity) = wait.activity {
            options = options.activity(activity);
        }
        if let Some(timeout_ms) = wait.timeout_ms {
            options = options.timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(poll_interval_ms) = wait.poll_interval_ms {
            options = options.poll_interval(Duration::from_millis(poll_interval_ms));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let failures = tx.clone();
        options = options.on_error(move |report| {
            let _ = failures.send(Outcome::Failed(report));
        });
        let snapshot = document.clone();
        let handle = lookout.wait_for_conditions(options, move |elements| {
            let _ = tx.send(Outcome::Satisfied(describe(&snapshot, &elements)));
        })?;

        let replay = tokio::spawn(replay(document.clone(), scenario.events, start));
        let outcome = rx.recv().await;
        replay.abort();
        handle.cancel();
        if let Some(navigation) = navigation {
            navigation.stop();
        }

        let elapsed_ms = elapsed_ms(start);
        let navigations = std::mem::take(&mut *navigations.lock());
        let report = match outcome.ok_or(ScenarioError::NoOutcome)? {
            Outcome::Satisfied(elements) => ScenarioReport {
                succeeded: true,
                elapsed_ms,
                elements,
                error: None,
                navigations,
            },
            Outcome::Failed(report) => ScenarioReport {
                succeeded: false,
                elapsed_ms,
                elements: BTreeMap::new(),
                error: Some(report.error.to_string()),
                navigations,
            },
        };
        info!(succeeded = report.succeeded, elapsed_ms, "Scenario finished");
        Ok(report)
    }
}

async fn replay(document: Arc<MemoryDocument>, mut events: Vec<TimedEvent>, start: Instant) {
    events.sort_by_key(|event| event.at_ms);
    for event in events {
        tokio::time::sleep_until(start + Duration::from_millis(event.at_ms)).await;
        debug!(at_ms = event.at_ms, action = ?event.action, "Applying event");
        if let Err(error) = apply(&document, event.action) {
            warn!(at_ms = event.at_ms, %error, "Event could not be applied");
        }
    }
}

fn apply(document: &MemoryDocument, action: Action) -> Result<(), ApplyError> {
    match action {
        Action::Insert(node) => insert(document, node).map(|_| ()),
        Action::Remove(selector) => {
            let node = find(document, selector)?;
            Ok(document.remove(node)?)
        }
        Action::SetAttribute {
            selector,
            name,
            value,
        } => {
            let node = find(document, selector)?;
            Ok(document.set_attribute(node, &name, &value)?)
        }
        Action::Navigate(url) => {
            document.set_location(url);
            Ok(())
        }
    }
}

fn insert(document: &MemoryDocument, node: NodeSpec) -> Result<NodeId, ApplyError> {
    let parent = find(document, node.parent)?;
    Ok(document.append(parent, node.element)?)
}

fn find(document: &MemoryDocument, selector: Selector) -> Result<NodeId, ApplyError> {
    document.query_one(&selector)?.ok_or(ApplyError::NoMatch(selector))
}

fn describe(
    document: &MemoryDocument,
    elements: &ElementMap,
) -> BTreeMap<String, Vec<MatchedElement>> {
    elements
        .iter()
        .map(|(selector, nodes)| {
            let matches = nodes
                .iter()
                .map(|&node| MatchedElement {
                    node: node.0,
                    description: describe_node(document, node),
                })
                .collect();
            (selector.to_string(), matches)
        })
        .collect()
}

fn describe_node(document: &MemoryDocument, node: NodeId) -> String {
    let mut description = document.tag_name(node).unwrap_or_else(|_| node.to_string());
    if let Ok(Some(id)) = document.attribute(node, "id") {
        let _ = write!(description, "#{id}");
    }
    if let Ok(Some(classes)) = document.attribute(node, "class") {
        for class in classes.split_whitespace() {
            let _ = write!(description, ".{class}");
        }
    }
    description
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKOUT: &str = r##"
location: https://shop.test/cart
nodes:
  - tag: main
    id: app
events:
  - at_ms: 200
    insert:
      parent: "#app"
      tag: button
      id: checkout
  - at_ms: 300
    navigate: https://shop.test/checkout
  - at_ms: 300
    set_attribute:
      selector: "#app"
      name: data-route
      value: checkout
  - at_ms: 400
    insert:
      parent: "#app"
      tag: form
      id: payment
      classes: [step, active]
wait:
  activity: checkout
  selectors: ["#checkout", "#payment"]
  predicates:
    - kind: location_contains
      value: /checkout
  timeout_ms: 2000
  poll_interval_ms: 50
watch_navigation: true
"##;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_yaml(CHECKOUT).unwrap();
        assert_eq!(scenario.location, "https://shop.test/cart");
        assert_eq!(scenario.nodes[0].parent, Selector::from("body"));
        assert_eq!(scenario.nodes[0].element.id.as_deref(), Some("app"));
        assert!(matches!(
            scenario.events[1].action,
            Action::Navigate(ref url) if url.ends_with("/checkout")
        ));
        assert!(matches!(
            scenario.wait.predicates[0],
            PredicateSpec::LocationContains { .. }
        ));
        assert!(scenario.watch_navigation);
    }

    #[test]
    fn test_unknown_predicate_kind_is_rejected() {
        let yaml = "wait:\n  predicates:\n    - kind: scrolled\n";
        assert!(matches!(Scenario::from_yaml(yaml), Err(ScenarioError::Parse(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_checkout_scenario() {
        let scenario = Scenario::from_yaml(CHECKOUT).unwrap();
        let report = ScenarioRunner::new(LookoutConfig::default())
            .run(scenario)
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.elapsed_ms, 400);
        assert_eq!(report.elements["#checkout"][0].description, "button#checkout");
        assert_eq!(report.elements["#payment"][0].description, "form#payment.step.active");
        assert_eq!(
            report.navigations,
            vec![NavigationRecord {
                at_ms: 300,
                from: "https://shop.test/cart".into(),
                to: "https://shop.test/checkout".into(),
            }]
        );
        assert!(report.render().contains("#checkout -> button#checkout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_timeout() {
        let yaml = "wait:\n  selectors: [\"#never\"]\n  timeout_ms: 1000\n";
        let report = ScenarioRunner::new(LookoutConfig::default())
            .run(Scenario::from_yaml(yaml).unwrap())
            .await
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.elapsed_ms, 1000);
        assert_eq!(
            report.error.as_deref(),
            Some("Timeout while waiting for selectors: #never")
        );
    }

    #[tokio::test]
    async fn test_run_rejects_short_timeout() {
        let yaml = "wait:\n  selectors: [\"#a\"]\n  timeout_ms: 10\n";
        let result = ScenarioRunner::new(LookoutConfig::default())
            .run(Scenario::from_yaml(yaml).unwrap())
            .await;
        assert!(matches!(result, Err(ScenarioError::Invalid(_))));
    }

    #[test]
    fn test_event_on_missing_element_is_no_match() {
        let document = MemoryDocument::default();
        let result = apply(
            &document,
            Action::SetAttribute {
                selector: Selector::from(".ghost"),
                name: "hidden".into(),
                value: String::new(),
            },
        );
        assert!(matches!(result, Err(ApplyError::NoMatch(ref s)) if s.as_str() == ".ghost"));

        let result = apply(&document, Action::Remove(Selector::from("div >")));
        assert!(matches!(result, Err(ApplyError::Document(DocumentError::InvalidSelector(_)))));
    }
}
