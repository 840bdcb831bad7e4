//! Suite parser: YAML text → validated [`TestSuite`].
//!
//! Parsing runs in two passes over the deserialized document:
//!
//! 1. structural: required fields, value ranges, name uniqueness
//! 2. referential: service references, `ref` fragments, provider kinds
//!
//! The first problem found is returned as a [`ParseError`]; no partial
//! suite is ever built. The same input always yields the same result.
//! Locations of test cases, inputs and expectations carry the line of
//! their list item when the document is written in block style.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use systest_core::config::MAX_TIMEOUT_MS;
use systest_core::error::{Location, ParseError, ParseErrorKind};
use systest_core::model::{
    DEFAULT_CHANNEL, Disabled, Expectation, ExpectationKind, Input, Matcher, OrderingMode,
    Pattern, ReadinessProbe, ServiceDefinition, ServiceRef, SuiteDefaults, TestCase, TestSuite,
};

use crate::document::{
    DisabledDocument, ExpectationDocument, InputDocument, ServiceDocument, SuiteDocument,
    TestCaseDocument,
};
use crate::position::{Position, Positions};
use crate::schema;

/// Largest document accepted, in bytes.
pub const MAX_DOCUMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Largest regex accepted in a `matches` expectation, in bytes.
const MAX_PATTERN_LEN: usize = 4096;

/// Timeouts used when neither the suite nor the item specify one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseDefaults {
    pub expectation_timeout: Duration,
    pub readiness_timeout: Duration,
}

impl Default for ParseDefaults {
    fn default() -> Self {
        Self {
            expectation_timeout: Duration::from_millis(5_000),
            readiness_timeout: Duration::from_millis(30_000),
        }
    }
}

/// A fragment document together with the file it came from.
#[derive(Debug, Clone)]
pub struct Located<T> {
    pub source: String,
    pub document: T,
}

/// Reusable documents of a test package.
#[derive(Debug, Clone, Default)]
pub struct Fragments {
    /// `inputs/<id>.yaml`, keyed by id
    pub inputs: BTreeMap<String, Located<InputDocument>>,
    /// `expectations/<id>.yaml`, keyed by id
    pub expectations: BTreeMap<String, Located<ExpectationDocument>>,
    /// `seed/<id>.yaml`, keyed by id
    pub seed: BTreeMap<String, Located<InputDocument>>,
}

/// Which fragments a parsed suite used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentUsage {
    pub inputs: BTreeSet<String>,
    pub expectations: BTreeSet<String>,
    pub seed: BTreeSet<String>,
}

impl FragmentUsage {
    pub fn merge(&mut self, other: FragmentUsage) {
        self.inputs.extend(other.inputs);
        self.expectations.extend(other.expectations);
        self.seed.extend(other.seed);
    }
}

/// Validating suite parser.
///
/// # Example
/// ```ignore
/// let parser = SuiteParser::new().with_known_kinds(registry.kinds());
/// let suite = parser.parse("suites/echo.yaml", &yaml)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SuiteParser {
    defaults: ParseDefaults,
    known_kinds: Option<BTreeSet<String>>,
}

impl SuiteParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self, defaults: ParseDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Rejects services whose kind is not in `kinds` at parse time.
    ///
    /// Without this, unknown kinds surface when the case is provisioned.
    pub fn with_known_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Parses a self-contained suite document.
    ///
    /// Any `ref` is a missing dependency since there is no package around it.
    pub fn parse(&self, source: &str, yaml: &str) -> Result<TestSuite, ParseError> {
        self.parse_with(source, yaml, &Fragments::default())
            .map(|(suite, _)| suite)
    }

    /// Parses a suite document that may reference package fragments.
    pub fn parse_with(
        &self,
        source: &str,
        yaml: &str,
        fragments: &Fragments,
    ) -> Result<(TestSuite, FragmentUsage), ParseError> {
        let root = Location::new(source);

        let size = yaml.len() as u64;
        if size > MAX_DOCUMENT_SIZE {
            return Err(ParseError::new(
                root,
                ParseErrorKind::TooLarge {
                    size,
                    max: MAX_DOCUMENT_SIZE,
                },
            ));
        }

        let doc: SuiteDocument = deserialize(&root, yaml)?;

        if let Some(version) = &doc.schema {
            schema::check(version).map_err(|kind| ParseError::new(root.at("schema"), kind))?;
        }

        let positions = Positions::index(yaml).aligned(&doc);
        check_structure(&root, &positions, &doc)?;

        let mut build = Build {
            parser: self,
            root: &root,
            positions: &positions,
            fragments,
            usage: FragmentUsage::default(),
        };
        let suite = build.suite(doc)?;
        Ok((suite, build.usage))
    }
}

/// Deserializes YAML, mapping serde errors to a located [`ParseError`].
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(
    location: &Location,
    yaml: &str,
) -> Result<T, ParseError> {
    serde_yaml::from_str(yaml).map_err(|e| {
        let mut loc = location.clone();
        if let Some(pos) = e.location() {
            loc = loc.with_position(pos.line(), pos.column());
        }
        ParseError::new(loc, ParseErrorKind::Syntax(e.to_string()))
    })
}

// ─── Pass 1: structure ───────────────────────────────────────────────

fn check_structure(
    root: &Location,
    positions: &Positions,
    doc: &SuiteDocument,
) -> Result<(), ParseError> {
    if doc.name.trim().is_empty() {
        return Err(missing(root.at("name"), "name"));
    }

    if let Some(disabled) = &doc.disabled {
        check_disabled(&root.at("disabled"), disabled)?;
    }

    check_timeout(
        root,
        "defaults.expectation_timeout_ms",
        doc.defaults.expectation_timeout_ms,
    )?;
    check_timeout(
        root,
        "defaults.readiness_timeout_ms",
        doc.defaults.readiness_timeout_ms,
    )?;

    if doc.services.is_empty() {
        return Err(missing(root.at("services"), "services"));
    }
    for (name, service) in &doc.services {
        check_service(root, name, service)?;
    }

    if doc.tests.is_empty() {
        return Err(missing(root.at("tests"), "tests"));
    }

    let mut seen = HashSet::new();
    for (i, case) in doc.tests.iter().enumerate() {
        let at = Position::place(positions.case(i), root.at(format!("tests[{i}]")));
        check_case(&at, positions, i, case)?;
        if !seen.insert(case.name.as_str()) {
            return Err(ParseError::new(
                sub(&at, "name"),
                ParseErrorKind::Duplicate {
                    what: "test case".to_owned(),
                    name: case.name.clone(),
                },
            ));
        }
    }

    Ok(())
}

fn check_service(root: &Location, name: &str, service: &ServiceDocument) -> Result<(), ParseError> {
    let path = format!("services.{name}");
    if !is_valid_name(name) {
        return Err(invalid(
            root.at(&path),
            "services",
            format!("service name '{name}' must match [A-Za-z0-9_.-]+"),
        ));
    }
    if service.kind.trim().is_empty() {
        return Err(missing(root.at(format!("{path}.kind")), "kind"));
    }
    if let Some(config) = &service.config {
        if !config.is_object() {
            return Err(invalid(
                root.at(format!("{path}.config")),
                "config",
                "must be a mapping".to_owned(),
            ));
        }
    }
    if let Some(readiness) = &service.readiness {
        check_timeout(root, &format!("{path}.readiness.timeout_ms"), readiness.timeout_ms)?;
        if readiness
            .output_contains
            .as_deref()
            .is_some_and(|s| s.is_empty())
        {
            return Err(invalid(
                root.at(format!("{path}.readiness.output_contains")),
                "output_contains",
                "must not be empty".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Checks a test case. `at` points at the case itself.
fn check_case(
    at: &Location,
    positions: &Positions,
    index: usize,
    case: &TestCaseDocument,
) -> Result<(), ParseError> {
    if case.name.trim().is_empty() {
        return Err(missing(sub(at, "name"), "name"));
    }
    if let Some(disabled) = &case.disabled {
        check_disabled(&sub(at, "disabled"), disabled)?;
    }
    if case.expectations.is_empty() {
        return Err(missing(sub(at, "expectations"), "expectations"));
    }
    for (i, input) in case.inputs.iter().enumerate() {
        let input_at = sub(at, &format!("inputs[{i}]"));
        check_input(&Position::place(positions.input(index, i), input_at), input)?;
    }
    for (i, exp) in case.expectations.iter().enumerate() {
        let exp_at = sub(at, &format!("expectations[{i}]"));
        check_expectation(&Position::place(positions.expectation(index, i), exp_at), exp)?;
    }
    Ok(())
}

fn check_disabled(at: &Location, disabled: &DisabledDocument) -> Result<(), ParseError> {
    if disabled.reason.trim().is_empty() {
        return Err(missing(sub(at, "reason"), "reason"));
    }
    Ok(())
}

/// Checks an input item. `at` points at the item itself.
fn check_input(at: &Location, input: &InputDocument) -> Result<(), ParseError> {
    check_delay(at, input.delay_ms)?;
    if input.reference.is_some() {
        if input.service.is_some() || input.payload.is_some() || input.channel.is_some() {
            return Err(invalid(
                at.clone(),
                "ref",
                "a ref input may only override delay_ms".to_owned(),
            ));
        }
        return Ok(());
    }
    check_input_body(at, input)
}

fn check_input_body(at: &Location, input: &InputDocument) -> Result<(), ParseError> {
    if input.service.as_deref().is_none_or(str::is_empty) {
        return Err(missing(sub(at, "service"), "service"));
    }
    if input.payload.is_none() {
        return Err(missing(sub(at, "payload"), "payload"));
    }
    check_delay(at, input.delay_ms)
}

fn check_delay(at: &Location, delay_ms: Option<u64>) -> Result<(), ParseError> {
    match delay_ms {
        Some(ms) if ms > MAX_TIMEOUT_MS => Err(invalid(
            sub(at, "delay_ms"),
            "delay_ms",
            format!("must be at most {MAX_TIMEOUT_MS}"),
        )),
        _ => Ok(()),
    }
}

/// Checks an expectation item. `at` points at the item itself.
fn check_expectation(at: &Location, exp: &ExpectationDocument) -> Result<(), ParseError> {
    if exp.reference.is_some() {
        let has_body = exp.service.is_some()
            || exp.channel.is_some()
            || exp.equals.is_some()
            || exp.contains.is_some()
            || exp.matches.is_some()
            || exp.no_extra_output
            || exp.ordering.is_some();
        if has_body {
            return Err(invalid(
                at.clone(),
                "ref",
                "a ref expectation may only override timeout_ms".to_owned(),
            ));
        }
        return check_timeout_at(at, exp.timeout_ms);
    }
    check_expectation_body(at, exp)
}

fn check_expectation_body(at: &Location, exp: &ExpectationDocument) -> Result<(), ParseError> {
    if exp.service.as_deref().is_none_or(str::is_empty) {
        return Err(missing(sub(at, "service"), "service"));
    }
    if exp.channel.as_deref().is_some_and(str::is_empty) {
        return Err(invalid(
            sub(at, "channel"),
            "channel",
            "must not be empty".to_owned(),
        ));
    }
    let forms = [
        exp.equals.is_some(),
        exp.contains.is_some(),
        exp.matches.is_some(),
        exp.no_extra_output,
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if forms != 1 {
        return Err(invalid(
            at.clone(),
            "expectation",
            "exactly one of equals, contains, matches or no_extra_output is required".to_owned(),
        ));
    }
    if exp.no_extra_output && exp.ordering.is_some() {
        return Err(invalid(
            sub(at, "ordering"),
            "ordering",
            "not applicable to no_extra_output".to_owned(),
        ));
    }
    if let Some(pattern) = &exp.matches {
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(invalid(
                sub(at, "matches"),
                "matches",
                format!("pattern longer than {MAX_PATTERN_LEN} bytes"),
            ));
        }
    }
    check_timeout_at(at, exp.timeout_ms)
}

fn check_timeout(root: &Location, path: &str, value: Option<u64>) -> Result<(), ParseError> {
    match value {
        Some(ms) if ms == 0 || ms > MAX_TIMEOUT_MS => Err(invalid(
            root.at(path),
            path.rsplit('.').next().unwrap_or(path),
            format!("must be between 1 and {MAX_TIMEOUT_MS}"),
        )),
        _ => Ok(()),
    }
}

fn check_timeout_at(at: &Location, value: Option<u64>) -> Result<(), ParseError> {
    match value {
        Some(ms) if ms == 0 || ms > MAX_TIMEOUT_MS => Err(invalid(
            sub(at, "timeout_ms"),
            "timeout_ms",
            format!("must be between 1 and {MAX_TIMEOUT_MS}"),
        )),
        _ => Ok(()),
    }
}

// ─── Pass 2: references ──────────────────────────────────────────────

struct Build<'a> {
    parser: &'a SuiteParser,
    root: &'a Location,
    positions: &'a Positions,
    fragments: &'a Fragments,
    usage: FragmentUsage,
}

impl Build<'_> {
    fn suite(&mut self, doc: SuiteDocument) -> Result<TestSuite, ParseError> {
        let defaults = SuiteDefaults {
            expectation_timeout: doc
                .defaults
                .expectation_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.parser.defaults.expectation_timeout),
            readiness_timeout: doc
                .defaults
                .readiness_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.parser.defaults.readiness_timeout),
            ordering: doc.defaults.ordering.unwrap_or_default(),
        };

        let mut services = Vec::with_capacity(doc.services.len());
        for (name, service) in doc.services {
            services.push(Arc::new(self.service(name, service, &defaults)?));
        }

        let mut cases = Vec::with_capacity(doc.tests.len());
        for (i, case) in doc.tests.into_iter().enumerate() {
            cases.push(self.case(i, case, &services, &defaults)?);
        }

        Ok(TestSuite {
            name: doc.name,
            description: doc.description,
            disabled: doc.disabled.map(disabled),
            defaults,
            services,
            cases,
            location: self.root.clone(),
        })
    }

    fn service(
        &self,
        name: String,
        doc: ServiceDocument,
        defaults: &SuiteDefaults,
    ) -> Result<ServiceDefinition, ParseError> {
        if let Some(known) = &self.parser.known_kinds {
            if !known.contains(&doc.kind) {
                return Err(ParseError::new(
                    self.root.at(format!("services.{name}.kind")),
                    ParseErrorKind::UnknownKind { kind: doc.kind },
                ));
            }
        }

        let readiness = match doc.readiness {
            Some(r) => ReadinessProbe {
                timeout: r
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.readiness_timeout),
                output_contains: r.output_contains,
            },
            None => ReadinessProbe {
                timeout: defaults.readiness_timeout,
                output_contains: None,
            },
        };

        Ok(ServiceDefinition {
            name,
            kind: doc.kind,
            config: doc.config.unwrap_or_else(|| Value::Object(Default::default())),
            readiness,
        })
    }

    fn case(
        &mut self,
        index: usize,
        doc: TestCaseDocument,
        suite_services: &[Arc<ServiceDefinition>],
        defaults: &SuiteDefaults,
    ) -> Result<TestCase, ParseError> {
        let case_at = Position::place(
            self.positions.case(index),
            self.root.at(format!("tests[{index}]")),
        );

        let services: Vec<ServiceRef> = if doc.services.is_empty() {
            suite_services
                .iter()
                .map(|def| ServiceRef {
                    name: def.name.clone(),
                    definition: Arc::clone(def),
                })
                .collect()
        } else {
            let mut refs: Vec<ServiceRef> = Vec::with_capacity(doc.services.len());
            for (i, name) in doc.services.iter().enumerate() {
                let at = sub(&case_at, &format!("services[{i}]"));
                let def = suite_services
                    .iter()
                    .find(|d| &d.name == name)
                    .ok_or_else(|| unknown(at.clone(), "service", name))?;
                if refs.iter().any(|r| &r.name == name) {
                    return Err(ParseError::new(
                        at,
                        ParseErrorKind::Duplicate {
                            what: "service reference".to_owned(),
                            name: name.clone(),
                        },
                    ));
                }
                refs.push(ServiceRef {
                    name: name.clone(),
                    definition: Arc::clone(def),
                });
            }
            refs
        };

        let seed = self.seed_for(&services)?;

        let mut inputs = Vec::with_capacity(doc.inputs.len());
        for (i, input) in doc.inputs.iter().enumerate() {
            let at = Position::place(
                self.positions.input(index, i),
                sub(&case_at, &format!("inputs[{i}]")),
            );
            inputs.push(self.input(&at, input, &services)?);
        }

        let mut expectations = Vec::with_capacity(doc.expectations.len());
        for (i, exp) in doc.expectations.iter().enumerate() {
            let at = Position::place(
                self.positions.expectation(index, i),
                sub(&case_at, &format!("expectations[{i}]")),
            );
            expectations.push(self.expectation(&at, exp, &services, defaults)?);
        }

        Ok(TestCase {
            name: doc.name,
            notes: doc.notes,
            disabled: doc.disabled.map(disabled),
            services,
            seed,
            inputs,
            expectations,
            location: case_at,
        })
    }

    /// Seed fragments that target one of the case's services, ordered by id.
    fn seed_for(&mut self, services: &[ServiceRef]) -> Result<Vec<Input>, ParseError> {
        let mut seed = Vec::new();
        for (id, located) in &self.fragments.seed {
            let at = Location::new(&located.source);
            check_input_body(&at, &located.document)?;
            let target = located.document.service.as_deref().unwrap_or_default();
            if !services.iter().any(|s| s.name == target) {
                continue;
            }
            self.usage.seed.insert(id.clone());
            seed.push(input_from(&located.document, Some(id.clone())));
        }
        Ok(seed)
    }

    fn input(
        &mut self,
        at: &Location,
        doc: &InputDocument,
        services: &[ServiceRef],
    ) -> Result<Input, ParseError> {
        let (body, body_at, origin) = match &doc.reference {
            Some(id) => {
                let located = self.fragments.inputs.get(id).ok_or_else(|| {
                    ParseError::new(
                        sub(at, "ref"),
                        ParseErrorKind::MissingDependency {
                            what: "input".to_owned(),
                            id: id.clone(),
                        },
                    )
                })?;
                let frag_at = Location::new(&located.source);
                if located.document.reference.is_some() {
                    return Err(invalid(
                        sub(&frag_at, "ref"),
                        "ref",
                        "fragments cannot reference other fragments".to_owned(),
                    ));
                }
                check_input_body(&frag_at, &located.document)?;
                self.usage.inputs.insert(id.clone());
                (&located.document, frag_at, Some(id.clone()))
            }
            None => (doc, at.clone(), None),
        };

        let service = body.service.as_deref().unwrap_or_default();
        if !services.iter().any(|s| s.name == service) {
            return Err(unknown(sub(&body_at, "service"), "service", service));
        }

        let mut input = input_from(body, origin);
        // a ref may override the fragment's delay
        if let Some(ms) = doc.delay_ms {
            input.delay = Duration::from_millis(ms);
        }
        Ok(input)
    }

    fn expectation(
        &mut self,
        at: &Location,
        doc: &ExpectationDocument,
        services: &[ServiceRef],
        defaults: &SuiteDefaults,
    ) -> Result<Expectation, ParseError> {
        let (body, body_at) = match &doc.reference {
            Some(id) => {
                let located = self.fragments.expectations.get(id).ok_or_else(|| {
                    ParseError::new(
                        sub(at, "ref"),
                        ParseErrorKind::MissingDependency {
                            what: "expectation".to_owned(),
                            id: id.clone(),
                        },
                    )
                })?;
                let frag_at = Location::new(&located.source);
                if located.document.reference.is_some() {
                    return Err(invalid(
                        sub(&frag_at, "ref"),
                        "ref",
                        "fragments cannot reference other fragments".to_owned(),
                    ));
                }
                check_expectation_body(&frag_at, &located.document)?;
                self.usage.expectations.insert(id.clone());
                (&located.document, frag_at)
            }
            None => (doc, at.clone()),
        };

        let service = body.service.clone().unwrap_or_default();
        if !services.iter().any(|s| s.name == service) {
            return Err(unknown(sub(&body_at, "service"), "service", &service));
        }

        let kind = if body.no_extra_output {
            ExpectationKind::NoExtraOutput
        } else if let Some(value) = &body.equals {
            ExpectationKind::Record(Matcher::Equals(value.clone()))
        } else if let Some(value) = &body.contains {
            ExpectationKind::Record(Matcher::Contains(value.clone()))
        } else if let Some(pattern) = &body.matches {
            let regex = Regex::new(pattern).map_err(|e| {
                invalid(sub(&body_at, "matches"), "matches", e.to_string())
            })?;
            ExpectationKind::Record(Matcher::Matches(Pattern::new(regex)))
        } else {
            return Err(invalid(
                body_at,
                "expectation",
                "exactly one of equals, contains, matches or no_extra_output is required"
                    .to_owned(),
            ));
        };

        let timeout = doc
            .timeout_ms
            .or(body.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.expectation_timeout);

        Ok(Expectation {
            service,
            channel: body
                .channel
                .clone()
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_owned()),
            kind,
            ordering: match body.ordering {
                Some(mode) => mode,
                None => defaults.ordering,
            },
            timeout,
            location: at.clone(),
        })
    }
}

fn input_from(doc: &InputDocument, origin: Option<String>) -> Input {
    Input {
        service: doc.service.clone().unwrap_or_default(),
        channel: doc.channel.clone(),
        payload: doc.payload.clone().unwrap_or(Value::Null),
        delay: Duration::from_millis(doc.delay_ms.unwrap_or(0)),
        origin,
    }
}

fn disabled(doc: DisabledDocument) -> Disabled {
    Disabled {
        reason: doc.reason,
        issue: doc.issue,
    }
}

// ─── helpers ─────────────────────────────────────────────────────────

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// `at` extended with a child field. Keeps the position of `at`.
fn sub(at: &Location, field: &str) -> Location {
    let path = if at.path.is_empty() {
        field.to_owned()
    } else {
        format!("{}.{field}", at.path)
    };
    Location {
        path,
        ..at.clone()
    }
}

fn missing(at: Location, field: &str) -> ParseError {
    ParseError::new(
        at,
        ParseErrorKind::MissingField {
            field: field.to_owned(),
        },
    )
}

fn invalid(at: Location, field: &str, reason: String) -> ParseError {
    ParseError::new(
        at,
        ParseErrorKind::InvalidValue {
            field: field.to_owned(),
            reason,
        },
    )
}

fn unknown(at: Location, what: &str, name: &str) -> ParseError {
    ParseError::new(
        at,
        ParseErrorKind::UnknownReference {
            what: what.to_owned(),
            name: name.to_owned(),
        },
    )
}
