use crate::{Confidence, EdgeId, EdgeKind, EdgeSource, EdgeTarget, HttpMethod, Location, TargetRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Scanner output before reference resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEdge {
    /// Service name, alias or source directory of the consumer.
    pub from: String,
    pub to: TargetRef,
    pub kind: EdgeKind,
    pub source: EdgeSource,
    pub location: Option<Location>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    /// Set when the evidence is not clearly a service reference.
    #[serde(default)]
    pub ambiguous: bool,
}

impl CandidateEdge {
    pub fn new(from: impl Into<String>, to: TargetRef, kind: EdgeKind, source: EdgeSource) -> Self {
        Self {
            from: from.into(),
            to,
            kind,
            source,
            location: None,
            confidence: Confidence::default(),
            method: None,
            ambiguous: false,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_method(mut self, method: Option<HttpMethod>) -> Self {
        self.method = method;
        self
    }

    pub fn flag_ambiguous(mut self, confidence: Confidence) -> Self {
        self.ambiguous = true;
        self.confidence = confidence;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: EdgeId,
    pub from: String,
    pub to: EdgeTarget,
    pub kind: EdgeKind,
    pub confidence: Confidence,
    #[serde(default)]
    pub sources: BTreeSet<EdgeSource>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub methods: BTreeSet<HttpMethod>,
    /// Number of candidate observations coalesced into this edge.
    #[serde(default)]
    pub observations: u32,
    #[serde(default)]
    pub ambiguous: bool,
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: EdgeTarget, kind: EdgeKind) -> Self {
        Self {
            id: EdgeId::new_v4(),
            from: from.into(),
            to,
            kind,
            confidence: Confidence::NONE,
            sources: BTreeSet::new(),
            locations: Vec::new(),
            methods: BTreeSet::new(),
            observations: 0,
            ambiguous: false,
        }
    }

    pub fn target_service(&self) -> &str {
        self.to.service_name()
    }

    /// Two observations are independent when they come from different
    /// extractors or different files.
    pub fn is_independent_of(&self, source: EdgeSource, location: Option<&Location>) -> bool {
        if !self.sources.contains(&source) {
            return true;
        }
        match location {
            Some(loc) => !self
                .locations
                .iter()
                .any(|seen| seen.file_path == loc.file_path),
            None => false,
        }
    }

    /// Folds one more observation in. Confidence only ever goes up.
    pub fn observe(
        &mut self,
        source: EdgeSource,
        location: Option<Location>,
        confidence: Confidence,
        method: Option<HttpMethod>,
        ambiguous: bool,
    ) {
        if self.observations == 0 {
            self.confidence = confidence;
            self.ambiguous = ambiguous;
        } else if self.is_independent_of(source, location.as_ref()) {
            self.confidence = self.confidence.corroborate(confidence);
            self.ambiguous = self.ambiguous && ambiguous;
        } else {
            self.confidence = self.confidence.reinforce(confidence);
            self.ambiguous = self.ambiguous && ambiguous;
        }
        self.sources.insert(source);
        if let Some(loc) = location {
            if !self.locations.contains(&loc) {
                self.locations.push(loc);
            }
        }
        if let Some(m) = method {
            self.methods.insert(m);
        }
        self.observations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_sources_corroborate() {
        let mut edge = DependencyEdge::new("orders", EdgeTarget::service("users"), EdgeKind::DeclaredLink);
        edge.observe(
            EdgeSource::Config,
            Some(Location::line("docker-compose.yml", 4)),
            Confidence::new(0.6),
            None,
            false,
        );
        let after_one = edge.confidence;
        edge.observe(
            EdgeSource::Code,
            Some(Location::line("orders/app.py", 10)),
            Confidence::new(0.6),
            None,
            false,
        );
        assert!(edge.confidence > after_one);
        assert_eq!(edge.observations, 2);
    }

    #[test]
    fn repeated_sighting_in_same_file_does_not_inflate() {
        let mut edge = DependencyEdge::new("orders", EdgeTarget::service("users"), EdgeKind::DirectCall);
        for line in [3, 9] {
            edge.observe(
                EdgeSource::Code,
                Some(Location::line("orders/app.py", line)),
                Confidence::new(0.7),
                Some(HttpMethod::Get),
                false,
            );
        }
        assert_eq!(edge.confidence.value(), 0.7);
        assert_eq!(edge.locations.len(), 2);
    }

    #[test]
    fn ambiguity_clears_once_corroborated() {
        let mut edge = DependencyEdge::new("orders", EdgeTarget::service("cache"), EdgeKind::NetworkBinding);
        edge.observe(EdgeSource::Config, None, Confidence::new(0.3), None, true);
        assert!(edge.ambiguous);
        edge.observe(
            EdgeSource::Code,
            Some(Location::line("orders/cache.py", 1)),
            Confidence::new(0.7),
            None,
            false,
        );
        assert!(!edge.ambiguous);
    }
}
