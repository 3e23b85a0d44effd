//! Scripted [`GeocodeProvider`] for tests.
//!
//! Replies are keyed by the exact request text. Unscripted text answers
//! with an empty candidate list. Every call is recorded so tests can
//! assert strategy order through call counts.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use opportunity_map_geography_models::{Coordinate, PlaceContext};

use crate::{CandidateMatch, ContextEntry, ForwardOptions, GeocodeError, GeocodeProvider};

/// A scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Successful response with these candidates.
    Candidates(Vec<CandidateMatch>),
    /// Non-2xx response.
    Status(u16),
    /// Unparseable response body.
    Malformed,
}

/// A recorded forward-geocode call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub text: String,
    pub options: ForwardOptions,
}

/// A [`GeocodeProvider`] that answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<BTreeMap<String, (Duration, Reply)>>,
    reverse: Mutex<Option<PlaceContext>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `text` with `candidates`.
    pub fn reply(&self, text: &str, candidates: Vec<CandidateMatch>) {
        self.script(text, Duration::ZERO, Reply::Candidates(candidates));
    }

    /// Answers `text` with `candidates` after `delay`.
    pub fn reply_after(&self, text: &str, delay: Duration, candidates: Vec<CandidateMatch>) {
        self.script(text, delay, Reply::Candidates(candidates));
    }

    /// Answers `text` with an HTTP error status.
    pub fn fail(&self, text: &str, status: u16) {
        self.script(text, Duration::ZERO, Reply::Status(status));
    }

    /// Answers `text` with a body that cannot be parsed.
    pub fn malformed(&self, text: &str) {
        self.script(text, Duration::ZERO, Reply::Malformed);
    }

    /// Answers every reverse lookup with `place`.
    ///
    /// # Panics
    ///
    /// Panics if the script mutex is poisoned.
    pub fn reverse_reply(&self, place: PlaceContext) {
        *self.reverse.lock().expect("script mutex poisoned") = Some(place);
    }

    /// All forward calls so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the call log mutex is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("call log mutex poisoned").clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Number of forward calls made with exactly `text`.
    #[must_use]
    pub fn calls_for(&self, text: &str) -> usize {
        self.calls().iter().filter(|c| c.text == text).count()
    }

    fn script(&self, text: &str, delay: Duration, reply: Reply) {
        self.replies
            .lock()
            .expect("script mutex poisoned")
            .insert(text.to_string(), (delay, reply));
    }
}

#[async_trait]
impl GeocodeProvider for ScriptedProvider {
    async fn forward_geocode(
        &self,
        text: &str,
        options: &ForwardOptions,
    ) -> Result<Vec<CandidateMatch>, GeocodeError> {
        self.calls
            .lock()
            .expect("call log mutex poisoned")
            .push(RecordedCall {
                text: text.to_string(),
                options: options.clone(),
            });

        let scripted = self
            .replies
            .lock()
            .expect("script mutex poisoned")
            .get(text)
            .cloned();

        let Some((delay, reply)) = scripted else {
            return Ok(Vec::new());
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Candidates(candidates) => Ok(candidates),
            Reply::Status(status) => Err(GeocodeError::Status { status }),
            Reply::Malformed => Err(GeocodeError::Parse {
                message: "unexpected end of input".to_string(),
            }),
        }
    }

    async fn reverse_geocode(
        &self,
        _coordinate: Coordinate,
    ) -> Result<Option<PlaceContext>, GeocodeError> {
        Ok(self.reverse.lock().expect("script mutex poisoned").clone())
    }
}

/// A candidate of a single place type with no context.
#[must_use]
pub fn candidate(lng: f64, lat: f64, place_type: &str, relevance: f64) -> CandidateMatch {
    CandidateMatch {
        center: Coordinate::new(lng, lat),
        place_types: vec![place_type.to_string()],
        relevance,
        text: String::new(),
        place_name: None,
        context: Vec::new(),
    }
}

/// A postcode candidate with place and region breadcrumbs.
#[must_use]
pub fn postcode_candidate(zip: &str, city: &str, state: &str, state_code: &str) -> CandidateMatch {
    CandidateMatch {
        center: Coordinate::new(0.0, 0.0),
        place_types: vec!["postcode".to_string()],
        relevance: 1.0,
        text: zip.to_string(),
        place_name: Some(format!("{city}, {state} {zip}, United States")),
        context: vec![
            ContextEntry {
                id: "place.1".to_string(),
                text: city.to_string(),
                short_code: None,
            },
            ContextEntry {
                id: "region.1".to_string(),
                text: state.to_string(),
                short_code: Some(format!("US-{state_code}")),
            },
            ContextEntry {
                id: "country.1".to_string(),
                text: "United States".to_string(),
                short_code: Some("us".to_string()),
            },
        ],
    }
}
