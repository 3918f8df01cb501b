//! Emergency-block detection in specialist output.
//!
//! The livestock specialist signals an emergency by embedding a structured
//! block in its free-text reply:
//!
//! ```text
//! [EMERGENCY_VET_REVIEW_REQUIRED]
//! DISEASE: Foot-and-Mouth Disease
//! SEVERITY: CRITICAL
//! CONFIDENCE: HIGH
//! REASONING: Vesicular lesions observed.
//! [END_EMERGENCY]
//! Isolate the animal immediately.
//! ```
//!
//! A malformed block must never crash the request path and must never
//! escalate with garbage fields: detection fails soft to "not an emergency".

use crate::escalation::types::EmergencyFields;

use regex::Regex;

const START_MARKER: &str = "[EMERGENCY_VET_REVIEW_REQUIRED]";
const END_MARKER: &str = "[END_EMERGENCY]";

pub struct EmergencyDetector {
    block: Regex,
    disease: Regex,
    severity: Regex,
    confidence: Regex,
    reasoning: Regex,
}

impl Default for EmergencyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl EmergencyDetector {
    pub fn new() -> Self {
        // The patterns are literals; compilation cannot fail.
        Self {
            block: Regex::new(
                r"(?s)\[EMERGENCY_VET_REVIEW_REQUIRED\](.*?)\[END_EMERGENCY\]",
            )
            .expect("block pattern"),
            disease: Regex::new(r"(?m)DISEASE:[ \t]*(.+)").expect("disease pattern"),
            severity: Regex::new(r"(?m)SEVERITY:[ \t]*(\w+)").expect("severity pattern"),
            confidence: Regex::new(r"(?m)CONFIDENCE:[ \t]*(\w+)").expect("confidence pattern"),
            reasoning: Regex::new(r"(?m)REASONING:[ \t]*(.+)").expect("reasoning pattern"),
        }
    }

    /// Scan specialist output for an emergency block.
    ///
    /// Returns `None` when the start marker is absent (ordinary output), and
    /// also when the marker is present but the block is unparsable, a
    /// detector fault that is logged rather than raised.
    pub fn detect(&self, specialist_text: &str) -> Option<EmergencyFields> {
        if !specialist_text.contains(START_MARKER) {
            return None;
        }

        let block = match self.block.captures(specialist_text) {
            Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or(""),
            None => {
                tracing::warn!("emergency marker found but block could not be parsed");
                return None;
            }
        };

        // Fields are matched independently; a missing field gets a default
        // rather than failing the whole parse. Partial information is still
        // useful to a human reviewer.
        let fields = EmergencyFields {
            disease: self
                .capture(&self.disease, block)
                .unwrap_or_else(|| "Unknown".to_string()),
            severity: self
                .capture(&self.severity, block)
                .unwrap_or_else(|| "HIGH".to_string()),
            confidence: self
                .capture(&self.confidence, block)
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            reasoning: self
                .capture(&self.reasoning, block)
                .unwrap_or_else(|| "Critical condition detected".to_string()),
        };

        tracing::info!(
            disease = %fields.disease,
            severity = %fields.severity,
            "emergency detected in specialist output"
        );

        Some(fields)
    }

    /// Extract the farmer-visible part of the response: everything after the
    /// emergency block, or the input unchanged when no block is present.
    pub fn extract_visible_text<'a>(&self, specialist_text: &'a str) -> &'a str {
        match specialist_text.split_once(END_MARKER) {
            Some((_, rest)) => rest.trim(),
            None => specialist_text,
        }
    }

    fn capture(&self, pattern: &Regex, block: &str) -> Option<String> {
        pattern
            .captures(block)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_string())
    }
}
