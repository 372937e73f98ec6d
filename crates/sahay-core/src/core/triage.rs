// crates/sahay-core/src/core/triage.rs
// ============================================================================
// Module: SAHAY Triage Engine
// Description: Rule-first red-flag detection and safe-language guidance.
// Purpose: Force emergency triage on red flags and guarantee that guidance
// output never contains diagnosis language.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! Triage is rule-first: an ordered red-flag list is matched
//! case-insensitively against the symptom text, and any hit forces
//! `emergency` regardless of what an optional classifier says. The
//! classifier (a replaceable summarizer behind
//! [`crate::interfaces::TriageClassifier`]) may only soften a no-flag result
//! to `self_care` or confirm `phc`.
//!
//! Guidance is template-selected by `(category, language)` and screened
//! against a forbidden-term list; any hit falls back to the safe generic
//! template. Every guidance text carries the "guidance, not a diagnosis"
//! disclaimer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::TriageClassifier;

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Triage categories ordered by severity.
///
/// # Invariants
/// - Variants are stable for serialization and analytics emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageCategory {
    /// Self-care at home.
    SelfCare,
    /// Visit a primary health centre.
    Phc,
    /// Emergency care now.
    Emergency,
}

impl TriageCategory {
    /// Returns the stable string label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelfCare => "self_care",
            Self::Phc => "phc",
            Self::Emergency => "emergency",
        }
    }

    /// Parses a stable category label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "self_care" => Some(Self::SelfCare),
            "phc" => Some(Self::Phc),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// Reported sex of the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    /// Female.
    Female,
    /// Male.
    Male,
    /// Other or undisclosed.
    Other,
}

/// Guidance languages with template coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// Hindi.
    Hi,
}

impl Language {
    /// Parses a BCP 47-ish tag, defaulting to English.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "hi" | "hi-in" => Self::Hi,
            _ => Self::En,
        }
    }
}

// ============================================================================
// SECTION: Input and Assessment
// ============================================================================

/// Input to a triage assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageInput {
    /// Free-text symptom description.
    pub symptoms_text: String,
    /// Patient age in years, when known.
    pub age: Option<u16>,
    /// Patient sex, when known.
    pub sex: Option<Sex>,
    /// Whether the patient is pregnant.
    #[serde(default)]
    pub pregnancy: bool,
    /// Guidance language.
    #[serde(default)]
    pub language: Language,
}

/// Result of a triage assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageAssessment {
    /// Final category.
    pub category: TriageCategory,
    /// Canonical names of matched red flags, in rule order.
    pub red_flags: Vec<String>,
    /// Safe-language guidance text.
    pub guidance_text: String,
}

// ============================================================================
// SECTION: Red-Flag Rules
// ============================================================================

/// One red-flag rule: a canonical flag name and its trigger phrases.
///
/// # Invariants
/// - `patterns` are lowercase; matching lowercases the input once.
#[derive(Debug, Clone, Copy)]
pub struct RedFlagRule {
    /// Canonical flag name.
    pub flag: &'static str,
    /// Lowercase trigger substrings.
    pub patterns: &'static [&'static str],
    /// Rule applies only when the patient is pregnant.
    pub pregnancy_only: bool,
}

/// Ordered red-flag rules. Order is part of the contract: matched flags are
/// reported in this order.
pub const RED_FLAG_RULES: &[RedFlagRule] = &[
    RedFlagRule {
        flag: "chest_pain",
        patterns: &["chest pain", "pain in chest", "crushing chest"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "breathing_difficulty",
        patterns: &["shortness of breath", "difficulty breathing", "cannot breathe", "breathless"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "unconsciousness",
        patterns: &["unconscious", "fainted", "not responding", "unresponsive"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "severe_bleeding",
        patterns: &["severe bleeding", "bleeding heavily", "blood loss"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "seizure",
        patterns: &["seizure", "convulsion", "fits"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "stroke_signs",
        patterns: &["face drooping", "slurred speech", "one side weak", "sudden numbness"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "suicidal_ideation",
        patterns: &["suicide", "kill myself", "end my life", "self harm"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "poisoning",
        patterns: &["poison", "overdose", "swallowed chemical"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "snake_bite",
        patterns: &["snake bite", "snakebite", "bitten by snake"],
        pregnancy_only: false,
    },
    RedFlagRule {
        flag: "pregnancy_bleeding",
        patterns: &["bleeding", "spotting", "water broke", "labour pain", "labor pain"],
        pregnancy_only: true,
    },
];

/// Detects red flags in symptom text.
///
/// Returns canonical flag names in rule order, deduplicated.
#[must_use]
pub fn detect_red_flags(symptoms_text: &str, pregnancy: bool) -> Vec<&'static str> {
    let lowered = symptoms_text.to_lowercase();
    let mut flags = Vec::new();
    for rule in RED_FLAG_RULES {
        if rule.pregnancy_only && !pregnancy {
            continue;
        }
        let hit = rule.patterns.iter().any(|pattern| lowered.contains(pattern));
        if hit && !flags.contains(&rule.flag) {
            flags.push(rule.flag);
        }
    }
    flags
}

// ============================================================================
// SECTION: Guidance Templates
// ============================================================================

/// English disclaimer required in every guidance text.
pub const DISCLAIMER_EN: &str = "This is guidance, not a diagnosis.";
/// Hindi disclaimer required in every guidance text.
pub const DISCLAIMER_HI: &str = "यह मार्गदर्शन है, निदान नहीं।";

/// Forbidden diagnosis phrasing. Guidance containing any of these falls back
/// to the safe generic template.
pub const FORBIDDEN_TERMS: &[&str] = &[
    "you have",
    "you are suffering from",
    "diagnosis of",
    "diagnosed with",
    "confirmed case",
    "you are infected",
    "it is certain",
];

/// Returns the guidance template for `(category, language)`.
#[must_use]
pub const fn guidance_template(category: TriageCategory, language: Language) -> &'static str {
    match (category, language) {
        (TriageCategory::Emergency, Language::En) => {
            "Your symptoms may need urgent attention. Please go to the nearest \
             emergency facility or call local emergency services now. \
             This is guidance, not a diagnosis."
        }
        (TriageCategory::Phc, Language::En) => {
            "Please visit your nearest primary health centre within the next \
             day and describe these symptoms to the health worker. \
             This is guidance, not a diagnosis."
        }
        (TriageCategory::SelfCare, Language::En) => {
            "Rest, take fluids, and watch your symptoms. If anything worsens \
             or new symptoms appear, visit your nearest health centre. \
             This is guidance, not a diagnosis."
        }
        (TriageCategory::Emergency, Language::Hi) => {
            "आपके लक्षणों पर तुरंत ध्यान देने की आवश्यकता हो सकती है। कृपया अभी नज़दीकी \
             आपातकालीन केंद्र जाएँ या आपातकालीन सेवा को कॉल करें। \
             यह मार्गदर्शन है, निदान नहीं।"
        }
        (TriageCategory::Phc, Language::Hi) => {
            "कृपया अगले दिन के भीतर नज़दीकी प्राथमिक स्वास्थ्य केंद्र जाएँ और स्वास्थ्य \
             कार्यकर्ता को ये लक्षण बताएँ। यह मार्गदर्शन है, निदान नहीं।"
        }
        (TriageCategory::SelfCare, Language::Hi) => {
            "आराम करें, तरल पदार्थ लें, और लक्षणों पर नज़र रखें। यदि कुछ बिगड़े या नए \
             लक्षण दिखें तो नज़दीकी स्वास्थ्य केंद्र जाएँ। यह मार्गदर्शन है, निदान नहीं।"
        }
    }
}

/// Safe generic fallback used when a template fails the forbidden-term
/// screen.
#[must_use]
pub const fn safe_generic_template(language: Language) -> &'static str {
    match language {
        Language::En => {
            "Please consult a health worker about your symptoms. \
             This is guidance, not a diagnosis."
        }
        Language::Hi => {
            "कृपया अपने लक्षणों के बारे में स्वास्थ्य कार्यकर्ता से सलाह लें। \
             यह मार्गदर्शन है, निदान नहीं।"
        }
    }
}

/// Returns the disclaimer phrase for a language.
#[must_use]
pub const fn disclaimer(language: Language) -> &'static str {
    match language {
        Language::En => DISCLAIMER_EN,
        Language::Hi => DISCLAIMER_HI,
    }
}

/// Screens guidance text: no forbidden term, disclaimer present.
#[must_use]
pub fn guidance_is_safe(text: &str, language: Language) -> bool {
    let lowered = text.to_lowercase();
    let clean = FORBIDDEN_TERMS.iter().all(|term| !lowered.contains(term));
    clean && text.contains(disclaimer(language))
}

// ============================================================================
// SECTION: Assessment
// ============================================================================

/// Runs a full triage assessment.
///
/// Red flags force `emergency`. Without a flag, an optional classifier may
/// return `self_care` or `phc`; any other classifier output is ignored and
/// the default is `phc`. Guidance is screened and falls back to the safe
/// generic template when the screen fails.
#[must_use]
pub fn assess(input: &TriageInput, classifier: Option<&dyn TriageClassifier>) -> TriageAssessment {
    let flags = detect_red_flags(&input.symptoms_text, input.pregnancy);
    let category = if flags.is_empty() {
        match classifier.and_then(|c| c.classify(input)) {
            Some(TriageCategory::SelfCare) => TriageCategory::SelfCare,
            Some(TriageCategory::Phc | TriageCategory::Emergency) | None => TriageCategory::Phc,
        }
    } else {
        TriageCategory::Emergency
    };

    let template = guidance_template(category, input.language);
    let guidance_text = if guidance_is_safe(template, input.language) {
        template.to_string()
    } else {
        safe_generic_template(input.language).to_string()
    };

    TriageAssessment {
        category,
        red_flags: flags.iter().map(|flag| (*flag).to_string()).collect(),
        guidance_text,
    }
}
