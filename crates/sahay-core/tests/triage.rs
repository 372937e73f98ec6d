// crates/sahay-core/tests/triage.rs
// ============================================================================
// Module: Triage Engine Tests
// Description: Verifies red-flag detection and safe-language guidance.
// ============================================================================
//! ## Overview
//! Ensures red flags force emergency regardless of classifier output, the
//! classifier can only soften a no-flag result, and every guidance text
//! passes the forbidden-term screen and carries the disclaimer.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use sahay_core::Language;
use sahay_core::Sex;
use sahay_core::TriageCategory;
use sahay_core::TriageClassifier;
use sahay_core::TriageInput;
use sahay_core::core::triage::DISCLAIMER_EN;
use sahay_core::core::triage::FORBIDDEN_TERMS;
use sahay_core::core::triage::assess;
use sahay_core::core::triage::detect_red_flags;
use sahay_core::core::triage::guidance_is_safe;
use sahay_core::core::triage::guidance_template;
use sahay_core::core::triage::safe_generic_template;

fn input(symptoms: &str) -> TriageInput {
    TriageInput {
        symptoms_text: symptoms.to_string(),
        age: Some(45),
        sex: Some(Sex::Male),
        pregnancy: false,
        language: Language::En,
    }
}

/// Classifier that always claims emergencies, to prove it cannot override.
struct AlarmistClassifier;

impl TriageClassifier for AlarmistClassifier {
    fn classify(&self, _input: &TriageInput) -> Option<TriageCategory> {
        Some(TriageCategory::Emergency)
    }
}

/// Classifier that softens everything to self-care.
struct SoftClassifier;

impl TriageClassifier for SoftClassifier {
    fn classify(&self, _input: &TriageInput) -> Option<TriageCategory> {
        Some(TriageCategory::SelfCare)
    }
}

#[test]
fn chest_pain_and_breathlessness_force_emergency() {
    let assessment = assess(&input("chest pain and shortness of breath"), None);

    assert_eq!(assessment.category, TriageCategory::Emergency);
    assert!(assessment.red_flags.contains(&"chest_pain".to_string()));
    assert!(assessment.red_flags.contains(&"breathing_difficulty".to_string()));
    assert!(assessment.guidance_text.contains("guidance, not a diagnosis"));
    let lowered = assessment.guidance_text.to_lowercase();
    for term in FORBIDDEN_TERMS {
        assert!(!lowered.contains(term), "guidance contains forbidden term {term:?}");
    }
}

#[test]
fn red_flag_detection_is_case_insensitive() {
    let flags = detect_red_flags("CHEST PAIN after climbing stairs", false);
    assert_eq!(flags, vec!["chest_pain"]);
}

#[test]
fn flags_are_reported_in_rule_order_without_duplicates() {
    let flags =
        detect_red_flags("shortness of breath, chest pain, crushing chest sensation", false);
    assert_eq!(flags, vec!["chest_pain", "breathing_difficulty"]);
}

#[test]
fn no_flag_defaults_to_phc() {
    let assessment = assess(&input("mild headache since yesterday"), None);
    assert_eq!(assessment.category, TriageCategory::Phc);
    assert!(assessment.red_flags.is_empty());
}

#[test]
fn classifier_may_soften_to_self_care() {
    let assessment = assess(&input("mild headache since yesterday"), Some(&SoftClassifier));
    assert_eq!(assessment.category, TriageCategory::SelfCare);
}

#[test]
fn classifier_cannot_raise_to_emergency() {
    let assessment = assess(&input("mild headache since yesterday"), Some(&AlarmistClassifier));
    assert_eq!(assessment.category, TriageCategory::Phc);
}

#[test]
fn classifier_cannot_suppress_a_red_flag() {
    let assessment = assess(&input("sudden severe bleeding"), Some(&SoftClassifier));
    assert_eq!(assessment.category, TriageCategory::Emergency);
}

#[test]
fn pregnancy_bleeding_flags_only_for_pregnant_patients() {
    assert!(detect_red_flags("light spotting this morning", false).is_empty());
    assert_eq!(detect_red_flags("light spotting this morning", true), vec!["pregnancy_bleeding"]);
}

#[test]
fn every_template_passes_the_safety_screen() {
    for category in [TriageCategory::SelfCare, TriageCategory::Phc, TriageCategory::Emergency] {
        for language in [Language::En, Language::Hi] {
            let template = guidance_template(category, language);
            assert!(
                guidance_is_safe(template, language),
                "template for {category:?}/{language:?} failed the screen"
            );
        }
    }
}

#[test]
fn generic_fallback_carries_the_disclaimer() {
    assert!(safe_generic_template(Language::En).contains(DISCLAIMER_EN));
    assert!(guidance_is_safe(safe_generic_template(Language::Hi), Language::Hi));
}

#[test]
fn hindi_guidance_carries_the_hindi_disclaimer() {
    let mut hindi = input("mild headache");
    hindi.language = Language::Hi;
    let assessment = assess(&hindi, None);
    assert!(assessment.guidance_text.contains("यह मार्गदर्शन है, निदान नहीं।"));
}

#[test]
fn diagnosis_phrasing_fails_the_screen() {
    let text = format!("You have malaria. {DISCLAIMER_EN}");
    assert!(!guidance_is_safe(&text, Language::En));
}
