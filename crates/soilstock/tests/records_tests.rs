//! Tests for survey records and boundary validation.
//!
//! These tests verify that `SoilSurvey::new` is the single validation
//! boundary: malformed records are rejected with contextual errors, and
//! accepted surveys uphold the documented invariants.
//!
//! ## Test Organization
//!
//! 1. **Acceptance** - Well-formed surveys and their accessors
//! 2. **Core Validation** - Ids, coordinates, strata
//! 3. **Sample Validation** - Depth intervals, concentrations, bulk density

use soilstock::prelude::*;

fn core(id: &str, x: f64, y: f64, stratum: &str) -> Core {
    Core {
        id: id.into(),
        x,
        y,
        stratum: stratum.into(),
        scenario: None,
    }
}

fn sample(core_id: &str, top: f64, bottom: f64, conc: f64) -> DepthSample {
    DepthSample {
        core_id: core_id.into(),
        depth_top: top,
        depth_bottom: bottom,
        concentration: conc,
        bulk_density: None,
    }
}

// ============================================================================
// Acceptance Tests
// ============================================================================

/// Test that a well-formed survey is accepted and queryable.
#[test]
fn test_valid_survey_is_accepted() {
    let survey = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest"), core("b", 10.0, 0.0, "meadow")],
        vec![
            sample("a", 0.0, 15.0, 40.0),
            sample("a", 15.0, 30.0, 25.0),
            sample("b", 0.0, 20.0, 30.0),
        ],
    )
    .expect("valid survey");

    assert_eq!(survey.cores().len(), 2);
    assert_eq!(survey.samples().len(), 3);
    assert_eq!(survey.strata(), vec!["forest".to_string(), "meadow".to_string()]);
    assert_eq!(survey.cores_in_stratum("forest"), 1);
    assert_eq!(survey.samples_for("a").len(), 2);
    assert!(survey.core("missing").is_none());
}

/// Test that a core's samples come back sorted by depth.
#[test]
fn test_samples_are_sorted_by_depth() {
    let survey = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("a", 30.0, 60.0, 10.0), sample("a", 0.0, 30.0, 40.0)],
    )
    .expect("valid survey");

    let sorted = survey.samples_for("a");
    assert_eq!(sorted[0].depth_top, 0.0);
    assert_eq!(sorted[1].depth_top, 30.0);
}

// ============================================================================
// Core Validation Tests
// ============================================================================

/// Test rejection of empty inputs.
#[test]
fn test_empty_survey_rejected() {
    assert!(matches!(
        SoilSurvey::new(vec![], vec![]),
        Err(StockError::EmptyInput)
    ));
}

/// Test rejection of duplicate core ids.
#[test]
fn test_duplicate_core_ids_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest"), core("a", 1.0, 1.0, "forest")],
        vec![sample("a", 0.0, 15.0, 40.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test rejection of non-finite coordinates.
#[test]
fn test_non_finite_coordinates_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", f64::NAN, 0.0, "forest")],
        vec![sample("a", 0.0, 15.0, 40.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test rejection of an empty stratum label.
#[test]
fn test_empty_stratum_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "")],
        vec![sample("a", 0.0, 15.0, 40.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

// ============================================================================
// Sample Validation Tests
// ============================================================================

/// Test rejection of a sample referencing an unknown core.
#[test]
fn test_unknown_core_reference_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("ghost", 0.0, 15.0, 40.0)],
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}

/// Test rejection of inverted depth intervals.
#[test]
fn test_inverted_interval_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("a", 15.0, 15.0, 40.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test rejection of overlapping intervals within a core.
#[test]
fn test_overlapping_intervals_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("a", 0.0, 20.0, 40.0), sample("a", 15.0, 30.0, 25.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test rejection of negative concentrations.
#[test]
fn test_negative_concentration_rejected() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("a", 0.0, 15.0, -1.0)],
    );
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test rejection of a non-positive bulk density.
#[test]
fn test_invalid_bulk_density_rejected() {
    let mut bad = sample("a", 0.0, 15.0, 40.0);
    bad.bulk_density = Some(0.0);
    let result = SoilSurvey::new(vec![core("a", 0.0, 0.0, "forest")], vec![bad]);
    assert!(matches!(result, Err(StockError::InvalidRecord(_))));
}

/// Test that gaps between intervals are allowed (non-overlap only).
#[test]
fn test_gapped_intervals_accepted() {
    let result = SoilSurvey::new(
        vec![core("a", 0.0, 0.0, "forest")],
        vec![sample("a", 0.0, 10.0, 40.0), sample("a", 20.0, 40.0, 25.0)],
    );
    assert!(result.is_ok());
}
