use glucofit::data::service::SERVICE_GRID_POINTS;
use glucofit::prelude::*;

fn respond(body: &str) -> SimulationResponse {
    SimulationRequest::from_json(body)
        .and_then(|request| request.simulate(&ParameterSet::default()))
        .expect("valid request")
}

const BREAKFAST: &str = r#"{"carbs": 55, "t_meal": 2.0, "fiber_ratio": 0.1, "fatprotein": 0.2}"#;

#[test]
fn empty_request_is_rejected_before_simulation() {
    for body in [r#"{}"#, r#"{"meals": []}"#, r#"{"meals": [], "G_b": 95}"#] {
        assert!(matches!(
            SimulationRequest::from_json(body),
            Err(GlucoseError::InvalidRequest(_))
        ));
    }
}

#[test]
fn response_covers_a_day_in_quarter_hours() {
    let response = respond(&format!(r#"{{"meals": [{BREAKFAST}], "G_b": 105}}"#));
    assert_eq!(response.glucose_trajectory.len(), SERVICE_GRID_POINTS);
    assert_eq!(response.time_points[0], 0.0);
    assert_eq!(response.time_points[1], 0.25);
    assert_eq!(response.glucose_trajectory[0], 105.0);
    assert!(response.peak_glucose > 105.0);
    assert!(response.average_glucose <= response.peak_glucose);
}

#[test]
fn insulin_and_medication_lower_the_curve() {
    let plain = respond(&format!(r#"{{"meals": [{BREAKFAST}]}}"#));
    let insulin = respond(&format!(
        r#"{{"meals": [{BREAKFAST}], "insulin": true, "insulin_type": "rapid",
            "insulinMedications": [{{"units": 6, "time": 2.0}}]}}"#
    ));
    let metformin = respond(&format!(
        r#"{{"meals": [{BREAKFAST}],
            "otherMedications": [{{"med_id": "metformin", "dose": 500, "time": 1.5,
                                   "med_class": "biguanide"}}]}}"#
    ));

    assert!(insulin.peak_glucose < plain.peak_glucose);
    assert!(metformin.average_glucose < plain.average_glucose);
}

#[test]
fn unusable_medication_events_contribute_nothing() {
    let plain = respond(&format!(r#"{{"meals": [{BREAKFAST}]}}"#));
    let skipped = respond(&format!(
        r#"{{"meals": [{BREAKFAST}],
            "otherMedications": [
                {{"dose": 500, "time": 1.0, "med_class": "biguanide"}},
                {{"med_id": "mystery", "dose": 10, "time": 1.0, "med_class": "herbal"}}
            ]}}"#
    ));
    assert_eq!(plain.glucose_trajectory, skipped.glucose_trajectory);
}

#[test]
fn unknown_insulin_type_falls_back_to_rapid() {
    let body = |kind: &str| {
        format!(
            r#"{{"meals": [{BREAKFAST}], "insulin": true, "insulin_type": "{kind}",
                "insulinMedications": [{{"units": 4, "time": 2.0}}]}}"#
        )
    };
    let rapid = respond(&body("rapid"));
    let unknown = respond(&body("ultra-experimental"));
    assert_eq!(rapid.glucose_trajectory, unknown.glucose_trajectory);
}
