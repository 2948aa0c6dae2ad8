use criterion::{criterion_group, criterion_main, Criterion};
use glucofit::prelude::data::{GlucoseSequence, MealFeatures, MedicationPeriodTable, Record};
use glucofit::prelude::*;
use std::hint::black_box;

fn day_scenario() -> Scenario {
    let meals = [(45.0, 60.0), (70.0, 360.0), (30.0, 720.0)]
        .into_iter()
        .map(|(carbs, t)| Meal::new(carbs, t).and_then(|m| m.with_fiber_ratio(0.1)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    Scenario::new(100.0, Scenario::uniform_grid(0.0, 1440.0, 5.0))
        .with_start_hour(7.0)
        .with_meals(meals)
        .with_oral_medication(OralMedication::new("metformin", 500.0, 0.0, MedClass::Biguanide))
}

fn record(carbs: f64) -> Record {
    let times: Vec<f64> = (0..=24).map(|i| i as f64 * 5.0).collect();
    let values = times.iter().map(|t| 100.0 + carbs * (t / 60.0).min(1.0)).collect();
    Record {
        meal: MealFeatures {
            carbs,
            hour: 12.0,
            fiber_ratio: 0.1,
            is_liquid: false,
            fatprotein: 0.2,
            activity_level: 0.0,
            medication_period: None,
            date: None,
            insulin: false,
            insulin_type: None,
            insulin_medications: Vec::new(),
            other_medications: Vec::new(),
        },
        sequence: GlucoseSequence {
            glucose_times: times,
            glucose_values: values,
            baseline_glucose: 100.0,
            heart_signals: None,
        },
    }
}

fn simulate_f64(c: &mut Criterion) {
    let scenario = day_scenario();
    let params = ParameterSet::default();
    c.bench_function("simulate_day_f64", |b| {
        b.iter(|| {
            simulate(
                black_box(&scenario),
                &params.view(),
                &SimulationOptions::default(),
            )
            .unwrap()
        })
    });
}

fn simulate_gradient(c: &mut Criterion) {
    let scenario = day_scenario();
    let params = ParameterSet::default();
    let observed = vec![110.0; scenario.times().len()];
    let loss = GlucoseLoss::default();
    c.bench_function("simulate_day_gradient", |b| {
        b.iter(|| {
            let tape = Tape::new();
            let (view, vars) = params.view_on(&tape);
            let out = loss
                .evaluate_scenario(
                    black_box(&scenario),
                    &observed,
                    100.0,
                    &view,
                    &SimulationOptions::default(),
                )
                .unwrap();
            tape.gradient(out.total, &vars)
        })
    });
}

fn batch_loss(c: &mut Criterion) {
    let records: Vec<Record> = (0..32).map(|i| record(20.0 + i as f64 * 2.0)).collect();
    let candidates: Vec<ParameterSet> = (0..16)
        .map(|i| {
            let mut set = ParameterSet::default();
            set.raw_mut().beta1 = 0.005 + 0.001 * i as f64;
            set
        })
        .collect();
    let periods = MedicationPeriodTable::default();
    let loss = GlucoseLoss::default();
    c.bench_function("loss_matrix_32x16", |b| {
        b.iter(|| {
            loss_matrix(
                black_box(&records),
                &candidates,
                &periods,
                &loss,
                LossMatrixOptions::new(),
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, simulate_f64, simulate_gradient, batch_loss);
criterion_main!(benches);
