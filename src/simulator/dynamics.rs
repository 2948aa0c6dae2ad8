use crate::ad::Scalar;
use crate::data::RegimenFactors;
use crate::parameters::ParameterView;

/// Effect terms entering one step of the glucose update
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<S> {
    /// Total absorbed carbohydrate
    pub carb: S,
    /// Endogenous, exogenous and oral insulin-analogous effect
    pub insulin: S,
    pub activity: f64,
    pub night: bool,
    /// Any meal eaten so far is liquid
    pub liquid: bool,
    /// Auxiliary heart features weighted by β6..β9
    pub heart: Option<[f64; 4]>,
}

/// One explicit update of the glucose state.
///
/// ```text
/// G' = G + β1·carb·m_carb·(1 + ρ·liquid) + β2·bN + β3·(carb/100)·bN
///        − β4·insulin·m_insulin + β5·activity + Σ β(5+i)·h_i + σ·z
/// ```
///
/// `z` is a standard normal draw, or `None` for a deterministic step.
pub fn step<S: Scalar>(
    glucose: S,
    inputs: &StepInputs<S>,
    params: &ParameterView<S>,
    regimen: RegimenFactors,
    z: Option<f64>,
) -> S {
    let beta = &params.beta;
    let night = if inputs.night { 1.0 } else { 0.0 };
    let liquid = if inputs.liquid { 1.0 } else { 0.0 };

    let carb = beta[0] * inputs.carb * regimen.carb * (params.rho * liquid + 1.0);
    let circadian = beta[1] * night + beta[2] * (inputs.carb / 100.0) * night;
    let insulin = beta[3] * inputs.insulin * regimen.insulin;
    let activity = beta[4] * inputs.activity;

    let mut next = glucose + carb + circadian - insulin + activity;
    if let Some(h) = inputs.heart {
        next = next + beta[5] * h[0] + beta[6] * h[1] + beta[7] * h[2] + beta[8] * h[3];
    }
    if let Some(z) = z {
        next = next + params.sigma() * z;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::Tape;
    use crate::parameters::ParameterSet;
    use approx::assert_relative_eq;

    fn inputs(carb: f64, insulin: f64) -> StepInputs<f64> {
        StepInputs {
            carb,
            insulin,
            activity: 0.0,
            night: false,
            liquid: false,
            heart: None,
        }
    }

    #[test]
    fn test_no_effects_keep_glucose_constant() {
        let view = ParameterSet::default().view();
        let next = step(120.0, &inputs(0.0, 0.0), &view, RegimenFactors::default(), None);
        assert_eq!(next, 120.0);
    }

    #[test]
    fn test_each_term() {
        let mut set = ParameterSet::default();
        let raw = set.raw_mut();
        raw.beta1 = 0.1;
        raw.beta2 = 2.0;
        raw.beta3 = 3.0;
        raw.beta4 = 0.5;
        raw.beta5 = -1.0;
        raw.beta6 = 1.0;
        raw.beta9 = 2.0;
        let view = set.view();
        let regimen = RegimenFactors::new(0.9, 1.2);

        let day = step(100.0, &inputs(50.0, 4.0), &view, regimen, None);
        assert_relative_eq!(day, 100.0 + 0.1 * 50.0 * 0.9 - 0.5 * 4.0 * 1.2);

        let mut night = inputs(50.0, 4.0);
        night.night = true;
        night.liquid = true;
        night.activity = 1.5;
        night.heart = Some([1.0, 5.0, 5.0, 0.5]);
        let next = step(100.0, &night, &view, regimen, None);
        let expected = 100.0 + 0.1 * 50.0 * 0.9 * (1.0 + 0.2) + 2.0 + 3.0 * 0.5 - 0.5 * 4.0 * 1.2
            - 1.5
            + 1.0
            + 1.0;
        assert_relative_eq!(next, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_is_scaled_by_sigma() {
        let view = ParameterSet::default().view();
        let next = step(100.0, &inputs(0.0, 0.0), &view, RegimenFactors::default(), Some(2.0));
        assert_relative_eq!(next, 101.0, epsilon = 1e-12);
    }

    #[test]
    fn test_step_gradient_with_respect_to_beta1() {
        let set = ParameterSet::default();
        let tape = Tape::new();
        let (view, vars) = set.view_on(&tape);
        let carb = tape.var(30.0);
        let inputs = StepInputs {
            carb,
            insulin: crate::ad::Var::constant(0.0),
            activity: 0.0,
            night: false,
            liquid: false,
            heart: None,
        };
        let g0 = crate::ad::Var::constant(100.0);
        let next = step(g0, &inputs, &view, RegimenFactors::default(), None);
        let grad = tape.gradient(next, &vars);
        assert_relative_eq!(grad[0], 30.0);
        assert_eq!(grad[3], 0.0);
    }
}
