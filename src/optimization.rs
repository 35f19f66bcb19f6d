use ndarray::{Array1, Array2};

use crate::data::SurvivalData;
use crate::error::Result;
use crate::model::Model;

/// which update rule drives fine-tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    /// plain stochastic gradient descent, one step per epoch
    Sgd,
    /// quasi-Newton with a persistent inverse-Hessian approximation
    Bfgs,
    /// gradient descent with Armijo backtracking line search
    Gdls,
}

/// one full optimization pass over the training partition, minimizing
/// (Cox cost + L1 + L2) in place; whatever state a strategy needs between
/// passes lives in the strategy, not in the model
pub trait Optimizer {
    fn step(
        &mut self,
        model: &mut Model,
        data: &SurvivalData,
        masks: &[Array2<f64>],
        learning_rate: f64,
    ) -> Result<f64>;
}

pub fn build_optimizer(kind: OptimizerKind) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Sgd => Box::new(Sgd),
        OptimizerKind::Bfgs => Box::new(Bfgs::default()),
        OptimizerKind::Gdls => Box::new(Gdls::default()),
    }
}

/// single gradient step at the caller's (possibly decayed) learning rate
pub struct Sgd;

impl Optimizer for Sgd {
    fn step(
        &mut self,
        model: &mut Model,
        data: &SurvivalData,
        masks: &[Array2<f64>],
        learning_rate: f64,
    ) -> Result<f64> {
        let eval = model.update(
            data.covariates(),
            data.events(),
            data.at_risk(),
            masks,
            learning_rate,
        )?;
        Ok(eval.cost)
    }
}

/// BFGS with the inverse-Hessian approximation carried across passes; the
/// iteration count per pass is capped so one epoch stays bounded, and
/// running out of iterations just keeps the best point found
pub struct Bfgs {
    max_iterations: usize,
    tolerance: f64,
    h_inv: Option<Array2<f64>>,
}

impl Default for Bfgs {
    fn default() -> Self {
        Self::new(20, 1e-8)
    }
}

impl Bfgs {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            h_inv: None,
        }
    }
}

impl Optimizer for Bfgs {
    fn step(
        &mut self,
        model: &mut Model,
        data: &SurvivalData,
        masks: &[Array2<f64>],
        _learning_rate: f64,
    ) -> Result<f64> {
        let features = data.covariates();
        let events = data.events();
        let at_risk = data.at_risk();
        let n = model.n_params();

        let mut x = model.params_to_vec();
        let (mut f, mut g) = model.cost_and_gradient(features, events, at_risk, masks)?;

        let mut h = match self.h_inv.take() {
            Some(h) if h.nrows() == n => h,
            _ => Array2::eye(n),
        };

        for _ in 0..self.max_iterations {
            let mut direction = -h.dot(&g);
            if direction.dot(&g) >= 0.0 {
                // approximation lost positive-definiteness; restart from
                // steepest descent
                h = Array2::eye(n);
                direction = -g.clone();
            }

            let Some((step, f_new)) =
                armijo_search(model, features, events, at_risk, masks, &x, &direction, f, &g)?
            else {
                break;
            };

            let x_new = &x + &(step * &direction);
            model.set_params_from_vec(x_new.view())?;
            let (_, g_new) = model.cost_and_gradient(features, events, at_risk, masks)?;

            let s = &x_new - &x;
            let y = &g_new - &g;
            let sy = s.dot(&y);
            if sy > 1e-10 {
                // standard inverse-Hessian update
                let rho = 1.0 / sy;
                let hy = h.dot(&y);
                let yhy = y.dot(&hy);
                let s_col = s.view().insert_axis(ndarray::Axis(1));
                let hy_col = hy.view().insert_axis(ndarray::Axis(1));
                let ss = s_col.dot(&s_col.t());
                let hys = hy_col.dot(&s_col.t());

                h = h - &(rho * (&hys + &hys.t())) + &((rho * rho * yhy + rho) * &ss);
            } else {
                // curvature condition failed; drop the stale approximation
                h = Array2::eye(n);
            }

            let done = (f - f_new).abs() < self.tolerance;
            x = x_new;
            f = f_new;
            g = g_new;
            if done {
                break;
            }
        }

        model.set_params_from_vec(x.view())?;
        self.h_inv = Some(h);
        Ok(f)
    }
}

/// steepest descent where each step's size comes from a fresh backtracking
/// line search; internal cost evaluations see the caller's dropout masks so
/// the whole epoch shares one stochastic pattern
pub struct Gdls {
    max_iterations: usize,
    tolerance: f64,
}

impl Default for Gdls {
    fn default() -> Self {
        Self::new(10, 1e-8)
    }
}

impl Gdls {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }
}

impl Optimizer for Gdls {
    fn step(
        &mut self,
        model: &mut Model,
        data: &SurvivalData,
        masks: &[Array2<f64>],
        _learning_rate: f64,
    ) -> Result<f64> {
        let features = data.covariates();
        let events = data.events();
        let at_risk = data.at_risk();

        let mut x = model.params_to_vec();
        let (mut f, mut g) = model.cost_and_gradient(features, events, at_risk, masks)?;

        for _ in 0..self.max_iterations {
            let direction = -g.clone();

            let Some((step, f_new)) =
                armijo_search(model, features, events, at_risk, masks, &x, &direction, f, &g)?
            else {
                break;
            };

            x = &x + &(step * &direction);
            model.set_params_from_vec(x.view())?;

            let done = (f - f_new).abs() < self.tolerance;
            f = f_new;
            if done {
                break;
            }
            let (_, g_new) = model.cost_and_gradient(features, events, at_risk, masks)?;
            g = g_new;
        }

        model.set_params_from_vec(x.view())?;
        Ok(f)
    }
}

const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK_FACTOR: f64 = 0.5;
const MAX_BACKTRACKS: usize = 30;

/// backtracking line search: shrink the step until the Armijo sufficient-
/// decrease condition holds; None when no acceptable step exists
#[allow(clippy::too_many_arguments)]
fn armijo_search(
    model: &mut Model,
    features: ndarray::ArrayView2<f64>,
    events: &[bool],
    at_risk: &[usize],
    masks: &[Array2<f64>],
    x: &Array1<f64>,
    direction: &Array1<f64>,
    f0: f64,
    g0: &Array1<f64>,
) -> Result<Option<(f64, f64)>> {
    let slope = g0.dot(direction);
    if slope >= 0.0 {
        return Ok(None);
    }

    let mut step = 1.0;
    for _ in 0..MAX_BACKTRACKS {
        let candidate = x + &(step * direction);
        model.set_params_from_vec(candidate.view())?;
        let eval = model.evaluate(features, events, at_risk, true, masks)?;
        let f = eval.cost + model.penalty();

        if f.is_finite() && f <= f0 + ARMIJO_C1 * step * slope {
            return Ok(Some((step, f)));
        }
        step *= BACKTRACK_FACTOR;
    }

    // nothing acceptable; put the parameters back where they were
    model.set_params_from_vec(x.view())?;
    Ok(None)
}
