use approx::assert_abs_diff_eq;
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::{SharingPolicy, System, UNBOUNDED};

const EPS: f64 = 1e-9;

#[test]
fn variable_penalty() {
    // A variable with twice the penalty gets half of the share.
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(3.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(2., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 2., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 1., epsilon = EPS);
}

#[test]
fn consumption_weight() {
    // Variables of higher consumption weight consume more capacity but get the same value.
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(3.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 2.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 1., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 1., epsilon = EPS);
}

#[test]
fn consumption_weight_and_penalty() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(20.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(2., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 2.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
}

#[test]
fn multiple_constraints() {
    // The tightest constraint is solved first, the slack one serves the leftover.
    let mut sys = System::new(false);
    let cnst1 = sys.constraint_new(20.);
    let cnst2 = sys.constraint_new(60.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 2);
    let rho2 = sys.variable_new(2., UNBOUNDED, 1);
    let rho3 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst1, rho1, 1.);
    sys.expand(cnst1, rho2, 2.);
    sys.expand(cnst2, rho1, 2.);
    sys.expand(cnst2, rho3, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho3), 40., epsilon = EPS);
    assert!(sys.constraint_usage(cnst1) <= 20. + EPS);
    assert!(sys.constraint_usage(cnst2) <= 60. + EPS);
}

#[test]
fn fatpipe_penalty() {
    // On a fat pipe every variable saturates the bound scaled by its penalty.
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    sys.unshare(cnst);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(2., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
}

#[test]
fn fatpipe_consumption_weight() {
    // Only the maximum consumption weight limits the shared value.
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    sys.unshare(cnst);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 2.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 5., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
}

#[test]
fn fatpipe_multiple_constraints() {
    let mut sys = System::new(false);
    let cnst1 = sys.constraint_new(10.);
    let cnst2 = sys.constraint_new(60.);
    sys.unshare(cnst1);
    sys.unshare(cnst2);
    let rho1 = sys.variable_new(1., UNBOUNDED, 2);
    let rho2 = sys.variable_new(2., UNBOUNDED, 1);
    let rho3 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst1, rho1, 1.);
    sys.expand(cnst1, rho2, 2.);
    sys.expand(cnst2, rho1, 2.);
    sys.expand(cnst2, rho3, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho3), 60., epsilon = EPS);
}

#[test]
fn inactive_variable_gets_nothing() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(0., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 0., epsilon = EPS);
}

#[test]
fn equal_split_of_three() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    let vars: Vec<_> = (0..3).map(|_| sys.variable_new(1., UNBOUNDED, 1)).collect();
    for &v in &vars {
        sys.expand(cnst, v, 1.);
    }
    sys.solve();
    for &v in &vars {
        assert_abs_diff_eq!(sys.variable_value(v), 10. / 3., epsilon = EPS);
    }
    assert_abs_diff_eq!(sys.constraint_usage(cnst), 10., epsilon = EPS);
}

#[test]
fn bounded_variable_is_capped() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(100.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 50., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 50., epsilon = EPS);

    // a third variable capped at 20 takes its cap, the rest is split evenly
    let rho3 = sys.variable_new(1., 20., 1);
    sys.expand(cnst, rho3, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho3), 20., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho1), 40., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 40., epsilon = EPS);
}

#[test]
fn zero_bound_blocks_variables() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(0.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 0., epsilon = EPS);
}

#[test]
fn constraint_bound_update() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 5., epsilon = EPS);

    sys.update_constraint_bound(cnst, 30.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 15., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 15., epsilon = EPS);
}

#[test]
fn variable_removal_redistributes_capacity() {
    let mut sys = System::new(true);
    let cnst = sys.constraint_new(12.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    let rho3 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.expand(cnst, rho3, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 4., epsilon = EPS);

    sys.remove_variable(rho3);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 6., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 6., epsilon = EPS);
}

#[test]
fn suspended_variable_frees_capacity() {
    let mut sys = System::new(true);
    let cnst = sys.constraint_new(10.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.expand(cnst, rho2, 1.);
    sys.solve();

    sys.update_variable_penalty(rho2, 0.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 0., epsilon = EPS);

    sys.update_variable_penalty(rho2, 1.);
    sys.solve();
    assert_abs_diff_eq!(sys.variable_value(rho1), 5., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 5., epsilon = EPS);
}

#[test]
fn selective_update_skips_untouched_components() {
    let mut sys = System::new(true);
    let cnst1 = sys.constraint_new(10.);
    let cnst2 = sys.constraint_new(20.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    let rho2 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst1, rho1, 1.);
    sys.expand(cnst2, rho2, 1.);
    sys.solve();
    sys.take_modified_variables();

    // touching only the second component must not report the first one as modified
    sys.update_constraint_bound(cnst2, 40.);
    sys.solve();
    let modified = sys.take_modified_variables();
    assert_eq!(modified, vec![rho2]);
    assert_abs_diff_eq!(sys.variable_value(rho1), 10., epsilon = EPS);
    assert_abs_diff_eq!(sys.variable_value(rho2), 40., epsilon = EPS);
}

#[test]
fn modified_variables_are_reported_once() {
    let mut sys = System::new(true);
    let cnst = sys.constraint_new(10.);
    let rho1 = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho1, 1.);
    sys.solve();
    assert_eq!(sys.take_modified_variables(), vec![rho1]);
    // no mutations in between, nothing to report
    sys.solve();
    assert!(sys.take_modified_variables().is_empty());
}

/// Applies the same random mutation sequence to a selectively updated system and
/// a full-resolve one, checking that both agree and respect all bounds after each step.
#[test]
fn selective_update_matches_full_resolve() {
    let mut rand = Pcg64::seed_from_u64(42);
    for _ in 0..20 {
        let mut selective = System::new(true);
        let mut full = System::new(false);

        let n_cnst = rand.gen_range(2..6);
        let n_vars = rand.gen_range(2..10);
        let bounds: Vec<f64> = (0..n_cnst).map(|_| rand.gen_range(1.0..100.0)).collect();
        let cnst_s: Vec<_> = bounds.iter().map(|&b| selective.constraint_new(b)).collect();
        let cnst_f: Vec<_> = bounds.iter().map(|&b| full.constraint_new(b)).collect();

        let mut vars = Vec::new();
        for _ in 0..n_vars {
            let penalty = rand.gen_range(0.5..4.0);
            let bound = if rand.gen_bool(0.3) {
                rand.gen_range(1.0..50.0)
            } else {
                UNBOUNDED
            };
            let vs = selective.variable_new(penalty, bound, 2);
            let vf = full.variable_new(penalty, bound, 2);
            let attach = rand.gen_range(1..=n_cnst.min(3));
            for _ in 0..attach {
                let c = rand.gen_range(0..n_cnst);
                let weight = rand.gen_range(0.5..2.0);
                selective.expand(cnst_s[c], vs, weight);
                full.expand(cnst_f[c], vf, weight);
            }
            vars.push((vs, vf));
        }

        for _ in 0..30 {
            match rand.gen_range(0..3) {
                0 => {
                    let c = rand.gen_range(0..n_cnst);
                    let bound = rand.gen_range(1.0..100.0);
                    selective.update_constraint_bound(cnst_s[c], bound);
                    full.update_constraint_bound(cnst_f[c], bound);
                }
                1 => {
                    let (vs, vf) = vars[rand.gen_range(0..vars.len())];
                    let penalty = rand.gen_range(0.5..4.0);
                    selective.update_variable_penalty(vs, penalty);
                    full.update_variable_penalty(vf, penalty);
                }
                _ => {
                    let (vs, vf) = vars[rand.gen_range(0..vars.len())];
                    let bound = rand.gen_range(1.0..50.0);
                    selective.update_variable_bound(vs, bound);
                    full.update_variable_bound(vf, bound);
                }
            }
            selective.solve();
            full.solve();
            for &(vs, vf) in &vars {
                assert_abs_diff_eq!(
                    selective.variable_value(vs),
                    full.variable_value(vf),
                    epsilon = 1e-6
                );
            }
            for c in 0..n_cnst {
                assert!(selective.constraint_usage(cnst_s[c]) <= selective.constraint_bound(cnst_s[c]) + 1e-6);
                assert!(full.constraint_usage(cnst_f[c]) <= full.constraint_bound(cnst_f[c]) + 1e-6);
            }
        }
    }
}

#[test]
fn sharing_policy_is_reported() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(1.);
    assert_eq!(sys.sharing_policy(cnst), SharingPolicy::Shared);
    sys.unshare(cnst);
    assert_eq!(sys.sharing_policy(cnst), SharingPolicy::FatPipe);
}

#[test]
fn constraint_used_tracks_active_variables() {
    let mut sys = System::new(false);
    let cnst = sys.constraint_new(10.);
    assert!(!sys.constraint_used(cnst));
    let rho = sys.variable_new(1., UNBOUNDED, 1);
    sys.expand(cnst, rho, 1.);
    assert!(sys.constraint_used(cnst));
    sys.update_variable_penalty(rho, 0.);
    assert!(!sys.constraint_used(cnst));
    sys.remove_variable(rho);
    assert!(!sys.constraint_used(cnst));
}
