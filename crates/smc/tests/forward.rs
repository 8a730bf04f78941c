mod common;

use smc::{ResampleType, SmcConfig, StatTag};

use common::{exact_log_evidence, hmm_model, kalman_filter};

fn scenario(n_particles: usize) -> SmcConfig {
    SmcConfig {
        n_particles,
        seed: 42,
        resample_type: ResampleType::Stratified,
        ess_threshold: 0.5,
        ..SmcConfig::default()
    }
}

#[test]
fn test_hmm_filter_matches_kalman() {
    let kalman = kalman_filter();
    assert!((kalman[0].0 - 0.32).abs() < 1e-12);
    assert!((kalman[1].0 - 0.8947).abs() < 1e-4);

    for (n, tol) in [(1000, 0.1), (5000, 0.05)] {
        let mut model = hmm_model();
        model.set_filter_monitor("x[1:3]").unwrap();
        let log_z = model.run_forward_sampler(&scenario(n)).unwrap();

        let names = model.sampler_names();
        assert_eq!(names[0], ("x[0]".to_string(), "prior".to_string()));
        assert_eq!(names[1].1, "conjugate_normal");
        assert_eq!(names[2].1, "conjugate_normal");

        let means = model.extract_filter_stat("x[1:3]", &StatTag::Mean).unwrap();
        let vars = model.extract_filter_stat("x[1:3]", &StatTag::Variance).unwrap();
        for (k, &(m, p)) in kalman.iter().enumerate() {
            let index = k + 1;
            assert!((means[&index][[0]] - m).abs() < 0.05, "x[{}] mean {} vs {}", index, means[&index][[0]], m);
            assert!((vars[&index][[0]] - p).abs() < tol, "x[{}] var {} vs {}", index, vars[&index][[0]], p);
        }
        assert!((log_z - exact_log_evidence()).abs() < tol);
    }
}

#[test]
fn test_prior_only_baseline_agrees() {
    let (m2, _) = kalman_filter()[1];
    let mut model = hmm_model();
    model.set_filter_monitor("x[2]").unwrap();
    let config = SmcConfig {
        prior_only: true,
        ..scenario(20_000)
    };
    let log_z = model.run_forward_sampler(&config).unwrap();
    assert!(model.sampler_names().iter().all(|(_, s)| s == "prior"));
    let mean = model.extract_filter_stat("x[2]", &StatTag::Mean).unwrap();
    assert!((mean[&2][[0]] - m2).abs() < 0.05);
    assert!((log_z - exact_log_evidence()).abs() < 0.05);
}

#[test]
fn test_every_resampling_scheme_runs() {
    for resample_type in [
        ResampleType::Multinomial,
        ResampleType::Residual,
        ResampleType::Stratified,
        ResampleType::Systematic,
    ] {
        let mut model = hmm_model();
        let config = SmcConfig {
            resample_type,
            ess_threshold: 1.0,
            ..scenario(500)
        };
        let log_z = model.run_forward_sampler(&config).unwrap();
        assert!(model.forward().n_resamplings() >= 1, "{}", resample_type);
        assert!((log_z - exact_log_evidence()).abs() < 0.15, "{}", resample_type);
        let total: f64 = model.forward().weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_step_api_and_report() {
    let mut model = hmm_model();
    let report = model.init_forward(&scenario(100)).unwrap();
    assert_eq!(report.iteration, 0);
    assert_eq!(report.n_iterations, 3);
    assert_eq!(report.node, "x[0]");
    assert!(!model.forward_at_end());
    assert!(model.log_norm_const().is_err());

    let report = model.iterate_forward().unwrap();
    assert_eq!(report.node, "x[1]");
    model.iterate_forward().unwrap();
    assert!(model.forward_at_end());
    assert!(model.iterate_forward().is_err());
    assert!(model.log_norm_const().unwrap().is_finite());
}
