mod common;

use smc::{Error, ErrorKind, SmcConfig, StatTag};

use common::{hmm_model, rts_smoother};

fn config() -> SmcConfig {
    SmcConfig {
        n_particles: 300,
        seed: 7,
        ..SmcConfig::default()
    }
}

#[test]
fn test_backward_smoother_matches_rts() {
    let smoothed = rts_smoother();
    let mut model = hmm_model();
    model.set_backward_smooth_monitor("x").unwrap();
    assert!(model.run_backward_smoother().is_err());

    model.run_forward_sampler(&config()).unwrap();
    assert!(model.extract_smooth_stat("x", &StatTag::Mean).is_err());
    model.run_backward_smoother().unwrap();

    let means = model.extract_smooth_stat("x", &StatTag::Mean).unwrap();
    assert_eq!(means.len(), 3);
    for (t, &(m, _)) in smoothed.iter().enumerate() {
        assert!((means[&t][[0]] - m).abs() < 0.12, "x[{}] smoothed mean {} vs {}", t, means[&t][[0]], m);
    }
    let vars = model.extract_smooth_stat("x[0]", &StatTag::Variance).unwrap();
    assert!((vars[&0][[0]] - smoothed[0].1).abs() < 0.15);
}

#[test]
fn test_gen_tree_smoothing() {
    let smoothed = rts_smoother();
    let mut model = hmm_model();
    model.set_gen_tree_smooth_monitor("x[2]").unwrap();
    model.run_forward_sampler(&config()).unwrap();
    let mean = model.extract_gen_tree_smooth_stat("x[2]", &StatTag::Mean).unwrap();
    assert!((mean[&2][[0]] - smoothed[2].0).abs() < 0.12);

    // monitors set after the run are filled from the final population
    model.set_gen_tree_smooth_monitor("x[0]").unwrap();
    let mean = model.extract_gen_tree_smooth_stat("x[0]", &StatTag::Mean).unwrap();
    assert!((mean[&0][[0]] - smoothed[0].0).abs() < 0.25);

    let particle = model.sample_gen_tree_smooth_particle().unwrap();
    assert_eq!(particle.len(), 3);
    assert!(particle.contains_key("x[1]"));
}

#[test]
fn test_backward_locked_after_change_data() {
    let mut model = hmm_model();
    model.run_forward_sampler(&config()).unwrap();
    model.change_data("y[2]", &[0.2]).unwrap();

    let err = model.run_backward_smoother().unwrap_err();
    assert!(matches!(err, Error::BackwardLocked));
    assert_eq!(err.kind(), ErrorKind::Logic);
    assert!(model.iterate_forward().is_err());

    model.run_forward_sampler(&config()).unwrap();
    model.run_backward_smoother().unwrap();
    assert!(model.smoother().at_end());
}

#[test]
fn test_smoother_without_history() {
    let mut model = hmm_model();
    let config = SmcConfig {
        keep_history: false,
        ..config()
    };
    model.run_forward_sampler(&config).unwrap();
    assert_eq!(model.run_backward_smoother().unwrap_err().kind(), ErrorKind::Logic);
}
