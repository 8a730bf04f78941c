use smc::{Catalog, Error, ErrorKind, Graph, Model, SamplerState, SmcConfig};

fn config() -> SmcConfig {
    SmcConfig::new(200, 3)
}

/// x ~ dunif(0, 1); y ~ dunif(x, 1) observed at `y`
fn uniform_model(y: f64) -> Model {
    let cat = Catalog::builtin();
    let dunif = cat.distribution("dunif").unwrap();
    let mut g = Graph::new();
    let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
    let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
    let x = g.add_stochastic_node("x", dunif.clone(), vec![zero, one], None, None, None).unwrap();
    let obs = g
        .add_stochastic_node("y", dunif, vec![x, one], Some(vec![y]), None, None)
        .unwrap();
    g.build().unwrap();
    g.bind_array("y", vec![obs]).unwrap();
    Model::new(g).unwrap()
}

#[test]
fn test_impossible_observation_gives_degenerate_weights() {
    let mut model = uniform_model(5.0);
    let err = model.run_forward_sampler(&config()).unwrap_err();
    match &err {
        Error::DegenerateWeights { node } => assert_eq!(node, "x"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::Numerical);
    assert_eq!(model.forward().state(), SamplerState::Built);
    assert!(!model.forward_at_end());
    assert!(model.log_norm_const().is_err());

    // the same data fails the same way on a new run
    assert!(matches!(
        model.run_forward_sampler(&config()),
        Err(Error::DegenerateWeights { .. })
    ));

    // with a reachable observation the next run succeeds
    model.change_data("y", &[0.9]).unwrap();
    let log_z = model.run_forward_sampler(&SmcConfig::new(2000, 3)).unwrap();
    assert!(model.forward_at_end());
    // p(y) = ∫ 1 / (1 - x) dx over [0, 0.9]
    let exact = (-(0.1f64).ln()).ln();
    assert!((log_z - exact).abs() < 0.1, "log Z {} vs {}", log_z, exact);
}

/// s ~ dunif(-3, 3); x ~ dmnorm(0, I); y ~ dmnormvar(x, s * I) observed
fn scaled_noise_model() -> Model {
    let cat = Catalog::builtin();
    let mut g = Graph::new();
    let lo = g.add_constant_node("lo", vec![1], vec![-3.0]).unwrap();
    let hi = g.add_constant_node("hi", vec![1], vec![3.0]).unwrap();
    let s = g
        .add_stochastic_node("s", cat.distribution("dunif").unwrap(), vec![lo, hi], None, None, None)
        .unwrap();
    let mu = g.add_constant_node("mu", vec![2], vec![0.0, 0.0]).unwrap();
    let eye = g.add_constant_node("eye", vec![2, 2], vec![1.0, 0.0, 0.0, 1.0]).unwrap();
    let x = g
        .add_stochastic_node("x", cat.distribution("dmnorm").unwrap(), vec![mu, eye], None, None, None)
        .unwrap();
    let noise = g.add_logical_node("noise", cat.function("*").unwrap(), vec![s, eye]).unwrap();
    g.add_stochastic_node(
        "y",
        cat.distribution("dmnormvar").unwrap(),
        vec![x, noise],
        Some(vec![0.3, -0.2]),
        None,
        None,
    )
    .unwrap();
    g.build().unwrap();
    g.bind_array("s", vec![s]).unwrap();
    Model::new(g).unwrap()
}

#[test]
fn test_indefinite_noise_fails_the_kalman_update() {
    let mut model = scaled_noise_model();
    model.build_sampler(false).unwrap();
    assert_eq!(
        model.sampler_names(),
        vec![
            ("s".to_string(), "prior".to_string()),
            ("x".to_string(), "conjugate_mnormal".to_string())
        ]
    );

    // particles with s < -1 make the innovation covariance (1 + s) I indefinite
    let err = model.run_forward_sampler(&config()).unwrap_err();
    match &err {
        Error::Numerical { node, message } => {
            assert_eq!(node, "x");
            assert!(message.contains("innovation covariance"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.kind(), ErrorKind::Numerical);
    assert_eq!(model.forward().state(), SamplerState::Built);

    // observing a positive scale makes the noise known and the run goes through
    model.change_data("s", &[0.5]).unwrap();
    let log_z = model.run_forward_sampler(&config()).unwrap();
    assert!(log_z.is_finite());
    assert_eq!(model.sampler_names(), vec![("x".to_string(), "conjugate_mnormal".to_string())]);

    // y ~ N(0, 1.5 I)
    let var: f64 = 1.5;
    let exact = -(2.0 * std::f64::consts::PI * var).ln() - (0.09 + 0.04) / (2.0 * var);
    assert!((log_z - exact).abs() < 1e-9);
}
