use smc::{Catalog, Graph, Model, NodeId};

pub const Y: [f64; 2] = [0.4, 1.1];
pub const OBS_VAR: f64 = 0.5;

/// x[0] ~ N(0, 1); x[t] ~ N(x[t-1], 1); y[t] ~ N(x[t], 0.5) for t = 1, 2, all variances.
pub fn hmm_graph() -> (Graph, Vec<NodeId>, Vec<NodeId>) {
    let cat = Catalog::builtin();
    let dnormvar = cat.distribution("dnormvar").unwrap();
    let mut g = Graph::new();
    let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
    let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
    let noise = g.add_constant_node("noise", vec![1], vec![OBS_VAR]).unwrap();

    let mut x = vec![g
        .add_stochastic_node("x[0]", dnormvar.clone(), vec![zero, one], None, None, None)
        .unwrap()];
    let mut y = Vec::new();
    for (t, &obs) in Y.iter().enumerate() {
        let prev = x[t];
        let xt = g
            .add_stochastic_node(&format!("x[{}]", t + 1), dnormvar.clone(), vec![prev, one], None, None, None)
            .unwrap();
        let yt = g
            .add_stochastic_node(&format!("y[{}]", t + 1), dnormvar.clone(), vec![xt, noise], Some(vec![obs]), None, None)
            .unwrap();
        x.push(xt);
        y.push(yt);
    }
    g.build().unwrap();
    g.bind_array("x", x.clone()).unwrap();
    g.bind_array("y", y.clone()).unwrap();
    (g, x, y)
}

pub fn hmm_model() -> Model {
    let (g, _, _) = hmm_graph();
    Model::new(g).unwrap()
}

/// Scalar Kalman filter of the same model: filtered (mean, variance) of x[1] and x[2].
pub fn kalman_filter() -> Vec<(f64, f64)> {
    let (mut m, mut p) = (0.0, 1.0);
    let mut out = Vec::new();
    for &obs in &Y {
        let pred = p + 1.0;
        let gain = pred / (pred + OBS_VAR);
        m += gain * (obs - m);
        p = (1.0 - gain) * pred;
        out.push((m, p));
    }
    out
}

/// Rauch-Tung-Striebel smoothed (mean, variance) of x[0], x[1], x[2].
pub fn rts_smoother() -> Vec<(f64, f64)> {
    let mut filtered = vec![(0.0, 1.0)];
    filtered.extend(kalman_filter());
    let mut smoothed = vec![filtered[2]];
    for t in (0..2).rev() {
        let (mf, pf) = filtered[t];
        let (ms, ps) = smoothed[0];
        let pred = pf + 1.0;
        let j = pf / pred;
        smoothed.insert(0, (mf + j * (ms - mf), pf + j * j * (ps - pred)));
    }
    smoothed
}

/// Exact log marginal likelihood of y[1], y[2].
pub fn exact_log_evidence() -> f64 {
    // cov(y) = [[2.5, 2], [2, 3.5]]
    let (a, b, d) = (2.5, 2.0, 3.5);
    let det: f64 = a * d - b * b;
    let quad = (d * Y[0] * Y[0] - 2.0 * b * Y[0] * Y[1] + a * Y[1] * Y[1]) / det;
    -(2.0 * std::f64::consts::PI).ln() - 0.5 * det.ln() - 0.5 * quad
}
