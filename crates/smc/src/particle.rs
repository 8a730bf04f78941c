use ndarray::{Array2, ArrayView1};

use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::utils::dim_len;

/// Values of the unobserved nodes sampled so far for one particle, indexed by [`NodeId`].
///
/// Fixed values (constants, observations, logical nodes of fixed parents) live in the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Particle {
    values: Vec<Option<Vec<f64>>>,
}

impl Particle {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            values: vec![None; n_nodes],
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&[f64]> {
        self.values.get(id).and_then(|v| v.as_deref())
    }

    pub fn is_set(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn set(&mut self, id: NodeId, value: Vec<f64>) {
        if id >= self.values.len() {
            self.values.resize(id + 1, None);
        }
        self.values[id] = Some(value);
    }

    pub fn clear(&mut self, id: NodeId) {
        if let Some(v) = self.values.get_mut(id) {
            *v = None;
        }
    }

    /// Ids with a value, in increasing order.
    pub fn sampled_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(id, v)| v.as_ref().map(|_| id))
    }
}

/// Values of `id` across `particles`, one row per particle.
pub fn stack_values(graph: &Graph, id: NodeId, particles: &[Particle]) -> Result<Array2<f64>> {
    let len = dim_len(graph.dim(id));
    let mut values = Array2::zeros((particles.len(), len));
    for (mut row, particle) in values.rows_mut().into_iter().zip(particles) {
        let value = graph.require_value(id, particle)?;
        if value.len() != len {
            return Err(Error::DimensionMismatch {
                node: graph.name(id).to_string(),
                message: format!("expected {} values, got {}", len, value.len()),
            });
        }
        row.assign(&ArrayView1::from(value));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn test_particle_values() {
        let mut p = Particle::new(3);
        assert!(!p.is_set(1));
        p.set(1, vec![0.5]);
        p.set(4, vec![1.0, 2.0]);
        assert_eq!(p.get(1), Some(&[0.5][..]));
        assert_eq!(p.sampled_ids().collect::<Vec<_>>(), vec![1, 4]);
        p.clear(1);
        assert!(p.get(1).is_none());
        assert!(p.get(10).is_none());
    }

    #[test]
    fn test_stack_values() {
        let cat = Catalog::builtin();
        let mut g = Graph::new();
        let zero = g.add_constant_node("zero", vec![1], vec![0.0]).unwrap();
        let one = g.add_constant_node("one", vec![1], vec![1.0]).unwrap();
        let x = g
            .add_stochastic_node("x", cat.distribution("dnorm").unwrap(), vec![zero, one], None, None, None)
            .unwrap();
        g.build().unwrap();

        let particles: Vec<Particle> = [0.5, -1.0]
            .iter()
            .map(|&v| {
                let mut p = Particle::new(g.len());
                p.set(x, vec![v]);
                p
            })
            .collect();
        let values = stack_values(&g, x, &particles).unwrap();
        assert_eq!(values.shape(), &[2, 1]);
        assert_eq!(values[[1, 0]], -1.0);
        // fixed nodes are read from the graph
        assert_eq!(stack_values(&g, one, &particles).unwrap()[[0, 0]], 1.0);
        assert!(matches!(
            stack_values(&g, x, &[Particle::new(g.len())]),
            Err(Error::MissingValue { .. })
        ));
    }
}
