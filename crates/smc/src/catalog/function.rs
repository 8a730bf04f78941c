use std::fmt::Debug;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use super::ParamRef;
use crate::matrix;
use crate::utils::dim_len;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Fixed(k) => *k == n,
            Arity::Variadic => n > 0,
        }
    }
}

/// Affine map `x ↦ coef · x + offset` from the flat value of a stochastic node.
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    pub coef: DMatrix<f64>,
    pub offset: DVector<f64>,
}

impl Affine {
    pub fn identity(d: usize) -> Self {
        Self {
            coef: DMatrix::identity(d, d),
            offset: DVector::zeros(d),
        }
    }

    /// A map that ignores its input and returns `values`.
    pub fn constant(values: &[f64], d: usize) -> Self {
        Self {
            coef: DMatrix::zeros(values.len(), d),
            offset: DVector::from_column_slice(values),
        }
    }

    /// Output length.
    pub fn len(&self) -> usize {
        self.offset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offset.is_empty()
    }

    pub fn input_len(&self) -> usize {
        self.coef.ncols()
    }

    pub fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
        &self.coef * x + &self.offset
    }

    /// Repeat a scalar output `m` times.
    pub fn broadcast(self, m: usize) -> Result<Self, String> {
        if self.len() == m {
            return Ok(self);
        }
        if self.len() != 1 {
            return Err(format!("cannot broadcast length {} to {}", self.len(), m));
        }
        let d = self.input_len();
        let row = self.coef.row(0).into_owned();
        Ok(Self {
            coef: DMatrix::from_fn(m, d, |_, j| row[j]),
            offset: DVector::from_element(m, self.offset[0]),
        })
    }

    /// Multiply each output by the matching entry of `k` (or by a scalar `k`).
    pub fn scale(mut self, k: &[f64]) -> Result<Self, String> {
        let m = if k.len() == 1 { self.len() } else { k.len() };
        self = self.broadcast(m)?;
        for i in 0..m {
            let factor = if k.len() == 1 { k[0] } else { k[i] };
            self.coef.row_mut(i).scale_mut(factor);
            self.offset[i] *= factor;
        }
        Ok(self)
    }

    pub fn add(self, other: Affine) -> Result<Self, String> {
        let m = self.len().max(other.len());
        let a = self.broadcast(m)?;
        let b = other.broadcast(m)?;
        if a.input_len() != b.input_len() {
            return Err("affine maps have different input lengths".to_string());
        }
        Ok(Self {
            coef: a.coef + b.coef,
            offset: a.offset + b.offset,
        })
    }

    pub fn neg(self) -> Self {
        Self {
            coef: -self.coef,
            offset: -self.offset,
        }
    }

    /// `m · (coef · x + offset)`.
    pub fn premultiply(self, m: &DMatrix<f64>) -> Result<Self, String> {
        if m.ncols() != self.len() {
            return Err(format!(
                "cannot apply a {}x{} matrix to {} outputs",
                m.nrows(),
                m.ncols(),
                self.len()
            ));
        }
        Ok(Self {
            coef: m * self.coef,
            offset: m * self.offset,
        })
    }
}

/// An argument of a linear function: either a known value or an affine map of the target.
#[derive(Debug, Clone)]
pub enum LinearTerm<'a> {
    Known(ParamRef<'a>),
    Affine(Affine),
}

impl LinearTerm<'_> {
    fn to_affine(&self, d: usize) -> Affine {
        match self {
            LinearTerm::Known(p) => Affine::constant(p.value, d),
            LinearTerm::Affine(a) => a.clone(),
        }
    }

    fn known(&self) -> Option<&[f64]> {
        match self {
            LinearTerm::Known(p) => Some(p.value),
            LinearTerm::Affine(_) => None,
        }
    }
}

fn target_len(terms: &[LinearTerm]) -> Result<usize, String> {
    terms
        .iter()
        .find_map(|t| match t {
            LinearTerm::Affine(a) => Some(a.input_len()),
            LinearTerm::Known(_) => None,
        })
        .ok_or_else(|| "no argument depends on the target".to_string())
}

/// Contract every function of the catalog implements.
pub trait Function: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn arity(&self) -> Arity;

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool;

    /// Output dimension given argument dimensions.
    fn dim(&self, dims: &[&[usize]]) -> Vec<usize>;

    fn check_param_values(&self, _params: &[ParamRef]) -> bool {
        true
    }

    fn eval(&self, params: &[ParamRef]) -> Result<Vec<f64>, String>;

    fn is_discrete_valued(&self, _discrete_params: &[bool]) -> bool {
        false
    }

    /// Whether the output is affine in the arguments flagged in `linear_params` when all
    /// other arguments are known.
    fn is_linear(&self, _linear_params: &[bool]) -> bool {
        false
    }

    /// Compose the affine arguments into the affine map of the output.
    fn linear_transform(&self, _terms: &[LinearTerm], _dims: &[&[usize]]) -> Result<Affine, String> {
        Err(format!("{} is not linear", self.name()))
    }

    fn is_infix(&self) -> bool {
        false
    }

    fn is_prefix(&self) -> bool {
        false
    }
}

/// All built-in functions.
pub fn builtin_functions() -> Vec<Arc<dyn Function>> {
    vec![
        Arc::new(Elementwise(BinaryOp::Add)),
        Arc::new(Elementwise(BinaryOp::Sub)),
        Arc::new(Elementwise(BinaryOp::Mul)),
        Arc::new(Elementwise(BinaryOp::Div)),
        Arc::new(Elementwise(BinaryOp::Pow)),
        Arc::new(Unary(UnaryOp::Neg)),
        Arc::new(Unary(UnaryOp::Exp)),
        Arc::new(Unary(UnaryOp::Log)),
        Arc::new(Unary(UnaryOp::Sqrt)),
        Arc::new(MatMul),
        Arc::new(Sum),
    ]
}

/// Output dimension of an elementwise operation with scalar broadcasting.
fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    if a == b {
        Some(a.to_vec())
    } else if dim_len(a) == 1 {
        Some(b.to_vec())
    } else if dim_len(b) == 1 {
        Some(a.to_vec())
    } else {
        None
    }
}

fn zip_broadcast(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Result<Vec<f64>, String> {
    match (a.len(), b.len()) {
        (n, m) if n == m => Ok(a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect()),
        (1, _) => Ok(b.iter().map(|y| f(a[0], *y)).collect()),
        (_, 1) => Ok(a.iter().map(|x| f(*x, b[0])).collect()),
        (n, m) => Err(format!("cannot combine lengths {} and {}", n, m)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Binary elementwise arithmetic with scalar broadcasting.
#[derive(Debug, Clone)]
struct Elementwise(BinaryOp);

impl Function for Elementwise {
    fn name(&self) -> &str {
        match self.0 {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "pow",
        }
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && broadcast_dims(dims[0], dims[1]).is_some()
    }

    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        broadcast_dims(dims[0], dims[1]).unwrap_or_else(|| dims[0].to_vec())
    }

    fn check_param_values(&self, params: &[ParamRef]) -> bool {
        match self.0 {
            BinaryOp::Div => params[1].value.iter().all(|&v| v != 0.0),
            _ => true,
        }
    }

    fn eval(&self, params: &[ParamRef]) -> Result<Vec<f64>, String> {
        let (a, b) = (params[0].value, params[1].value);
        match self.0 {
            BinaryOp::Add => zip_broadcast(a, b, |x, y| x + y),
            BinaryOp::Sub => zip_broadcast(a, b, |x, y| x - y),
            BinaryOp::Mul => zip_broadcast(a, b, |x, y| x * y),
            BinaryOp::Div => {
                if b.iter().any(|&v| v == 0.0) {
                    return Err("division by zero".to_string());
                }
                zip_broadcast(a, b, |x, y| x / y)
            }
            BinaryOp::Pow => zip_broadcast(a, b, f64::powf),
        }
    }

    fn is_discrete_valued(&self, discrete_params: &[bool]) -> bool {
        match self.0 {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => discrete_params.iter().all(|&d| d),
            BinaryOp::Div | BinaryOp::Pow => false,
        }
    }

    fn is_linear(&self, linear_params: &[bool]) -> bool {
        match self.0 {
            BinaryOp::Add | BinaryOp::Sub => true,
            BinaryOp::Mul => linear_params.iter().filter(|&&l| l).count() <= 1,
            BinaryOp::Div => !linear_params.get(1).copied().unwrap_or(true),
            BinaryOp::Pow => !linear_params.iter().any(|&l| l),
        }
    }

    fn linear_transform(&self, terms: &[LinearTerm], _dims: &[&[usize]]) -> Result<Affine, String> {
        let d = target_len(terms)?;
        match (self.0, terms) {
            (BinaryOp::Add, [a, b]) => a.to_affine(d).add(b.to_affine(d)),
            (BinaryOp::Sub, [a, b]) => a.to_affine(d).add(b.to_affine(d).neg()),
            (BinaryOp::Mul, [a, b]) => match (a.known(), b.known()) {
                (Some(k), _) => b.to_affine(d).scale(k),
                (_, Some(k)) => a.to_affine(d).scale(k),
                (None, None) => Err("product of two affine terms".to_string()),
            },
            (BinaryOp::Div, [a, b]) => {
                let k = b.known().ok_or("affine denominator")?;
                if k.iter().any(|&v| v == 0.0) {
                    return Err("division by zero".to_string());
                }
                let inv: Vec<f64> = k.iter().map(|v| 1.0 / v).collect();
                a.to_affine(d).scale(&inv)
            }
            _ => Err(format!("{} is not linear", self.name())),
        }
    }

    fn is_infix(&self) -> bool {
        self.0 != BinaryOp::Pow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
}

#[derive(Debug, Clone)]
struct Unary(UnaryOp);

impl Function for Unary {
    fn name(&self) -> &str {
        match self.0 {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
        }
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 1
    }

    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        dims[0].to_vec()
    }

    fn check_param_values(&self, params: &[ParamRef]) -> bool {
        let x = params[0].value;
        match self.0 {
            UnaryOp::Log => x.iter().all(|&v| v > 0.0),
            UnaryOp::Sqrt => x.iter().all(|&v| v >= 0.0),
            _ => true,
        }
    }

    fn eval(&self, params: &[ParamRef]) -> Result<Vec<f64>, String> {
        if !self.check_param_values(params) {
            return Err(format!("argument out of the domain of {}", self.name()));
        }
        let f: fn(f64) -> f64 = match self.0 {
            UnaryOp::Neg => |x| -x,
            UnaryOp::Exp => f64::exp,
            UnaryOp::Log => f64::ln,
            UnaryOp::Sqrt => f64::sqrt,
        };
        Ok(params[0].value.iter().map(|&x| f(x)).collect())
    }

    fn is_discrete_valued(&self, discrete_params: &[bool]) -> bool {
        self.0 == UnaryOp::Neg && discrete_params.first().copied().unwrap_or(false)
    }

    fn is_linear(&self, linear_params: &[bool]) -> bool {
        self.0 == UnaryOp::Neg || !linear_params.iter().any(|&l| l)
    }

    fn linear_transform(&self, terms: &[LinearTerm], _dims: &[&[usize]]) -> Result<Affine, String> {
        match (self.0, terms) {
            (UnaryOp::Neg, [a]) => Ok(a.to_affine(target_len(terms)?).neg()),
            _ => Err(format!("{} is not linear", self.name())),
        }
    }

    fn is_prefix(&self) -> bool {
        self.0 == UnaryOp::Neg
    }
}

/// Matrix shape of a row-major argument; vectors are rows on the left and columns on the right.
fn matmul_shapes(a: &[usize], b: &[usize]) -> Option<((usize, usize), (usize, usize))> {
    let left = match a {
        [k] => (1, *k),
        [n, k] => (*n, *k),
        _ => return None,
    };
    let right = match b {
        [k] => (*k, 1),
        [k, m] => (*k, *m),
        _ => return None,
    };
    (left.1 == right.0).then_some((left, right))
}

/// Matrix product `%*%` over row-major values.
#[derive(Debug, Clone)]
struct MatMul;

impl Function for MatMul {
    fn name(&self) -> &str {
        "%*%"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(2)
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 2 && matmul_shapes(dims[0], dims[1]).is_some()
    }

    fn dim(&self, dims: &[&[usize]]) -> Vec<usize> {
        match (dims[0].len(), dims[1].len(), matmul_shapes(dims[0], dims[1])) {
            (1, 1, _) => vec![1],
            (1, _, Some((_, (_, m)))) => vec![m],
            (_, 1, Some(((n, _), _))) => vec![n],
            (_, _, Some(((n, _), (_, m)))) => vec![n, m],
            _ => vec![1],
        }
    }

    fn eval(&self, params: &[ParamRef]) -> Result<Vec<f64>, String> {
        let ((n, k), (_, m)) = matmul_shapes(params[0].dim, params[1].dim)
            .ok_or("non-conforming matrix product")?;
        let a = DMatrix::from_row_slice(n, k, params[0].value);
        let b = DMatrix::from_row_slice(k, m, params[1].value);
        Ok(matrix::to_row_major(&(a * b)))
    }

    fn is_discrete_valued(&self, discrete_params: &[bool]) -> bool {
        discrete_params.iter().all(|&d| d)
    }

    fn is_linear(&self, linear_params: &[bool]) -> bool {
        linear_params.iter().filter(|&&l| l).count() <= 1
    }

    fn linear_transform(&self, terms: &[LinearTerm], dims: &[&[usize]]) -> Result<Affine, String> {
        let d = target_len(terms)?;
        let ((n, k), (_, m)) =
            matmul_shapes(dims[0], dims[1]).ok_or("non-conforming matrix product")?;
        match (terms[0].known(), terms[1].known()) {
            // vec(A B) = (A ⊗ I_m) vec(B) in row-major order
            (Some(a), _) => {
                let a = DMatrix::from_row_slice(n, k, a);
                let map = a.kronecker(&DMatrix::<f64>::identity(m, m));
                terms[1].to_affine(d).premultiply(&map)
            }
            // vec(A B) = (I_n ⊗ Bᵀ) vec(A) in row-major order
            (_, Some(b)) => {
                let b = DMatrix::from_row_slice(k, m, b);
                let map = DMatrix::<f64>::identity(n, n).kronecker(&b.transpose());
                terms[0].to_affine(d).premultiply(&map)
            }
            (None, None) => Err("product of two affine terms".to_string()),
        }
    }

    fn is_infix(&self) -> bool {
        true
    }
}

/// Sum of all elements.
#[derive(Debug, Clone)]
struct Sum;

impl Function for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn arity(&self) -> Arity {
        Arity::Fixed(1)
    }

    fn check_param_dims(&self, dims: &[&[usize]]) -> bool {
        dims.len() == 1
    }

    fn dim(&self, _dims: &[&[usize]]) -> Vec<usize> {
        vec![1]
    }

    fn eval(&self, params: &[ParamRef]) -> Result<Vec<f64>, String> {
        Ok(vec![params[0].value.iter().sum()])
    }

    fn is_discrete_valued(&self, discrete_params: &[bool]) -> bool {
        discrete_params.first().copied().unwrap_or(false)
    }

    fn is_linear(&self, _linear_params: &[bool]) -> bool {
        true
    }

    fn linear_transform(&self, terms: &[LinearTerm], _dims: &[&[usize]]) -> Result<Affine, String> {
        let arg = terms[0].to_affine(target_len(terms)?);
        let ones = DMatrix::from_element(1, arg.len(), 1.0);
        arg.premultiply(&ones)
    }
}
