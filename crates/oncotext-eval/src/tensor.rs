use crate::error::{EvalError, EvalResult};
use std::collections::BTreeMap;

/// Dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> EvalResult<Self> {
        let expected = element_count(&shape)
            .ok_or_else(|| EvalError::Graph(format!("tensor shape {shape:?} is too large")))?;
        if data.len() != expected {
            return Err(EvalError::Graph(format!(
                "tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { shape, data: vec![0.0; len] }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `i` of a tensor with at least two dimensions.
    #[must_use]
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let width: usize = self.shape.iter().skip(1).product();
        if self.shape.len() < 2 || width == 0 {
            return None;
        }
        self.data.get(i * width..(i + 1) * width)
    }
}

/// Number of elements in `shape`, or `None` if it does not fit a `usize`.
#[must_use]
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// The named variables of one evaluation graph.
///
/// A graph declares its variables at construction time; restore swaps in new
/// values only after every declared variable has been validated, so a failed
/// restore never leaves a mix of old and new weights behind.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    vars: BTreeMap<String, Tensor>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a zero-initialised variable.
    pub fn declare(&mut self, name: impl Into<String>, shape: Vec<usize>) {
        self.vars.insert(name.into(), Tensor::zeros(shape));
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.vars.insert(name.into(), tensor);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.vars.get(name)
    }

    pub fn require(&self, name: &str) -> EvalResult<&Tensor> {
        self.get(name).ok_or_else(|| EvalError::Graph(format!("missing variable '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace every declared variable at once.
    ///
    /// `values` must cover all declared names with identical shapes; extra
    /// entries are ignored. On error nothing is modified.
    pub fn assign_all(&mut self, mut values: BTreeMap<String, Tensor>) -> Result<(), String> {
        for (name, current) in &self.vars {
            match values.get(name) {
                None => return Err(format!("variable '{name}' not found in checkpoint")),
                Some(v) if v.shape() != current.shape() => {
                    return Err(format!(
                        "shape mismatch for '{name}': graph expects {:?}, checkpoint has {:?}",
                        current.shape(),
                        v.shape()
                    ));
                }
                Some(_) => {}
            }
        }

        for (name, slot) in &mut self.vars {
            if let Some(v) = values.remove(name) {
                *slot = v;
            }
        }
        Ok(())
    }
}
