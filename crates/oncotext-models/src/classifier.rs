use crate::config::{ClassifierVariant, HookConfig, ModelConfig};
use crate::factory::session_hooks;
use crate::math::{affine, argmax, log_softmax, StreamingMean};
use oncotext_eval::{
    BatchCursor, EvalError, EvalGraph, EvalResult, Example, GraphBuilder, ParameterSet, SessionHook, StepOutcome,
    Summary,
};

pub const EMBEDDINGS: &str = "embeddings";
pub const CONV_W: &str = "conv_w";
pub const CONV_B: &str = "conv_b";
pub const HIDDEN_W: &str = "hidden_w";
pub const HIDDEN_B: &str = "hidden_b";
pub const OUTPUT_W: &str = "output_w";
pub const OUTPUT_B: &str = "output_b";

#[derive(Debug, Clone)]
pub struct ClassifierGraphBuilder {
    variant: ClassifierVariant,
    vocabulary_size: usize,
    embedding_size: usize,
    max_sequence_length: usize,
    hidden_size: usize,
    num_classes: usize,
    kernel_width: usize,
    hooks: HookConfig,
}

impl ClassifierGraphBuilder {
    #[must_use]
    pub fn new(config: &ModelConfig, variant: ClassifierVariant) -> Self {
        let tc = &config.text_classification;
        Self {
            variant,
            vocabulary_size: config.shared.vocabulary_size,
            embedding_size: config.shared.embedding_size,
            max_sequence_length: config.shared.max_sequence_length,
            hidden_size: tc.hidden_size,
            num_classes: tc.num_classes,
            kernel_width: tc.cnn_kernel_width,
            hooks: config.hooks.clone(),
        }
    }
}

impl GraphBuilder for ClassifierGraphBuilder {
    fn name(&self) -> &str {
        match self.variant {
            ClassifierVariant::Simple => "text_classification",
            ClassifierVariant::Cnn => "text_classification_cnn",
        }
    }

    fn create_graph(&self, data: Option<BatchCursor>, _batch_size: usize) -> EvalResult<Box<dyn EvalGraph>> {
        let (v, d, h, c) = (self.vocabulary_size, self.embedding_size, self.hidden_size, self.num_classes);
        let mut params = ParameterSet::new();
        params.declare(EMBEDDINGS, vec![v, d]);
        if self.variant == ClassifierVariant::Cnn {
            params.declare(CONV_W, vec![self.kernel_width * d, d]);
            params.declare(CONV_B, vec![d]);
        }
        params.declare(HIDDEN_W, vec![d, h]);
        params.declare(HIDDEN_B, vec![h]);
        params.declare(OUTPUT_W, vec![h, c]);
        params.declare(OUTPUT_B, vec![c]);

        Ok(Box::new(ClassifierGraph {
            params,
            cursor: data,
            variant: self.variant,
            vocabulary_size: v,
            embedding_size: d,
            max_sequence_length: self.max_sequence_length,
            kernel_width: self.kernel_width,
            num_classes: c,
            loss: StreamingMean::default(),
            correct: StreamingMean::default(),
        }))
    }

    fn create_hooks(&self, _graph: &dyn EvalGraph) -> Vec<Box<dyn SessionHook>> {
        session_hooks(&self.hooks)
    }
}

/// Classifier forward pass with pass-wide cross-entropy and accuracy.
pub struct ClassifierGraph {
    params: ParameterSet,
    cursor: Option<BatchCursor>,
    variant: ClassifierVariant,
    vocabulary_size: usize,
    embedding_size: usize,
    max_sequence_length: usize,
    kernel_width: usize,
    num_classes: usize,
    loss: StreamingMean,
    correct: StreamingMean,
}

impl ClassifierGraph {
    fn embed(&self, tokens: &[u32]) -> EvalResult<Vec<Vec<f32>>> {
        let embeddings = self.params.require(EMBEDDINGS)?;
        tokens
            .iter()
            .map(|&t| {
                embeddings.row(t as usize).map(<[f32]>::to_vec).ok_or_else(|| {
                    EvalError::Dataset(format!("token id {t} outside vocabulary of {}", self.vocabulary_size))
                })
            })
            .collect()
    }

    fn mean_pool(&self, rows: &[Vec<f32>]) -> Vec<f32> {
        let mut out = vec![0.0; self.embedding_size];
        if rows.is_empty() {
            return out;
        }
        for row in rows {
            for (o, &x) in out.iter_mut().zip(row) {
                *o += x;
            }
        }
        let n = rows.len() as f32;
        out.iter_mut().for_each(|o| *o /= n);
        out
    }

    /// Width-K ReLU convolution, max-pooled over positions. Sequences shorter
    /// than the kernel are zero-padded on the right.
    fn conv_pool(&self, rows: &[Vec<f32>]) -> EvalResult<Vec<f32>> {
        let w = self.params.require(CONV_W)?;
        let b = self.params.require(CONV_B)?;
        let (k, d) = (self.kernel_width, self.embedding_size);
        let positions = rows.len().max(k) - k + 1;

        let mut pooled = vec![f32::NEG_INFINITY; d];
        let mut window = vec![0.0; k * d];
        for start in 0..positions {
            window.iter_mut().for_each(|x| *x = 0.0);
            for (offset, row) in rows.iter().skip(start).take(k).enumerate() {
                window[offset * d..(offset + 1) * d].copy_from_slice(row);
            }
            let activation = affine(&window, w, b);
            for (p, a) in pooled.iter_mut().zip(activation) {
                *p = p.max(a.max(0.0));
            }
        }
        Ok(pooled)
    }

    fn logits(&self, example: &Example) -> EvalResult<Vec<f32>> {
        let tokens = &example.tokens[..example.tokens.len().min(self.max_sequence_length)];
        let rows = self.embed(tokens)?;
        let features = match self.variant {
            ClassifierVariant::Simple => self.mean_pool(&rows),
            ClassifierVariant::Cnn => self.conv_pool(&rows)?,
        };

        let hidden: Vec<f32> = affine(&features, self.params.require(HIDDEN_W)?, self.params.require(HIDDEN_B)?)
            .into_iter()
            .map(f32::tanh)
            .collect();
        Ok(affine(&hidden, self.params.require(OUTPUT_W)?, self.params.require(OUTPUT_B)?))
    }

    fn label(&self, example: &Example) -> EvalResult<usize> {
        let label = example
            .label
            .ok_or_else(|| EvalError::Dataset("classification example without a label".to_string()))?;
        let label = label as usize;
        if label >= self.num_classes {
            return Err(EvalError::Dataset(format!("label {label} outside {} classes", self.num_classes)));
        }
        Ok(label)
    }
}

impl EvalGraph for ClassifierGraph {
    fn variables(&self) -> &ParameterSet {
        &self.params
    }

    fn variables_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn run_step(&mut self) -> EvalResult<StepOutcome> {
        let Some(batch) = self.cursor.as_mut().and_then(|c| c.next()) else {
            return Ok(StepOutcome::Exhausted);
        };
        let batch = batch?;

        let mut loss = 0.0;
        let mut correct = 0.0;
        for example in &batch {
            let label = self.label(example)?;
            let logits = self.logits(example)?;
            loss -= log_softmax(&logits)[label];
            if argmax(&logits) == label {
                correct += 1.0;
            }
        }
        let n = batch.len() as u64;
        self.loss.add(loss, n);
        self.correct.add(correct, n);

        let mut summary = Summary::new().with("examples", self.loss.count() as f64);
        if let (Some(loss), Some(accuracy)) = (self.loss.value(), self.correct.value()) {
            summary.insert("loss", loss);
            summary.insert("accuracy", accuracy);
        }
        Ok(StepOutcome::Summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelKind;
    use oncotext_eval::{DataSource, Tensor, VecDataSource};

    fn config(variant: ClassifierVariant) -> ModelConfig {
        let mut config = ModelConfig::new(ModelKind::TextClassification(variant));
        config.shared.vocabulary_size = 4;
        config.shared.embedding_size = 2;
        config.text_classification.hidden_size = 3;
        config.text_classification.num_classes = 3;
        config.text_classification.cnn_kernel_width = 2;
        config
    }

    fn graph(variant: ClassifierVariant, examples: Vec<Example>, batch_size: usize) -> Box<dyn EvalGraph> {
        let data = VecDataSource::new(examples).read(batch_size, 1).unwrap();
        ClassifierGraphBuilder::new(&config(variant), variant).create_graph(Some(data), batch_size).unwrap()
    }

    fn ex(tokens: &[u32], label: u32) -> Example {
        Example { tokens: tokens.to_vec(), label: Some(label) }
    }

    fn summary(graph: &mut Box<dyn EvalGraph>) -> Summary {
        match graph.run_step().unwrap() {
            StepOutcome::Summary(s) => s,
            StepOutcome::Exhausted => panic!("expected a summary"),
        }
    }

    #[test]
    fn test_cnn_declares_convolution() {
        let simple = graph(ClassifierVariant::Simple, Vec::new(), 1);
        assert!(simple.variables().get(CONV_W).is_none());

        let cnn = graph(ClassifierVariant::Cnn, Vec::new(), 1);
        assert_eq!(cnn.variables().get(CONV_W).unwrap().shape(), &[4, 2]);
        assert_eq!(cnn.variables().get(OUTPUT_W).unwrap().shape(), &[3, 3]);
    }

    #[test]
    fn test_zero_parameters_give_uniform_prediction() {
        for variant in [ClassifierVariant::Simple, ClassifierVariant::Cnn] {
            let mut graph = graph(variant, vec![ex(&[1, 2], 0), ex(&[3], 2)], 2);
            let summary = summary(&mut graph);
            assert!((summary.get("loss").unwrap() - 3f64.ln()).abs() < 1e-6, "{variant:?}");
            // ties resolve to class 0
            assert_eq!(summary.get("accuracy"), Some(0.5));
            assert_eq!(summary.get("examples"), Some(2.0));
        }
    }

    #[test]
    fn test_metrics_stream_across_batches() {
        let mut graph = graph(ClassifierVariant::Simple, vec![ex(&[1], 2), ex(&[2], 1)], 1);
        graph.variables_mut().insert(OUTPUT_B, Tensor::new(vec![3], vec![0.0, 0.0, 5.0]).unwrap());

        let first = summary(&mut graph);
        assert_eq!(first.get("accuracy"), Some(1.0));

        let second = summary(&mut graph);
        assert_eq!(second.get("accuracy"), Some(0.5));
        assert_eq!(second.get("examples"), Some(2.0));
        assert_eq!(graph.run_step().unwrap(), StepOutcome::Exhausted);
    }

    #[test]
    fn test_cnn_responds_to_token_order() {
        let mut graph = graph(ClassifierVariant::Cnn, vec![ex(&[1, 2], 1), ex(&[2, 1], 1)], 1);
        let params = graph.variables_mut();
        params.insert(EMBEDDINGS, Tensor::new(vec![4, 2], vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0]).unwrap());
        // only the first position of the window feeds output channel 0
        params.insert(CONV_W, Tensor::new(vec![4, 2], vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap());
        params.insert(HIDDEN_W, Tensor::new(vec![2, 3], vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap());
        params.insert(OUTPUT_W, Tensor::new(vec![3, 3], vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap());

        let first = summary(&mut graph);
        let second = summary(&mut graph);
        assert_eq!(first.get("accuracy"), Some(1.0));
        assert_eq!(second.get("accuracy"), Some(0.5));
    }

    #[test]
    fn test_unlabelled_example_is_dataset_error() {
        let mut graph = graph(
            ClassifierVariant::Simple,
            vec![Example { tokens: vec![1], label: None }],
            1,
        );
        assert!(matches!(graph.run_step(), Err(EvalError::Dataset(_))));
    }

    #[test]
    fn test_label_out_of_range_is_dataset_error() {
        let mut graph = graph(ClassifierVariant::Simple, vec![ex(&[1], 7)], 1);
        let err = graph.run_step().unwrap_err();
        assert!(err.to_string().contains("label 7"));
    }
}
