//! Прогон сети на батчах: шаги обучения, валидация и хуки.
//!
//! [`Session`] владеет построенной [`StochasticResNet`], бэкендом и
//! значениями параметров. Каждый шаг обучения идёт в одном порядке:
//!
//! 1. хуки `on_step_begin` меняют таблицу гейтов (здесь [`GateSampler`]
//!    разыгрывает новый набор);
//! 2. таблица превращается во входы графа;
//! 3. граф исполняется в фазе обучения.
//!
//! Валидация перед запуском открывает все гейты, что бы ни было в таблице.
//! Веса не обновляются; сессия возвращает потерю и точность.

use crate::asg::{Asg, Value};
use crate::error::{SessionError, SessionResult};
use crate::gating::{GateSampler, GateTable};
use crate::metrics::{Accuracy, Metric};
use crate::models::stochastic_resnet::{StochasticResNet, IMAGES_INPUT, LABELS_INPUT, LEARNING_PHASE_INPUT};
use crate::runtime::backend::{memo_from_feeds, Backend};
use crate::runtime::cpu_backend::CpuBackend;
use ndarray::ArrayD;
use std::collections::HashMap;

/// Точки вызова в цикле обучения.
///
/// Хуки вызываются в порядке регистрации и могут менять таблицу гейтов.
pub trait TrainingHook {
    /// Перед прямым проходом каждого шага обучения.
    fn on_step_begin(&mut self, _gates: &mut GateTable) {}

    /// После последнего шага эпохи, до валидации.
    fn on_epoch_end(&mut self, _gates: &mut GateTable) {}
}

/// Значение входа `learning_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

impl Phase {
    pub fn is_training(self) -> bool {
        matches!(self, Phase::Train)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub loss: f32,
    /// Сколько блоков обойдено на этом шаге.
    pub closed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub loss: f32,
    pub accuracy: f64,
    /// Вероятности классов `[batch, classes]`.
    pub probabilities: ArrayD<f32>,
}

pub struct Session<B: Backend = CpuBackend> {
    model: StochasticResNet,
    backend: B,
    parameters: HashMap<String, Value>,
    hooks: Vec<Box<dyn TrainingHook>>,
    steps: usize,
    epochs: usize,
}

impl Session<CpuBackend> {
    /// CPU-сессия с [`GateSampler`], seed берётся из конфигурации модели.
    pub fn new(model: StochasticResNet, parameters: HashMap<String, Value>) -> Self {
        let seed = model.config.seed;
        let mut session = Self::with_backend(model, CpuBackend::new(), parameters);
        session.add_hook(Box::new(GateSampler::new(seed)));
        session
    }
}

impl<B: Backend> Session<B> {
    /// Сессия без зарегистрированных хуков.
    pub fn with_backend(model: StochasticResNet, backend: B, parameters: HashMap<String, Value>) -> Self {
        Self { model, backend, parameters, hooks: Vec::new(), steps: 0, epochs: 0 }
    }

    pub fn add_hook(&mut self, hook: Box<dyn TrainingHook>) {
        self.hooks.push(hook);
    }

    pub fn model(&self) -> &StochasticResNet {
        &self.model
    }

    pub fn gates(&self) -> &GateTable {
        &self.model.gates
    }

    /// Прямой доступ к таблице гейтов, например чтобы закрыть блоки вручную.
    pub fn gates_mut(&mut self) -> &mut GateTable {
        &mut self.model.gates
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Один шаг обучения на полном батче.
    pub fn train_step(&mut self, images: &ArrayD<f32>, labels: &ArrayD<f32>) -> SessionResult<StepReport> {
        self.check_batch(images, labels)?;
        for hook in &mut self.hooks {
            hook.on_step_begin(&mut self.model.gates);
        }
        let closed = self.model.gates.closed_count();

        let outputs = self.execute(self.model.graph(), images, Some(labels), Phase::Train)?;
        let loss = scalar_output(&outputs, 1)?;

        self.steps += 1;
        tracing::debug!(step = self.steps, loss, closed, "train step");
        Ok(StepReport { loss, closed })
    }

    /// Вызывает хуки `on_epoch_end`.
    pub fn end_epoch(&mut self) {
        for hook in &mut self.hooks {
            hook.on_epoch_end(&mut self.model.gates);
        }
        self.epochs += 1;
    }

    /// Потеря и точность на полном батче со всеми активными блоками.
    pub fn evaluate(&mut self, images: &ArrayD<f32>, labels: &ArrayD<f32>) -> SessionResult<EvalReport> {
        self.check_batch(images, labels)?;
        self.model.gates.open_all();

        let outputs = self.execute(self.model.graph(), images, Some(labels), Phase::Eval)?;
        let probabilities = tensor_output(&outputs, 0)?;
        let loss = scalar_output(&outputs, 1)?;

        let mut accuracy = Accuracy::new();
        accuracy.update(&probabilities, labels);
        Ok(EvalReport { loss, accuracy: accuracy.compute(), probabilities })
    }

    /// Вероятности классов для `images` при текущем состоянии гейтов.
    ///
    /// В отличие от [`evaluate`](Self::evaluate) гейты не открываются, так что
    /// можно посмотреть на сеть с обойдёнными блоками.
    pub fn forward(&self, images: &ArrayD<f32>, phase: Phase) -> SessionResult<ArrayD<f32>> {
        let expected = self.image_shape(images.shape().first().copied().unwrap_or(0));
        if images.shape() != expected.as_slice() {
            return Err(SessionError::BatchShape { expected, actual: images.shape().to_vec() });
        }
        let outputs = self.execute(&self.model.inference_graph(), images, None, phase)?;
        tensor_output(&outputs, 0)
    }

    fn execute(
        &self,
        graph: &Asg,
        images: &ArrayD<f32>,
        labels: Option<&ArrayD<f32>>,
        phase: Phase,
    ) -> SessionResult<Vec<Value>> {
        let mut feeds = self.model.gates.feeds();
        feeds.insert(IMAGES_INPUT.to_string(), Value::Tensor(images.clone()));
        if let Some(labels) = labels {
            feeds.insert(LABELS_INPUT.to_string(), Value::Tensor(labels.clone()));
        }
        feeds.insert(LEARNING_PHASE_INPUT.to_string(), Value::ScalarBool(phase.is_training()));

        let mut memo = memo_from_feeds(&self.backend, graph, &self.parameters)?;
        memo.extend(memo_from_feeds(&self.backend, graph, &feeds)?);

        let (device_outputs, _) = self.backend.run(graph, memo)?;
        Ok(self.backend.retrieve_data(&device_outputs)?)
    }

    fn image_shape(&self, batch: usize) -> Vec<usize> {
        let cfg = &self.model.config;
        vec![batch, cfg.image_channels, cfg.image_size, cfg.image_size]
    }

    /// Потеря усредняется по размеру батча из конфигурации, поэтому батч
    /// должен совпадать с ним точно.
    fn check_batch(&self, images: &ArrayD<f32>, labels: &ArrayD<f32>) -> SessionResult<()> {
        let cfg = &self.model.config;
        let expected = self.image_shape(cfg.batch_size);
        if images.shape() != expected.as_slice() {
            return Err(SessionError::BatchShape { expected, actual: images.shape().to_vec() });
        }
        let expected = vec![cfg.batch_size, cfg.num_classes];
        if labels.shape() != expected.as_slice() {
            return Err(SessionError::BatchShape { expected, actual: labels.shape().to_vec() });
        }
        Ok(())
    }
}

fn tensor_output(outputs: &[Value], index: usize) -> SessionResult<ArrayD<f32>> {
    match outputs.get(index) {
        Some(Value::Tensor(t)) => Ok(t.clone()),
        Some(other) => Err(SessionError::UnexpectedOutput(format!(
            "output {} is {}, expected Tensor",
            index,
            other.kind()
        ))),
        None => Err(SessionError::UnexpectedOutput(format!(
            "graph returned {} outputs, needed {}",
            outputs.len(),
            index + 1
        ))),
    }
}

fn scalar_output(outputs: &[Value], index: usize) -> SessionResult<f32> {
    match outputs.get(index) {
        Some(Value::ScalarF32(v)) => Ok(*v),
        _ => tensor_output(outputs, index)?
            .first()
            .copied()
            .ok_or_else(|| SessionError::UnexpectedOutput(format!("output {} is empty", index))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StochasticDepthConfig;
    use ndarray::{Axis, IxDyn};
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_session() -> Session {
        let config = StochasticDepthConfig {
            blocks_per_stage: 1,
            batch_size: 2,
            num_classes: 3,
            image_size: 4,
            death_rate: 0.5,
            ..Default::default()
        };
        let model = StochasticResNet::build(&config).unwrap();
        let params = model.init_parameters(&mut StdRng::seed_from_u64(5));
        Session::new(model, params)
    }

    fn batch(rng: &mut StdRng) -> (ArrayD<f32>, ArrayD<f32>) {
        let images = ArrayD::random_using(IxDyn(&[2, 3, 4, 4]), Uniform::new(-1.0f32, 1.0), rng);
        let mut labels = ArrayD::zeros(IxDyn(&[2, 3]));
        labels[[0, 0]] = 1.0;
        labels[[1, 2]] = 1.0;
        (images, labels)
    }

    #[test]
    fn train_step_reports_finite_loss() {
        let mut session = tiny_session();
        let (images, labels) = batch(&mut StdRng::seed_from_u64(1));
        let report = session.train_step(&images, &labels).unwrap();
        assert!(report.loss.is_finite() && report.loss > 0.0);
        assert!(report.closed <= 3);
        assert_eq!(session.steps(), 1);
    }

    #[test]
    fn wrong_batch_size_is_rejected() {
        let mut session = tiny_session();
        let images = ArrayD::zeros(IxDyn(&[3, 3, 4, 4]));
        let labels = ArrayD::zeros(IxDyn(&[3, 3]));
        assert!(matches!(session.train_step(&images, &labels), Err(SessionError::BatchShape { .. })));
    }

    #[test]
    fn evaluate_reopens_closed_gates() {
        let mut session = tiny_session();
        let (images, labels) = batch(&mut StdRng::seed_from_u64(2));
        let handles: Vec<_> = session.gates().handles().collect();
        for h in handles {
            session.gates_mut().set_gate(h, false);
        }
        let all_closed = session.forward(&images, Phase::Eval).unwrap();

        let report = session.evaluate(&images, &labels).unwrap();
        assert_eq!(session.gates().open_count(), 3);
        assert_ne!(report.probabilities, all_closed);
        for row in report.probabilities.lanes(Axis(1)) {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn end_epoch_opens_gates_through_the_sampler() {
        let mut session = tiny_session();
        let h = session.gates().handles().last().unwrap();
        session.gates_mut().set_gate(h, false);
        session.end_epoch();
        assert_eq!(session.gates().closed_count(), 0);
        assert_eq!(session.epochs(), 1);
    }
}
