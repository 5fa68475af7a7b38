use burn::module::Module;
use burn::nn;
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Box, objectness, and class predictor over a fixed number of detection slots.
#[derive(Debug, Module)]
pub struct BoxPredictor<B: Backend> {
    box_head: nn::Linear<B>,
    score_head: nn::Linear<B>,
    class_head: nn::Linear<B>,
    max_detections: usize,
    num_classes: usize,
}

impl<B: Backend> BoxPredictor<B> {
    pub fn new(
        hidden: usize,
        max_detections: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let max_detections = max_detections.max(1);
        let num_classes = num_classes.max(1);
        Self {
            box_head: nn::LinearConfig::new(hidden, max_detections * 4).init(device),
            score_head: nn::LinearConfig::new(hidden, max_detections).init(device),
            class_head: nn::LinearConfig::new(hidden, max_detections * num_classes).init(device),
            max_detections,
            num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Returns (boxes [N, D, 4], objectness [N, D], class_logits [N, D, C]).
    /// Boxes and objectness go through sigmoid to keep them in 0..1.
    pub fn forward(&self, features: Tensor<B, 2>) -> (Tensor<B, 3>, Tensor<B, 2>, Tensor<B, 3>) {
        let batch = features.dims()[0];
        let d = self.max_detections;
        let boxes = sigmoid(self.box_head.forward(features.clone())).reshape([batch, d, 4]);
        let scores = sigmoid(self.score_head.forward(features.clone()));
        let class_logits = self
            .class_head
            .forward(features)
            .reshape([batch, d, self.num_classes]);
        (order_corners(boxes), scores, class_logits)
    }
}

/// Reorder to enforce x0 <= x1, y0 <= y1 within [0,1] using arithmetic only.
fn order_corners<B: Backend>(boxes: Tensor<B, 3>) -> Tensor<B, 3> {
    let [batch, d, _] = boxes.dims();
    let x0 = boxes.clone().slice([0..batch, 0..d, 0..1]);
    let y0 = boxes.clone().slice([0..batch, 0..d, 1..2]);
    let x1 = boxes.clone().slice([0..batch, 0..d, 2..3]);
    let y1 = boxes.slice([0..batch, 0..d, 3..4]);

    let dx = x0.clone() - x1.clone();
    let dy = y0.clone() - y1.clone();
    let half = 0.5;

    let x_min = ((x0.clone() + x1.clone() - dx.clone().abs()) * half).clamp(0.0, 1.0);
    let x_max = ((x0 + x1 + dx.abs()) * half).clamp(0.0, 1.0);
    let y_min = ((y0.clone() + y1.clone() - dy.clone().abs()) * half).clamp(0.0, 1.0);
    let y_max = ((y0 + y1 + dy.abs()) * half).clamp(0.0, 1.0);

    Tensor::cat(vec![x_min, y_min, x_max, y_max], 2)
}

/// Per-slot mask logits of shape [N, D, M, M].
#[derive(Debug, Module)]
pub struct MaskPredictor<B: Backend> {
    fc: nn::Linear<B>,
    logits: nn::Linear<B>,
    max_detections: usize,
    mask_size: usize,
}

impl<B: Backend> MaskPredictor<B> {
    pub fn new(hidden: usize, max_detections: usize, mask_size: usize, device: &B::Device) -> Self {
        let max_detections = max_detections.max(1);
        let mask_size = mask_size.max(1);
        Self {
            fc: nn::LinearConfig::new(hidden, hidden).init(device),
            logits: nn::LinearConfig::new(hidden, max_detections * mask_size * mask_size)
                .init(device),
            max_detections,
            mask_size,
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 4> {
        let batch = features.dims()[0];
        let x = relu(self.fc.forward(features));
        self.logits.forward(x).reshape([
            batch,
            self.max_detections,
            self.mask_size,
            self.mask_size,
        ])
    }
}
