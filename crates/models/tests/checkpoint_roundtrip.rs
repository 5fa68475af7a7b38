use burn::backend::ndarray::NdArray;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::Tensor;
use models::{load_detector, load_pretrained, Detector, DetectorConfig};

type B = NdArray<f32>;

fn cfg() -> DetectorConfig {
    DetectorConfig {
        num_classes: 4,
        max_detections: 3,
        hidden: 8,
        backbone_channels: vec![4],
        pool_size: 2,
        mask_size: 4,
        with_masks: false,
    }
}

#[test]
fn saved_detector_reloads_identically() {
    let tmp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let model = Detector::<B>::new(&cfg(), &device);
    let input = Tensor::<B, 4>::ones([1, 3, 8, 8], &device);
    let before = model
        .forward(input.clone())
        .objectness
        .into_data()
        .to_vec::<f32>()
        .unwrap();

    let path = tmp.path().join("pretrained.bin");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.save_file(path.clone(), &recorder).expect("save checkpoint");

    let loaded = load_detector::<B, _>(&path, &cfg(), &device).expect("load checkpoint");
    let after = loaded
        .forward(input)
        .objectness
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn pretrained_gets_target_heads() {
    let tmp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let path = tmp.path().join("coco_like.bin");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    Detector::<B>::new(&cfg(), &device)
        .save_file(path.clone(), &recorder)
        .expect("save checkpoint");

    let target = DetectorConfig {
        num_classes: 2,
        with_masks: true,
        ..cfg()
    };
    let model = load_pretrained::<B, _>(&path, &cfg(), &target, &device).expect("load pretrained");
    assert_eq!(model.num_classes(), 2);
    let out = model.forward(Tensor::zeros([1, 3, 8, 8], &device));
    assert_eq!(out.class_logits.dims(), [1, 3, 2]);
    assert_eq!(out.mask_logits.map(|m| m.dims()), Some([1, 3, 4, 4]));
}

#[test]
fn pretrained_heads_follow_target_mask_size_and_detections() {
    let tmp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let pretrained = DetectorConfig {
        mask_size: 6,
        with_masks: true,
        ..cfg()
    };
    let path = tmp.path().join("pretrained.bin");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    Detector::<B>::new(&pretrained, &device)
        .save_file(path.clone(), &recorder)
        .expect("save checkpoint");

    let target = DetectorConfig {
        num_classes: 2,
        max_detections: 5,
        mask_size: 8,
        ..pretrained.clone()
    };
    let model =
        load_pretrained::<B, _>(&path, &pretrained, &target, &device).expect("load pretrained");
    let out = model.forward(Tensor::zeros([2, 3, 8, 8], &device));
    assert_eq!(out.boxes.dims(), [2, 5, 4]);
    assert_eq!(out.class_logits.dims(), [2, 5, 2]);
    assert_eq!(out.mask_logits.map(|m| m.dims()), Some([2, 5, 8, 8]));
}

#[test]
fn pretrained_with_different_backbone_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let path = tmp.path().join("pretrained.bin");
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    Detector::<B>::new(&cfg(), &device)
        .save_file(path.clone(), &recorder)
        .expect("save checkpoint");

    let target = DetectorConfig {
        hidden: 16,
        ..cfg()
    };
    assert!(!cfg().backbone_matches(&target));
    assert!(load_pretrained::<B, _>(&path, &cfg(), &target, &device).is_err());
}
