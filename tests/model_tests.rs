//! Model Integration Tests
//!
//! Training, persistence, descriptor resolution and the shared-model
//! rendezvous between classifiers.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use parking_lot::RwLock;
use pretty_assertions::assert_eq;
use sigstream::consumer::{
    Annotation, Classifier, ClassifierOptions, Consumer, Event, EventData, Trainer, TrainerOptions,
};
use sigstream::model::{ModelParams, ModelState};
use sigstream::stream::{SampleType, Stream, StreamShape};
use sigstream::{Model, ModelDescriptor, ModelKind, ModelRegistry, SigstreamError};
use tempfile::TempDir;

fn two_class_model(kind: ModelKind, dim: usize) -> Model {
    let mut model = Model::new(kind);
    model.setup(vec!["A".into(), "B".into()], 8, dim, 50.0, SampleType::Double);
    model
}

fn naive_bayes(model: &Model) -> &sigstream::model::NaiveBayes {
    match model.params() {
        ModelParams::NaiveBayes(nb) | ModelParams::OnlineNaiveBayes(nb) => nb,
        other => panic!("not a bayes model: {:?}", other),
    }
}

/// Online model trained on two well separated clusters, saved under `dir`
fn saved_model(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let mut model = two_class_model(ModelKind::OnlineNaiveBayes, 2);
    for i in 0..20 {
        let jitter = (i % 4) as f64 * 0.1;
        model.train(&[jitter, 1.0 - jitter], "A").unwrap();
        model.train(&[4.0 + jitter, 6.0 - jitter], "B").unwrap();
    }
    model.save(dir.path(), name).unwrap()
}

// === Naive Bayes ===

#[test]
fn test_online_bayes_separates_constant_classes() {
    let mut model = two_class_model(ModelKind::OnlineNaiveBayes, 1);
    for _ in 0..3 {
        model.train(&[1.0], "A").unwrap();
        model.train(&[5.0], "B").unwrap();
    }
    let p = model.forward(&[1.0]).unwrap();
    assert!(p[0] > 0.9, "p(A) = {}", p[0]);
    assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
}

#[test]
fn test_probabilities_always_normalised() {
    let mut model = two_class_model(ModelKind::OnlineNaiveBayes, 2);
    model.train(&[0.0, 0.0], "A").unwrap();
    model.train(&[0.5, 0.1], "A").unwrap();
    model.train(&[3.0, 2.0], "B").unwrap();

    for sample in [[0.0, 0.0], [1e6, -1e6], [f64::NAN, 2.0], [2.9, 1.9]] {
        let p = model.forward(&sample).unwrap();
        assert_eq!(p.len(), 2);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn test_untrained_model_refuses_forward() {
    let model = two_class_model(ModelKind::NaiveBayes, 1);
    assert!(matches!(
        model.forward(&[1.0]),
        Err(SigstreamError::NotTrained { .. })
    ));
}

#[test]
fn test_save_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = saved_model(&dir, "clusters");

    let descriptor = ModelDescriptor::from_file(&path).unwrap();
    assert_eq!(descriptor.kind, ModelKind::OnlineNaiveBayes);
    assert_eq!(descriptor.classes, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(descriptor.input_dim(), 2);
    assert!(descriptor.trained);

    let mut reloaded = Model::from_descriptor(&descriptor);
    reloaded
        .load(&descriptor.model_path(), descriptor.option_path().as_deref())
        .unwrap();
    assert!(reloaded.is_trained());

    let mut original = two_class_model(ModelKind::OnlineNaiveBayes, 2);
    original
        .load(&descriptor.model_path(), descriptor.option_path().as_deref())
        .unwrap();
    let a = naive_bayes(&reloaded);
    let b = naive_bayes(&original);
    for (ca, cb) in a.classes.iter().zip(&b.classes) {
        assert_eq!(ca.name, cb.name);
        assert_eq!(ca.features, cb.features);
        assert_abs_diff_eq!(ca.features[0].weight_sum, 20.0);
    }

    // Online statistics keep accumulating after a reload
    reloaded.train(&[0.2, 0.8], "A").unwrap();
    assert_abs_diff_eq!(naive_bayes(&reloaded).classes[0].features[0].weight_sum, 21.0);
}

#[test]
fn test_two_column_file_loads_as_online() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.model");
    fs::write(&path, "2\t1\nA\t0.5\n1.0\t0.5\nB\t0.5\n5.0\t0.5\n").unwrap();

    let mut model = two_class_model(ModelKind::OnlineNaiveBayes, 1);
    model.load(&path, None).unwrap();
    assert!(model.forward(&[1.1]).unwrap()[0] > 0.99);
    model.train(&[1.0], "A").unwrap();
}

#[test]
fn test_feature_count_mismatch_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wide.model");
    fs::write(&path, "1\t2\nA\t1\n0\t1\n0\t1\n").unwrap();

    let mut model = two_class_model(ModelKind::NaiveBayes, 1);
    let err = model.load(&path, None).unwrap_err();
    assert!(matches!(err, SigstreamError::ParameterFile { .. }));
    assert!(!model.is_trained());
}

#[test]
fn test_svm_descriptor_end_to_end() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("lin.Svm.model"),
        "2\t1\n0\t10\nlow\t0\n-2\nhigh\t0\n2\n",
    )
    .unwrap();
    let descriptor_path = dir.path().join("lin.trainer");
    fs::write(
        &descriptor_path,
        r#"<trainer version="5">
            <info trained="true"/>
            <streams><item byte="8" dim="1" sr="10" type="DOUBLE"/></streams>
            <classes><item name="low"/><item name="high"/></classes>
            <model create="Svm" path="lin.Svm.model"/>
        </trainer>"#,
    )
    .unwrap();

    let descriptor = ModelDescriptor::from_file(&descriptor_path).unwrap();
    let mut model = Model::from_descriptor(&descriptor);
    model.load(&descriptor.model_path(), None).unwrap();
    assert!(model.forward(&[9.0]).unwrap()[1] > 0.9);
    assert!(matches!(
        model.train(&[1.0], "low"),
        Err(SigstreamError::Unsupported { .. })
    ));
}

// === Descriptors ===

#[test]
fn test_descriptor_shape_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gait.trainer");
    fs::write(
        &path,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<trainer version="5">
    <info trained="true"/>
    <streams>
        <item byte="4" dim="3" sr="50.0" type="FLOAT"/>
    </streams>
    <classes>
        <item name="sit"/>
        <item name="stand"/>
        <item name="walk"/>
        <item name="run"/>
    </classes>
    <model create="NaiveBayes" path="gait.NaiveBayes.model"/>
</trainer>"#,
    )
    .unwrap();

    let descriptor = ModelDescriptor::from_file(&path).unwrap();
    assert_eq!(descriptor.input_dim(), 3);
    assert_eq!(descriptor.num_classes(), 4);
    assert_abs_diff_eq!(descriptor.sample_rate(), 50.0);
    assert_eq!(ModelDescriptor::discover(dir.path()).unwrap(), vec![path]);
}

#[test]
fn test_unknown_model_kind() {
    let xml = r#"<trainer version="5">
        <streams><item byte="4" dim="1" sr="1" type="FLOAT"/></streams>
        <classes><item name="a"/></classes>
        <model create="DecisionForest" path="x.model"/>
    </trainer>"#;
    let err = ModelDescriptor::parse(xml, std::path::Path::new("x.trainer")).unwrap_err();
    assert!(matches!(err, SigstreamError::ModelNotFound { .. }));
}

// === Consumers ===

#[test]
fn test_classifiers_share_one_model() {
    let dir = TempDir::new().unwrap();
    let path = saved_model(&dir, "shared");

    let registry = Arc::new(ModelRegistry::new());
    let a = registry.create("a").unwrap();
    let b = registry.create("b").unwrap();
    registry.resolve_file(a, &path).unwrap();
    registry.resolve_reference(b, a).unwrap();

    let shape = StreamShape::new(5, 2, 50.0, SampleType::Double);
    let waiting = {
        let registry = Arc::clone(&registry);
        let shape = shape.clone();
        thread::spawn(move || {
            let mut classifier = Classifier::new(ClassifierOptions::default(), registry, b);
            classifier.enter(&[shape]).map(|_| classifier)
        })
    };
    while registry.state(b).unwrap() != ModelState::Loading {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(!waiting.is_finished());

    let mut first = Classifier::new(ClassifierOptions::default(), Arc::clone(&registry), a);
    first.enter(&[shape]).unwrap();
    let mut second = waiting.join().unwrap().unwrap();

    let model_a = first.model().unwrap();
    let model_b = second.model().unwrap();
    assert!(Arc::ptr_eq(model_a, model_b));
    assert!(model_b.read().is_trained());

    let chunk = Stream::from_f64([4.1, 5.9].repeat(5), 2, 50.0, 0.0).unwrap();
    let events = second.consume(&[&chunk]).unwrap();
    assert_eq!(events[0].best().unwrap().0, "B");
}

#[test]
fn test_failed_load_releases_classifier() {
    let dir = TempDir::new().unwrap();
    let path = saved_model(&dir, "broken");
    fs::write(dir.path().join("broken.OnlineNaiveBayes.model"), "not a model").unwrap();

    let registry = Arc::new(ModelRegistry::new());
    let handle = registry.create("broken").unwrap();
    registry.resolve_file(handle, &path).unwrap();

    let mut classifier = Classifier::new(ClassifierOptions::default(), registry, handle);
    let err = classifier
        .enter(&[StreamShape::new(1, 2, 50.0, SampleType::Double)])
        .unwrap_err();
    assert!(matches!(err, SigstreamError::LoadFailed { .. }));
    assert!(classifier.model().is_none());
}

#[test]
fn test_train_save_then_classify() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(RwLock::new(two_class_model(ModelKind::NaiveBayes, 1)));
    let mut trainer = Trainer::new(TrainerOptions::default(), model);

    let values: Vec<f64> = (0..100)
        .map(|i| if i < 50 { (i % 5) as f64 * 0.1 } else { 3.0 + (i % 5) as f64 * 0.1 })
        .collect();
    let recording = Stream::from_f64(values, 1, 50.0, 0.0).unwrap();
    let mut annotation = Annotation::new(vec!["A".into(), "B".into()]);
    annotation.add(0.0, 1.0, "A").unwrap();
    annotation.add(1.0, 2.0, "B").unwrap();
    assert_eq!(trainer.train_batch(&recording, &annotation).unwrap(), 100);
    let path = trainer.save(dir.path(), "batch").unwrap();

    let registry = Arc::new(ModelRegistry::new());
    let handle = registry.create("batch").unwrap();
    registry.resolve_file(handle, &path).unwrap();
    let options = ClassifierOptions {
        best_match_only: false,
        ..Default::default()
    };
    let mut classifier = Classifier::new(options, registry, handle);
    classifier
        .enter(&[StreamShape::new(2, 1, 50.0, SampleType::Double)])
        .unwrap();

    let chunk = Stream::from_f64(vec![3.1, 3.2], 1, 50.0, 4.0).unwrap();
    let events = classifier.consume(&[&chunk]).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].time_ms, 4000);
    let EventData::Probabilities(values) = &events[0].data else {
        panic!("expected probabilities, got {:?}", events[0].data);
    };
    assert_eq!(values[1].0, "B");
    assert!(values[1].1 > 0.99);
}

#[test]
fn test_label_events_drive_online_training() {
    let model = Arc::new(RwLock::new(two_class_model(ModelKind::OnlineNaiveBayes, 1)));
    let mut trainer = Trainer::new(TrainerOptions::default(), Arc::clone(&model));
    trainer
        .enter(&[StreamShape::new(4, 1, 50.0, SampleType::Double)])
        .unwrap();

    trainer.notify(&Event::label("A", 0, 80));
    trainer
        .consume(&[&Stream::from_f64(vec![1.0, 1.1, 0.9, 1.0], 1, 50.0, 0.0).unwrap()])
        .unwrap();
    trainer.notify(&Event::label("B", 80, 80));
    trainer
        .consume(&[&Stream::from_f64(vec![5.0, 5.1, 4.9, 5.0], 1, 50.0, 0.08).unwrap()])
        .unwrap();

    assert_eq!(trainer.trained_samples(), 8);
    assert!(model.read().forward(&[1.0]).unwrap()[0] > 0.9);
    trainer.flush();
    assert_eq!(trainer.label(), None);
}
