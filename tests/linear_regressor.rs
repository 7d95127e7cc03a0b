use approx::assert_abs_diff_eq;
use linear_estimator::metrics::streaming_mean_squared_error;
use linear_estimator::{
    bucketized_column, crossed_column, infer_real_valued_columns_from_batch,
    infer_real_valued_columns_from_input, load_iris, make_regression, random_weights,
    real_valued_column, sparse_column_with_hash_bucket, Estimator, EstimatorError, Ftrl,
    InputBatch, LinearRegressor, MetricKey, MetricSpec, Metrics, Result, RunConfig,
    SdcaOptimizer, SparseTensor,
};
use ndarray::array;
use tempfile::TempDir;

fn strings(values: &[&str], indices: &[[usize; 2]], shape: [usize; 2]) -> SparseTensor<String> {
    SparseTensor::new(
        indices.to_vec(),
        values.iter().map(|v| v.to_string()).collect(),
        shape,
    )
    .unwrap()
}

const TENSOR_LABELS: [f64; 3] = [1.0, 0.0, 0.2];

fn tensor_batch() -> InputBatch {
    InputBatch::new()
        .with_column("age", &[0.8, 0.15, 0.0])
        .with_sparse_strings(
            "language",
            strings(&["en", "fr", "zh"], &[[0, 0], [0, 1], [2, 0]], [3, 2]),
        )
        .with_label_values(&TENSOR_LABELS)
}

fn tensor_columns(hash_bucket_size: usize) -> Vec<linear_estimator::FeatureColumn> {
    vec![
        sparse_column_with_hash_bucket("language", hash_bucket_size),
        real_valued_column("age", 1),
    ]
}

fn loss(regressor: &LinearRegressor, batch: &InputBatch) -> f64 {
    regressor
        .evaluate(&mut batch.clone().repeat(), Some(1), &Metrics::new())
        .unwrap()["loss"]
}

#[test]
fn test_regression() {
    let batch = InputBatch::new()
        .with_column("age", &[1.0])
        .with_sparse_strings("language", strings(&["english"], &[[0, 0]], [1, 1]))
        .with_label_values(&[10.0]);
    let mut regressor = LinearRegressor::new(vec![
        real_valued_column("age", 1),
        sparse_column_with_hash_bucket("language", 100),
    ]);

    regressor.fit(&mut batch.clone().repeat(), 100).unwrap();
    let loss1 = loss(&regressor, &batch);
    regressor.fit(&mut batch.clone().repeat(), 200).unwrap();
    let loss2 = loss(&regressor, &batch);

    assert!(loss2 < loss1);
    assert!(loss2 < 0.5);
}

#[test]
fn test_regression_matrix_data() {
    let batch = load_iris().unwrap().to_named_input("feature");
    let mut regressor = LinearRegressor::new(vec![real_valued_column("feature", 4)])
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.clone().repeat(), 100).unwrap();
    let scores = regressor
        .evaluate(&mut batch.repeat(), Some(1), &Metrics::new())
        .unwrap();
    assert!(scores["loss"] < 0.2, "loss: {}", scores["loss"]);
    assert!(!scores.contains_key("accuracy"));
}

#[test]
fn test_regression_tensor_data() {
    let mut regressor =
        LinearRegressor::new(tensor_columns(20)).config(RunConfig::new().random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();
    assert!(loss(&regressor, &tensor_batch()) < 0.2);
}

#[test]
fn test_loss() {
    let batch = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)])
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.clone().repeat(), 100).unwrap();
    // The best constant is 0.25: (0.75^2 + 3 * 0.25^2) / 4.
    assert_abs_diff_eq!(loss(&regressor, &batch), 0.1875, epsilon = 0.1);
}

#[test]
fn test_loss_with_weights() {
    let train = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_column("w", &[1.0; 4])
        .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
    let eval = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_column("w", &[7.0, 1.0, 1.0, 1.0])
        .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)])
        .weight_column_name("w")
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut train.repeat(), 100).unwrap();
    // (7 * 0.75^2 + 3 * 0.25^2) / 10
    assert_abs_diff_eq!(loss(&regressor, &eval), 0.4125, epsilon = 0.1);
}

#[test]
fn test_train_with_weights() {
    let train = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_column("w", &[100.0, 3.0, 2.0, 2.0])
        .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
    let eval = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_column("w", &[1.0; 4])
        .with_label_values(&[1.0; 4]);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)])
        .weight_column_name("w")
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut train.repeat(), 100).unwrap();
    assert!(loss(&regressor, &eval) < 0.1);
}

#[test]
fn test_predict() {
    let mut regressor =
        LinearRegressor::new(tensor_columns(20)).config(RunConfig::new().random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();
    assert!(loss(&regressor, &tensor_batch()) < 0.1);

    let predictions = regressor.predict(&tensor_batch()).unwrap();
    for (prediction, label) in predictions.iter().zip(TENSOR_LABELS) {
        assert_abs_diff_eq!(*prediction, label, epsilon = 0.1);
    }
}

#[test]
fn test_predict_as_iterable() {
    let mut regressor =
        LinearRegressor::new(tensor_columns(20)).config(RunConfig::new().random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();

    let predictions: Vec<f64> = regressor
        .predict_iter(&mut tensor_batch().epochs(2))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(predictions.len(), 6);
    for (prediction, label) in predictions.iter().zip(TENSOR_LABELS.iter().cycle()) {
        assert_abs_diff_eq!(*prediction, *label, epsilon = 0.1);
    }
}

#[test]
fn test_predict_iter_stops_at_first_error() {
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)]);
    let batch = InputBatch::new()
        .with_column("x", &[1.0])
        .with_label_values(&[1.0]);
    regressor.fit(&mut batch.clone().repeat(), 1).unwrap();

    let mut batches = vec![InputBatch::new().with_column("y", &[1.0]), batch].into_iter();
    let mut input = move || batches.next();
    let results: Vec<Result<f64>> = regressor.predict_iter(&mut input).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(EstimatorError::MissingFeature(_))));
}

#[test]
fn test_custom_metrics() {
    let batch = InputBatch::new()
        .with_column("x", &[1.0; 4])
        .with_label_values(&[1.0, 0.0, 0.0, 0.0]);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)])
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.clone().repeat(), 100).unwrap();

    let metrics: Metrics = [
        (
            MetricKey::from("my_error"),
            MetricSpec::new(streaming_mean_squared_error),
        ),
        (
            MetricKey::from("my_metric"),
            MetricSpec::new(|predictions, labels, _| predictions.column(0).dot(&labels)),
        ),
    ]
    .into_iter()
    .collect();
    let scores = regressor
        .evaluate(&mut batch.clone().repeat(), Some(1), &metrics)
        .unwrap();
    for key in ["loss", "my_error", "my_metric"] {
        assert!(scores.contains_key(key), "missing metric {}", key);
    }

    let predictions = regressor.predict(&batch).unwrap();
    let mse = predictions
        .iter()
        .zip([1.0, 0.0, 0.0, 0.0])
        .map(|(p, l)| (p - l) * (p - l))
        .sum::<f64>()
        / 4.0;
    assert_abs_diff_eq!(scores["my_error"], mse, epsilon = 1e-9);
    assert_abs_diff_eq!(scores["my_error"], scores["loss"], epsilon = 1e-9);
    assert_abs_diff_eq!(scores["my_metric"], predictions[0], epsilon = 1e-9);

    let tuple_key: Metrics = [(
        MetricKey::from(["my_error", "predictions"]),
        MetricSpec::new(streaming_mean_squared_error),
    )]
    .into_iter()
    .collect();
    let err = regressor
        .evaluate(&mut batch.repeat(), Some(1), &tuple_key)
        .unwrap_err();
    assert!(matches!(err, EstimatorError::UnknownPredictionKey { key, .. } if key == "predictions"));
}

#[test]
fn test_classifier_keys_are_rejected() {
    let batch = InputBatch::new()
        .with_column("x", &[1.0])
        .with_label_values(&[1.0]);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 1)]);
    regressor.fit(&mut batch.clone().repeat(), 1).unwrap();
    let metrics: Metrics = [(
        MetricKey::from("my_accuracy"),
        MetricSpec::new(streaming_mean_squared_error).prediction_key("classes"),
    )]
    .into_iter()
    .collect();
    assert!(matches!(
        regressor.evaluate(&mut batch.repeat(), Some(1), &metrics),
        Err(EstimatorError::UnknownPredictionKey { .. })
    ));
}

#[test]
fn test_train_save_load() {
    let model_dir = TempDir::new().unwrap();
    let mut regressor = LinearRegressor::new(tensor_columns(20))
        .model_dir(model_dir.path())
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();
    let predictions: Vec<f64> = regressor
        .predict_iter(&mut tensor_batch().epochs(1))
        .collect::<Result<_>>()
        .unwrap();
    drop(regressor);

    let regressor2 = LinearRegressor::new(tensor_columns(20)).model_dir(model_dir.path());
    let predictions2: Vec<f64> = regressor2
        .predict_iter(&mut tensor_batch().epochs(1))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(predictions.len(), predictions2.len());
    for (a, b) in predictions.iter().zip(&predictions2) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn test_train_with_partitioned_variables() {
    let mut regressor = LinearRegressor::new(tensor_columns(20_000_000))
        .config(RunConfig::new().num_ps_replicas(2).random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();
    assert!(loss(&regressor, &tensor_batch()) < 0.1);
}

#[test]
fn test_disable_centered_bias() {
    let mut regressor = LinearRegressor::new(tensor_columns(20))
        .enable_centered_bias(false)
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut tensor_batch().repeat(), 100).unwrap();
    assert!(loss(&regressor, &tensor_batch()) < 0.1);
    assert!(!regressor
        .variable_names()
        .unwrap()
        .contains(&"centered_bias_weight".to_string()));
}

#[test]
fn test_recover_weights() {
    let weights = random_weights(10, 10.0, 67);
    let data = make_regression(1000, weights.as_slice().unwrap(), 2.0, 0.05, 67);
    let mut regressor = LinearRegressor::new(infer_real_valued_columns_from_input(&data.features))
        .optimizer(Ftrl::new(0.8))
        .config(RunConfig::new().random_seed(67));
    regressor
        .fit_arrays(&data.features, &data.labels, 64, 2000)
        .unwrap();

    let weights_by_name = regressor.weights().unwrap();
    let learned = &weights_by_name["linear/weight"];
    assert_eq!(learned.shape(), &[10, 1]);
    for (w, expected) in learned.column(0).iter().zip(weights.iter()) {
        assert!((w - expected).abs() <= expected.abs(), "{} vs {}", w, expected);
    }
}

#[test]
fn test_infer_columns_from_batch() {
    let batch = InputBatch::new()
        .with_dense("a", array![[1.0, 2.0], [3.0, 4.0]])
        .with_column("b", &[0.5, 0.25])
        .with_strings("id", ["1", "2"])
        .with_label_values(&[1.0, 2.0]);
    let columns = infer_real_valued_columns_from_batch(&batch);
    assert_eq!(columns.len(), 2);
    let mut regressor = LinearRegressor::new(columns);
    regressor.fit(&mut batch.repeat(), 1).unwrap();
    assert_eq!(
        regressor.variable_names().unwrap()[..2],
        ["linear/a/weight".to_string(), "linear/b/weight".to_string()]
    );
}

fn sdca_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| i.to_string()).collect()
}

#[test]
fn test_sdca_real_valued_linear_features() {
    let x = array![[1.2, 2.0, -1.5], [-2.0, 3.0, -0.5], [1.0, -0.5, 4.0]];
    let weights = array![3.0, -1.2, 0.5];
    let y = x.dot(&weights);
    let batch = InputBatch::new()
        .with_strings("example_id", sdca_ids(3))
        .with_dense("x", x)
        .with_column("weights", &[10.0; 3])
        .with_label_values(y.as_slice().unwrap());
    let mut regressor = LinearRegressor::new(vec![real_valued_column("x", 3)])
        .weight_column_name("weights")
        .optimizer(SdcaOptimizer::new("example_id"))
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.clone().repeat(), 20).unwrap();

    assert!(loss(&regressor, &batch) < 0.01);
    let weights_by_name = regressor.weights().unwrap();
    let learned = &weights_by_name["linear/x/weight"];
    for (w, expected) in learned.column(0).iter().zip(weights.iter()) {
        assert!((w - expected).abs() <= 0.1 * expected.abs(), "{} vs {}", w, expected);
    }
}

#[test]
fn test_sdca_mixed_features_arbitrary_weights() {
    let batch = InputBatch::new()
        .with_strings("example_id", sdca_ids(3))
        .with_column("price", &[0.6, 0.8, 0.3])
        .with_column("sq_footage", &[900.0, 700.0, 600.0])
        .with_sparse_strings(
            "country",
            strings(&["IT", "US", "GB"], &[[0, 0], [1, 3], [2, 1]], [3, 5]),
        )
        .with_column("weights", &[3.0, 5.0, 7.0])
        .with_label_values(&[1.55, -1.25, -3.0]);
    let sq_footage_bucket =
        bucketized_column(real_valued_column("sq_footage", 1), vec![650.0, 800.0]);
    let country = sparse_column_with_hash_bucket("country", 5);
    let mut regressor = LinearRegressor::new(vec![
        real_valued_column("price", 1),
        sq_footage_bucket.clone(),
        country.clone(),
        crossed_column(vec![sq_footage_bucket, country], 10),
    ])
    .weight_column_name("weights")
    .optimizer(SdcaOptimizer::new("example_id").symmetric_l2_regularization(1.0))
    .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.clone().repeat(), 20).unwrap();
    assert!(loss(&regressor, &batch) < 0.05);
}

#[test]
fn test_sdca_sparse_features_with_l1_reg() {
    let batch = InputBatch::new()
        .with_strings("example_id", sdca_ids(3))
        .with_column("price", &[0.4, 0.6, 0.3])
        .with_sparse_strings(
            "country",
            strings(&["IT", "US", "GB"], &[[0, 0], [1, 3], [2, 1]], [3, 5]),
        )
        .with_column("weights", &[10.0; 3])
        .with_label_values(&[1.4, -0.8, 2.6]);
    let columns = vec![
        real_valued_column("price", 1),
        sparse_column_with_hash_bucket("country", 5),
    ];
    let train = |sdca: SdcaOptimizer| {
        let mut regressor = LinearRegressor::new(columns.clone())
            .weight_column_name("weights")
            .optimizer(sdca)
            .config(RunConfig::new().random_seed(1));
        regressor.fit(&mut batch.clone().repeat(), 20).unwrap();
        let l1_norm: f64 = regressor
            .weights()
            .unwrap()
            .values()
            .map(|w| w.iter().map(|v| v.abs()).sum::<f64>())
            .sum();
        (loss(&regressor, &batch), l1_norm)
    };

    let (no_l1_loss, no_l1_norm) = train(SdcaOptimizer::new("example_id"));
    let (l1_loss, l1_norm) =
        train(SdcaOptimizer::new("example_id").symmetric_l1_regularization(1.0));

    assert!(no_l1_loss < l1_loss);
    assert!(no_l1_loss < 0.05);
    assert!(l1_norm < no_l1_norm);
}

#[test]
fn test_sdca_bias_only() {
    let n = 40;
    let labels: Vec<f64> = (0..n).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect();
    let batch = InputBatch::new()
        .with_strings("example_id", sdca_ids(n))
        .with_column("place_holder", &vec![0.0; n])
        .with_label_values(&labels);
    let mut regressor = LinearRegressor::new(vec![real_valued_column("place_holder", 1)])
        .optimizer(SdcaOptimizer::new("example_id"))
        .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut batch.repeat(), 100).unwrap();

    let bias = regressor.variable_value("linear/bias_weight").unwrap();
    assert_abs_diff_eq!(bias[[0, 0]], 0.25, epsilon = 0.1);
}

fn half_and_half(labels: Vec<f64>) -> InputBatch {
    let half = labels.len() / 2;
    let a: Vec<f64> = (0..2 * half).map(|i| if i < half { 1.0 } else { 0.0 }).collect();
    let b: Vec<f64> = a.iter().map(|v| 1.0 - v).collect();
    InputBatch::new()
        .with_strings("example_id", sdca_ids(2 * half))
        .with_column("a", &a)
        .with_column("b", &b)
        .with_label_values(&labels)
}

#[test]
fn test_sdca_bias_and_other_columns() {
    let pattern_a = [1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let pattern_b = [0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let labels: Vec<f64> = pattern_a
        .iter()
        .cycle()
        .take(100)
        .chain(pattern_b.iter().cycle().take(100))
        .copied()
        .collect();
    let mut regressor =
        LinearRegressor::new(vec![real_valued_column("a", 1), real_valued_column("b", 1)])
            .optimizer(SdcaOptimizer::new("example_id"))
            .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut half_and_half(labels).repeat(), 200).unwrap();

    // The bias shares the regularization of the other weights, which shifts
    // the centered solution (0.3, 0.1, -0.1) to (0.2, 0.2, 0.0).
    let bias = regressor.variable_value("linear/bias_weight").unwrap();
    let weights = regressor.weights().unwrap();
    assert_abs_diff_eq!(bias[[0, 0]], 0.2, epsilon = 0.05);
    assert_abs_diff_eq!(weights["linear/a/weight"][[0, 0]], 0.2, epsilon = 0.05);
    assert_abs_diff_eq!(weights["linear/b/weight"][[0, 0]], 0.0, epsilon = 0.05);
}

#[test]
fn test_sdca_bias_and_other_columns_centered() {
    let labels: Vec<f64> = (0..100)
        .map(|x| if x % 10 == 0 { 1.0 } else { 0.0 })
        .chain((0..100).map(|x| if x % 10 == 0 { -1.0 } else { 0.0 }))
        .collect();
    let mut regressor =
        LinearRegressor::new(vec![real_valued_column("a", 1), real_valued_column("b", 1)])
            .optimizer(SdcaOptimizer::new("example_id"))
            .config(RunConfig::new().random_seed(1));
    regressor.fit(&mut half_and_half(labels).repeat(), 100).unwrap();

    let bias = regressor.variable_value("linear/bias_weight").unwrap();
    let weights = regressor.weights().unwrap();
    assert_abs_diff_eq!(bias[[0, 0]], 0.0, epsilon = 0.05);
    assert_abs_diff_eq!(weights["linear/a/weight"][[0, 0]], 0.1, epsilon = 0.05);
    assert_abs_diff_eq!(weights["linear/b/weight"][[0, 0]], -0.1, epsilon = 0.05);
}

#[test]
fn test_sdca_duals_survive_checkpoints() {
    let model_dir = TempDir::new().unwrap();
    let batch = half_and_half(
        (0..20)
            .map(|x| if x % 5 == 0 { 1.0 } else { 0.0 })
            .collect(),
    );
    let columns = vec![real_valued_column("a", 1), real_valued_column("b", 1)];
    let build = || {
        LinearRegressor::new(columns.clone())
            .optimizer(SdcaOptimizer::new("example_id"))
            .model_dir(model_dir.path())
            .config(RunConfig::new().random_seed(1))
    };

    let mut continuous = LinearRegressor::new(columns.clone())
        .optimizer(SdcaOptimizer::new("example_id"))
        .config(RunConfig::new().random_seed(1));
    continuous.fit(&mut batch.clone().repeat(), 10).unwrap();

    build().fit(&mut batch.clone().repeat(), 5).unwrap();
    let mut resumed = build();
    resumed.fit(&mut batch.clone().repeat(), 5).unwrap();

    assert_eq!(resumed.global_step().unwrap(), 10);
    let a = continuous.predict(&batch).unwrap();
    let b = resumed.predict(&batch).unwrap();
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
    }
}
