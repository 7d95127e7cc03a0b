use linear_estimator::{
    load_iris, real_valued_column, Estimator, InputBatch, LinearClassifier, Metrics, RunConfig,
};
use ndarray::Axis;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Linear Classifier on Iris ===\n");

    let iris = load_iris()?;
    println!("Samples: {}, features: {}", iris.n_samples(), iris.n_features());

    let mut classifier = LinearClassifier::new(vec![real_valued_column("", 4)])
        .n_classes(3)
        .config(RunConfig::new().random_seed(42));
    classifier.fit_arrays(&iris.features, &iris.labels, 32, 500)?;

    let scores = classifier.evaluate(&mut iris.to_input().repeat(), Some(1), &Metrics::new())?;
    println!("\nMetrics:");
    for (name, value) in &scores {
        println!("  {}: {:.4}", name, value);
    }

    // One flower of each species.
    let rows = [0, 50, 100];
    let batch = InputBatch::new().with_dense("", iris.features.select(Axis(0), &rows));
    let proba = classifier.predict_proba(&batch)?;
    println!("\nClass probabilities:");
    for (row, p) in rows.iter().zip(proba.rows()) {
        println!("  row {:>3} (species {}): {:.3}", row, iris.labels[*row], p);
    }

    println!("\nBias per class: {:.4}", classifier.bias()?);
    Ok(())
}
